//! Convenience macros for Deck.

/// Log an event with the given level, tagged with the calling module.
///
/// Additional `key => value` pairs are appended as `key=value` metadata,
/// which keeps transition logs greppable.
///
/// # Examples
///
/// ```
/// use deck_core::log_event;
/// use deck_core::utils::LogLevel;
///
/// log_event!(LogLevel::Info, "workflow started");
///
/// log_event!(LogLevel::Debug, "transition",
///     from => "Credentials",
///     trigger => "Next",
///     to => "Verify",
/// );
/// ```
#[macro_export]
macro_rules! log_event {
    ($level:expr, $message:expr) => {
        {
            match $level {
                $crate::utils::LogLevel::Error => log::error!("[{}] {}", module_path!(), $message),
                $crate::utils::LogLevel::Warning => log::warn!("[{}] {}", module_path!(), $message),
                $crate::utils::LogLevel::Info => log::info!("[{}] {}", module_path!(), $message),
                $crate::utils::LogLevel::Debug => log::debug!("[{}] {}", module_path!(), $message),
                $crate::utils::LogLevel::Trace => log::trace!("[{}] {}", module_path!(), $message),
            }
        }
    };

    ($level:expr, $message:expr, $($key:ident => $value:expr),+ $(,)?) => {
        {
            let metadata = vec![$(format!("{}={}", stringify!($key), $value)),+].join(" ");
            match $level {
                $crate::utils::LogLevel::Error => log::error!("[{}] {}: {}", module_path!(), $message, metadata),
                $crate::utils::LogLevel::Warning => log::warn!("[{}] {}: {}", module_path!(), $message, metadata),
                $crate::utils::LogLevel::Info => log::info!("[{}] {}: {}", module_path!(), $message, metadata),
                $crate::utils::LogLevel::Debug => log::debug!("[{}] {}: {}", module_path!(), $message, metadata),
                $crate::utils::LogLevel::Trace => log::trace!("[{}] {}: {}", module_path!(), $message, metadata),
            }
        }
    };
}

#[cfg(test)]
#[deny(unused_imports)]
mod tests {
    use crate::utils::LogLevel;

    #[test]
    fn test_levels_resolve_through_caller_import() {
        log_event!(LogLevel::Info, "workflow started");
        log_event!(LogLevel::Debug, "transition",
            from => "Credentials",
            to => "Verify",
        );
        let level = LogLevel::Trace;
        log_event!(level, "queued");
    }
}
