//! Subcommands of `deckctl`.

pub mod graph;
pub mod login;
