//! Narrow collaborator interfaces the demo workflow consumes, with
//! in-memory implementations.
//!
//! Both traits are `Send + Sync`: the login check runs on a worker thread,
//! and presenters may subscribe from anywhere.

use crate::config::UserRecord;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// An authenticated user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    pub display_name: String,
    pub session: Uuid,
}

/// Why a login attempt failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoginFailure {
    #[error("unknown user '{0}'")]
    UnknownUser(String),

    #[error("wrong password for '{0}'")]
    BadPassword(String),

    #[error("wrong verification code for '{0}'")]
    BadCode(String),
}

/// Credential and second-factor checks.
pub trait LoginService: Send + Sync {
    fn authenticate(&self, username: &str, password: &str) -> Result<Identity, LoginFailure>;

    fn verify_code(&self, identity: &Identity, code: &str) -> Result<(), LoginFailure>;
}

/// `LoginService` over a fixed user list.
pub struct InMemoryLoginService {
    users: HashMap<String, UserRecord>,
}

impl InMemoryLoginService {
    pub fn new(users: &[UserRecord]) -> Self {
        Self {
            users: users
                .iter()
                .map(|user| (user.username.clone(), user.clone()))
                .collect(),
        }
    }

    fn user(&self, username: &str) -> Result<&UserRecord, LoginFailure> {
        self.users
            .get(username)
            .ok_or_else(|| LoginFailure::UnknownUser(username.to_string()))
    }
}

impl LoginService for InMemoryLoginService {
    fn authenticate(&self, username: &str, password: &str) -> Result<Identity, LoginFailure> {
        let user = self.user(username)?;
        if user.password != password {
            log::debug!("Rejected password for '{}'", username);
            return Err(LoginFailure::BadPassword(username.to_string()));
        }
        Ok(Identity {
            username: user.username.clone(),
            display_name: user
                .display_name
                .clone()
                .unwrap_or_else(|| user.username.clone()),
            session: Uuid::new_v4(),
        })
    }

    fn verify_code(&self, identity: &Identity, code: &str) -> Result<(), LoginFailure> {
        let user = self.user(&identity.username)?;
        if user.code != code.trim() {
            return Err(LoginFailure::BadCode(identity.username.clone()));
        }
        Ok(())
    }
}

/// A message published on an endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub payload: serde_json::Value,
}

pub type Subscriber = Arc<dyn Fn(&Message) + Send + Sync>;

/// Topic-based publish/subscribe.
pub trait MessageEndpoint: Send + Sync {
    /// Deliver `payload` to the subscribers of `topic`; returns how many
    /// received it.
    fn publish(&self, topic: &str, payload: serde_json::Value) -> usize;

    fn subscribe(&self, topic: &str, subscriber: Subscriber);
}

/// Synchronous in-process `MessageEndpoint`
#[derive(Default)]
pub struct InMemoryEndpoint {
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
}

impl InMemoryEndpoint {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageEndpoint for InMemoryEndpoint {
    fn publish(&self, topic: &str, payload: serde_json::Value) -> usize {
        // Deliver outside the lock so subscribers may publish in turn.
        let targets = self
            .subscribers
            .lock()
            .get(topic)
            .cloned()
            .unwrap_or_default();
        let message = Message {
            topic: topic.to_string(),
            payload,
        };
        for subscriber in &targets {
            subscriber(&message);
        }
        log::debug!("Published '{}' to {} subscriber(s)", topic, targets.len());
        targets.len()
    }

    fn subscribe(&self, topic: &str, subscriber: Subscriber) {
        self.subscribers
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(subscriber);
    }
}
