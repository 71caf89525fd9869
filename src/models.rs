//! Core data models used throughout the chat pipeline.
//!
//! These types represent the users and conversation turns that flow through
//! the store, retrieval, and session layers.

use anyhow::{bail, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced a turn.
///
/// `System` turns are audit records: they carry the augmented prompt that
/// was sent to the model, plus the raw retrieved context for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => bail!("Unknown message role: {}", other),
        }
    }
}

/// One conversation turn, as persisted in the message log.
///
/// Turns are immutable once created. Display order is timestamp ascending;
/// retrieval order is timestamp descending (most recent first).
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub username: String,
    pub role: Role,
    pub text: String,
    /// Unix milliseconds.
    pub timestamp: i64,
    /// Raw retrieved texts, attached to audit (`system`) turns only.
    pub context: Option<Vec<String>>,
}

impl Message {
    pub fn new(username: &str, role: Role, text: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            role,
            text: text.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            context: None,
        }
    }

    pub fn with_context(mut self, texts: Vec<String>) -> Self {
        self.context = Some(texts);
        self
    }
}

/// Stored user credentials. Created on registration, never mutated.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct User {
    pub username: String,
    pub salt: String,
    pub password_hash: String,
    pub created_at: i64,
}
