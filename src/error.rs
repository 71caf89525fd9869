//! Domain error taxonomy.
//!
//! Most plumbing errors travel as `anyhow::Error`; the variants here are the
//! conditions callers must distinguish (registration rejection, login
//! rejection). The HTTP layer recovers them with `downcast_ref` to pick
//! status codes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("username already exists: {0}")]
    UsernameTaken(String),

    #[error("invalid username or password")]
    InvalidCredentials,
}
