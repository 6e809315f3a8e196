//! Authentication error types.

use thiserror::Error;

use crate::api::ApiError;

/// Errors that can occur during login and registration.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Invalid email format.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] marketstall_core::EmailError),

    /// The backend rejected the credentials.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Password too weak or invalid.
    #[error("password validation failed: {0}")]
    WeakPassword(String),

    /// Username missing or too short.
    #[error("username validation failed: {0}")]
    InvalidUsername(String),

    /// The backend accepted the login but returned no token.
    #[error("login response carried no token")]
    MissingToken,

    /// Backend call failed.
    #[error("backend error: {0}")]
    Api(#[from] ApiError),
}
