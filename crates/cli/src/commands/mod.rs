//! CLI subcommands.

pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod favorites;
pub mod session;

use marketstall_client::api::ApiError;
use marketstall_client::auth::AuthError;
use marketstall_client::cart::CartError;
use marketstall_client::checkout::CheckoutError;
use marketstall_client::error::ClientError;
use marketstall_core::{ProductId, RoleParseError};
use thiserror::Error;

/// Errors a command can end with.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("invalid role: {0}")]
    InvalidRole(#[from] RoleParseError),

    #[error("only user and seller accounts can be registered")]
    RestrictedRole,

    #[error("product {0} is not in the cart")]
    NotInCart(ProductId),
}

impl CommandError {
    /// Log the error; client faults also go to Sentry.
    pub fn report(&self) {
        match self {
            Self::Client(e) => e.report(),
            _ => tracing::warn!(error = %self, "Command rejected"),
        }
    }

    /// Text printed to the terminal.
    pub fn user_message(&self) -> String {
        match self {
            Self::Client(e) => e.user_message(),
            _ => self.to_string(),
        }
    }
}

impl From<ApiError> for CommandError {
    fn from(e: ApiError) -> Self {
        Self::Client(e.into())
    }
}

impl From<AuthError> for CommandError {
    fn from(e: AuthError) -> Self {
        Self::Client(e.into())
    }
}

impl From<CartError> for CommandError {
    fn from(e: CartError) -> Self {
        Self::Client(e.into())
    }
}

impl From<CheckoutError> for CommandError {
    fn from(e: CheckoutError) -> Self {
        Self::Client(e.into())
    }
}
