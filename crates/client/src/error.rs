//! Unified error handling with Sentry integration.
//!
//! Each concern has its own error enum. [`ClientError`] wraps them all for
//! callers that only need a notification message, and reports server-side
//! failures to Sentry.

use thiserror::Error;

use crate::api::ApiError;
use crate::auth::AuthError;
use crate::cart::CartError;
use crate::checkout::CheckoutError;
use crate::config::ConfigError;
use crate::payment::PaymentError;
use crate::reconcile::ReconcileError;
use crate::storage::StorageError;

/// Shown when the backend gives no usable message.
pub const GENERIC_MESSAGE: &str = "Something went wrong. Please try again.";

/// Any error the client can surface.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Cart error: {0}")]
    Cart(#[from] CartError),

    #[error("Reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("Checkout error: {0}")]
    Checkout(#[from] CheckoutError),

    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),
}

impl ClientError {
    /// The API error underneath, if any.
    #[must_use]
    pub const fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api(e)
            | Self::Auth(AuthError::Api(e))
            | Self::Cart(CartError::Api(e))
            | Self::Reconcile(ReconcileError::FetchFavorites(e))
            | Self::Checkout(CheckoutError::Api(e))
            | Self::Payment(PaymentError::Api(e)) => Some(e),
            _ => None,
        }
    }

    /// Text for a user-facing notification.
    ///
    /// Backend messages are shown verbatim; transport and server failures get
    /// a generic message.
    #[must_use]
    pub fn user_message(&self) -> String {
        if let Some(api) = self.api_error() {
            return api_message(api);
        }
        match self {
            Self::Auth(AuthError::InvalidCredentials) => "Invalid email or password".to_string(),
            Self::Auth(AuthError::InvalidEmail(_)) => "Invalid email address".to_string(),
            Self::Auth(AuthError::WeakPassword(msg) | AuthError::InvalidUsername(msg)) => {
                msg.clone()
            }
            Self::Cart(e) => e.to_string(),
            Self::Reconcile(e) => e.to_string(),
            Self::Checkout(e) => e.to_string(),
            Self::Payment(PaymentError::Provider(msg)) => msg.clone(),
            Self::Payment(e) => e.to_string(),
            Self::Config(_) | Self::Storage(_) | Self::Auth(_) | Self::Api(_) => {
                GENERIC_MESSAGE.to_string()
            }
        }
    }

    /// Whether this should be reported as a fault rather than a user error.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        match self.api_error() {
            Some(api) => api.is_server_error(),
            None => matches!(self, Self::Storage(_)),
        }
    }

    /// Log the error, capturing server-class failures to Sentry.
    pub fn report(&self) {
        if self.is_server_error() {
            let event_id = sentry::capture_error(self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Client error"
            );
        } else {
            tracing::warn!(error = %self, "Client error");
        }
    }
}

fn api_message(error: &ApiError) -> String {
    match error {
        ApiError::RateLimited(secs) => {
            format!("Too many requests. Please wait {secs} seconds and try again.")
        }
        ApiError::Unauthorized(None) => "Please log in again.".to_string(),
        _ => error
            .backend_message()
            .filter(|message| !message.trim().is_empty())
            .map_or_else(|| GENERIC_MESSAGE.to_string(), String::from),
    }
}

/// Set the Sentry user context from a user ID.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for a user action.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("cart", "Added to cart", Some(&[("product_id", "123")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
