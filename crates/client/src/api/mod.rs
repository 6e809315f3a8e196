//! REST backend access.
//!
//! # Architecture
//!
//! - One async trait per backend resource group, so stores depend only on the
//!   calls they make and tests can substitute in-memory fakes
//! - [`HttpApi`] implements every trait over `reqwest`, attaching the bearer
//!   token from the [`TokenStore`](crate::auth::TokenStore) to each request
//! - Backend error bodies are mined for a human-readable message, which the
//!   UI shows verbatim when present

mod http;
pub mod types;

#[cfg(test)]
pub(crate) mod fake;

pub use http::HttpApi;
pub use types::*;

use async_trait::async_trait;
use thiserror::Error;

use marketstall_core::{CartLineId, OrderId, ProductId};

use crate::cart::CartSnapshot;

/// Errors that can occur when talking to the backend.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport failure (connection refused, timeout, TLS, ...).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing, expired or rejected bearer token, or bad credentials.
    #[error("Unauthorized{}", .0.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Unauthorized(Option<String>),

    /// Rate limited by the backend.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Any other non-success status.
    #[error("API error: {status}{}", .message.as_deref().map(|m| format!(" - {m}")).unwrap_or_default())]
    Status {
        status: u16,
        message: Option<String>,
    },

    /// Response body did not match the expected shape.
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ApiError {
    /// Message supplied by the backend, if any.
    #[must_use]
    pub fn backend_message(&self) -> Option<&str> {
        match self {
            Self::NotFound(message) => Some(message.as_str()),
            Self::Unauthorized(message) | Self::Status { message, .. } => message.as_deref(),
            Self::Http(_) | Self::RateLimited(_) | Self::Parse(_) => None,
        }
    }

    /// Whether this is a 404.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether the failure is on the server or transport side rather than a
    /// rejected request.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        match self {
            Self::Http(_) | Self::Parse(_) => true,
            Self::Status { status, .. } => *status >= 500,
            Self::NotFound(_) | Self::Unauthorized(_) | Self::RateLimited(_) => false,
        }
    }
}

/// `/auth/*`.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, ApiError>;
    async fn register(&self, request: &RegisterRequest) -> Result<(), ApiError>;
}

/// `/cart` and `/cart/items/*`.
///
/// Mutations return the server's cart after the change, or `None` when the
/// server reports no cart left.
#[async_trait]
pub trait CartApi: Send + Sync {
    async fn fetch_cart(&self) -> Result<CartSnapshot, ApiError>;
    async fn add_item(
        &self,
        request: AddCartItemRequest,
    ) -> Result<Option<CartSnapshot>, ApiError>;
    async fn update_item(
        &self,
        line_id: CartLineId,
        request: UpdateCartItemRequest,
    ) -> Result<Option<CartSnapshot>, ApiError>;
    async fn remove_item(&self, line_id: CartLineId) -> Result<Option<CartSnapshot>, ApiError>;
    async fn clear_cart(&self) -> Result<(), ApiError>;
}

/// `/favorites` and `/favorites/{productId}`.
#[async_trait]
pub trait FavoritesApi: Send + Sync {
    async fn list_favorites(&self) -> Result<Vec<ProductSummary>, ApiError>;
    async fn add_favorite(&self, product_id: ProductId) -> Result<(), ApiError>;
    async fn remove_favorite(&self, product_id: ProductId) -> Result<(), ApiError>;
}

/// `/orders/*`.
#[async_trait]
pub trait OrderApi: Send + Sync {
    async fn create_order(&self, request: &CreateOrderRequest) -> Result<Order, ApiError>;
    async fn get_order(&self, order_id: OrderId) -> Result<Order, ApiError>;
    async fn create_payment_intent(&self, order_id: OrderId) -> Result<PaymentIntent, ApiError>;
}

/// `/products` and `/categories`.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn list_products(&self, query: &ProductQuery) -> Result<ProductPage, ApiError>;
    async fn get_product(&self, product_id: ProductId) -> Result<Product, ApiError>;
    async fn list_categories(&self) -> Result<Vec<Category>, ApiError>;
}

/// `/profile/me` and `/my-addresses`.
#[async_trait]
pub trait ProfileApi: Send + Sync {
    async fn get_profile(&self) -> Result<Profile, ApiError>;
    async fn list_addresses(&self) -> Result<Vec<Address>, ApiError>;
}
