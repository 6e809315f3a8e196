//! `reqwest` implementation of the backend traits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use uuid::Uuid;

use marketstall_core::{CartLineId, OrderId, ProductId};

use super::{
    AddCartItemRequest, Address, ApiError, AuthApi, CartApi, CatalogApi, Category, CreateOrderRequest,
    Credentials, FavoritesApi, LoginResponse, Order, OrderApi, PaymentIntent, Product, ProductPage,
    ProductQuery, ProductSummary, Profile, ProfileApi, RegisterRequest, UpdateCartItemRequest,
};
use crate::auth::TokenStore;
use crate::cart::CartSnapshot;

/// The HTTP header name for request IDs.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest backend body excerpt kept in logs.
const LOG_BODY_LIMIT: usize = 500;

/// REST client for the storefront backend.
///
/// Cheap to clone; clones share the connection pool and token store.
#[derive(Clone)]
pub struct HttpApi {
    inner: Arc<HttpApiInner>,
}

struct HttpApiInner {
    client: reqwest::Client,
    base_url: String,
    tokens: TokenStore,
}

impl HttpApi {
    /// Create a client for the backend at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(base_url: &str, timeout: Duration, tokens: TokenStore) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            inner: Arc::new(HttpApiInner {
                client,
                base_url: base_url.trim_end_matches('/').to_string(),
                tokens,
            }),
        })
    }

    /// Base URL requests are resolved against.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Start a request, attaching the bearer token when logged in.
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{path}", self.inner.base_url);
        let request_id = Uuid::new_v4().to_string();
        debug!(%method, %url, %request_id, "Backend request");

        let builder = self
            .inner
            .client
            .request(method, url)
            .header(REQUEST_ID_HEADER, request_id);

        match self.inner.tokens.token() {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    /// Send a request and decode a JSON body.
    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let body = self.send_raw(request).await?;
        decode(&body)
    }

    /// Send a request and decode the body if there is one.
    async fn send_optional<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<Option<T>, ApiError> {
        let body = self.send_raw(request).await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        decode(&body).map(Some)
    }

    /// Send a request, discarding any body.
    async fn send_empty(&self, request: RequestBuilder) -> Result<(), ApiError> {
        self.send_raw(request).await.map(|_| ())
    }

    async fn send_raw(&self, request: RequestBuilder) -> Result<String, ApiError> {
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(ApiError::RateLimited(retry_after));
        }

        let body = response.text().await?;

        if status.is_success() {
            return Ok(body);
        }

        let message = extract_message(&body);
        if status.is_server_error() {
            tracing::error!(
                status = %status,
                body = %body.chars().take(LOG_BODY_LIMIT).collect::<String>(),
                "Backend returned server error"
            );
        }

        Err(match status {
            StatusCode::NOT_FOUND => {
                ApiError::NotFound(message.unwrap_or_else(|| "resource not found".to_string()))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Unauthorized(message),
            _ => ApiError::Status {
                status: status.as_u16(),
                message,
            },
        })
    }
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|e| {
        tracing::error!(
            error = %e,
            body = %body.chars().take(LOG_BODY_LIMIT).collect::<String>(),
            "Failed to parse backend response"
        );
        ApiError::Parse(e)
    })
}

/// Best-effort extraction of a human-readable message from an error body.
///
/// Looks at `message`, `error` and `detail` in that order. Non-JSON bodies
/// yield nothing so HTML error pages never reach the user.
fn extract_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "error", "detail"]
        .iter()
        .filter_map(|key| value.get(key).and_then(serde_json::Value::as_str))
        .map(str::trim)
        .find(|message| !message.is_empty())
        .map(String::from)
}

/// Drop carts the server reports with no lines.
fn non_empty(cart: Option<CartSnapshot>) -> Option<CartSnapshot> {
    cart.filter(|cart| !cart.items.is_empty())
}

#[async_trait]
impl AuthApi for HttpApi {
    #[instrument(skip(self, credentials), fields(email = %credentials.email))]
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, ApiError> {
        let body = serde_json::json!({
            "email": credentials.email.as_str(),
            "password": credentials.password.expose_secret(),
        });
        self.send_json(self.request(Method::POST, "/auth/login").json(&body))
            .await
    }

    #[instrument(skip(self, request), fields(email = %request.email))]
    async fn register(&self, request: &RegisterRequest) -> Result<(), ApiError> {
        let body = serde_json::json!({
            "username": request.username,
            "email": request.email.as_str(),
            "password": request.password.expose_secret(),
            "role": request.role,
        });
        self.send_empty(self.request(Method::POST, "/auth/register").json(&body))
            .await
    }
}

#[async_trait]
impl CartApi for HttpApi {
    #[instrument(skip(self))]
    async fn fetch_cart(&self) -> Result<CartSnapshot, ApiError> {
        self.send_json(self.request(Method::GET, "/cart")).await
    }

    #[instrument(skip(self))]
    async fn add_item(
        &self,
        request: AddCartItemRequest,
    ) -> Result<Option<CartSnapshot>, ApiError> {
        self.send_optional(self.request(Method::POST, "/cart/items").json(&request))
            .await
            .map(non_empty)
    }

    #[instrument(skip(self))]
    async fn update_item(
        &self,
        line_id: CartLineId,
        request: UpdateCartItemRequest,
    ) -> Result<Option<CartSnapshot>, ApiError> {
        let path = format!("/cart/items/{line_id}");
        self.send_optional(self.request(Method::PUT, &path).json(&request))
            .await
            .map(non_empty)
    }

    #[instrument(skip(self))]
    async fn remove_item(&self, line_id: CartLineId) -> Result<Option<CartSnapshot>, ApiError> {
        let path = format!("/cart/items/{line_id}");
        self.send_optional(self.request(Method::DELETE, &path))
            .await
            .map(non_empty)
    }

    #[instrument(skip(self))]
    async fn clear_cart(&self) -> Result<(), ApiError> {
        self.send_empty(self.request(Method::DELETE, "/cart")).await
    }
}

#[async_trait]
impl FavoritesApi for HttpApi {
    #[instrument(skip(self))]
    async fn list_favorites(&self) -> Result<Vec<ProductSummary>, ApiError> {
        self.send_json(self.request(Method::GET, "/favorites")).await
    }

    #[instrument(skip(self))]
    async fn add_favorite(&self, product_id: ProductId) -> Result<(), ApiError> {
        let path = format!("/favorites/{product_id}");
        self.send_empty(self.request(Method::POST, &path)).await
    }

    #[instrument(skip(self))]
    async fn remove_favorite(&self, product_id: ProductId) -> Result<(), ApiError> {
        let path = format!("/favorites/{product_id}");
        self.send_empty(self.request(Method::DELETE, &path)).await
    }
}

#[async_trait]
impl OrderApi for HttpApi {
    #[instrument(skip(self, request))]
    async fn create_order(&self, request: &CreateOrderRequest) -> Result<Order, ApiError> {
        self.send_json(self.request(Method::POST, "/orders").json(request))
            .await
    }

    #[instrument(skip(self))]
    async fn get_order(&self, order_id: OrderId) -> Result<Order, ApiError> {
        let path = format!("/orders/{order_id}");
        self.send_json(self.request(Method::GET, &path)).await
    }

    #[instrument(skip(self))]
    async fn create_payment_intent(&self, order_id: OrderId) -> Result<PaymentIntent, ApiError> {
        let path = format!("/orders/{order_id}/create-payment-intent");
        self.send_json(self.request(Method::POST, &path)).await
    }
}

#[async_trait]
impl CatalogApi for HttpApi {
    #[instrument(skip(self))]
    async fn list_products(&self, query: &ProductQuery) -> Result<ProductPage, ApiError> {
        let query_string = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(query.to_pairs())
            .finish();
        let path = format!("/products?{query_string}");
        self.send_json(self.request(Method::GET, &path)).await
    }

    #[instrument(skip(self))]
    async fn get_product(&self, product_id: ProductId) -> Result<Product, ApiError> {
        let path = format!("/products/{product_id}");
        self.send_json(self.request(Method::GET, &path)).await
    }

    #[instrument(skip(self))]
    async fn list_categories(&self) -> Result<Vec<Category>, ApiError> {
        self.send_json(self.request(Method::GET, "/categories")).await
    }
}

#[async_trait]
impl ProfileApi for HttpApi {
    #[instrument(skip(self))]
    async fn get_profile(&self) -> Result<Profile, ApiError> {
        self.send_json(self.request(Method::GET, "/profile/me")).await
    }

    #[instrument(skip(self))]
    async fn list_addresses(&self) -> Result<Vec<Address>, ApiError> {
        self.send_json(self.request(Method::GET, "/my-addresses")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_message_prefers_message_field() {
        let body = r#"{"error":"Bad Request","message":"Quantity exceeds stock"}"#;
        assert_eq!(
            extract_message(body).as_deref(),
            Some("Quantity exceeds stock")
        );
    }

    #[test]
    fn test_extract_message_falls_back_to_error_field() {
        let body = r#"{"message":"  ","error":"Email already in use"}"#;
        assert_eq!(
            extract_message(body).as_deref(),
            Some("Email already in use")
        );
    }

    #[test]
    fn test_extract_message_ignores_non_json() {
        assert_eq!(extract_message("<html>502 Bad Gateway</html>"), None);
        assert_eq!(extract_message(""), None);
        assert_eq!(extract_message(r#"{"status":500}"#), None);
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let tokens = TokenStore::new(Arc::new(crate::storage::NullStorage));
        let api = HttpApi::new("http://localhost:8080/api/", Duration::from_secs(5), tokens)
            .expect("client builds");
        assert_eq!(api.base_url(), "http://localhost:8080/api");
    }
}
