//! Integration tests for the Marketstall storefront client.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p marketstall-integration-tests
//! ```
//!
//! Each test starts its own [`TestBackend`], an in-process `axum` server that
//! speaks the storefront REST API on an ephemeral port, and drives the real
//! `reqwest` transport against it.
//!
//! # Test Categories
//!
//! - `session_handover` - login, restart and logout over HTTP
//! - `transport` - headers, error bodies and status mapping
//! - `checkout_flow` - order placement and payment intents

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use marketstall_client::api::{
    AddCartItemRequest, Address, Category, CreateOrderRequest, LoginResponse, Order,
    PaymentIntent, Product, ProductPage, ProductSummary, Profile, UpdateCartItemRequest,
};
use marketstall_client::cart::{CartLine, CartSnapshot};
use marketstall_client::config::ClientConfig;
use marketstall_client::storage::KeyValueStorage;
use marketstall_client::Storefront;
use marketstall_core::{
    AddressId, CartId, CartLineId, CategoryId, OrderId, ProductId, Role, UserId,
};

/// Account the backend accepts.
pub const EMAIL: &str = "ada@example.com";
pub const PASSWORD: &str = "correct-horse-battery";
pub const USERNAME: &str = "ada";
pub const USER_ID: i64 = 7;

const DEFAULT_PAGE_SIZE: u32 = 20;

/// One request as seen by the backend.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub request_id: Option<String>,
    pub bearer: Option<String>,
}

#[derive(Default)]
struct BackendState {
    products: BTreeMap<ProductId, Product>,
    categories: Vec<Category>,
    accounts: BTreeSet<String>,
    cart: Option<CartSnapshot>,
    next_line_id: i64,
    favorites: BTreeSet<ProductId>,
    orders: BTreeMap<OrderId, Order>,
    addresses: Vec<Address>,
    requests: Vec<RecordedRequest>,
    canned: HashMap<(Method, String), (StatusCode, String)>,
}

#[derive(Clone)]
struct AppState {
    inner: Arc<Mutex<BackendState>>,
    token: Arc<str>,
}

impl AppState {
    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Error body in the backend's `{ "message": ... }` shape.
struct Failure(StatusCode, String);

impl Failure {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self(status, message.into())
    }

    fn not_found(what: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("{what} not found"))
    }
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "message": self.1 }))).into_response()
    }
}

type HandlerResult<T> = Result<T, Failure>;

/// In-process storefront backend.
///
/// The server task is aborted on drop.
pub struct TestBackend {
    addr: SocketAddr,
    state: AppState,
    server: JoinHandle<()>,
}

impl TestBackend {
    /// Bind an ephemeral port and start serving.
    ///
    /// # Errors
    ///
    /// Returns error if the listener cannot be bound.
    pub async fn start() -> std::io::Result<Self> {
        let state = AppState {
            inner: Arc::new(Mutex::new(BackendState {
                categories: vec![Category {
                    id: CategoryId::new(1),
                    name: "Pantry".to_string(),
                    description: Some("Dry goods".to_string()),
                }],
                accounts: BTreeSet::from([EMAIL.to_string()]),
                next_line_id: 500,
                addresses: vec![Address {
                    id: AddressId::new(3),
                    full_name: "Ada Lovelace".to_string(),
                    street: "12 St James's Square".to_string(),
                    city: "London".to_string(),
                    postal_code: "SW1Y 4JH".to_string(),
                    country: "United Kingdom".to_string(),
                    phone: "+44 20 7946 0018".to_string(),
                    is_default: true,
                }],
                ..BackendState::default()
            })),
            token: Arc::from(session_token()),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = router(state.clone());
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "Test backend stopped");
            }
        });

        Ok(Self {
            addr,
            state,
            server,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Client configuration pointing at this backend.
    ///
    /// # Panics
    ///
    /// If the loopback URL is rejected.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(&self.base_url()).expect("loopback URL is valid")
    }

    /// A storefront wired to this backend over HTTP.
    ///
    /// # Panics
    ///
    /// If the HTTP client cannot be built.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn storefront(&self, storage: Arc<dyn KeyValueStorage>) -> Storefront {
        Storefront::connect(self.config(), storage).expect("HTTP client builds")
    }

    /// The bearer token issued at login.
    #[must_use]
    pub fn token(&self) -> String {
        self.state.token.to_string()
    }

    pub fn add_product(&self, id: i64, name: &str, price: Decimal, stock: u32) {
        let product = Product {
            id: ProductId::new(id),
            name: name.to_string(),
            description: None,
            price,
            stock,
            image_url: None,
            category_id: Some(CategoryId::new(1)),
        };
        self.state.lock().products.insert(product.id, product);
    }

    /// Give the logged-in user a server cart.
    ///
    /// # Panics
    ///
    /// If a product is unknown or out of stock.
    pub fn seed_cart(&self, lines: &[(i64, u32)]) {
        let mut state = self.state.lock();
        for &(product_id, quantity) in lines {
            if let Err(Failure(_, message)) = add_line(&mut state, ProductId::new(product_id), quantity) {
                panic!("cannot seed cart with product {product_id}: {message}");
            }
        }
    }

    pub fn seed_favorites(&self, product_ids: &[i64]) {
        self.state
            .lock()
            .favorites
            .extend(product_ids.iter().copied().map(ProductId::new));
    }

    #[must_use]
    pub fn favorite_ids(&self) -> Vec<i64> {
        self.state
            .lock()
            .favorites
            .iter()
            .map(ProductId::as_i64)
            .collect()
    }

    #[must_use]
    pub fn server_cart(&self) -> Option<CartSnapshot> {
        self.state.lock().cart.clone()
    }

    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.state.lock().orders.values().cloned().collect()
    }

    /// Requests received so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    /// Number of requests matching `method` and `path`.
    #[must_use]
    pub fn count(&self, method: &Method, path: &str) -> usize {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.method == *method && r.path == path)
            .count()
    }

    /// Answer `method path` with a fixed status and raw body from now on.
    pub fn respond_with(&self, method: Method, path: &str, status: StatusCode, body: &str) {
        self.state
            .lock()
            .canned
            .insert((method, path.to_string()), (status, body.to_string()));
    }

    /// Undo [`respond_with`](Self::respond_with).
    pub fn restore(&self, method: Method, path: &str) {
        self.state.lock().canned.remove(&(method, path.to_string()));
    }
}

impl Drop for TestBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Unsigned JWT carrying the identity claims; the login body carries only the
/// token.
fn session_token() -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let claims = json!({
        "sub": USERNAME,
        "role": "ROLE_USER",
        "userId": USER_ID,
        "accountStatus": "ACTIVE",
    });
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.")
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/cart", get(get_cart).delete(clear_cart))
        .route("/cart/items", post(add_cart_item))
        .route("/cart/items/{line_id}", put(update_cart_item).delete(remove_cart_item))
        .route("/favorites", get(list_favorites))
        .route(
            "/favorites/{product_id}",
            post(add_favorite).delete(remove_favorite),
        )
        .route("/orders", post(create_order))
        .route("/orders/{order_id}", get(get_order))
        .route(
            "/orders/{order_id}/create-payment-intent",
            post(create_payment_intent),
        )
        .route("/products", get(list_products))
        .route("/products/{product_id}", get(get_product))
        .route("/categories", get(list_categories))
        .route("/profile/me", get(get_profile))
        .route("/my-addresses", get(list_addresses))
        .layer(middleware::from_fn_with_state(state.clone(), record))
        .with_state(state)
}

/// Record every request and serve canned responses.
async fn record(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let headers = request.headers();
    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let bearer = bearer(headers).map(String::from);

    let canned = {
        let mut guard = state.lock();
        guard.requests.push(RecordedRequest {
            method: method.clone(),
            path: path.clone(),
            request_id,
            bearer,
        });
        guard.canned.get(&(method, path)).cloned()
    };

    match canned {
        Some((status, body)) => (status, body).into_response(),
        None => next.run(request).await,
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn require_session(state: &AppState, headers: &HeaderMap) -> HandlerResult<()> {
    if bearer(headers) == Some(&*state.token) {
        Ok(())
    } else {
        Err(Failure::new(
            StatusCode::UNAUTHORIZED,
            "Full authentication is required to access this resource",
        ))
    }
}

// =============================================================================
// Auth
// =============================================================================

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

async fn login(State(state): State<AppState>, Json(body): Json<LoginBody>) -> HandlerResult<Json<LoginResponse>> {
    if body.email != EMAIL || body.password != PASSWORD {
        return Err(Failure::new(StatusCode::UNAUTHORIZED, "Bad credentials"));
    }
    Ok(Json(LoginResponse {
        token: state.token.to_string(),
        ..LoginResponse::default()
    }))
}

#[derive(Deserialize)]
struct RegisterBody {
    email: String,
    role: Role,
}

async fn register(State(state): State<AppState>, Json(body): Json<RegisterBody>) -> HandlerResult<StatusCode> {
    if body.role == Role::Admin {
        return Err(Failure::new(StatusCode::FORBIDDEN, "Admin accounts cannot be self-registered"));
    }
    if !state.lock().accounts.insert(body.email) {
        return Err(Failure::new(StatusCode::CONFLICT, "Email is already in use"));
    }
    Ok(StatusCode::CREATED)
}

// =============================================================================
// Cart
// =============================================================================

fn add_line(state: &mut BackendState, product_id: ProductId, quantity: u32) -> HandlerResult<()> {
    let product = state
        .products
        .get(&product_id)
        .cloned()
        .ok_or_else(|| Failure::not_found("Product"))?;

    let next_line_id = state.next_line_id + 1;
    let cart = state.cart.get_or_insert_with(|| CartSnapshot {
        cart_id: CartId::new(900),
        owner_id: UserId::new(USER_ID),
        items: Vec::new(),
        grand_total: Decimal::ZERO,
    });

    let held = cart
        .line_for_product(product_id)
        .map_or(0, |line| line.quantity);
    if held.saturating_add(quantity) > product.stock {
        return Err(Failure::new(
            StatusCode::BAD_REQUEST,
            format!("Only {} left in stock", product.stock),
        ));
    }

    if let Some(line) = cart.items.iter_mut().find(|line| line.product_id == product_id) {
        line.quantity += quantity;
    } else {
        state.next_line_id = next_line_id;
        cart.items.push(CartLine {
            line_id: CartLineId::new(next_line_id),
            product_id,
            product_name: product.name,
            quantity,
            unit_price: product.price,
            total_price: Decimal::ZERO,
        });
    }
    cart.recompute_totals();
    Ok(())
}

/// Current cart as a JSON body, or an empty 204 when none is left.
fn cart_response(state: &mut BackendState) -> Response {
    if state.cart.as_ref().is_some_and(CartSnapshot::is_empty) {
        state.cart = None;
    }
    match &state.cart {
        Some(cart) => Json(cart).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn get_cart(State(state): State<AppState>, headers: HeaderMap) -> HandlerResult<Json<CartSnapshot>> {
    require_session(&state, &headers)?;
    state
        .lock()
        .cart
        .clone()
        .map(Json)
        .ok_or_else(|| Failure::not_found("Cart"))
}

async fn add_cart_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AddCartItemRequest>,
) -> HandlerResult<Response> {
    require_session(&state, &headers)?;
    if body.quantity == 0 {
        return Err(Failure::new(StatusCode::BAD_REQUEST, "Quantity must be at least 1"));
    }
    let mut guard = state.lock();
    add_line(&mut guard, body.product_id, body.quantity)?;
    Ok(cart_response(&mut guard))
}

async fn update_cart_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(line_id): Path<i64>,
    Json(body): Json<UpdateCartItemRequest>,
) -> HandlerResult<Response> {
    require_session(&state, &headers)?;
    let mut guard = state.lock();
    let stock: BTreeMap<ProductId, u32> = guard
        .products
        .values()
        .map(|product| (product.id, product.stock))
        .collect();
    let line = guard
        .cart
        .as_mut()
        .and_then(|cart| cart.items.iter_mut().find(|line| line.line_id.as_i64() == line_id))
        .ok_or_else(|| Failure::not_found("Cart item"))?;
    if stock.get(&line.product_id).is_some_and(|&s| body.quantity > s) {
        return Err(Failure::new(StatusCode::BAD_REQUEST, "Quantity exceeds stock"));
    }
    line.quantity = body.quantity;
    if let Some(cart) = guard.cart.as_mut() {
        cart.items.retain(|line| line.quantity > 0);
        cart.recompute_totals();
    }
    Ok(cart_response(&mut guard))
}

async fn remove_cart_item(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(line_id): Path<i64>,
) -> HandlerResult<Response> {
    require_session(&state, &headers)?;
    let mut guard = state.lock();
    let cart = guard.cart.as_mut().ok_or_else(|| Failure::not_found("Cart"))?;
    let before = cart.items.len();
    cart.items.retain(|line| line.line_id.as_i64() != line_id);
    if cart.items.len() == before {
        return Err(Failure::not_found("Cart item"));
    }
    cart.recompute_totals();
    Ok(cart_response(&mut guard))
}

async fn clear_cart(State(state): State<AppState>, headers: HeaderMap) -> HandlerResult<StatusCode> {
    require_session(&state, &headers)?;
    state.lock().cart = None;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Favorites
// =============================================================================

async fn list_favorites(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> HandlerResult<Json<Vec<ProductSummary>>> {
    require_session(&state, &headers)?;
    let guard = state.lock();
    Ok(Json(
        guard
            .favorites
            .iter()
            .filter_map(|id| guard.products.get(id))
            .map(Product::summary)
            .collect(),
    ))
}

async fn add_favorite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(product_id): Path<i64>,
) -> HandlerResult<StatusCode> {
    require_session(&state, &headers)?;
    let product_id = ProductId::new(product_id);
    let mut guard = state.lock();
    if !guard.products.contains_key(&product_id) {
        return Err(Failure::not_found("Product"));
    }
    guard.favorites.insert(product_id);
    Ok(StatusCode::OK)
}

async fn remove_favorite(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(product_id): Path<i64>,
) -> HandlerResult<StatusCode> {
    require_session(&state, &headers)?;
    state.lock().favorites.remove(&ProductId::new(product_id));
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Orders
// =============================================================================

async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateOrderRequest>,
) -> HandlerResult<Json<Order>> {
    require_session(&state, &headers)?;
    let mut guard = state.lock();
    let total = match &guard.cart {
        Some(cart) if !cart.is_empty() => cart.grand_total,
        _ => return Err(Failure::new(StatusCode::BAD_REQUEST, "Cart is empty")),
    };

    let id = OrderId::new(1000 + i64::try_from(guard.orders.len()).unwrap_or(i64::MAX - 1000));
    let order = Order {
        id,
        status: "PENDING".to_string(),
        total_amount: total,
        payment_method: body.payment_method,
        created_at: Utc::now(),
    };
    guard.orders.insert(id, order.clone());
    Ok(Json(order))
}

async fn get_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<i64>,
) -> HandlerResult<Json<Order>> {
    require_session(&state, &headers)?;
    state
        .lock()
        .orders
        .get(&OrderId::new(order_id))
        .cloned()
        .map(Json)
        .ok_or_else(|| Failure::not_found("Order"))
}

async fn create_payment_intent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<i64>,
) -> HandlerResult<Json<PaymentIntent>> {
    require_session(&state, &headers)?;
    if !state.lock().orders.contains_key(&OrderId::new(order_id)) {
        return Err(Failure::not_found("Order"));
    }
    Ok(Json(PaymentIntent {
        client_secret: format!("pi_{order_id}_secret_test"),
        payment_intent_id: Some(format!("pi_{order_id}")),
    }))
}

// =============================================================================
// Catalog
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductFilter {
    #[serde(default)]
    page: u32,
    size: Option<u32>,
    category_id: Option<i64>,
    search: Option<String>,
}

async fn list_products(
    State(state): State<AppState>,
    Query(filter): Query<ProductFilter>,
) -> Json<ProductPage> {
    let guard = state.lock();
    let search = filter.search.map(|s| s.to_lowercase());
    let matching: Vec<Product> = guard
        .products
        .values()
        .filter(|p| {
            filter
                .category_id
                .is_none_or(|id| p.category_id == Some(CategoryId::new(id)))
        })
        .filter(|p| {
            search
                .as_deref()
                .is_none_or(|term| p.name.to_lowercase().contains(term))
        })
        .cloned()
        .collect();

    let size = filter.size.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
    let total = u32::try_from(matching.len()).unwrap_or(u32::MAX);
    let skip = usize::try_from(filter.page.saturating_mul(size)).unwrap_or(usize::MAX);
    let take = usize::try_from(size).unwrap_or(usize::MAX);
    let content = matching.into_iter().skip(skip).take(take).collect();
    Json(ProductPage {
        content,
        page: filter.page,
        size,
        total_elements: u64::from(total),
        total_pages: total.div_ceil(size),
    })
}

async fn get_product(State(state): State<AppState>, Path(product_id): Path<i64>) -> HandlerResult<Json<Product>> {
    state
        .lock()
        .products
        .get(&ProductId::new(product_id))
        .cloned()
        .map(Json)
        .ok_or_else(|| Failure::not_found("Product"))
}

async fn list_categories(State(state): State<AppState>) -> Json<Vec<Category>> {
    Json(state.lock().categories.clone())
}

// =============================================================================
// Profile
// =============================================================================

async fn get_profile(State(state): State<AppState>, headers: HeaderMap) -> HandlerResult<Json<Profile>> {
    require_session(&state, &headers)?;
    Ok(Json(Profile {
        id: UserId::new(USER_ID),
        username: USERNAME.to_string(),
        email: EMAIL.to_string(),
        role: Role::User,
        account_status: Some("ACTIVE".to_string()),
    }))
}

async fn list_addresses(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> HandlerResult<Json<Vec<Address>>> {
    require_session(&state, &headers)?;
    Ok(Json(state.lock().addresses.clone()))
}
