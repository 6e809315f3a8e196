//! In-memory backend for unit tests.
//!
//! Implements every API trait against a single mutable state, counts calls per
//! operation and can be told to fail specific operations.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;

use marketstall_core::{
    AddressId, CartId, CartLineId, CategoryId, OrderId, ProductId, Role, UserId,
};

use super::{
    AddCartItemRequest, Address, ApiError, AuthApi, CartApi, CatalogApi, Category,
    CreateOrderRequest, Credentials, FavoritesApi, LoginResponse, Order, OrderApi,
    PaymentIntent, Product, ProductPage, ProductQuery, ProductSummary, Profile, ProfileApi,
    RegisterRequest, UpdateCartItemRequest,
};
use crate::cart::{CartLine, CartSnapshot};

#[derive(Default)]
struct FakeState {
    products: BTreeMap<ProductId, Product>,
    categories: Vec<Category>,
    cart: Option<CartSnapshot>,
    favorites: Vec<ProductSummary>,
    orders: Vec<Order>,
    registered: Vec<String>,
    calls: HashMap<String, usize>,
    failing: HashSet<String>,
    failing_favorites: HashSet<ProductId>,
}

pub(crate) struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub(crate) const EMAIL: &'static str = "ada@example.com";
    pub(crate) const PASSWORD: &'static str = "correct-horse-battery";
    pub(crate) const TOKEN: &'static str = "fake-session-token";
    pub(crate) const USER_ID: i64 = 1;

    pub(crate) fn new() -> Self {
        let state = FakeState {
            categories: vec![Category {
                id: CategoryId::new(1),
                name: "Pantry".to_string(),
                description: None,
            }],
            ..FakeState::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count the call and fail it if requested.
    fn record(&self, op: &str) -> Result<MutexGuard<'_, FakeState>, ApiError> {
        let mut state = self.state();
        *state.calls.entry(op.to_string()).or_default() += 1;
        if state.failing.contains(op) {
            return Err(ApiError::Status {
                status: 500,
                message: Some(format!("{op} unavailable")),
            });
        }
        Ok(state)
    }

    pub(crate) fn calls(&self, op: &str) -> usize {
        self.state().calls.get(op).copied().unwrap_or(0)
    }

    pub(crate) fn fail(&self, op: &str) {
        self.state().failing.insert(op.to_string());
    }

    pub(crate) fn recover(&self, op: &str) {
        self.state().failing.remove(op);
    }

    pub(crate) fn fail_favorite(&self, product_id: i64) {
        self.state()
            .failing_favorites
            .insert(ProductId::new(product_id));
    }

    pub(crate) fn add_product(&self, id: i64, name: &str, price: Decimal) -> ProductSummary {
        let product = Product {
            id: ProductId::new(id),
            name: name.to_string(),
            description: None,
            price,
            stock: 10,
            image_url: None,
            category_id: Some(CategoryId::new(1)),
        };
        let summary = product.summary();
        self.state().products.insert(product.id, product);
        summary
    }

    pub(crate) fn seed_cart(&self, lines: &[(i64, u32)]) {
        let mut state = self.state();
        for &(product_id, quantity) in lines {
            add_line(&mut state, ProductId::new(product_id), quantity);
        }
    }

    pub(crate) fn seed_favorites(&self, product_ids: &[i64]) {
        let mut state = self.state();
        for &id in product_ids {
            if let Some(product) = state.products.get(&ProductId::new(id)) {
                let summary = product.summary();
                state.favorites.push(summary);
            }
        }
    }

    pub(crate) fn favorite_ids(&self) -> Vec<ProductId> {
        let mut ids: Vec<_> = self.state().favorites.iter().map(|p| p.id).collect();
        ids.sort();
        ids
    }

    pub(crate) fn server_cart(&self) -> Option<CartSnapshot> {
        self.state().cart.clone()
    }

    pub(crate) fn order_count(&self) -> usize {
        self.state().orders.len()
    }
}

fn add_line(state: &mut FakeState, product_id: ProductId, quantity: u32) -> Option<()> {
    let product = state.products.get(&product_id)?.clone();
    let cart = state.cart.get_or_insert_with(|| CartSnapshot {
        cart_id: CartId::new(1),
        owner_id: UserId::new(FakeBackend::USER_ID),
        items: Vec::new(),
        grand_total: Decimal::ZERO,
    });
    if let Some(line) = cart
        .items
        .iter_mut()
        .find(|line| line.product_id == product_id)
    {
        line.quantity += quantity;
    } else {
        let next = cart
            .items
            .iter()
            .map(|line| line.line_id.as_i64())
            .max()
            .unwrap_or(100)
            + 1;
        cart.items.push(CartLine {
            line_id: CartLineId::new(next),
            product_id,
            product_name: product.name,
            quantity,
            unit_price: product.price,
            total_price: Decimal::ZERO,
        });
    }
    cart.recompute_totals();
    Some(())
}

fn not_found(what: &str) -> ApiError {
    ApiError::NotFound(format!("{what} not found"))
}

#[async_trait]
impl AuthApi for FakeBackend {
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, ApiError> {
        self.record("login")?;
        if credentials.email.as_str() != Self::EMAIL
            || credentials.password.expose_secret() != Self::PASSWORD
        {
            return Err(ApiError::Unauthorized(Some("Bad credentials".to_string())));
        }
        Ok(LoginResponse {
            token: Self::TOKEN.to_string(),
            role: Some(Role::User),
            account_status: Some("ACTIVE".to_string()),
            user_id: Some(UserId::new(Self::USER_ID)),
            username: Some("ada".to_string()),
            email: Some(Self::EMAIL.to_string()),
        })
    }

    async fn register(&self, request: &RegisterRequest) -> Result<(), ApiError> {
        let mut state = self.record("register")?;
        let email = request.email.as_str().to_string();
        if email == Self::EMAIL || state.registered.contains(&email) {
            return Err(ApiError::Status {
                status: 409,
                message: Some("Email already in use".to_string()),
            });
        }
        state.registered.push(email);
        Ok(())
    }
}

#[async_trait]
impl CartApi for FakeBackend {
    async fn fetch_cart(&self) -> Result<CartSnapshot, ApiError> {
        let state = self.record("fetch_cart")?;
        state.cart.clone().ok_or_else(|| not_found("Cart"))
    }

    async fn add_item(
        &self,
        request: AddCartItemRequest,
    ) -> Result<Option<CartSnapshot>, ApiError> {
        let mut state = self.record("add_item")?;
        add_line(&mut state, request.product_id, request.quantity)
            .ok_or_else(|| not_found("Product"))?;
        Ok(state.cart.clone())
    }

    async fn update_item(
        &self,
        line_id: CartLineId,
        request: UpdateCartItemRequest,
    ) -> Result<Option<CartSnapshot>, ApiError> {
        let mut state = self.record("update_item")?;
        let cart = state.cart.as_mut().ok_or_else(|| not_found("Cart"))?;
        let line = cart
            .items
            .iter_mut()
            .find(|line| line.line_id == line_id)
            .ok_or_else(|| not_found("Cart item"))?;
        line.quantity = request.quantity;
        cart.recompute_totals();
        Ok(state.cart.clone())
    }

    async fn remove_item(&self, line_id: CartLineId) -> Result<Option<CartSnapshot>, ApiError> {
        let mut state = self.record("remove_item")?;
        let cart = state.cart.as_mut().ok_or_else(|| not_found("Cart"))?;
        cart.items.retain(|line| line.line_id != line_id);
        cart.recompute_totals();
        if cart.is_empty() {
            state.cart = None;
        }
        Ok(state.cart.clone())
    }

    async fn clear_cart(&self) -> Result<(), ApiError> {
        let mut state = self.record("clear_cart")?;
        state.cart = None;
        Ok(())
    }
}

#[async_trait]
impl FavoritesApi for FakeBackend {
    async fn list_favorites(&self) -> Result<Vec<ProductSummary>, ApiError> {
        let state = self.record("list_favorites")?;
        Ok(state.favorites.clone())
    }

    async fn add_favorite(&self, product_id: ProductId) -> Result<(), ApiError> {
        let mut state = self.record("add_favorite")?;
        if state.failing_favorites.contains(&product_id) {
            return Err(ApiError::Status {
                status: 500,
                message: Some(format!("could not favorite {product_id}")),
            });
        }
        if state.favorites.iter().any(|p| p.id == product_id) {
            return Ok(());
        }
        let summary = state
            .products
            .get(&product_id)
            .map(Product::summary)
            .ok_or_else(|| not_found("Product"))?;
        state.favorites.push(summary);
        Ok(())
    }

    async fn remove_favorite(&self, product_id: ProductId) -> Result<(), ApiError> {
        let mut state = self.record("remove_favorite")?;
        state.favorites.retain(|p| p.id != product_id);
        Ok(())
    }
}

#[async_trait]
impl OrderApi for FakeBackend {
    async fn create_order(&self, request: &CreateOrderRequest) -> Result<Order, ApiError> {
        let mut state = self.record("create_order")?;
        let total_amount = state
            .cart
            .as_ref()
            .map_or(Decimal::ZERO, |cart| cart.grand_total);
        let order = Order {
            id: OrderId::new(i64::try_from(state.orders.len()).unwrap_or(0) + 1),
            status: "PENDING".to_string(),
            total_amount,
            payment_method: request.payment_method,
            created_at: Utc::now(),
        };
        state.orders.push(order.clone());
        Ok(order)
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Order, ApiError> {
        let state = self.record("get_order")?;
        state
            .orders
            .iter()
            .find(|order| order.id == order_id)
            .cloned()
            .ok_or_else(|| not_found("Order"))
    }

    async fn create_payment_intent(&self, order_id: OrderId) -> Result<PaymentIntent, ApiError> {
        let state = self.record("create_payment_intent")?;
        if !state.orders.iter().any(|order| order.id == order_id) {
            return Err(not_found("Order"));
        }
        Ok(PaymentIntent {
            client_secret: format!("pi_{order_id}_secret"),
            payment_intent_id: Some(format!("pi_{order_id}")),
        })
    }
}

#[async_trait]
impl CatalogApi for FakeBackend {
    async fn list_products(&self, query: &ProductQuery) -> Result<ProductPage, ApiError> {
        let state = self.record("list_products")?;
        let needle = query.search.as_deref().map(str::to_lowercase);
        let matching: Vec<Product> = state
            .products
            .values()
            .filter(|p| query.category_id.is_none() || p.category_id == query.category_id)
            .filter(|p| {
                needle
                    .as_deref()
                    .is_none_or(|needle| p.name.to_lowercase().contains(needle))
            })
            .cloned()
            .collect();

        let size = query.size.unwrap_or(20).max(1);
        let total_elements = matching.len() as u64;
        let content = matching
            .into_iter()
            .skip((query.page * size) as usize)
            .take(size as usize)
            .collect();
        Ok(ProductPage {
            content,
            page: query.page,
            size,
            total_elements,
            total_pages: u32::try_from(total_elements.div_ceil(u64::from(size))).unwrap_or(0),
        })
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Product, ApiError> {
        let state = self.record("get_product")?;
        state
            .products
            .get(&product_id)
            .cloned()
            .ok_or_else(|| not_found("Product"))
    }

    async fn list_categories(&self) -> Result<Vec<Category>, ApiError> {
        let state = self.record("list_categories")?;
        Ok(state.categories.clone())
    }
}

#[async_trait]
impl ProfileApi for FakeBackend {
    async fn get_profile(&self) -> Result<Profile, ApiError> {
        self.record("get_profile")?;
        Ok(Profile {
            id: UserId::new(Self::USER_ID),
            username: "ada".to_string(),
            email: Self::EMAIL.to_string(),
            role: Role::User,
            account_status: Some("ACTIVE".to_string()),
        })
    }

    async fn list_addresses(&self) -> Result<Vec<Address>, ApiError> {
        self.record("list_addresses")?;
        Ok(vec![Address {
            id: AddressId::new(1),
            full_name: "Ada Lovelace".to_string(),
            street: "12 Analytical Row".to_string(),
            city: "London".to_string(),
            postal_code: "N1 9GU".to_string(),
            country: "GB".to_string(),
            phone: "+44 20 7946 0000".to_string(),
            is_default: true,
        }])
    }
}
