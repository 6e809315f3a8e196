//! Shopping cart state.
//!
//! Two stores hold the same [`CartSnapshot`] shape:
//!
//! - [`LocalCart`] for anonymous visitors, persisted under `anonymousCart`
//! - [`RemoteCart`] for authenticated users, mirrored from `/cart`
//!
//! [`CartStore`] is the facade views talk to. It routes each call by the
//! current auth status and republishes the resulting snapshot on a `watch`
//! channel. Views never mutate a snapshot directly.

mod local;
mod remote;

pub use local::LocalCart;
pub use remote::RemoteCart;

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, instrument};

use marketstall_core::{CartId, CartLineId, ProductId, UserId};

use crate::api::ApiError;
use crate::auth::AuthState;
use crate::error::add_breadcrumb;

/// Errors returned by cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    /// Quantity must be at least one when adding.
    #[error("quantity must be at least 1 (got {0})")]
    InvalidQuantity(u32),

    /// Unit price must not be negative.
    #[error("unit price must not be negative (got {0})")]
    InvalidPrice(Decimal),

    /// Backend call failed. The in-memory cart is unchanged.
    #[error("backend error: {0}")]
    Api(#[from] ApiError),
}

/// One product line in a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub line_id: CartLineId,
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

impl CartLine {
    /// Recompute `total_price` from unit price and quantity.
    pub fn recompute(&mut self) {
        self.total_price = self.unit_price * Decimal::from(self.quantity);
    }
}

/// Name and price of a product being added, as known to the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceInfo {
    pub product_name: String,
    pub unit_price: Decimal,
}

/// A full cart.
///
/// After every mutation `grand_total` equals the sum of line totals and no two
/// lines share a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSnapshot {
    pub cart_id: CartId,
    pub owner_id: UserId,
    pub items: Vec<CartLine>,
    pub grand_total: Decimal,
}

impl CartSnapshot {
    /// A new, empty, never-stored anonymous cart.
    #[must_use]
    pub const fn empty_anonymous() -> Self {
        Self {
            cart_id: CartId::LOCAL,
            owner_id: UserId::ANONYMOUS,
            items: Vec::new(),
            grand_total: Decimal::ZERO,
        }
    }

    /// Whether the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total number of units across all lines.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|line| line.quantity).sum()
    }

    /// Line holding the given product.
    #[must_use]
    pub fn line_for_product(&self, product_id: ProductId) -> Option<&CartLine> {
        self.items.iter().find(|line| line.product_id == product_id)
    }

    /// Recompute every line total and the grand total.
    pub fn recompute_totals(&mut self) {
        for line in &mut self.items {
            line.recompute();
        }
        self.grand_total = self.items.iter().map(|line| line.total_price).sum();
    }

    /// Whether the stored totals match the lines.
    #[must_use]
    pub fn totals_consistent(&self) -> bool {
        let lines_ok = self
            .items
            .iter()
            .all(|line| line.total_price == line.unit_price * Decimal::from(line.quantity));
        let sum: Decimal = self
            .items
            .iter()
            .map(|line| line.unit_price * Decimal::from(line.quantity))
            .sum();
        lines_ok && sum == self.grand_total
    }
}

/// Cart facade that routes to the local or remote store by auth status.
///
/// Cheap to clone; clones share both stores and the published value.
#[derive(Clone)]
pub struct CartStore {
    auth: AuthState,
    local: Arc<LocalCart>,
    remote: Arc<RemoteCart>,
    published: Arc<watch::Sender<Option<CartSnapshot>>>,
}

impl CartStore {
    /// Create the facade. The published value starts as the local cart.
    #[must_use]
    pub fn new(auth: AuthState, local: LocalCart, remote: RemoteCart) -> Self {
        let (published, _) = watch::channel(local.snapshot());
        Self {
            auth,
            local: Arc::new(local),
            remote: Arc::new(remote),
            published: Arc::new(published),
        }
    }

    /// Current cart for the active mode.
    #[must_use]
    pub fn current(&self) -> Option<CartSnapshot> {
        self.published.borrow().clone()
    }

    /// Subscribe to cart changes. The current value is available immediately.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<CartSnapshot>> {
        self.published.subscribe()
    }

    /// Units in the current cart.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.published
            .borrow()
            .as_ref()
            .map_or(0, CartSnapshot::item_count)
    }

    /// Refresh the published cart from the active store.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Api` if the server cart cannot be fetched.
    pub async fn load(&self) -> Result<Option<CartSnapshot>, CartError> {
        let cart = if self.auth.is_authenticated() {
            self.remote.fetch().await?
        } else {
            self.local.snapshot()
        };
        Ok(self.publish(cart))
    }

    /// Add `quantity` units of a product.
    ///
    /// # Errors
    ///
    /// Returns a validation error for zero quantity or a negative price, or
    /// `CartError::Api` if the server rejects the change.
    #[instrument(skip(self, price), fields(product_id = %product_id))]
    pub async fn add(
        &self,
        product_id: ProductId,
        quantity: u32,
        price: PriceInfo,
    ) -> Result<Option<CartSnapshot>, CartError> {
        let product = product_id.to_string();
        add_breadcrumb("cart", "Added to cart", Some(&[("product_id", product.as_str())]));
        let cart = if self.auth.is_authenticated() {
            self.remote.add(product_id, quantity).await?
        } else {
            self.local.add(product_id, quantity, price)?
        };
        Ok(self.publish(cart))
    }

    /// Set a line's quantity; below one removes the line.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Api` if the server rejects the change.
    #[instrument(skip(self), fields(line_id = %line_id))]
    pub async fn update_quantity(
        &self,
        line_id: CartLineId,
        quantity: u32,
    ) -> Result<Option<CartSnapshot>, CartError> {
        let cart = if self.auth.is_authenticated() {
            self.remote.update_quantity(line_id, quantity).await?
        } else {
            self.local.update_quantity(line_id, quantity)
        };
        Ok(self.publish(cart))
    }

    /// Remove a line.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Api` if the server rejects the change.
    #[instrument(skip(self), fields(line_id = %line_id))]
    pub async fn remove(&self, line_id: CartLineId) -> Result<Option<CartSnapshot>, CartError> {
        let line = line_id.to_string();
        add_breadcrumb("cart", "Removed from cart", Some(&[("line_id", line.as_str())]));
        let cart = if self.auth.is_authenticated() {
            self.remote.remove(line_id).await?
        } else {
            self.local.remove(line_id)
        };
        Ok(self.publish(cart))
    }

    /// Empty the cart.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Api` if the server rejects the change.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<(), CartError> {
        if self.auth.is_authenticated() {
            self.remote.clear().await?;
        } else {
            self.local.clear();
        }
        self.publish(None);
        Ok(())
    }

    /// Drop the anonymous cart from memory and storage, returning what it held.
    ///
    /// Used at login: anonymous lines are not merged into the server cart.
    pub fn abandon_local(&self) -> Option<CartSnapshot> {
        let abandoned = self.local.snapshot();
        self.local.clear();
        abandoned
    }

    /// Forget the server cart after logout and fall back to the local one.
    pub fn reset_remote(&self) {
        self.remote.reset();
        self.publish(self.local.snapshot());
    }

    fn publish(&self, cart: Option<CartSnapshot>) -> Option<CartSnapshot> {
        debug!(
            lines = cart.as_ref().map_or(0, |c| c.items.len()),
            "Publishing cart"
        );
        self.published.send_replace(cart.clone());
        cart
    }
}
