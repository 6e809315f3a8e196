//! Favorite products.
//!
//! Same split as the cart: [`LocalFavorites`] persists under `userFavorites`
//! for anonymous visitors, [`RemoteFavorites`] mirrors `/favorites` once
//! logged in, and [`FavoritesStore`] routes between them by auth status.

mod local;
mod remote;

pub use local::LocalFavorites;
pub use remote::RemoteFavorites;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, instrument};

use marketstall_core::ProductId;

use crate::api::{ApiError, ProductSummary};
use crate::auth::AuthState;
use crate::error::add_breadcrumb;

/// Set of favorite products keyed by product id.
///
/// Serialized as a plain list of product summaries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<ProductSummary>", into = "Vec<ProductSummary>")]
pub struct FavoriteSet {
    items: BTreeMap<ProductId, ProductSummary>,
}

impl FavoriteSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a product, replacing any summary already stored for its id.
    pub fn insert(&mut self, product: ProductSummary) {
        self.items.insert(product.id, product);
    }

    /// Remove a product. Returns whether it was present.
    pub fn remove(&mut self, product_id: ProductId) -> bool {
        self.items.remove(&product_id).is_some()
    }

    #[must_use]
    pub fn contains(&self, product_id: ProductId) -> bool {
        self.items.contains_key(&product_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProductSummary> {
        self.items.values()
    }

    /// Product ids in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<ProductId> {
        self.items.keys().copied().collect()
    }

    /// Products in `self` whose id is not in `other`.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        self.items
            .values()
            .filter(|product| !other.contains(product.id))
            .cloned()
            .collect()
    }

    /// Products in either set. Summaries from `self` win on overlap.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut merged = other.clone();
        for product in self.items.values() {
            merged.insert(product.clone());
        }
        merged
    }
}

impl FromIterator<ProductSummary> for FavoriteSet {
    fn from_iter<I: IntoIterator<Item = ProductSummary>>(iter: I) -> Self {
        let mut set = Self::new();
        for product in iter {
            set.insert(product);
        }
        set
    }
}

impl From<Vec<ProductSummary>> for FavoriteSet {
    fn from(products: Vec<ProductSummary>) -> Self {
        products.into_iter().collect()
    }
}

impl From<FavoriteSet> for Vec<ProductSummary> {
    fn from(set: FavoriteSet) -> Self {
        set.items.into_values().collect()
    }
}

/// Favorites facade that routes to the local or remote store by auth status.
#[derive(Clone)]
pub struct FavoritesStore {
    auth: AuthState,
    local: Arc<LocalFavorites>,
    remote: Arc<RemoteFavorites>,
    published: Arc<watch::Sender<FavoriteSet>>,
}

impl FavoritesStore {
    /// Create the facade. The published value starts as the local set.
    #[must_use]
    pub fn new(auth: AuthState, local: LocalFavorites, remote: RemoteFavorites) -> Self {
        let (published, _) = watch::channel(local.snapshot());
        Self {
            auth,
            local: Arc::new(local),
            remote: Arc::new(remote),
            published: Arc::new(published),
        }
    }

    #[must_use]
    pub fn current(&self) -> FavoriteSet {
        self.published.borrow().clone()
    }

    /// Subscribe to changes. The current value is available immediately.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<FavoriteSet> {
        self.published.subscribe()
    }

    #[must_use]
    pub fn is_favorite(&self, product_id: ProductId) -> bool {
        self.published.borrow().contains(product_id)
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.published.borrow().len()
    }

    /// Refresh the published set from the active store.
    ///
    /// # Errors
    ///
    /// Returns the API error if the server favorites cannot be fetched.
    pub async fn load(&self) -> Result<FavoriteSet, ApiError> {
        let set = if self.auth.is_authenticated() {
            self.remote.fetch().await?
        } else {
            self.local.snapshot()
        };
        Ok(self.publish(set))
    }

    /// Mark a product as favorite.
    ///
    /// # Errors
    ///
    /// Returns the API error if the server refuses.
    #[instrument(skip(self, product), fields(product_id = %product.id))]
    pub async fn add(&self, product: ProductSummary) -> Result<FavoriteSet, ApiError> {
        let id = product.id.to_string();
        add_breadcrumb("favorites", "Added favorite", Some(&[("product_id", id.as_str())]));
        let set = if self.auth.is_authenticated() {
            self.remote.add(product).await?
        } else {
            self.local.add(product)
        };
        Ok(self.publish(set))
    }

    /// Unmark a product.
    ///
    /// # Errors
    ///
    /// Returns the API error if the server refuses.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn remove(&self, product_id: ProductId) -> Result<FavoriteSet, ApiError> {
        let id = product_id.to_string();
        add_breadcrumb("favorites", "Removed favorite", Some(&[("product_id", id.as_str())]));
        let set = if self.auth.is_authenticated() {
            self.remote.remove(product_id).await?
        } else {
            self.local.remove(product_id)
        };
        Ok(self.publish(set))
    }

    /// Add the product if absent, remove it otherwise. Returns whether it is
    /// now a favorite.
    ///
    /// # Errors
    ///
    /// Returns the API error if the server refuses.
    pub async fn toggle(&self, product: ProductSummary) -> Result<bool, ApiError> {
        if self.is_favorite(product.id) {
            self.remove(product.id).await?;
            Ok(false)
        } else {
            self.add(product).await?;
            Ok(true)
        }
    }

    /// Remove every favorite.
    ///
    /// # Errors
    ///
    /// Returns the first API error; products already removed stay removed.
    pub async fn clear(&self) -> Result<(), ApiError> {
        if self.auth.is_authenticated() {
            let result = self.remote.clear().await;
            self.publish(self.remote.snapshot());
            result
        } else {
            self.local.clear();
            self.publish(FavoriteSet::new());
            Ok(())
        }
    }

    /// Forget server favorites after logout and fall back to the local set.
    pub fn reset_remote(&self) {
        self.remote.reset();
        self.publish(self.local.snapshot());
    }

    pub(crate) fn local(&self) -> &LocalFavorites {
        &self.local
    }

    pub(crate) fn remote(&self) -> &RemoteFavorites {
        &self.remote
    }

    pub(crate) fn publish(&self, set: FavoriteSet) -> FavoriteSet {
        debug!(count = set.len(), "Publishing favorites");
        self.published.send_replace(set.clone());
        set
    }
}
