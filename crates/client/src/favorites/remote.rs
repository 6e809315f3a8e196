//! Server-side favorites for authenticated users.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{instrument, warn};

use marketstall_core::ProductId;

use super::FavoriteSet;
use crate::api::{ApiError, FavoritesApi, ProductSummary};

/// Mirror of `/favorites`. Failed calls leave the set untouched.
pub struct RemoteFavorites {
    api: Arc<dyn FavoritesApi>,
    set: Mutex<FavoriteSet>,
}

impl RemoteFavorites {
    #[must_use]
    pub fn new(api: Arc<dyn FavoritesApi>) -> Self {
        Self {
            api,
            set: Mutex::new(FavoriteSet::new()),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> FavoriteSet {
        self.lock().clone()
    }

    /// Fetch the server set. A 404 reads as empty.
    ///
    /// # Errors
    ///
    /// Returns the API error for anything other than a 404.
    #[instrument(skip(self))]
    pub async fn fetch(&self) -> Result<FavoriteSet, ApiError> {
        let set = match self.api.list_favorites().await {
            Ok(products) => FavoriteSet::from(products),
            Err(e) if e.is_not_found() => FavoriteSet::new(),
            Err(e) => {
                warn!(error = %e, "Failed to fetch favorites");
                return Err(e);
            }
        };
        Ok(self.replace(set))
    }

    /// Favorite a product on the server.
    ///
    /// # Errors
    ///
    /// Returns the API error if the server refuses.
    pub async fn add(&self, product: ProductSummary) -> Result<FavoriteSet, ApiError> {
        self.push(product.id).await?;
        let mut set = self.lock();
        set.insert(product);
        Ok(set.clone())
    }

    /// Unfavorite a product on the server.
    ///
    /// # Errors
    ///
    /// Returns the API error if the server refuses.
    pub async fn remove(&self, product_id: ProductId) -> Result<FavoriteSet, ApiError> {
        self.api.remove_favorite(product_id).await?;
        let mut set = self.lock();
        set.remove(product_id);
        Ok(set.clone())
    }

    /// Remove every favorite, one request per product.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first failure.
    pub async fn clear(&self) -> Result<(), ApiError> {
        for product_id in self.snapshot().ids() {
            self.remove(product_id).await?;
        }
        Ok(())
    }

    /// Send one add to the server without touching the local copy.
    pub(crate) async fn push(&self, product_id: ProductId) -> Result<(), ApiError> {
        self.api.add_favorite(product_id).await
    }

    pub(crate) fn replace(&self, set: FavoriteSet) -> FavoriteSet {
        *self.lock() = set.clone();
        set
    }

    /// Forget the cached server set.
    pub fn reset(&self) {
        self.replace(FavoriteSet::new());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FavoriteSet> {
        self.set.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::api::fake::FakeBackend;
    use rust_decimal::Decimal;

    fn remote() -> (RemoteFavorites, Arc<FakeBackend>) {
        let backend = Arc::new(FakeBackend::new());
        (RemoteFavorites::new(backend.clone()), backend)
    }

    #[tokio::test]
    async fn test_fetch_replaces_set() {
        let (favorites, backend) = remote();
        backend.add_product(1, "Figs", Decimal::new(300, 2));
        backend.seed_favorites(&[1]);

        let set = favorites.fetch().await.unwrap();
        assert!(set.contains(ProductId::new(1)));
        assert_eq!(favorites.snapshot(), set);
    }

    #[tokio::test]
    async fn test_failed_add_leaves_set_unchanged() {
        let (favorites, backend) = remote();
        let figs = backend.add_product(1, "Figs", Decimal::new(300, 2));
        backend.fail("add_favorite");

        assert!(favorites.add(figs).await.is_err());
        assert!(favorites.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_clear_removes_each() {
        let (favorites, backend) = remote();
        backend.add_product(1, "Figs", Decimal::new(300, 2));
        backend.add_product(2, "Dates", Decimal::new(450, 2));
        backend.seed_favorites(&[1, 2]);
        favorites.fetch().await.unwrap();

        favorites.clear().await.unwrap();

        assert!(favorites.snapshot().is_empty());
        assert!(backend.favorite_ids().is_empty());
        assert_eq!(backend.calls("remove_favorite"), 2);
    }
}
