//! Server-side cart for authenticated users.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{instrument, warn};

use marketstall_core::{CartLineId, ProductId};

use super::{CartError, CartSnapshot};
use crate::api::{AddCartItemRequest, ApiError, CartApi, UpdateCartItemRequest};

/// Mirror of the backend cart.
///
/// Every mutation goes to the server first; the local copy is replaced only
/// with what the server returns. A failed call leaves it untouched.
pub struct RemoteCart {
    api: Arc<dyn CartApi>,
    cart: Mutex<Option<CartSnapshot>>,
}

impl RemoteCart {
    #[must_use]
    pub fn new(api: Arc<dyn CartApi>) -> Self {
        Self {
            api,
            cart: Mutex::new(None),
        }
    }

    /// Last cart received from the server.
    #[must_use]
    pub fn snapshot(&self) -> Option<CartSnapshot> {
        self.cart
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fetch the server cart. A 404 or an empty cart reads as `None`.
    ///
    /// # Errors
    ///
    /// Returns the API error for anything other than a 404.
    #[instrument(skip(self))]
    pub async fn fetch(&self) -> Result<Option<CartSnapshot>, ApiError> {
        let cart = match self.api.fetch_cart().await {
            Ok(cart) if cart.is_empty() => None,
            Ok(cart) => {
                if !cart.totals_consistent() {
                    warn!(cart_id = %cart.cart_id, "Server cart totals do not add up");
                }
                Some(cart)
            }
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                warn!(error = %e, "Failed to fetch cart");
                return Err(e);
            }
        };
        Ok(self.replace(cart))
    }

    /// Add units of a product on the server.
    ///
    /// # Errors
    ///
    /// Returns `CartError::InvalidQuantity` for zero quantity without calling
    /// the backend, or `CartError::Api` if the server refuses.
    pub async fn add(
        &self,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Option<CartSnapshot>, CartError> {
        if quantity < 1 {
            return Err(CartError::InvalidQuantity(quantity));
        }
        let cart = self
            .api
            .add_item(AddCartItemRequest {
                product_id,
                quantity,
            })
            .await?;
        Ok(self.replace(cart))
    }

    /// Set a line's quantity; below one removes the line.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Api` if the server refuses.
    pub async fn update_quantity(
        &self,
        line_id: CartLineId,
        quantity: u32,
    ) -> Result<Option<CartSnapshot>, CartError> {
        if quantity < 1 {
            return self.remove(line_id).await;
        }
        let cart = self
            .api
            .update_item(line_id, UpdateCartItemRequest { quantity })
            .await?;
        Ok(self.replace(cart))
    }

    /// Remove a line.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Api` if the server refuses.
    pub async fn remove(&self, line_id: CartLineId) -> Result<Option<CartSnapshot>, CartError> {
        let cart = self.api.remove_item(line_id).await?;
        Ok(self.replace(cart))
    }

    /// Empty the server cart.
    ///
    /// # Errors
    ///
    /// Returns `CartError::Api` if the server refuses.
    pub async fn clear(&self) -> Result<(), CartError> {
        self.api.clear_cart().await?;
        self.replace(None);
        Ok(())
    }

    /// Forget the cached server cart.
    pub fn reset(&self) {
        self.replace(None);
    }

    fn replace(&self, cart: Option<CartSnapshot>) -> Option<CartSnapshot> {
        let cart = cart.filter(|cart| !cart.is_empty());
        *self.cart.lock().unwrap_or_else(PoisonError::into_inner) = cart.clone();
        cart
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::api::fake::FakeBackend;
    use rust_decimal::Decimal;

    fn remote() -> (RemoteCart, Arc<FakeBackend>) {
        let backend = Arc::new(FakeBackend::new());
        (RemoteCart::new(backend.clone()), backend)
    }

    #[tokio::test]
    async fn test_fetch_missing_cart_is_none() {
        let (cart, _) = remote();
        assert!(cart.fetch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_add_replaces_snapshot_with_server_cart() {
        let (cart, backend) = remote();
        backend.add_product(7, "Honey", Decimal::new(900, 2));

        let result = cart.add(ProductId::new(7), 2).await.unwrap().unwrap();

        assert_eq!(result.items.len(), 1);
        assert_eq!(result.grand_total, Decimal::from(18));
        assert_eq!(cart.snapshot(), Some(result));
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_snapshot_unchanged() {
        let (cart, backend) = remote();
        backend.add_product(7, "Honey", Decimal::new(900, 2));
        let before = cart.add(ProductId::new(7), 1).await.unwrap();

        backend.fail("add_item");
        let err = cart.add(ProductId::new(7), 1).await.unwrap_err();

        assert!(matches!(err, CartError::Api(_)));
        assert_eq!(cart.snapshot(), before);
    }

    #[tokio::test]
    async fn test_zero_quantity_add_never_reaches_backend() {
        let (cart, backend) = remote();
        assert!(matches!(
            cart.add(ProductId::new(7), 0).await,
            Err(CartError::InvalidQuantity(0))
        ));
        assert_eq!(backend.calls("add_item"), 0);
    }

    #[tokio::test]
    async fn test_update_to_zero_removes_line() {
        let (cart, backend) = remote();
        backend.add_product(7, "Honey", Decimal::new(900, 2));
        let line_id = cart.add(ProductId::new(7), 2).await.unwrap().unwrap().items[0].line_id;

        let result = cart.update_quantity(line_id, 0).await.unwrap();

        assert!(result.is_none());
        assert_eq!(backend.calls("remove_item"), 1);
        assert_eq!(backend.calls("update_item"), 0);
    }

    #[tokio::test]
    async fn test_fetch_error_propagates() {
        let (cart, backend) = remote();
        backend.fail("fetch_cart");
        assert!(cart.fetch().await.is_err());
    }

    #[tokio::test]
    async fn test_reset_forgets_cart() {
        let (cart, backend) = remote();
        backend.add_product(7, "Honey", Decimal::new(900, 2));
        cart.add(ProductId::new(7), 1).await.unwrap();
        cart.reset();
        assert!(cart.snapshot().is_none());
    }
}
