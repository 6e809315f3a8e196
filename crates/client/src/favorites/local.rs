//! Anonymous favorites persisted in local storage.

use std::sync::{Arc, Mutex, PoisonError};

use marketstall_core::ProductId;

use super::FavoriteSet;
use crate::api::ProductSummary;
use crate::storage::{self, KeyValueStorage, keys};

/// Favorites kept on this device until the visitor logs in.
pub struct LocalFavorites {
    storage: Arc<dyn KeyValueStorage>,
    set: Mutex<FavoriteSet>,
}

impl LocalFavorites {
    /// Hydrate from storage. Missing or corrupt data starts empty.
    #[must_use]
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        let set = storage::read_json(storage.as_ref(), keys::USER_FAVORITES).unwrap_or_default();
        Self {
            storage,
            set: Mutex::new(set),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> FavoriteSet {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn contains(&self, product_id: ProductId) -> bool {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(product_id)
    }

    pub fn add(&self, product: ProductSummary) -> FavoriteSet {
        self.mutate(|set| set.insert(product))
    }

    pub fn remove(&self, product_id: ProductId) -> FavoriteSet {
        self.mutate(|set| {
            set.remove(product_id);
        })
    }

    /// Empty the set and erase the storage key.
    pub fn clear(&self) {
        *self.set.lock().unwrap_or_else(PoisonError::into_inner) = FavoriteSet::new();
        storage::erase(self.storage.as_ref(), keys::USER_FAVORITES);
    }

    fn mutate(&self, change: impl FnOnce(&mut FavoriteSet)) -> FavoriteSet {
        let mut set = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        change(&mut set);
        if set.is_empty() {
            storage::erase(self.storage.as_ref(), keys::USER_FAVORITES);
        } else {
            storage::write_json(self.storage.as_ref(), keys::USER_FAVORITES, &*set);
        }
        set.clone()
    }
}
