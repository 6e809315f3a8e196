//! Product catalog reads.
//!
//! Products, product pages and categories are cached in `moka` for the
//! configured TTL. Search queries always go to the backend.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::{debug, instrument};

use marketstall_core::{CategoryId, ProductId};

use crate::api::{ApiError, CatalogApi, Category, Product, ProductPage, ProductQuery};

/// Cache key for catalog responses.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
enum CacheKey {
    Product(ProductId),
    Products {
        page: u32,
        size: Option<u32>,
        category_id: Option<CategoryId>,
    },
    Categories,
}

/// Cached value types.
#[derive(Debug, Clone)]
enum CacheValue {
    Product(Box<Product>),
    Products(ProductPage),
    Categories(Vec<Category>),
}

/// Cached client for catalog endpoints.
#[derive(Clone)]
pub struct CatalogClient {
    inner: Arc<CatalogClientInner>,
}

struct CatalogClientInner {
    api: Arc<dyn CatalogApi>,
    cache: Cache<CacheKey, CacheValue>,
}

impl CatalogClient {
    #[must_use]
    pub fn new(api: Arc<dyn CatalogApi>, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(ttl)
            .build();
        Self {
            inner: Arc::new(CatalogClientInner { api, cache }),
        }
    }

    /// One page of products.
    ///
    /// # Errors
    ///
    /// Returns the API error if the backend call fails.
    #[instrument(skip(self))]
    pub async fn list_products(&self, query: &ProductQuery) -> Result<ProductPage, ApiError> {
        let searching = query
            .search
            .as_deref()
            .is_some_and(|search| !search.trim().is_empty());
        let key = CacheKey::Products {
            page: query.page,
            size: query.size,
            category_id: query.category_id,
        };

        if !searching
            && let Some(CacheValue::Products(page)) = self.inner.cache.get(&key).await
        {
            debug!("Cache hit for products");
            return Ok(page);
        }

        let page = self.inner.api.list_products(query).await?;
        if !searching {
            self.inner
                .cache
                .insert(key, CacheValue::Products(page.clone()))
                .await;
        }
        Ok(page)
    }

    /// A single product.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::NotFound` for unknown ids, or any other API error.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn get_product(&self, product_id: ProductId) -> Result<Product, ApiError> {
        let key = CacheKey::Product(product_id);
        if let Some(CacheValue::Product(product)) = self.inner.cache.get(&key).await {
            debug!("Cache hit for product");
            return Ok(*product);
        }

        let product = self.inner.api.get_product(product_id).await?;
        self.inner
            .cache
            .insert(key, CacheValue::Product(Box::new(product.clone())))
            .await;
        Ok(product)
    }

    /// All categories.
    ///
    /// # Errors
    ///
    /// Returns the API error if the backend call fails.
    #[instrument(skip(self))]
    pub async fn list_categories(&self) -> Result<Vec<Category>, ApiError> {
        if let Some(CacheValue::Categories(categories)) =
            self.inner.cache.get(&CacheKey::Categories).await
        {
            debug!("Cache hit for categories");
            return Ok(categories);
        }

        let categories = self.inner.api.list_categories().await?;
        self.inner
            .cache
            .insert(CacheKey::Categories, CacheValue::Categories(categories.clone()))
            .await;
        Ok(categories)
    }

    /// Drop a cached product, e.g. after its stock changed.
    pub async fn invalidate_product(&self, product_id: ProductId) {
        self.inner
            .cache
            .invalidate(&CacheKey::Product(product_id))
            .await;
    }
}
