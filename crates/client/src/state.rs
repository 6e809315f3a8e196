//! Composition root shared by every view.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::api::{
    ApiError, AuthApi, CartApi, CatalogApi, Credentials, FavoritesApi, HttpApi, OrderApi, Profile,
    ProfileApi,
};
use crate::auth::{AuthSession, AuthState, TokenStore};
use crate::cart::{CartStore, LocalCart, RemoteCart};
use crate::catalog::CatalogClient;
use crate::checkout::Checkout;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::favorites::{FavoritesStore, LocalFavorites, RemoteFavorites};
use crate::payment::{PaymentController, PaymentSdk, ViewHost};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::storage::KeyValueStorage;

/// Backend endpoints, one handle per resource group.
#[derive(Clone)]
pub struct Backend {
    pub auth: Arc<dyn AuthApi>,
    pub cart: Arc<dyn CartApi>,
    pub favorites: Arc<dyn FavoritesApi>,
    pub orders: Arc<dyn OrderApi>,
    pub catalog: Arc<dyn CatalogApi>,
    pub profile: Arc<dyn ProfileApi>,
}

impl Backend {
    /// Use one implementation for every resource group.
    pub fn from_shared<T>(api: &Arc<T>) -> Self
    where
        T: AuthApi + CartApi + FavoritesApi + OrderApi + CatalogApi + ProfileApi + 'static,
    {
        Self {
            auth: api.clone(),
            cart: api.clone(),
            favorites: api.clone(),
            orders: api.clone(),
            catalog: api.clone(),
            profile: api.clone(),
        }
    }
}

/// Everything the UI needs, built once at start-up.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Storefront {
    inner: Arc<StorefrontInner>,
}

struct StorefrontInner {
    config: ClientConfig,
    backend: Backend,
    auth: AuthState,
    cart: CartStore,
    favorites: FavoritesStore,
    catalog: CatalogClient,
    checkout: Checkout,
    reconciler: Mutex<Reconciler>,
}

impl Storefront {
    /// Wire the stores over `storage` and `backend`.
    #[must_use]
    pub fn new(storage: Arc<dyn KeyValueStorage>, backend: Backend, config: ClientConfig) -> Self {
        let tokens = TokenStore::new(storage.clone());
        let auth = AuthState::new(tokens, backend.auth.clone());
        let cart = CartStore::new(
            auth.clone(),
            LocalCart::new(storage.clone()),
            RemoteCart::new(backend.cart.clone()),
        );
        let favorites = FavoritesStore::new(
            auth.clone(),
            LocalFavorites::new(storage),
            RemoteFavorites::new(backend.favorites.clone()),
        );
        let catalog = CatalogClient::new(backend.catalog.clone(), config.catalog_cache_ttl);
        let checkout = Checkout::new(
            auth.clone(),
            cart.clone(),
            backend.orders.clone(),
            backend.profile.clone(),
        );
        let reconciler = Reconciler::new(cart.clone(), favorites.clone(), auth.subscribe_events());

        Self {
            inner: Arc::new(StorefrontInner {
                config,
                backend,
                auth,
                cart,
                favorites,
                catalog,
                checkout,
                reconciler: Mutex::new(reconciler),
            }),
        }
    }

    /// Build against the REST backend named in `config`.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Http` if the HTTP client cannot be built.
    pub fn connect(config: ClientConfig, storage: Arc<dyn KeyValueStorage>) -> Result<Self, ApiError> {
        let api = Arc::new(HttpApi::new(
            &config.api_base_url,
            config.http_timeout,
            TokenStore::new(storage.clone()),
        )?);
        info!(base_url = %api.base_url(), "Connected storefront client");
        Ok(Self::new(storage, Backend::from_shared(&api), config))
    }

    /// Restore a persisted session and load the active stores.
    ///
    /// Returns whether a session was restored.
    pub async fn init(&self) -> bool {
        let restored = self.inner.auth.init();
        // Init loads server state but never reconciles.
        if let Err(e) = self.pump_events().await {
            ClientError::from(e).report();
        }
        if !restored {
            if let Err(e) = self.inner.cart.load().await {
                ClientError::from(e).report();
            }
            if let Err(e) = self.inner.favorites.load().await {
                ClientError::from(e).report();
            }
        }
        restored
    }

    /// Log in and reconcile the anonymous cart and favorites.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Auth` if login fails, or
    /// `ClientError::Reconcile` if the hand-over failed after a successful
    /// login. The session stays active in the second case.
    pub async fn login(&self, credentials: &Credentials) -> Result<AuthSession, ClientError> {
        let result = self.inner.auth.login(credentials).await;
        // A failed attempt may have ended an earlier session.
        let pumped = self.pump_events().await;
        let session = result?;
        pumped?;
        Ok(session)
    }

    /// Log out and fall back to the anonymous stores.
    pub async fn logout(&self) {
        self.inner.auth.logout();
        if let Err(e) = self.pump_events().await {
            ClientError::from(e).report();
        }
    }

    /// Handle queued auth events now.
    ///
    /// Shells that spawn [`Reconciler::run`] instead do not need this.
    ///
    /// # Errors
    ///
    /// Returns the first failed reconciliation.
    pub async fn pump_events(&self) -> Result<Option<ReconcileReport>, crate::reconcile::ReconcileError> {
        self.inner.reconciler.lock().await.process_pending().await
    }

    /// Profile of the logged-in user, `None` for guests without a network
    /// call.
    ///
    /// # Errors
    ///
    /// Returns the API error when the profile cannot be read.
    pub async fn profile(&self) -> Result<Option<Profile>, ApiError> {
        if !self.inner.auth.is_authenticated() {
            return Ok(None);
        }
        self.inner.backend.profile.get_profile().await.map(Some)
    }

    /// Payment controller for the checkout view.
    #[must_use]
    pub fn payment_controller(
        &self,
        sdk: Arc<dyn PaymentSdk>,
        host: Arc<dyn ViewHost>,
    ) -> PaymentController {
        PaymentController::new(
            sdk,
            host,
            self.inner.backend.orders.clone(),
            self.inner.cart.clone(),
            &self.inner.config.payment,
        )
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn backend(&self) -> &Backend {
        &self.inner.backend
    }

    #[must_use]
    pub fn auth(&self) -> &AuthState {
        &self.inner.auth
    }

    #[must_use]
    pub fn cart(&self) -> &CartStore {
        &self.inner.cart
    }

    #[must_use]
    pub fn favorites(&self) -> &FavoritesStore {
        &self.inner.favorites
    }

    #[must_use]
    pub fn catalog(&self) -> &CatalogClient {
        &self.inner.catalog
    }

    #[must_use]
    pub fn checkout(&self) -> &Checkout {
        &self.inner.checkout
    }
}
