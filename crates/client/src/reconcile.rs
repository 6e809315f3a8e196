//! Anonymous to authenticated hand-over.
//!
//! The [`Reconciler`] listens to auth events. On `Login` it runs once:
//!
//! 1. the anonymous cart is abandoned and the server cart becomes current
//!    (lines are never merged)
//! 2. favorites saved locally but missing on the server are pushed, and the
//!    published set becomes `server ∪ pushed`
//! 3. the local favorites key is erased, but only if every push succeeded
//!
//! `Init` only reloads the server-backed stores and `Logout` resets them.

use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{info, instrument, warn};

use marketstall_core::ProductId;

use crate::api::ApiError;
use crate::auth::{AuthEvent, AuthEventKind};
use crate::cart::{CartSnapshot, CartStore};
use crate::favorites::{FavoriteSet, FavoritesStore};

/// Errors raised while reconciling after login.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Server favorites could not be read; nothing was pushed.
    #[error("could not fetch server favorites: {0}")]
    FetchFavorites(#[source] ApiError),

    /// Some local favorites could not be pushed. The local copy is kept so a
    /// later login can retry them.
    #[error("failed to sync favorites: {}", format_ids(.failed))]
    FavoritesSync { failed: Vec<ProductId> },
}

fn format_ids(ids: &[ProductId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// What a reconciliation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Lines dropped from the anonymous cart.
    pub abandoned_lines: usize,
    /// Server cart after login, `None` if it has none or could not be read.
    pub server_cart: Option<CartSnapshot>,
    /// Local favorites pushed to the server.
    pub pushed_favorites: Vec<ProductId>,
    /// Favorites published after the merge.
    pub favorites: FavoriteSet,
}

/// Consumes auth events and keeps the stores in step with them.
pub struct Reconciler {
    cart: CartStore,
    favorites: FavoritesStore,
    events: broadcast::Receiver<AuthEvent>,
}

impl Reconciler {
    #[must_use]
    pub const fn new(
        cart: CartStore,
        favorites: FavoritesStore,
        events: broadcast::Receiver<AuthEvent>,
    ) -> Self {
        Self {
            cart,
            favorites,
            events,
        }
    }

    /// React to one auth event. Returns a report only for `Login`.
    ///
    /// # Errors
    ///
    /// Returns the reconciliation error for a `Login` event.
    pub async fn handle_event(
        &self,
        event: &AuthEvent,
    ) -> Result<Option<ReconcileReport>, ReconcileError> {
        match event.kind {
            AuthEventKind::Login => self.reconcile().await.map(Some),
            AuthEventKind::Init => {
                if let Err(e) = self.cart.load().await {
                    warn!(error = %e, "Failed to load cart after restore");
                }
                if let Err(e) = self.favorites.load().await {
                    warn!(error = %e, "Failed to load favorites after restore");
                }
                Ok(None)
            }
            AuthEventKind::Logout => {
                self.cart.reset_remote();
                self.favorites.reset_remote();
                Ok(None)
            }
        }
    }

    /// Handle every event already queued, without waiting for more.
    ///
    /// Returns the report of the last `Login` handled, if any.
    ///
    /// # Errors
    ///
    /// Stops at the first failed reconciliation. Later events stay queued.
    pub async fn process_pending(&mut self) -> Result<Option<ReconcileReport>, ReconcileError> {
        let mut last = None;
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    if let Some(report) = self.handle_event(&event).await? {
                        last = Some(report);
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Auth events dropped before reconciliation");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return Ok(last),
            }
        }
    }

    /// Handle events until the channel closes.
    ///
    /// The stores held here keep the auth state alive, so a spawned loop ends
    /// only when its task is aborted.
    pub async fn run(mut self) {
        loop {
            match self.events.recv().await {
                Ok(event) => {
                    if let Err(e) = self.handle_event(&event).await {
                        warn!(error = %e, "Reconciliation failed");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Auth events dropped before reconciliation");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    /// Run the login hand-over. Safe to repeat: a second run with nothing left
    /// locally makes no favorite calls.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::FetchFavorites` when server favorites cannot
    /// be read, or `ReconcileError::FavoritesSync` when some pushes failed.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconcileReport, ReconcileError> {
        let abandoned_lines = self
            .cart
            .abandon_local()
            .map_or(0, |cart| cart.items.len());
        if abandoned_lines > 0 {
            info!(abandoned_lines, "Dropped anonymous cart at login");
        }

        let server_cart = match self.cart.load().await {
            Ok(cart) => cart,
            Err(e) => {
                warn!(error = %e, "Failed to load server cart during reconciliation");
                None
            }
        };

        let local = self.favorites.local().snapshot();
        let server = self
            .favorites
            .remote()
            .fetch()
            .await
            .map_err(ReconcileError::FetchFavorites)?;

        let diff = local.difference(&server);
        let mut failed = Vec::new();
        for product in diff.iter() {
            if let Err(e) = self.favorites.remote().push(product.id).await {
                warn!(product_id = %product.id, error = %e, "Failed to push favorite");
                failed.push(product.id);
            }
        }

        let merged = self
            .favorites
            .remote()
            .replace(server.union(&diff));
        let favorites = self.favorites.publish(merged);

        if !failed.is_empty() {
            return Err(ReconcileError::FavoritesSync { failed });
        }
        self.favorites.local().clear();

        let pushed_favorites = diff.ids();
        info!(pushed = pushed_favorites.len(), "Reconciled after login");
        Ok(ReconcileReport {
            abandoned_lines,
            server_cart,
            pushed_favorites,
            favorites,
        })
    }
}
