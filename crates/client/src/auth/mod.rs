//! Authentication state.
//!
//! [`AuthState`] is the single owner of the session. It publishes two
//! surfaces:
//!
//! - a latest-value [`AuthStatus`] on a `watch` channel, replayed to every new
//!   subscriber (route guards and store facades read this)
//! - discrete [`AuthEvent`]s on a `broadcast` channel (`Login`, `Logout`,
//!   `Init`), consumed by the reconciler
//!
//! `Init` is emitted when a persisted token is found at start-up. It is not a
//! fresh login and must never trigger reconciliation.

mod error;
mod token;

pub use error::AuthError;
pub use token::{AuthSession, TokenStore};

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{info, instrument, warn};

use marketstall_core::Role;

use crate::api::{ApiError, AuthApi, Credentials, RegisterRequest};
use crate::error::{clear_sentry_user, set_sentry_user};

/// Minimum password length accepted by registration.
const MIN_PASSWORD_LENGTH: usize = 8;

/// Minimum username length accepted by registration.
const MIN_USERNAME_LENGTH: usize = 3;

/// Events buffered per subscriber before the slowest one starts lagging.
const EVENT_CAPACITY: usize = 16;

/// Snapshot of the auth state for UI consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthStatus {
    pub logged_in: bool,
    pub role: Option<Role>,
    pub account_status: Option<String>,
}

impl AuthStatus {
    fn from_session(session: &AuthSession) -> Self {
        Self {
            logged_in: session.is_logged_in(),
            role: session.role,
            account_status: session.account_status.clone(),
        }
    }
}

/// Kind of auth transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventKind {
    /// Fresh credential exchange succeeded.
    Login,
    /// Explicit logout.
    Logout,
    /// Persisted session restored at start-up.
    Init,
}

/// A discrete auth transition and the session it concerns.
///
/// For `Logout` the session is the one being ended.
#[derive(Debug, Clone)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub session: AuthSession,
}

/// Process-wide auth state publisher.
///
/// Cheap to clone; clones share state and channels. Construct once at start-up
/// and pass it to whatever needs it.
#[derive(Clone)]
pub struct AuthState {
    inner: Arc<AuthStateInner>,
}

struct AuthStateInner {
    tokens: TokenStore,
    api: Arc<dyn AuthApi>,
    status: watch::Sender<AuthStatus>,
    events: broadcast::Sender<AuthEvent>,
}

impl AuthState {
    /// Create the publisher in the anonymous state. Call [`init`](Self::init)
    /// to pick up a persisted session.
    #[must_use]
    pub fn new(tokens: TokenStore, api: Arc<dyn AuthApi>) -> Self {
        let (status, _) = watch::channel(AuthStatus::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(AuthStateInner {
                tokens,
                api,
                status,
                events,
            }),
        }
    }

    /// Restore a persisted session, emitting `Init` if one exists.
    ///
    /// Returns whether the state is now authenticated.
    pub fn init(&self) -> bool {
        let session = self.inner.tokens.get();
        if !session.is_logged_in() {
            return false;
        }

        info!(role = ?session.role, "Restored persisted session");
        if let Some(user_id) = session.user_id {
            set_sentry_user(&user_id, session.email.as_deref());
        }
        self.inner
            .status
            .send_replace(AuthStatus::from_session(&session));
        self.emit(AuthEventKind::Init, session);
        true
    }

    /// Exchange credentials for a session.
    ///
    /// On failure the state is anonymous and any persisted session data is
    /// cleared. A session that was active before the attempt is ended with
    /// `Logout`, as [`logout`](Self::logout) would.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCredentials` when the backend rejects the
    /// credentials, `AuthError::MissingToken` when it answers without a token,
    /// or `AuthError::Api` for transport and server failures.
    #[instrument(skip(self, credentials), fields(email = %credentials.email))]
    pub async fn login(&self, credentials: &Credentials) -> Result<AuthSession, AuthError> {
        let result = match self.inner.api.login(credentials).await {
            Ok(response) if response.token.trim().is_empty() => Err(AuthError::MissingToken),
            Ok(response) => Ok(AuthSession::from_login(response)),
            Err(ApiError::Unauthorized(_)) => Err(AuthError::InvalidCredentials),
            Err(e) => Err(AuthError::Api(e)),
        };

        let session = match result {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Login failed");
                self.end_session();
                return Err(e);
            }
        };

        self.inner.tokens.save(&session);
        self.inner
            .status
            .send_replace(AuthStatus::from_session(&session));
        if let Some(user_id) = session.user_id {
            set_sentry_user(&user_id, session.email.as_deref());
        }
        info!(role = ?session.role, "Logged in");
        self.emit(AuthEventKind::Login, session.clone());
        Ok(session)
    }

    /// Create an account. Does not log in.
    ///
    /// # Errors
    ///
    /// Returns a validation error before any network call when the username or
    /// password is too short, or `AuthError::Api` when the backend refuses.
    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn register(&self, request: &RegisterRequest) -> Result<(), AuthError> {
        validate_username(&request.username)?;
        validate_password(&request.password)?;
        self.inner.api.register(request).await?;
        info!("Registered account");
        Ok(())
    }

    /// End the session.
    ///
    /// Subscribers get `Logout` with the ending session before storage is
    /// cleared. Logging out while anonymous only clears storage.
    pub fn logout(&self) {
        if self.end_session() {
            info!("Logged out");
        }
    }

    /// Whether a session is active.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.status.borrow().logged_in
    }

    /// Role of the active session.
    #[must_use]
    pub fn current_role(&self) -> Option<Role> {
        self.inner.status.borrow().role
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> AuthStatus {
        self.inner.status.borrow().clone()
    }

    /// Subscribe to status changes. The current value is available immediately.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<AuthStatus> {
        self.inner.status.subscribe()
    }

    /// Subscribe to auth events emitted from now on.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }

    /// Token store backing this state.
    #[must_use]
    pub fn tokens(&self) -> &TokenStore {
        &self.inner.tokens
    }

    /// Emit `Logout` for an active session, then clear storage and status.
    /// Returns whether a session was active.
    fn end_session(&self) -> bool {
        let session = self.inner.tokens.get();
        let was_logged_in = session.is_logged_in();
        if was_logged_in {
            self.emit(AuthEventKind::Logout, session);
        }
        self.inner.tokens.clear();
        self.inner.status.send_replace(AuthStatus::default());
        clear_sentry_user();
        was_logged_in
    }

    fn emit(&self, kind: AuthEventKind, session: AuthSession) {
        // No subscribers is fine.
        let _ = self.inner.events.send(AuthEvent { kind, session });
    }
}

fn validate_username(username: &str) -> Result<(), AuthError> {
    if username.trim().chars().count() < MIN_USERNAME_LENGTH {
        return Err(AuthError::InvalidUsername(format!(
            "must be at least {MIN_USERNAME_LENGTH} characters"
        )));
    }
    Ok(())
}

fn validate_password(password: &secrecy::SecretString) -> Result<(), AuthError> {
    use secrecy::ExposeSecret;

    if password.expose_secret().chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::WeakPassword(format!(
            "must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}
