//! Card payment form lifecycle.
//!
//! [`PaymentController`] drives the widget through
//! `Uninitialized -> SdkLoading -> SdkReady -> ElementMounting -> ElementReady
//! -> Submitting -> Succeeded`. The view that hosts the card element may not
//! be attached when mounting starts, so mounting polls the [`ViewHost`] a
//! bounded number of times and fails with `MountTimeout` without touching the
//! widget if the node never shows up.
//!
//! A failed submit returns to `ElementReady` so the shopper can retry. The
//! terminal `Failed` phase is only reached when the form itself cannot be
//! prepared.

mod widget;

pub use widget::{
    ElementHandle, PaymentConfirmation, PaymentElements, PaymentSdk, ViewHost, WidgetError,
};

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use marketstall_core::OrderId;

use crate::api::{ApiError, OrderApi, PaymentMethod};
use crate::cart::CartStore;
use crate::config::PaymentConfig;
use crate::error::add_breadcrumb;

/// Selector of the node the card element is mounted into.
pub const CARD_ELEMENT_SELECTOR: &str = "#card-element";

/// Errors returned by the payment controller.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment provider is not configured")]
    MissingPublishableKey,

    #[error("payment form is not loaded yet")]
    SdkNotReady,

    #[error("card details form is not ready")]
    ElementNotReady,

    #[error("no order to pay for")]
    MissingOrder,

    #[error("failed to load payment provider: {0}")]
    SdkLoad(#[source] WidgetError),

    #[error("card form did not appear after {attempts} attempts")]
    MountTimeout { attempts: u32 },

    #[error("failed to show card form: {0}")]
    Mount(#[source] WidgetError),

    /// Creating the payment intent failed.
    #[error("backend error: {0}")]
    Api(#[from] ApiError),

    /// The provider declined or could not confirm the payment. Shown verbatim.
    #[error("{0}")]
    Provider(String),
}

/// Why the form could not be prepared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    SdkLoad(String),
    MountTimeout,
    Mount(String),
}

/// Controller state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentPhase {
    Uninitialized,
    SdkLoading,
    SdkReady,
    ElementMounting,
    ElementReady,
    Submitting,
    Succeeded,
    Failed(FailureReason),
}

/// Coarse status of a [`PaymentAttempt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    Idle,
    PreparingForm,
    FormReady,
    Submitting,
    Succeeded,
    Failed,
}

impl PaymentPhase {
    #[must_use]
    pub const fn attempt_status(&self) -> AttemptStatus {
        match self {
            Self::Uninitialized => AttemptStatus::Idle,
            Self::SdkLoading | Self::SdkReady | Self::ElementMounting => {
                AttemptStatus::PreparingForm
            }
            Self::ElementReady => AttemptStatus::FormReady,
            Self::Submitting => AttemptStatus::Submitting,
            Self::Succeeded => AttemptStatus::Succeeded,
            Self::Failed(_) => AttemptStatus::Failed,
        }
    }
}

/// The payment in progress for one order.
#[derive(Debug, Clone)]
pub struct PaymentAttempt {
    pub order_id: Option<OrderId>,
    pub client_secret: Option<SecretString>,
    pub status: AttemptStatus,
}

/// How long to wait for the card element's host node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for MountPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_millis(100),
        }
    }
}

/// Drives one payment form. Owned by the checkout view; dropping it destroys
/// the mounted element.
pub struct PaymentController {
    sdk: Arc<dyn PaymentSdk>,
    host: Arc<dyn ViewHost>,
    orders: Arc<dyn OrderApi>,
    cart: CartStore,
    publishable_key: Option<String>,
    policy: MountPolicy,
    elements: Option<Arc<dyn PaymentElements>>,
    element: Option<ElementHandle>,
    method: PaymentMethod,
    order_id: Option<OrderId>,
    client_secret: Option<SecretString>,
    phase: watch::Sender<PaymentPhase>,
}

impl PaymentController {
    #[must_use]
    pub fn new(
        sdk: Arc<dyn PaymentSdk>,
        host: Arc<dyn ViewHost>,
        orders: Arc<dyn OrderApi>,
        cart: CartStore,
        config: &PaymentConfig,
    ) -> Self {
        let (phase, _) = watch::channel(PaymentPhase::Uninitialized);
        Self {
            sdk,
            host,
            orders,
            cart,
            publishable_key: config.publishable_key.clone(),
            policy: config.mount,
            elements: None,
            element: None,
            method: PaymentMethod::Card,
            order_id: None,
            client_secret: None,
            phase,
        }
    }

    #[must_use]
    pub fn phase(&self) -> PaymentPhase {
        self.phase.borrow().clone()
    }

    /// Subscribe to phase changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PaymentPhase> {
        self.phase.subscribe()
    }

    #[must_use]
    pub fn attempt(&self) -> PaymentAttempt {
        PaymentAttempt {
            order_id: self.order_id,
            client_secret: self.client_secret.clone(),
            status: self.phase.borrow().attempt_status(),
        }
    }

    #[must_use]
    pub const fn method(&self) -> PaymentMethod {
        self.method
    }

    /// Set the order this form pays for.
    pub fn set_order(&mut self, order_id: OrderId) {
        self.order_id = Some(order_id);
        self.client_secret = None;
    }

    /// Load the provider SDK. A no-op once loaded.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::MissingPublishableKey` without a key, or
    /// `PaymentError::SdkLoad` if the provider fails to load. Both leave the
    /// controller `Failed`.
    #[instrument(skip(self))]
    pub async fn load_sdk(&mut self) -> Result<(), PaymentError> {
        if self.elements.is_some() {
            return Ok(());
        }
        let Some(key) = self.publishable_key.clone() else {
            self.set_phase(PaymentPhase::Failed(FailureReason::SdkLoad(
                "missing publishable key".to_string(),
            )));
            return Err(PaymentError::MissingPublishableKey);
        };

        self.set_phase(PaymentPhase::SdkLoading);
        match self.sdk.load(&key).await {
            Ok(elements) => {
                self.elements = Some(elements);
                self.set_phase(PaymentPhase::SdkReady);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Payment SDK failed to load");
                self.set_phase(PaymentPhase::Failed(FailureReason::SdkLoad(e.message.clone())));
                Err(PaymentError::SdkLoad(e))
            }
        }
    }

    /// Mount the card element once its host node is visible.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::SdkNotReady` before the SDK is loaded,
    /// `PaymentError::MountTimeout` when the node never appears (no widget
    /// call is made), or `PaymentError::Mount` when the widget refuses.
    #[instrument(skip(self))]
    pub async fn mount_card(&mut self) -> Result<(), PaymentError> {
        let elements = self.elements.clone().ok_or(PaymentError::SdkNotReady)?;
        if self.element.is_some() {
            return Ok(());
        }

        self.set_phase(PaymentPhase::ElementMounting);
        if !self.wait_for_host().await {
            warn!(
                attempts = self.policy.max_attempts,
                "Card element host never became visible"
            );
            self.set_phase(PaymentPhase::Failed(FailureReason::MountTimeout));
            return Err(PaymentError::MountTimeout {
                attempts: self.policy.max_attempts,
            });
        }

        let element = match elements.create_card_element() {
            Ok(element) => element,
            Err(e) => return Err(self.mount_failed(e)),
        };
        if let Err(e) = elements.mount(element, CARD_ELEMENT_SELECTOR) {
            elements.destroy(element);
            return Err(self.mount_failed(e));
        }

        debug!(?element, "Card element mounted");
        self.element = Some(element);
        self.set_phase(PaymentPhase::ElementReady);
        Ok(())
    }

    /// Switch payment method. Leaving card destroys the element; coming back
    /// mounts a fresh one.
    ///
    /// The method only changes to card once the element is mounted, so a
    /// failed switch can be retried.
    ///
    /// # Errors
    ///
    /// Returns the mount error when switching back to card fails.
    pub async fn select_method(&mut self, method: PaymentMethod) -> Result<(), PaymentError> {
        match method {
            PaymentMethod::Card => {
                self.mount_card().await?;
                self.method = method;
                Ok(())
            }
            PaymentMethod::CashOnDelivery => {
                if self.method == method {
                    return Ok(());
                }
                self.method = method;
                self.destroy_element();
                if self.elements.is_some() {
                    self.set_phase(PaymentPhase::SdkReady);
                }
                Ok(())
            }
        }
    }

    /// Pay for the current order with the mounted card element.
    ///
    /// On success the cart is cleared. On failure the controller returns to
    /// `ElementReady`.
    ///
    /// # Errors
    ///
    /// Fails fast with `SdkNotReady`, `ElementNotReady` or `MissingOrder`
    /// before any network call. Otherwise returns `PaymentError::Api` when the
    /// intent cannot be created and `PaymentError::Provider` with the
    /// provider's message when confirmation fails.
    #[instrument(skip(self), fields(order_id = ?self.order_id))]
    pub async fn submit(&mut self) -> Result<(), PaymentError> {
        let elements = self.elements.clone().ok_or(PaymentError::SdkNotReady)?;
        let element = match self.element {
            Some(element) if *self.phase.borrow() == PaymentPhase::ElementReady => element,
            _ => return Err(PaymentError::ElementNotReady),
        };
        let order_id = self.order_id.ok_or(PaymentError::MissingOrder)?;

        let order = order_id.to_string();
        add_breadcrumb("payment", "Submitted card payment", Some(&[("order_id", order.as_str())]));
        self.set_phase(PaymentPhase::Submitting);

        let intent = match self.orders.create_payment_intent(order_id).await {
            Ok(intent) => intent,
            Err(e) => {
                warn!(error = %e, "Failed to create payment intent");
                self.set_phase(PaymentPhase::ElementReady);
                return Err(PaymentError::Api(e));
            }
        };
        let secret = SecretString::from(intent.client_secret);
        self.client_secret = Some(secret.clone());

        let confirmation = elements
            .confirm_card_payment(secret.expose_secret(), element)
            .await;
        match confirmation {
            Ok(confirmation) if confirmation.is_succeeded() => {}
            Ok(confirmation) => {
                self.set_phase(PaymentPhase::ElementReady);
                return Err(PaymentError::Provider(format!(
                    "Payment was not completed (status: {})",
                    confirmation.status
                )));
            }
            Err(e) => {
                warn!(error = %e, "Payment confirmation failed");
                self.set_phase(PaymentPhase::ElementReady);
                return Err(PaymentError::Provider(e.message));
            }
        }

        self.set_phase(PaymentPhase::Succeeded);
        info!(%order_id, "Payment succeeded");
        if let Err(e) = self.cart.clear().await {
            warn!(error = %e, "Payment succeeded but the cart could not be cleared");
        }
        Ok(())
    }

    fn mount_failed(&self, error: WidgetError) -> PaymentError {
        warn!(error = %error, "Card element mount failed");
        self.set_phase(PaymentPhase::Failed(FailureReason::Mount(error.message.clone())));
        PaymentError::Mount(error)
    }

    async fn wait_for_host(&self) -> bool {
        for attempt in 1..=self.policy.max_attempts {
            if self.host.is_visible(CARD_ELEMENT_SELECTOR) {
                return true;
            }
            if attempt < self.policy.max_attempts {
                tokio::time::sleep(self.policy.delay).await;
            }
        }
        false
    }

    fn destroy_element(&mut self) {
        if let (Some(elements), Some(element)) = (self.elements.as_ref(), self.element.take()) {
            elements.destroy(element);
            debug!(?element, "Card element destroyed");
        }
    }

    fn set_phase(&self, phase: PaymentPhase) {
        debug!(?phase, "Payment phase");
        self.phase.send_replace(phase);
    }
}

impl Drop for PaymentController {
    fn drop(&mut self) {
        self.destroy_element();
    }
}
