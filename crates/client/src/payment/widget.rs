//! Seams to the third-party payment widget and the view hosting it.
//!
//! The shell provides implementations: a browser build wraps the provider's JS
//! SDK, tests use in-memory fakes.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by the widget, carrying the provider's message verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct WidgetError {
    pub message: String,
}

impl WidgetError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Opaque reference to a created card element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub u64);

/// Provider answer to a confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfirmation {
    /// Provider status, `succeeded` when the charge went through.
    pub status: String,
    pub payment_intent_id: Option<String>,
}

impl PaymentConfirmation {
    #[must_use]
    pub fn is_succeeded(&self) -> bool {
        self.status.eq_ignore_ascii_case("succeeded")
    }
}

/// Loads the provider SDK.
#[async_trait]
pub trait PaymentSdk: Send + Sync {
    /// Load the SDK for `publishable_key`.
    async fn load(&self, publishable_key: &str) -> Result<Arc<dyn PaymentElements>, WidgetError>;
}

/// A loaded SDK instance.
#[async_trait]
pub trait PaymentElements: Send + Sync {
    fn create_card_element(&self) -> Result<ElementHandle, WidgetError>;

    /// Attach `element` to the node matching `selector`.
    fn mount(&self, element: ElementHandle, selector: &str) -> Result<(), WidgetError>;

    /// Unmount and release `element`.
    fn destroy(&self, element: ElementHandle);

    async fn confirm_card_payment(
        &self,
        client_secret: &str,
        element: ElementHandle,
    ) -> Result<PaymentConfirmation, WidgetError>;
}

/// The view the widget is mounted into.
pub trait ViewHost: Send + Sync {
    /// Whether a node matching `selector` is attached and visible.
    fn is_visible(&self, selector: &str) -> bool;
}
