//! Order placement and card payment against the HTTP backend.
//!
//! The payment provider is an in-memory stand-in; orders and payment intents
//! go over HTTP.
//!
//! Run with: cargo test -p marketstall-integration-tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::Method;
use marketstall_client::Storefront;
use marketstall_client::api::{Credentials, PaymentMethod};
use marketstall_client::checkout::{CheckoutError, CheckoutField, CheckoutForm};
use marketstall_client::payment::{
    ElementHandle, MountPolicy, PaymentConfirmation, PaymentElements, PaymentError, PaymentPhase,
    PaymentSdk, ViewHost, WidgetError,
};
use marketstall_client::storage::MemoryStorage;
use marketstall_core::Email;
use marketstall_integration_tests::{EMAIL, PASSWORD, TestBackend};
use rust_decimal::Decimal;
use secrecy::SecretString;

async fn shopper(backend: &TestBackend, publishable_key: Option<&str>) -> Storefront {
    let mut config = backend.config();
    config.payment.publishable_key = publishable_key.map(String::from);
    config.payment.mount = MountPolicy {
        max_attempts: 3,
        delay: Duration::from_millis(1),
    };
    let app = Storefront::connect(config, Arc::new(MemoryStorage::new())).expect("client builds");
    app.init().await;
    app.login(&Credentials {
        email: Email::parse(EMAIL).expect("valid email"),
        password: SecretString::from(PASSWORD.to_string()),
    })
    .await
    .expect("login succeeds");
    app
}

async fn backend_with_cart() -> TestBackend {
    let backend = TestBackend::start().await.expect("backend starts");
    backend.add_product(1, "P1", Decimal::from(10), 10);
    backend.add_product(2, "P2", Decimal::from(5), 10);
    backend.seed_cart(&[(1, 1), (2, 3)]);
    backend
}

/// Provider stand-in; declines with `decline` when set.
#[derive(Default)]
struct Provider {
    decline: Option<String>,
}

#[async_trait]
impl PaymentSdk for Provider {
    async fn load(&self, _key: &str) -> Result<Arc<dyn PaymentElements>, WidgetError> {
        Ok(Arc::new(Elements {
            decline: self.decline.clone(),
        }))
    }
}

struct Elements {
    decline: Option<String>,
}

#[async_trait]
impl PaymentElements for Elements {
    fn create_card_element(&self) -> Result<ElementHandle, WidgetError> {
        Ok(ElementHandle(1))
    }

    fn mount(&self, _element: ElementHandle, _selector: &str) -> Result<(), WidgetError> {
        Ok(())
    }

    fn destroy(&self, _element: ElementHandle) {}

    async fn confirm_card_payment(
        &self,
        client_secret: &str,
        _element: ElementHandle,
    ) -> Result<PaymentConfirmation, WidgetError> {
        assert!(client_secret.starts_with("pi_"), "unexpected secret {client_secret}");
        match &self.decline {
            Some(message) => Err(WidgetError::new(message.clone())),
            None => Ok(PaymentConfirmation {
                status: "succeeded".to_string(),
                payment_intent_id: None,
            }),
        }
    }
}

struct VisibleHost;

impl ViewHost for VisibleHost {
    fn is_visible(&self, _selector: &str) -> bool {
        true
    }
}

// ============================================================================
// Cash on delivery
// ============================================================================

#[tokio::test]
async fn test_cash_on_delivery_with_saved_address() {
    let backend = backend_with_cart().await;
    let app = shopper(&backend, None).await;

    let mut form = CheckoutForm::new();
    assert!(app.checkout().prefill(&mut form).await.expect("addresses"));
    assert_eq!(form.city, "London");
    form.payment_method = PaymentMethod::CashOnDelivery;

    let placed = app
        .checkout()
        .place_order(&mut form)
        .await
        .expect("order placed");

    assert!(!placed.needs_payment);
    assert_eq!(placed.order.total_amount, Decimal::from(25));
    assert_eq!(placed.order.payment_method, PaymentMethod::CashOnDelivery);
    assert!(app.cart().current().is_none());
    assert!(backend.server_cart().is_none());
    assert_eq!(backend.orders().len(), 1);
}

#[tokio::test]
async fn test_invalid_form_never_reaches_backend() {
    let backend = backend_with_cart().await;
    let app = shopper(&backend, None).await;

    let mut form = CheckoutForm::new();
    form.full_name = "Ada Lovelace".to_string();
    form.phone = "12".to_string();

    let err = app
        .checkout()
        .place_order(&mut form)
        .await
        .expect_err("invalid form");

    let CheckoutError::Validation(errors) = err else {
        panic!("expected validation errors, got {err:?}");
    };
    let fields: Vec<CheckoutField> = errors.iter().map(|e| e.field).collect();
    assert!(fields.contains(&CheckoutField::Phone));
    assert!(!fields.contains(&CheckoutField::FullName));
    assert!(form.is_touched(CheckoutField::Street));
    assert_eq!(backend.count(&Method::POST, "/orders"), 0);
}

// ============================================================================
// Card payment
// ============================================================================

#[tokio::test]
async fn test_card_payment_confirms_intent_and_clears_cart() {
    let backend = backend_with_cart().await;
    let app = shopper(&backend, Some("pk_test_marketstall")).await;

    let mut form = CheckoutForm::new();
    app.checkout().prefill(&mut form).await.expect("addresses");
    let placed = app
        .checkout()
        .place_order(&mut form)
        .await
        .expect("order placed");
    assert!(placed.needs_payment);
    // Card orders keep the cart until the payment goes through.
    assert!(app.cart().current().is_some());

    let mut payment = app.payment_controller(Arc::new(Provider::default()), Arc::new(VisibleHost));
    payment.set_order(placed.order.id);
    payment.load_sdk().await.expect("sdk loads");
    payment.mount_card().await.expect("card mounts");
    payment.submit().await.expect("payment succeeds");

    assert_eq!(payment.phase(), PaymentPhase::Succeeded);
    let intent_path = format!("/orders/{}/create-payment-intent", placed.order.id);
    assert_eq!(backend.count(&Method::POST, &intent_path), 1);
    assert!(app.cart().current().is_none());
    assert!(backend.server_cart().is_none());
}

#[tokio::test]
async fn test_declined_card_returns_to_ready_form() {
    let backend = backend_with_cart().await;
    let app = shopper(&backend, Some("pk_test_marketstall")).await;

    let mut form = CheckoutForm::new();
    app.checkout().prefill(&mut form).await.expect("addresses");
    let placed = app
        .checkout()
        .place_order(&mut form)
        .await
        .expect("order placed");

    let provider = Provider {
        decline: Some("Your card was declined.".to_string()),
    };
    let mut payment = app.payment_controller(Arc::new(provider), Arc::new(VisibleHost));
    payment.set_order(placed.order.id);
    payment.load_sdk().await.expect("sdk loads");
    payment.mount_card().await.expect("card mounts");

    let err = payment.submit().await.expect_err("declined");

    assert!(matches!(&err, PaymentError::Provider(message) if message == "Your card was declined."));
    assert_eq!(payment.phase(), PaymentPhase::ElementReady);
    assert_eq!(app.cart().item_count(), 4);
}

#[tokio::test]
async fn test_missing_publishable_key_fails_before_loading() {
    let backend = backend_with_cart().await;
    let app = shopper(&backend, None).await;

    let mut payment = app.payment_controller(Arc::new(Provider::default()), Arc::new(VisibleHost));
    let err = payment.load_sdk().await.expect_err("no key");

    assert!(matches!(err, PaymentError::MissingPublishableKey));
    assert!(matches!(payment.phase(), PaymentPhase::Failed(_)));
}
