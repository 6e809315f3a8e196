//! Checkout form and order placement.
//!
//! The form is validated locally before anything is sent. Validation marks
//! every field as touched so the view shows all errors at once.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument, warn};

use marketstall_core::OrderId;

use crate::api::{
    Address, ApiError, CreateOrderRequest, Order, OrderApi, PaymentMethod, ProfileApi,
    ShippingAddress,
};
use crate::auth::AuthState;
use crate::cart::CartStore;

const MIN_PHONE_DIGITS: usize = 7;
const MAX_PHONE_DIGITS: usize = 15;

/// Errors raised while placing an order.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("please correct the highlighted fields")]
    Validation(Vec<FieldError>),

    #[error("your cart is empty")]
    EmptyCart,

    #[error("log in to place an order")]
    NotAuthenticated,

    #[error("backend error: {0}")]
    Api(#[from] ApiError),
}

/// Checkout form fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CheckoutField {
    FullName,
    Street,
    City,
    PostalCode,
    Country,
    Phone,
}

impl CheckoutField {
    pub const ALL: [Self; 6] = [
        Self::FullName,
        Self::Street,
        Self::City,
        Self::PostalCode,
        Self::Country,
        Self::Phone,
    ];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::FullName => "Full name",
            Self::Street => "Street",
            Self::City => "City",
            Self::PostalCode => "Postal code",
            Self::Country => "Country",
            Self::Phone => "Phone",
        }
    }
}

impl fmt::Display for CheckoutField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One invalid field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: CheckoutField,
    pub message: String,
}

/// Shipping and payment details entered at checkout.
#[derive(Debug, Clone, Default)]
pub struct CheckoutForm {
    pub full_name: String,
    pub street: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
    pub phone: String,
    pub payment_method: PaymentMethod,
    touched: BTreeSet<CheckoutField>,
}

impl CheckoutForm {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy a saved address into the form.
    pub fn prefill(&mut self, address: &Address) {
        let ShippingAddress {
            full_name,
            street,
            city,
            postal_code,
            country,
            phone,
        } = address.into();
        self.full_name = full_name;
        self.street = street;
        self.city = city;
        self.postal_code = postal_code;
        self.country = country;
        self.phone = phone;
    }

    pub fn touch(&mut self, field: CheckoutField) {
        self.touched.insert(field);
    }

    #[must_use]
    pub fn is_touched(&self, field: CheckoutField) -> bool {
        self.touched.contains(&field)
    }

    fn value(&self, field: CheckoutField) -> &str {
        match field {
            CheckoutField::FullName => &self.full_name,
            CheckoutField::Street => &self.street,
            CheckoutField::City => &self.city,
            CheckoutField::PostalCode => &self.postal_code,
            CheckoutField::Country => &self.country,
            CheckoutField::Phone => &self.phone,
        }
    }

    /// Errors for the current values, without touching anything.
    #[must_use]
    pub fn errors(&self) -> Vec<FieldError> {
        CheckoutField::ALL
            .into_iter()
            .filter_map(|field| {
                check_field(field, self.value(field).trim()).map(|message| FieldError {
                    field,
                    message,
                })
            })
            .collect()
    }

    /// Mark every field touched and build the shipping address.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::Validation` listing every invalid field.
    pub fn validate(&mut self) -> Result<ShippingAddress, CheckoutError> {
        self.touched.extend(CheckoutField::ALL);
        let errors = self.errors();
        if !errors.is_empty() {
            return Err(CheckoutError::Validation(errors));
        }
        Ok(ShippingAddress {
            full_name: self.full_name.trim().to_string(),
            street: self.street.trim().to_string(),
            city: self.city.trim().to_string(),
            postal_code: self.postal_code.trim().to_string(),
            country: self.country.trim().to_string(),
            phone: self.phone.trim().to_string(),
        })
    }
}

fn check_field(field: CheckoutField, value: &str) -> Option<String> {
    if value.is_empty() {
        return Some(format!("{field} is required"));
    }
    match field {
        CheckoutField::PostalCode => {
            let valid = (3..=10).contains(&value.len())
                && value
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '-');
            (!valid).then(|| "Enter a valid postal code".to_string())
        }
        CheckoutField::Phone => {
            let body = value.strip_prefix('+').unwrap_or(value);
            let allowed = body
                .chars()
                .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '(' | ')'));
            let digits = body.chars().filter(char::is_ascii_digit).count();
            let valid = allowed && (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits);
            (!valid).then(|| "Enter a valid phone number".to_string())
        }
        _ => None,
    }
}

/// An order accepted by the backend.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order: Order,
    /// Whether the card payment form must run next.
    pub needs_payment: bool,
}

/// Places orders from the current cart.
#[derive(Clone)]
pub struct Checkout {
    auth: AuthState,
    cart: CartStore,
    orders: Arc<dyn OrderApi>,
    profile: Arc<dyn ProfileApi>,
}

impl Checkout {
    #[must_use]
    pub fn new(
        auth: AuthState,
        cart: CartStore,
        orders: Arc<dyn OrderApi>,
        profile: Arc<dyn ProfileApi>,
    ) -> Self {
        Self {
            auth,
            cart,
            orders,
            profile,
        }
    }

    /// Fill `form` from the shopper's default saved address, if any.
    ///
    /// # Errors
    ///
    /// Returns the API error if addresses cannot be fetched.
    pub async fn prefill(&self, form: &mut CheckoutForm) -> Result<bool, ApiError> {
        let addresses = self.profile.list_addresses().await?;
        let address = addresses
            .iter()
            .find(|address| address.is_default)
            .or_else(|| addresses.first());
        Ok(address.is_some_and(|address| {
            form.prefill(address);
            true
        }))
    }

    /// Validate the form and create the order.
    ///
    /// Cash-on-delivery orders are complete at this point and the cart is
    /// cleared. Card orders go on to the payment controller with the returned
    /// order id.
    ///
    /// # Errors
    ///
    /// Returns `Validation`, `NotAuthenticated` or `EmptyCart` before any
    /// network call, or `CheckoutError::Api` if the backend refuses.
    #[instrument(skip(self, form), fields(method = ?form.payment_method))]
    pub async fn place_order(&self, form: &mut CheckoutForm) -> Result<PlacedOrder, CheckoutError> {
        let shipping_address = form.validate()?;
        if !self.auth.is_authenticated() {
            return Err(CheckoutError::NotAuthenticated);
        }
        if self.cart.current().is_none_or(|cart| cart.is_empty()) {
            return Err(CheckoutError::EmptyCart);
        }

        let order = self
            .orders
            .create_order(&CreateOrderRequest {
                shipping_address,
                payment_method: form.payment_method,
            })
            .await?;
        info!(order_id = %order.id, total = %order.total_amount, "Order placed");

        let needs_payment = form.payment_method == PaymentMethod::Card;
        if !needs_payment {
            if let Err(e) = self.cart.clear().await {
                warn!(error = %e, "Order placed but the cart could not be cleared");
            }
        }
        Ok(PlacedOrder {
            order,
            needs_payment,
        })
    }

    /// Look up one of the user's orders.
    ///
    /// # Errors
    ///
    /// Returns `NotAuthenticated` before any network call, or
    /// `CheckoutError::Api` when the order cannot be read.
    pub async fn order(&self, order_id: OrderId) -> Result<Order, CheckoutError> {
        if !self.auth.is_authenticated() {
            return Err(CheckoutError::NotAuthenticated);
        }
        Ok(self.orders.get_order(order_id).await?)
    }
}
