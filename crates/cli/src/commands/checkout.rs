//! Cash-on-delivery checkout.
//!
//! Card payments need the embedded payment form and are left to graphical
//! shells.

use clap::Args;
use marketstall_client::Storefront;
use marketstall_client::api::PaymentMethod;
use marketstall_client::checkout::{CheckoutError, CheckoutForm};
use marketstall_core::OrderId;

use super::CommandError;
use crate::output;

#[derive(Args)]
pub struct CheckoutArgs {
    /// Start from the default saved address
    #[arg(long)]
    saved_address: bool,

    #[arg(long)]
    full_name: Option<String>,

    #[arg(long)]
    street: Option<String>,

    #[arg(long)]
    city: Option<String>,

    #[arg(long)]
    postal_code: Option<String>,

    #[arg(long)]
    country: Option<String>,

    #[arg(long)]
    phone: Option<String>,
}

impl CheckoutArgs {
    /// Overlay explicit flags on the form.
    fn apply(self, form: &mut CheckoutForm) {
        let fields = [
            (self.full_name, &mut form.full_name),
            (self.street, &mut form.street),
            (self.city, &mut form.city),
            (self.postal_code, &mut form.postal_code),
            (self.country, &mut form.country),
            (self.phone, &mut form.phone),
        ];
        for (value, slot) in fields {
            if let Some(value) = value {
                *slot = value;
            }
        }
    }
}

pub async fn run(app: &Storefront, args: CheckoutArgs) -> Result<(), CommandError> {
    let mut form = CheckoutForm::new();
    form.payment_method = PaymentMethod::CashOnDelivery;

    if args.saved_address && !app.checkout().prefill(&mut form).await? {
        output::line("No saved address found.");
    }
    args.apply(&mut form);

    match app.checkout().place_order(&mut form).await {
        Ok(placed) => {
            output::order(&placed.order);
            output::line("Pay on delivery. Your cart has been cleared.");
            Ok(())
        }
        Err(CheckoutError::Validation(errors)) => {
            for error in &errors {
                output::line(&format!("  {}: {}", error.field, error.message));
            }
            Err(CheckoutError::Validation(errors).into())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn show_order(app: &Storefront, order_id: i64) -> Result<(), CommandError> {
    let order = app.checkout().order(OrderId::new(order_id)).await?;
    output::order(&order);
    output::line(&format!("Placed {}", order.created_at.format("%Y-%m-%d %H:%M UTC")));
    Ok(())
}
