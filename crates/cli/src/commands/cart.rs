//! Cart commands.
//!
//! The cart is addressed by product id here; line ids are looked up from the
//! current snapshot.

use marketstall_client::Storefront;
use marketstall_client::cart::PriceInfo;
use marketstall_core::{CartLineId, ProductId};

use super::CommandError;
use crate::output;

pub fn show(app: &Storefront) {
    output::cart(app.cart().current().as_ref());
}

/// Add a product, pricing it from the catalog.
pub async fn add(app: &Storefront, product_id: i64, quantity: u32) -> Result<(), CommandError> {
    let product_id = ProductId::new(product_id);
    let product = app.catalog().get_product(product_id).await?;
    let price = PriceInfo {
        product_name: product.name.clone(),
        unit_price: product.price,
    };

    let cart = app.cart().add(product_id, quantity, price).await?;
    output::line(&format!("Added {quantity} x {}", product.name));
    output::cart(cart.as_ref());
    Ok(())
}

pub async fn update(app: &Storefront, product_id: i64, quantity: u32) -> Result<(), CommandError> {
    let line_id = line_for(app, product_id)?;
    let cart = app.cart().update_quantity(line_id, quantity).await?;
    output::cart(cart.as_ref());
    Ok(())
}

pub async fn remove(app: &Storefront, product_id: i64) -> Result<(), CommandError> {
    let line_id = line_for(app, product_id)?;
    let cart = app.cart().remove(line_id).await?;
    output::cart(cart.as_ref());
    Ok(())
}

pub async fn clear(app: &Storefront) -> Result<(), CommandError> {
    app.cart().clear().await?;
    output::line("Cart cleared.");
    Ok(())
}

fn line_for(app: &Storefront, product_id: i64) -> Result<CartLineId, CommandError> {
    let product_id = ProductId::new(product_id);
    app.cart()
        .current()
        .and_then(|cart| cart.line_for_product(product_id).map(|line| line.line_id))
        .ok_or(CommandError::NotInCart(product_id))
}
