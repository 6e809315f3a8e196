//! Favorites commands.

use marketstall_client::Storefront;
use marketstall_core::ProductId;

use super::CommandError;
use crate::output;

pub fn list(app: &Storefront) {
    let favorites = app.favorites().current();
    if favorites.is_empty() {
        output::line("No favorites yet.");
        return;
    }
    for product in favorites.iter() {
        output::favorite_row(product);
    }
}

pub async fn add(app: &Storefront, product_id: i64) -> Result<(), CommandError> {
    let product = app.catalog().get_product(ProductId::new(product_id)).await?;
    app.favorites().add(product.summary()).await?;
    output::line(&format!("Added {} to favorites.", product.name));
    Ok(())
}

pub async fn toggle(app: &Storefront, product_id: i64) -> Result<(), CommandError> {
    let product = app.catalog().get_product(ProductId::new(product_id)).await?;
    if app.favorites().toggle(product.summary()).await? {
        output::line(&format!("Added {} to favorites.", product.name));
    } else {
        output::line(&format!("Removed {} from favorites.", product.name));
    }
    Ok(())
}

pub async fn remove(app: &Storefront, product_id: i64) -> Result<(), CommandError> {
    let product_id = ProductId::new(product_id);
    if !app.favorites().is_favorite(product_id) {
        output::line("Not in favorites.");
        return Ok(());
    }
    app.favorites().remove(product_id).await?;
    output::line("Removed from favorites.");
    Ok(())
}
