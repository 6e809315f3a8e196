//! Product and category browsing.

use marketstall_client::Storefront;
use marketstall_client::api::ProductQuery;
use marketstall_core::{CategoryId, ProductId};

use super::CommandError;
use crate::output;

pub async fn list_products(
    app: &Storefront,
    page: u32,
    size: Option<u32>,
    category: Option<i64>,
    search: Option<String>,
) -> Result<(), CommandError> {
    let query = ProductQuery {
        page,
        size,
        category_id: category.map(CategoryId::new),
        search: search.filter(|term| !term.trim().is_empty()),
    };
    let listing = app.catalog().list_products(&query).await?;

    if listing.content.is_empty() {
        output::line("No products found.");
        return Ok(());
    }
    for product in &listing.content {
        output::product_row(product);
    }
    output::line(&format!(
        "Page {} of {} ({} products)",
        listing.page + 1,
        listing.total_pages.max(1),
        listing.total_elements
    ));
    Ok(())
}

pub async fn show_product(app: &Storefront, product_id: i64) -> Result<(), CommandError> {
    let product_id = ProductId::new(product_id);
    let product = app.catalog().get_product(product_id).await?;
    output::product_detail(&product, app.favorites().is_favorite(product_id));
    Ok(())
}

pub async fn list_categories(app: &Storefront) -> Result<(), CommandError> {
    let categories = app.catalog().list_categories().await?;
    if categories.is_empty() {
        output::line("No categories.");
    }
    for category in &categories {
        output::category_row(category);
    }
    Ok(())
}
