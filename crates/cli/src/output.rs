//! Terminal rendering.

use marketstall_client::api::{Category, Order, Product, ProductSummary};
use marketstall_client::cart::CartSnapshot;
use rust_decimal::Decimal;

#[allow(clippy::print_stdout)]
pub fn line(text: &str) {
    println!("{text}");
}

#[allow(clippy::print_stderr)]
pub fn failure(text: &str) {
    eprintln!("Error: {text}");
}

fn money(amount: Decimal) -> String {
    format!("${:.2}", amount.round_dp(2))
}

pub fn cart(cart: Option<&CartSnapshot>) {
    let Some(cart) = cart.filter(|cart| !cart.is_empty()) else {
        line("Your cart is empty.");
        return;
    };
    for item in &cart.items {
        line(&format!(
            "{:>6}  {:<32} {:>3} x {:>10} = {:>10}",
            item.product_id,
            item.product_name,
            item.quantity,
            money(item.unit_price),
            money(item.total_price),
        ));
    }
    line(&format!(
        "{} item(s), total {}",
        cart.item_count(),
        money(cart.grand_total)
    ));
}

pub fn product_row(product: &Product) {
    line(&format!(
        "{:>6}  {:<32} {:>10}  stock {}",
        product.id,
        product.name,
        money(product.price),
        product.stock
    ));
}

pub fn product_detail(product: &Product, favorite: bool) {
    line(&format!("{} (#{})", product.name, product.id));
    line(&format!("Price: {}", money(product.price)));
    line(&format!("In stock: {}", product.stock));
    if let Some(category_id) = product.category_id {
        line(&format!("Category: {category_id}"));
    }
    if let Some(description) = &product.description {
        line("");
        line(description);
    }
    if favorite {
        line("");
        line("In your favorites.");
    }
}

pub fn favorite_row(product: &ProductSummary) {
    line(&format!(
        "{:>6}  {:<32} {:>10}",
        product.id,
        product.name,
        money(product.price)
    ));
}

pub fn category_row(category: &Category) {
    line(&format!("{:>6}  {}", category.id, category.name));
}

pub fn order(order: &Order) {
    line(&format!(
        "Order #{} {} ({:?}), total {}",
        order.id,
        order.status,
        order.payment_method,
        money(order.total_amount)
    ));
}
