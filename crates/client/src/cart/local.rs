//! Anonymous cart persisted in local storage.

use std::sync::{Arc, Mutex, PoisonError};

use rust_decimal::Decimal;
use tracing::debug;

use marketstall_core::{CartLineId, ProductId};

use super::{CartError, CartLine, CartSnapshot, PriceInfo};
use crate::storage::{self, KeyValueStorage, keys};

/// Cart for visitors who are not logged in.
///
/// All operations are synchronous. Each mutation recomputes totals and
/// rewrites the whole snapshot under `anonymousCart`, or erases the key when
/// the cart ends up empty.
pub struct LocalCart {
    storage: Arc<dyn KeyValueStorage>,
    cart: Mutex<Option<CartSnapshot>>,
}

impl LocalCart {
    /// Hydrate from storage. Missing or corrupt data starts an empty cart.
    ///
    /// A stored cart is normalized on the way in: empty lines are dropped,
    /// lines for the same product are merged and totals are recomputed.
    #[must_use]
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        let cart = storage::read_json::<CartSnapshot>(storage.as_ref(), keys::ANONYMOUS_CART)
            .map(normalize)
            .filter(|cart| !cart.is_empty());
        Self {
            storage,
            cart: Mutex::new(cart),
        }
    }

    /// Current cart, `None` when empty.
    #[must_use]
    pub fn snapshot(&self) -> Option<CartSnapshot> {
        self.cart
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Add units of a product, merging into an existing line for it.
    ///
    /// # Errors
    ///
    /// Returns `CartError::InvalidQuantity` for zero quantity and
    /// `CartError::InvalidPrice` for a negative unit price.
    pub fn add(
        &self,
        product_id: ProductId,
        quantity: u32,
        price: PriceInfo,
    ) -> Result<Option<CartSnapshot>, CartError> {
        if quantity < 1 {
            return Err(CartError::InvalidQuantity(quantity));
        }
        if price.unit_price < Decimal::ZERO {
            return Err(CartError::InvalidPrice(price.unit_price));
        }

        Ok(self.mutate(|cart| {
            if let Some(line) = cart
                .items
                .iter_mut()
                .find(|line| line.product_id == product_id)
            {
                line.quantity = line.quantity.saturating_add(quantity);
                return;
            }

            cart.items.push(CartLine {
                line_id: next_line_id(&cart.items),
                product_id,
                product_name: price.product_name,
                quantity,
                unit_price: price.unit_price,
                total_price: Decimal::ZERO,
            });
        }))
    }

    /// Set a line's quantity; zero removes the line. Unknown lines are ignored.
    pub fn update_quantity(&self, line_id: CartLineId, quantity: u32) -> Option<CartSnapshot> {
        if quantity < 1 {
            return self.remove(line_id);
        }
        self.mutate(|cart| {
            if let Some(line) = cart.items.iter_mut().find(|line| line.line_id == line_id) {
                line.quantity = quantity;
            } else {
                debug!(%line_id, "Ignoring update for unknown cart line");
            }
        })
    }

    /// Remove a line. Unknown lines are ignored.
    pub fn remove(&self, line_id: CartLineId) -> Option<CartSnapshot> {
        self.mutate(|cart| cart.items.retain(|line| line.line_id != line_id))
    }

    /// Empty the cart and erase it from storage.
    pub fn clear(&self) {
        *self.cart.lock().unwrap_or_else(PoisonError::into_inner) = None;
        storage::erase(self.storage.as_ref(), keys::ANONYMOUS_CART);
    }

    /// Apply `change`, restore the invariants, persist, and return the result.
    fn mutate(&self, change: impl FnOnce(&mut CartSnapshot)) -> Option<CartSnapshot> {
        let mut guard = self.cart.lock().unwrap_or_else(PoisonError::into_inner);
        let mut cart = guard.take().unwrap_or_else(CartSnapshot::empty_anonymous);
        change(&mut cart);
        cart.recompute_totals();

        if cart.is_empty() {
            storage::erase(self.storage.as_ref(), keys::ANONYMOUS_CART);
            *guard = None;
        } else {
            storage::write_json(self.storage.as_ref(), keys::ANONYMOUS_CART, &cart);
            *guard = Some(cart);
        }
        guard.clone()
    }
}

/// Drop empty lines, fold lines sharing a product into the first one, and
/// recompute totals.
fn normalize(mut cart: CartSnapshot) -> CartSnapshot {
    let mut merged: Vec<CartLine> = Vec::with_capacity(cart.items.len());
    for line in cart.items.drain(..).filter(|line| line.quantity > 0) {
        match merged
            .iter_mut()
            .find(|kept| kept.product_id == line.product_id)
        {
            Some(kept) => {
                debug!(product_id = %line.product_id, "Merging duplicate stored cart line");
                kept.quantity = kept.quantity.saturating_add(line.quantity);
            }
            None => merged.push(line),
        }
    }
    cart.items = merged;
    cart.recompute_totals();
    cart
}

/// One past the highest line id, or the lowest free positive id once that
/// would overflow.
fn next_line_id(items: &[CartLine]) -> CartLineId {
    let highest = items.iter().map(|line| line.line_id.as_i64()).max().unwrap_or(0);
    let id = highest.checked_add(1).unwrap_or_else(|| {
        (1..=i64::MAX)
            .find(|candidate| items.iter().all(|line| line.line_id.as_i64() != *candidate))
            .unwrap_or(1)
    });
    CartLineId::new(id)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::cart::tests::price;
    use crate::storage::MemoryStorage;
    use quickcheck::{Arbitrary, Gen, QuickCheck};
    use std::collections::HashSet;

    fn cart() -> (LocalCart, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (LocalCart::new(storage.clone()), storage)
    }

    fn assert_invariants(cart: Option<&CartSnapshot>) {
        let Some(cart) = cart else { return };
        assert!(cart.totals_consistent(), "totals drifted: {cart:?}");
        let products: HashSet<_> = cart.items.iter().map(|line| line.product_id).collect();
        assert_eq!(products.len(), cart.items.len(), "duplicate product line");
        assert!(cart.items.iter().all(|line| line.quantity >= 1));
    }

    #[test]
    fn test_duplicate_add_merges_quantity() {
        let (cart, _) = cart();
        cart.add(ProductId::new(1), 2, price("Tea", 350)).unwrap();
        let result = cart.add(ProductId::new(1), 3, price("Tea", 350)).unwrap().unwrap();

        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].quantity, 5);
        assert_eq!(result.grand_total, Decimal::new(1750, 2));
    }

    #[test]
    fn test_scenario_grand_total() {
        let (cart, storage) = cart();
        cart.add(ProductId::new(1), 2, price("P1", 1000)).unwrap();
        let result = cart.add(ProductId::new(2), 1, price("P2", 500)).unwrap().unwrap();

        assert_eq!(result.grand_total, Decimal::from(25));
        assert_eq!(result.owner_id, marketstall_core::UserId::ANONYMOUS);
        assert!(storage.contains(keys::ANONYMOUS_CART));
    }

    #[test]
    fn test_update_to_zero_equals_remove() {
        let (left, _) = cart();
        let (right, _) = cart();
        for store in [&left, &right] {
            store.add(ProductId::new(1), 1, price("A", 100)).unwrap();
            store.add(ProductId::new(2), 4, price("B", 250)).unwrap();
        }
        let line_id = left.snapshot().unwrap().items[0].line_id;

        assert_eq!(left.update_quantity(line_id, 0), right.remove(line_id));
    }

    #[test]
    fn test_invariants_hold_across_mutation_sequence() {
        let (cart, _) = cart();
        let ops: Vec<Box<dyn Fn(&LocalCart) -> Option<CartSnapshot>>> = vec![
            Box::new(|c| c.add(ProductId::new(1), 2, price("A", 199)).unwrap()),
            Box::new(|c| c.add(ProductId::new(2), 1, price("B", 1)).unwrap()),
            Box::new(|c| c.add(ProductId::new(1), 7, price("A", 199)).unwrap()),
            Box::new(|c| c.update_quantity(CartLineId::new(2), 12)),
            Box::new(|c| c.add(ProductId::new(3), 3, price("C", 0)).unwrap()),
            Box::new(|c| c.remove(CartLineId::new(1))),
            Box::new(|c| c.update_quantity(CartLineId::new(99), 5)),
            Box::new(|c| c.update_quantity(CartLineId::new(3), 0)),
            Box::new(|c| c.add(ProductId::new(1), 1, price("A", 199)).unwrap()),
        ];

        for op in ops {
            let result = op(&cart);
            assert_invariants(result.as_ref());
            assert_eq!(result, cart.snapshot());
        }
    }

    #[test]
    fn test_new_line_ids_do_not_collide_after_removal() {
        let (cart, _) = cart();
        cart.add(ProductId::new(1), 1, price("A", 100)).unwrap();
        cart.add(ProductId::new(2), 1, price("B", 100)).unwrap();
        cart.remove(CartLineId::new(1));
        let result = cart.add(ProductId::new(3), 1, price("C", 100)).unwrap().unwrap();

        let ids: HashSet<_> = result.items.iter().map(|line| line.line_id).collect();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_emptying_erases_storage() {
        let (cart, storage) = cart();
        cart.add(ProductId::new(1), 1, price("A", 100)).unwrap();
        let result = cart.remove(CartLineId::new(1));

        assert!(result.is_none());
        assert!(!storage.contains(keys::ANONYMOUS_CART));
    }

    #[test]
    fn test_rejects_zero_quantity_and_negative_price() {
        let (cart, _) = cart();
        assert!(matches!(
            cart.add(ProductId::new(1), 0, price("A", 100)),
            Err(CartError::InvalidQuantity(0))
        ));
        assert!(matches!(
            cart.add(ProductId::new(1), 1, price("A", -1)),
            Err(CartError::InvalidPrice(_))
        ));
        assert!(cart.snapshot().is_none());
    }

    #[test]
    fn test_hydrates_from_storage() {
        let storage = Arc::new(MemoryStorage::new());
        {
            let first = LocalCart::new(storage.clone());
            first.add(ProductId::new(8), 2, price("Jam", 425)).unwrap();
        }
        let second = LocalCart::new(storage);
        let cart = second.snapshot().unwrap();
        assert_eq!(cart.items[0].product_name, "Jam");
        assert_eq!(cart.grand_total, Decimal::new(850, 2));
    }

    fn stored_line(line_id: i64, product_id: i64, quantity: u32) -> CartLine {
        CartLine {
            line_id: CartLineId::new(line_id),
            product_id: ProductId::new(product_id),
            product_name: format!("P{product_id}"),
            quantity,
            unit_price: Decimal::from(2),
            total_price: Decimal::ZERO,
        }
    }

    fn stored(items: Vec<CartLine>) -> Arc<MemoryStorage> {
        let storage = Arc::new(MemoryStorage::new());
        let cart = CartSnapshot {
            items,
            ..CartSnapshot::empty_anonymous()
        };
        storage::write_json(storage.as_ref(), keys::ANONYMOUS_CART, &cart);
        storage
    }

    #[test]
    fn test_hydration_merges_duplicate_product_lines() {
        let storage = stored(vec![
            stored_line(1, 5, 2),
            stored_line(2, 5, 3),
            stored_line(3, 7, 0),
        ]);
        let cart = LocalCart::new(storage);

        let hydrated = cart.snapshot().unwrap();
        assert_eq!(hydrated.items.len(), 1);
        assert_eq!(hydrated.items[0].line_id, CartLineId::new(1));
        assert_eq!(hydrated.items[0].quantity, 5);
        assert_eq!(hydrated.grand_total, Decimal::from(10));

        let result = cart.add(ProductId::new(6), 1, price("P6", 100)).unwrap().unwrap();
        let lines_for_5 = result
            .items
            .iter()
            .filter(|line| line.product_id == ProductId::new(5))
            .count();
        assert_eq!(lines_for_5, 1);
        assert_invariants(Some(&result));
    }

    #[test]
    fn test_line_id_allocation_survives_max_id() {
        let storage = stored(vec![stored_line(i64::MAX, 1, 1)]);
        let cart = LocalCart::new(storage);

        let result = cart.add(ProductId::new(2), 1, price("B", 100)).unwrap().unwrap();

        let ids: HashSet<_> = result.items.iter().map(|line| line.line_id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&CartLineId::new(1)));
    }

    #[test]
    fn test_clear() {
        let (cart, storage) = cart();
        cart.add(ProductId::new(1), 1, price("A", 100)).unwrap();
        cart.clear();
        assert!(cart.snapshot().is_none());
        assert!(!storage.contains(keys::ANONYMOUS_CART));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add { product: i64, quantity: u32, cents: i64 },
        Update { line: i64, quantity: u32 },
        Remove { line: i64 },
        Clear,
    }

    impl Arbitrary for Op {
        fn arbitrary(g: &mut Gen) -> Self {
            // Small id ranges so updates and removals hit existing lines.
            let product = i64::from(u8::arbitrary(g) % 6) + 1;
            let line = i64::from(u8::arbitrary(g) % 8) + 1;
            let quantity = u32::from(u8::arbitrary(g) % 5);
            match u8::arbitrary(g) % 10 {
                0..=4 => Self::Add {
                    product,
                    quantity: quantity + 1,
                    cents: i64::from(u16::arbitrary(g)),
                },
                5..=7 => Self::Update { line, quantity },
                8 => Self::Remove { line },
                _ => Self::Clear,
            }
        }
    }

    fn apply(cart: &LocalCart, op: &Op) -> Option<CartSnapshot> {
        match *op {
            Op::Add {
                product,
                quantity,
                cents,
            } => cart
                .add(ProductId::new(product), quantity, price("P", cents))
                .unwrap(),
            Op::Update { line, quantity } => cart.update_quantity(CartLineId::new(line), quantity),
            Op::Remove { line } => cart.remove(CartLineId::new(line)),
            Op::Clear => {
                cart.clear();
                None
            }
        }
    }

    #[test]
    fn test_invariants_hold_for_any_mutation_sequence() {
        fn holds(ops: Vec<Op>) -> bool {
            let storage = Arc::new(MemoryStorage::new());
            let cart = LocalCart::new(storage.clone());
            for op in &ops {
                let result = apply(&cart, op);
                assert_invariants(result.as_ref());
                if result != cart.snapshot() {
                    return false;
                }
                // What is persisted hydrates to the same cart.
                if LocalCart::new(storage.clone()).snapshot() != result {
                    return false;
                }
            }
            true
        }

        QuickCheck::new()
            .tests(200)
            .quickcheck(holds as fn(Vec<Op>) -> bool);
    }
}
