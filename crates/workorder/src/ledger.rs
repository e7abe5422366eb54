//! Ledger computation: the single source of truth for what an order costs.
//!
//! Totals are a pure function of the current item set plus the order-level
//! discount and tax rate. The aggregate recomputes them inside `apply` for
//! every money-affecting event, so a stored total can never drift from the
//! items it was derived from.

use serde::{Deserialize, Serialize};

use autoshop_core::{Cents, TaxRate};

use crate::item::{ItemType, WorkOrderItem};

/// Derived monetary totals for one work order.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Cents,
    pub tax: Cents,
    pub total: Cents,
}

impl Totals {
    /// Recompute totals from the authoritative item set.
    ///
    /// 1. Declined items are excluded entirely.
    /// 2. subtotal = sum of non-discount line totals minus the magnitude of
    ///    discount-type line totals.
    /// 3. taxable = max(0, subtotal - discount); the discount itself is kept
    ///    as entered even when it exceeds the subtotal.
    /// 4. tax = round(taxable x rate), rounded once, half-to-even.
    /// 5. total = taxable + tax.
    pub fn compute(items: &[WorkOrderItem], discount: Cents, tax_rate: TaxRate) -> Totals {
        let mut subtotal = 0i64;
        for item in items {
            if !item.status.counts_toward_totals() {
                continue;
            }
            match item.item_type {
                ItemType::Discount => {
                    subtotal = subtotal.saturating_sub(item.total.amount().saturating_abs());
                }
                _ => {
                    subtotal = subtotal.saturating_add(item.total.amount());
                }
            }
        }

        let taxable = Cents::new(subtotal.saturating_sub(discount.amount()).max(0));
        let tax = tax_rate.apply(taxable);
        let total = Cents::new(taxable.amount().saturating_add(tax.amount()));

        Totals {
            subtotal: Cents::new(subtotal),
            tax,
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    use autoshop_core::{Quantity, money::line_total};

    use crate::item::{ItemId, ItemStatus};

    fn item(item_type: ItemType, quantity: &str, unit_price: i64, status: ItemStatus) -> WorkOrderItem {
        let quantity = Quantity::new(quantity.parse().unwrap()).unwrap();
        let unit_price = Cents::new(unit_price);
        WorkOrderItem {
            id: ItemId::new(),
            item_type,
            service_id: None,
            description: "test".to_string(),
            quantity,
            unit_price,
            cost: None,
            total: line_total(quantity, unit_price).unwrap(),
            status,
            technician: None,
            sort_order: 1,
        }
    }

    #[test]
    fn thirteen_percent_on_ten_thousand() {
        let items = vec![item(ItemType::Labor, "1", 10_000, ItemStatus::Unspecified)];
        let totals = Totals::compute(&items, Cents::ZERO, TaxRate::default());
        assert_eq!(totals.subtotal, Cents::new(10_000));
        assert_eq!(totals.tax, Cents::new(1_300));
        assert_eq!(totals.total, Cents::new(11_300));
    }

    #[test]
    fn declined_items_are_excluded_entirely() {
        let items = vec![
            item(ItemType::Labor, "1", 8_000, ItemStatus::Approved),
            item(ItemType::Part, "2", 1_500, ItemStatus::Declined),
        ];
        let totals = Totals::compute(&items, Cents::ZERO, TaxRate::zero());
        assert_eq!(totals.subtotal, Cents::new(8_000));
    }

    #[test]
    fn reapproving_a_declined_item_restores_it_exactly() {
        let mut items = vec![
            item(ItemType::Labor, "1", 8_000, ItemStatus::Approved),
            item(ItemType::Part, "2", 1_500, ItemStatus::Approved),
        ];
        let before = Totals::compute(&items, Cents::ZERO, TaxRate::default());

        items[1].status = ItemStatus::Declined;
        let declined = Totals::compute(&items, Cents::ZERO, TaxRate::default());
        assert!(declined.subtotal < before.subtotal);

        items[1].status = ItemStatus::Approved;
        let restored = Totals::compute(&items, Cents::ZERO, TaxRate::default());
        assert_eq!(restored, before);
    }

    #[test]
    fn discount_item_subtracts_its_magnitude_regardless_of_sign() {
        let labor = item(ItemType::Labor, "1", 10_000, ItemStatus::Unspecified);

        // Entered with a negative price: total is -500.
        let negative = item(ItemType::Discount, "1", -500, ItemStatus::Unspecified);
        let totals = Totals::compute(&[labor.clone(), negative], Cents::ZERO, TaxRate::zero());
        assert_eq!(totals.subtotal, Cents::new(9_500));

        // Entered with a positive price: still subtracts 500.
        let positive = item(ItemType::Discount, "1", 500, ItemStatus::Unspecified);
        let totals = Totals::compute(&[labor, positive], Cents::ZERO, TaxRate::zero());
        assert_eq!(totals.subtotal, Cents::new(9_500));
    }

    #[test]
    fn order_discount_clamps_taxable_at_zero_but_is_not_capped() {
        let items = vec![item(ItemType::Labor, "1", 4_000, ItemStatus::Unspecified)];
        let totals = Totals::compute(&items, Cents::new(10_000), TaxRate::default());
        assert_eq!(totals.subtotal, Cents::new(4_000));
        assert_eq!(totals.tax, Cents::ZERO);
        assert_eq!(totals.total, Cents::ZERO);
    }

    #[test]
    fn compute_is_idempotent() {
        let items = vec![
            item(ItemType::Labor, "1.5", 9_000, ItemStatus::Approved),
            item(ItemType::Part, "3", 2_199, ItemStatus::Unspecified),
        ];
        let first = Totals::compute(&items, Cents::new(1_000), TaxRate::default());
        let second = Totals::compute(&items, Cents::new(1_000), TaxRate::default());
        assert_eq!(first, second);
    }

    proptest! {
        #[test]
        fn total_is_taxable_plus_tax(
            prices in proptest::collection::vec(0i64..1_000_000, 0..8),
            discount in 0i64..1_000_000,
        ) {
            let items: Vec<_> = prices
                .iter()
                .map(|p| item(ItemType::Part, "1", *p, ItemStatus::Unspecified))
                .collect();
            let totals = Totals::compute(&items, Cents::new(discount), TaxRate::default());
            let taxable = (totals.subtotal.amount() - discount).max(0);
            prop_assert_eq!(totals.total.amount(), taxable + totals.tax.amount());
            prop_assert!(totals.tax.amount() >= 0);
        }

        #[test]
        fn declining_an_item_never_increases_the_subtotal(
            prices in proptest::collection::vec(1i64..1_000_000, 1..8),
            victim in 0usize..8,
        ) {
            let mut items: Vec<_> = prices
                .iter()
                .map(|p| item(ItemType::Part, "1", *p, ItemStatus::Unspecified))
                .collect();
            let victim = victim % items.len();
            let before = Totals::compute(&items, Cents::ZERO, TaxRate::default());
            items[victim].status = ItemStatus::Declined;
            let after = Totals::compute(&items, Cents::ZERO, TaxRate::default());
            prop_assert!(after.subtotal <= before.subtotal);
        }
    }
}
