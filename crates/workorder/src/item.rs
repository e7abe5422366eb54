//! Billable line items.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use autoshop_core::{Cents, DomainError, Quantity, ServiceId, TechnicianId};

/// Line item identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for ItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for ItemId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s).map_err(|e| DomainError::invalid_id(format!("ItemId: {e}")))?;
        Ok(Self(uuid))
    }
}

/// What kind of billable entry a line item is.
///
/// `Discount` items contribute negatively to the subtotal: their magnitude is
/// subtracted, never added, regardless of the sign they were entered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Labor,
    Part,
    Fee,
    Sublet,
    Discount,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Labor => "labor",
            ItemType::Part => "part",
            ItemType::Fee => "fee",
            ItemType::Sublet => "sublet",
            ItemType::Discount => "discount",
        }
    }
}

impl FromStr for ItemType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "labor" => Ok(ItemType::Labor),
            "part" => Ok(ItemType::Part),
            "fee" => Ok(ItemType::Fee),
            "sublet" => Ok(ItemType::Sublet),
            "discount" => Ok(ItemType::Discount),
            other => Err(DomainError::validation(format!(
                "unknown item type '{other}' (expected labor, part, fee, sublet or discount)"
            ))),
        }
    }
}

/// Customer decision on a line item.
///
/// `Unspecified` behaves as approved for totals purposes; only `Declined`
/// items are excluded from the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Approved,
    Declined,
    #[default]
    Unspecified,
}

impl ItemStatus {
    pub fn counts_toward_totals(self) -> bool {
        !matches!(self, ItemStatus::Declined)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Approved => "approved",
            ItemStatus::Declined => "declined",
            ItemStatus::Unspecified => "unspecified",
        }
    }
}

/// One billable entry on a work order.
///
/// `total` is derived: round(quantity x unit_price), recomputed whenever
/// quantity or unit price changes. The parent work order is the only writer.
/// `cost` is internal margin tracking and never reaches customer-facing
/// surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOrderItem {
    pub id: ItemId,
    pub item_type: ItemType,
    /// Optional link back to the predefined service catalog.
    pub service_id: Option<ServiceId>,
    pub description: String,
    pub quantity: Quantity,
    pub unit_price: Cents,
    pub cost: Option<Cents>,
    pub total: Cents,
    pub status: ItemStatus,
    pub technician: Option<TechnicianId>,
    pub sort_order: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declined_is_the_only_status_excluded_from_totals() {
        assert!(ItemStatus::Approved.counts_toward_totals());
        assert!(ItemStatus::Unspecified.counts_toward_totals());
        assert!(!ItemStatus::Declined.counts_toward_totals());
    }

    #[test]
    fn item_type_round_trips_through_strings() {
        for s in ["labor", "part", "fee", "sublet", "discount"] {
            let t: ItemType = s.parse().unwrap();
            assert_eq!(t.as_str(), s);
        }
        assert!("tire".parse::<ItemType>().is_err());
    }
}
