//! Predefined service catalog lookup.
//!
//! When staff add a line item by `service_id`, the catalog supplies the
//! default description and unit price so the request body can omit them.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use autoshop_core::{Cents, ServiceId, ShopId};
use autoshop_workorder::ItemType;

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub description: String,
    pub item_type: ItemType,
    pub unit_price: Cents,
}

pub trait ServiceCatalog: Send + Sync {
    fn lookup(&self, shop_id: ShopId, service_id: ServiceId) -> Option<CatalogEntry>;
}

impl<C> ServiceCatalog for Arc<C>
where
    C: ServiceCatalog + ?Sized,
{
    fn lookup(&self, shop_id: ShopId, service_id: ServiceId) -> Option<CatalogEntry> {
        (**self).lookup(shop_id, service_id)
    }
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryServiceCatalog {
    entries: RwLock<HashMap<(ShopId, ServiceId), CatalogEntry>>,
}

impl InMemoryServiceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, shop_id: ShopId, service_id: ServiceId, entry: CatalogEntry) {
        if let Ok(mut map) = self.entries.write() {
            map.insert((shop_id, service_id), entry);
        }
    }
}

impl ServiceCatalog for InMemoryServiceCatalog {
    fn lookup(&self, shop_id: ShopId, service_id: ServiceId) -> Option<CatalogEntry> {
        self.entries.read().ok()?.get(&(shop_id, service_id)).cloned()
    }
}
