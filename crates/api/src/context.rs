use autoshop_core::ShopId;

/// Shop context for a request.
///
/// Immutable; must be present for all staff routes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ShopContext {
    shop_id: ShopId,
}

impl ShopContext {
    pub fn new(shop_id: ShopId) -> Self {
        Self { shop_id }
    }

    pub fn shop_id(&self) -> ShopId {
        self.shop_id
    }
}

/// Staff identity forwarded by the trusted gateway.
///
/// Authentication itself happens upstream; this is just the display name
/// recorded in status history entries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StaffContext {
    display_name: Option<String>,
}

impl StaffContext {
    pub fn new(display_name: Option<String>) -> Self {
        Self { display_name }
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }
}
