mod shop_store;

pub use shop_store::{InMemoryShopStore, ShopStore};
