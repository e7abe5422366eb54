pub mod portal;
pub mod system;
pub mod work_orders;
