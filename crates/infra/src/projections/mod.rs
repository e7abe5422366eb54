mod work_orders;

pub use work_orders::{
    WorkOrderProjectionError, WorkOrderReadModel, WorkOrdersProjection,
};
