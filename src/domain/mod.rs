pub mod invoice;
pub mod money;
pub mod payment;
pub mod period;
pub mod sepay;
pub mod shortfall;
pub mod snapshot;
