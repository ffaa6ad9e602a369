pub mod invoice_generator;
pub mod invoice_lifecycle;
pub mod notifications;
pub mod payment_ledger;
pub mod reconciliation;
pub mod sepay;
pub mod snapshots;
