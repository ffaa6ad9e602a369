use axum::{routing::get, Router};

use crate::state::AppState;

pub mod contracts;
pub mod health;
pub mod invoices;
pub mod payments;
pub mod reconciliation;
pub mod sepay;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(invoices::router())
        .merge(payments::router())
        .merge(sepay::router())
        .merge(reconciliation::router())
        .merge(contracts::router())
}

/// Routes mounted at the root, outside the API prefix. Payment gateways
/// are configured with fixed callback URLs.
pub fn public_router() -> Router<AppState> {
    sepay::public_router()
}
