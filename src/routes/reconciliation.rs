use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    domain::period::PeriodMonth,
    error::AppResult,
    schemas::{ApplyShortfallInput, ReconciliationQuery},
    services::reconciliation,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/reconciliation",
            axum::routing::get(compute_reconciliation),
        )
        .route(
            "/reconciliation/shortfalls",
            axum::routing::post(flag_shortfall),
        )
        .route(
            "/reconciliation/shortfalls/{shortfall_id}/apply",
            axum::routing::post(apply_shortfall),
        )
        .route(
            "/reconciliation/shortfalls/{shortfall_id}",
            axum::routing::delete(delete_shortfall),
        )
}

async fn compute_reconciliation(
    State(state): State<AppState>,
    Query(query): Query<ReconciliationQuery>,
) -> AppResult<Json<Value>> {
    let pool = state.pool()?;
    let period = PeriodMonth::new(query.year, query.month)?;
    let report = reconciliation::compute_reconciliation(pool, query.landlord_id, query.house_id, period).await?;
    Ok(Json(json!({ "data": report })))
}

async fn flag_shortfall(
    State(state): State<AppState>,
    Json(payload): Json<ReconciliationQuery>,
) -> AppResult<Json<Value>> {
    let pool = state.pool()?;
    let period = PeriodMonth::new(payload.year, payload.month)?;
    let record = reconciliation::flag_shortfall(pool, payload.landlord_id, payload.house_id, period).await?;
    Ok(Json(json!({
        "message": "Đã ghi nhận khoản thiếu hụt.",
        "data": record,
    })))
}

async fn apply_shortfall(
    State(state): State<AppState>,
    Path(shortfall_id): Path<Uuid>,
    payload: Option<Json<ApplyShortfallInput>>,
) -> AppResult<Json<Value>> {
    let pool = state.pool()?;
    let input = payload.map(|Json(input)| input).unwrap_or_default();
    let due_days = input.due_days.unwrap_or(state.config.adjustment_due_days);

    let created = reconciliation::apply_shortfall_to_invoices(
        pool,
        &state.config.sepay_reference_prefix,
        shortfall_id,
        due_days,
    )
    .await?;

    Ok(Json(json!({
        "message": format!("Đã tạo {} hóa đơn điều chỉnh.", created.len()),
        "data": created,
    })))
}

async fn delete_shortfall(
    State(state): State<AppState>,
    Path(shortfall_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let pool = state.pool()?;
    reconciliation::delete_shortfall(pool, shortfall_id).await?;
    Ok(Json(json!({ "message": "Đã xóa khoản thiếu hụt." })))
}
