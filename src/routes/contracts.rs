use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    error::AppResult,
    schemas::{clamp_limit_in_range, validate_input, SaveSnapshotInput, LimitQuery},
    services::snapshots,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new().route(
        "/contracts/{contract_id}/snapshots",
        axum::routing::get(list_snapshots).post(save_snapshot),
    )
}

async fn save_snapshot(
    State(state): State<AppState>,
    Path(contract_id): Path<Uuid>,
    Json(payload): Json<SaveSnapshotInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let pool = state.pool()?;

    let snapshot = snapshots::save_snapshot(
        pool,
        state.config.snapshot_retention_cap,
        contract_id,
        &payload.content,
        payload.change_note.as_deref(),
    )
    .await?;

    Ok(Json(json!({
        "message": "Đã lưu bản chụp hợp đồng.",
        "data": snapshot,
    })))
}

async fn list_snapshots(
    State(state): State<AppState>,
    Path(contract_id): Path<Uuid>,
    Query(query): Query<LimitQuery>,
) -> AppResult<Json<Value>> {
    let pool = state.pool()?;
    let limit = clamp_limit_in_range(query.limit, 1, 100);
    let rows = snapshots::list_snapshots(pool, contract_id, limit).await?;
    Ok(Json(json!({ "data": rows })))
}
