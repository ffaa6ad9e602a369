use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::snapshot::{content_sha256, ContractSnapshotRecord};
use crate::error::{map_db_error, AppError, AppResult};

/// Append a snapshot of the contract text now in force. The history is
/// append-only: existing rows are never updated or reordered, and only
/// the retention prune removes the oldest entries past the cap.
/// Re-saving byte-identical content returns the latest snapshot
/// unchanged so every row in the log represents an actual change.
pub async fn save_snapshot(
    pool: &PgPool,
    retention_cap: i64,
    contract_id: Uuid,
    content: &str,
    change_note: Option<&str>,
) -> AppResult<ContractSnapshotRecord> {
    let checksum = content_sha256(content);

    let mut tx = pool.begin().await.map_err(map_db_error)?;

    let contract_exists: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM contracts WHERE id = $1")
            .bind(contract_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_db_error)?;
    if contract_exists.is_none() {
        return Err(AppError::NotFound("Không tìm thấy hợp đồng.".to_string()));
    }

    let latest: Option<ContractSnapshotRecord> = sqlx::query_as(
        "SELECT * FROM contract_snapshots
         WHERE contract_id = $1
         ORDER BY created_at DESC, id DESC
         LIMIT 1",
    )
    .bind(contract_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(map_db_error)?;

    if let Some(existing) = latest {
        if existing.content_sha256 == checksum {
            tx.rollback().await.map_err(map_db_error)?;
            return Ok(existing);
        }
    }

    let snapshot: ContractSnapshotRecord = sqlx::query_as(
        "INSERT INTO contract_snapshots (contract_id, content, content_sha256, change_note)
         VALUES ($1, $2, $3, $4)
         RETURNING *",
    )
    .bind(contract_id)
    .bind(content)
    .bind(&checksum)
    .bind(change_note)
    .fetch_one(&mut *tx)
    .await
    .map_err(map_db_error)?;

    sqlx::query(
        "UPDATE contracts SET current_snapshot_id = $2 WHERE id = $1",
    )
    .bind(contract_id)
    .bind(snapshot.id)
    .execute(&mut *tx)
    .await
    .map_err(map_db_error)?;

    // Retention prune: keep the newest `retention_cap` snapshots per
    // contract, drop the rest.
    let pruned = sqlx::query(
        "DELETE FROM contract_snapshots
         WHERE contract_id = $1
           AND id IN (
               SELECT id FROM contract_snapshots
               WHERE contract_id = $1
               ORDER BY created_at DESC, id DESC
               OFFSET $2
           )",
    )
    .bind(contract_id)
    .bind(retention_cap.max(1))
    .execute(&mut *tx)
    .await
    .map_err(map_db_error)?;

    if pruned.rows_affected() > 0 {
        tracing::info!(
            contract_id = %contract_id,
            pruned = pruned.rows_affected(),
            "Pruned contract snapshots past retention cap"
        );
    }

    tx.commit().await.map_err(map_db_error)?;
    Ok(snapshot)
}

pub async fn list_snapshots(
    pool: &PgPool,
    contract_id: Uuid,
    limit: i64,
) -> AppResult<Vec<ContractSnapshotRecord>> {
    sqlx::query_as(
        "SELECT * FROM contract_snapshots
         WHERE contract_id = $1
         ORDER BY created_at DESC, id DESC
         LIMIT $2",
    )
    .bind(contract_id)
    .bind(limit.clamp(1, 500))
    .fetch_all(pool)
    .await
    .map_err(map_db_error)
}
