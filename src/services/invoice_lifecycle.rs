use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::invoice::{
    self, effective_status, InvoiceRecord, InvoiceStatus, OverpayPolicy, SettlementOutcome,
};
use crate::error::{map_db_error, AppError, AppResult};

/// Lock an invoice row for the duration of the transaction. All
/// settlement and cancellation paths go through this so concurrent
/// mutations on the same invoice serialize instead of racing.
pub async fn lock_invoice(
    tx: &mut Transaction<'_, Postgres>,
    invoice_id: Uuid,
) -> AppResult<InvoiceRecord> {
    sqlx::query_as::<_, InvoiceRecord>("SELECT * FROM invoices WHERE id = $1 FOR UPDATE")
        .bind(invoice_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_db_error)?
        .ok_or_else(|| AppError::NotFound("Không tìm thấy hóa đơn.".to_string()))
}

pub async fn lock_invoice_by_reference(
    tx: &mut Transaction<'_, Postgres>,
    reference_code: &str,
) -> AppResult<Option<InvoiceRecord>> {
    sqlx::query_as::<_, InvoiceRecord>(
        "SELECT * FROM invoices
         WHERE reference_code = $1 AND status <> 'cancelled'
         FOR UPDATE",
    )
    .bind(reference_code)
    .fetch_optional(&mut **tx)
    .await
    .map_err(map_db_error)
}

/// DRAFT → SENT. The notification callback is the caller's concern
/// (fire-and-forget, outside the transaction).
pub async fn send(pool: &PgPool, invoice_id: Uuid) -> AppResult<InvoiceRecord> {
    let mut tx = pool.begin().await.map_err(map_db_error)?;

    let invoice = lock_invoice(&mut tx, invoice_id).await?;
    let status = InvoiceStatus::parse(&invoice.status)?;
    if status != InvoiceStatus::Draft {
        return Err(AppError::Conflict(format!(
            "Chỉ hóa đơn nháp mới có thể gửi (trạng thái hiện tại: {}).",
            invoice.status
        )));
    }

    let updated: InvoiceRecord =
        sqlx::query_as("UPDATE invoices SET status = 'sent' WHERE id = $1 RETURNING *")
            .bind(invoice_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_db_error)?;

    tx.commit().await.map_err(map_db_error)?;
    tracing::info!(invoice_id = %invoice_id, "Invoice sent");
    Ok(updated)
}

/// Cancellation is terminal and only legal while nothing has settled.
pub async fn cancel(pool: &PgPool, invoice_id: Uuid) -> AppResult<InvoiceRecord> {
    let mut tx = pool.begin().await.map_err(map_db_error)?;

    let invoice = lock_invoice(&mut tx, invoice_id).await?;
    let status = InvoiceStatus::parse(&invoice.status)?;
    if !status.is_cancellable() {
        return Err(AppError::Conflict(format!(
            "Không thể hủy hóa đơn ở trạng thái {}.",
            invoice.status
        )));
    }

    let confirmed: (i64,) = sqlx::query_as(
        "SELECT COUNT(*)::bigint FROM payments
         WHERE invoice_id = $1 AND status = 'confirmed'",
    )
    .bind(invoice_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(map_db_error)?;

    if confirmed.0 > 0 {
        return Err(AppError::HasSettlement(
            "Hóa đơn đã có thanh toán được xác nhận, không thể hủy.".to_string(),
        ));
    }

    let updated: InvoiceRecord =
        sqlx::query_as("UPDATE invoices SET status = 'cancelled' WHERE id = $1 RETURNING *")
            .bind(invoice_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_db_error)?;

    tx.commit().await.map_err(map_db_error)?;
    tracing::info!(invoice_id = %invoice_id, "Invoice cancelled");
    Ok(updated)
}

/// Apply a settlement to an already-locked invoice. Returns the updated
/// row and the arithmetic outcome; the caller records the payment in the
/// same transaction so the `Σ settled == paid_amount` invariant can
/// never be observed broken.
pub async fn settle_locked(
    tx: &mut Transaction<'_, Postgres>,
    invoice: &InvoiceRecord,
    amount: Decimal,
    policy: OverpayPolicy,
) -> AppResult<(InvoiceRecord, SettlementOutcome)> {
    let status = InvoiceStatus::parse(&invoice.status)?;
    if status == InvoiceStatus::Cancelled {
        return Err(AppError::Conflict(
            "Hóa đơn đã hủy, không thể ghi nhận thanh toán.".to_string(),
        ));
    }

    let outcome = invoice::apply_settlement(
        invoice.total_amount,
        invoice.paid_amount,
        amount,
        invoice.is_netting,
        policy,
    )?;

    let updated: InvoiceRecord = sqlx::query_as(
        "UPDATE invoices SET paid_amount = $2, status = $3 WHERE id = $1 RETURNING *",
    )
    .bind(invoice.id)
    .bind(outcome.new_paid)
    .bind(outcome.new_status.as_str())
    .fetch_one(&mut **tx)
    .await
    .map_err(map_db_error)?;

    tracing::info!(
        invoice_id = %invoice.id,
        settled = %outcome.settled,
        unsettled = %outcome.unsettled,
        new_status = outcome.new_status.as_str(),
        "Settlement recorded"
    );

    Ok((updated, outcome))
}

pub async fn get_invoice(pool: &PgPool, invoice_id: Uuid) -> AppResult<InvoiceRecord> {
    sqlx::query_as::<_, InvoiceRecord>("SELECT * FROM invoices WHERE id = $1")
        .bind(invoice_id)
        .fetch_optional(pool)
        .await
        .map_err(map_db_error)?
        .ok_or_else(|| AppError::NotFound("Không tìm thấy hóa đơn.".to_string()))
}

/// The status a reader should see: stored status with OVERDUE derived
/// from the due date at observation time, never persisted.
pub fn read_status(invoice: &InvoiceRecord) -> AppResult<InvoiceStatus> {
    let stored = InvoiceStatus::parse(&invoice.status)?;
    Ok(effective_status(
        stored,
        invoice.due_date,
        Utc::now().date_naive(),
        invoice.paid_amount,
        invoice.total_amount,
    ))
}
