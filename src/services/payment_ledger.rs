use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::invoice::{InvoiceRecord, InvoiceStatus, OverpayPolicy};
use crate::domain::money::ensure_positive;
use crate::domain::payment::{PaymentMethod, PaymentRecord, PaymentStatus};
use crate::error::{map_db_error, AppError, AppResult};
use crate::services::invoice_lifecycle::{lock_invoice, settle_locked};

/// Manual, trusted entry: the payment is confirmed immediately and the
/// settlement lands in the same transaction.
pub async fn record_cash(
    pool: &PgPool,
    invoice_id: Uuid,
    amount: Decimal,
    method: PaymentMethod,
    note: Option<&str>,
) -> AppResult<(PaymentRecord, InvoiceRecord)> {
    ensure_positive(amount, "Số tiền thanh toán")?;

    let mut tx = pool.begin().await.map_err(map_db_error)?;

    let invoice = lock_invoice(&mut tx, invoice_id).await?;
    let (updated_invoice, outcome) =
        settle_locked(&mut tx, &invoice, amount, OverpayPolicy::Reject).await?;

    let payment = insert_payment(
        &mut tx,
        invoice_id,
        amount,
        outcome.settled,
        method,
        PaymentStatus::Confirmed,
        None,
        note,
        false,
    )
    .await?;

    tx.commit().await.map_err(map_db_error)?;
    Ok((payment, updated_invoice))
}

/// Open a PENDING payment for QR / bank-transfer flows awaiting external
/// confirmation. The invoice is untouched until confirmation.
pub async fn init_payment(
    pool: &PgPool,
    invoice_id: Uuid,
    method: PaymentMethod,
    amount: Decimal,
) -> AppResult<PaymentRecord> {
    ensure_positive(amount, "Số tiền thanh toán")?;

    let mut tx = pool.begin().await.map_err(map_db_error)?;

    let invoice = lock_invoice(&mut tx, invoice_id).await?;
    if InvoiceStatus::parse(&invoice.status)? == InvoiceStatus::Cancelled {
        return Err(AppError::Conflict(
            "Hóa đơn đã hủy, không thể khởi tạo thanh toán.".to_string(),
        ));
    }

    let payment = insert_payment(
        &mut tx,
        invoice_id,
        amount,
        Decimal::ZERO,
        method,
        PaymentStatus::Pending,
        None,
        None,
        false,
    )
    .await?;

    tx.commit().await.map_err(map_db_error)?;
    Ok(payment)
}

/// PENDING → CONFIRMED after landlord review of the tenant's proof.
/// Re-invocation fails with AlreadyConfirmed; the settlement happens
/// exactly once.
pub async fn confirm_qr(
    pool: &PgPool,
    payment_id: Uuid,
) -> AppResult<(PaymentRecord, InvoiceRecord)> {
    let mut tx = pool.begin().await.map_err(map_db_error)?;

    let payment: PaymentRecord =
        sqlx::query_as("SELECT * FROM payments WHERE id = $1 FOR UPDATE")
            .bind(payment_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_db_error)?
            .ok_or_else(|| AppError::NotFound("Không tìm thấy thanh toán.".to_string()))?;

    match PaymentStatus::parse(&payment.status)? {
        PaymentStatus::Pending => {}
        PaymentStatus::Confirmed => {
            return Err(AppError::AlreadyConfirmed(
                "Thanh toán này đã được xác nhận.".to_string(),
            ))
        }
        PaymentStatus::Failed => {
            return Err(AppError::Conflict(
                "Thanh toán đã thất bại, không thể xác nhận.".to_string(),
            ))
        }
    }

    let invoice = lock_invoice(&mut tx, payment.invoice_id).await?;
    let (updated_invoice, outcome) =
        settle_locked(&mut tx, &invoice, payment.amount, OverpayPolicy::Reject).await?;

    let updated_payment: PaymentRecord = sqlx::query_as(
        "UPDATE payments
         SET status = 'confirmed', settled_amount = $2, paid_at = $3
         WHERE id = $1
         RETURNING *",
    )
    .bind(payment_id)
    .bind(outcome.settled)
    .bind(Utc::now())
    .fetch_one(&mut *tx)
    .await
    .map_err(map_db_error)?;

    tx.commit().await.map_err(map_db_error)?;
    Ok((updated_payment, updated_invoice))
}

/// Attach tenant-submitted evidence. Status is deliberately unchanged:
/// confirmation requires a human reviewer calling `confirm_qr`.
pub async fn upload_proof(
    pool: &PgPool,
    payment_id: Uuid,
    proof_url: &str,
) -> AppResult<PaymentRecord> {
    sqlx::query_as::<_, PaymentRecord>(
        "UPDATE payments SET proof_image_url = $2 WHERE id = $1 RETURNING *",
    )
    .bind(payment_id)
    .bind(proof_url)
    .fetch_optional(pool)
    .await
    .map_err(map_db_error)?
    .ok_or_else(|| AppError::NotFound("Không tìm thấy thanh toán.".to_string()))
}

pub async fn list_for_invoice(pool: &PgPool, invoice_id: Uuid) -> AppResult<Vec<PaymentRecord>> {
    sqlx::query_as(
        "SELECT * FROM payments WHERE invoice_id = $1 ORDER BY created_at ASC",
    )
    .bind(invoice_id)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_payment(
    tx: &mut Transaction<'_, Postgres>,
    invoice_id: Uuid,
    amount: Decimal,
    settled_amount: Decimal,
    method: PaymentMethod,
    status: PaymentStatus,
    transaction_code: Option<&str>,
    note: Option<&str>,
    needs_review: bool,
) -> AppResult<PaymentRecord> {
    let paid_at = if status == PaymentStatus::Confirmed {
        Some(Utc::now())
    } else {
        None
    };

    sqlx::query_as(
        "INSERT INTO payments
             (invoice_id, amount, settled_amount, method, status,
              transaction_code, note, needs_review, paid_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         RETURNING *",
    )
    .bind(invoice_id)
    .bind(amount)
    .bind(settled_amount)
    .bind(method.as_str())
    .bind(status.as_str())
    .bind(transaction_code)
    .bind(note)
    .bind(needs_review)
    .bind(paid_at)
    .fetch_one(&mut **tx)
    .await
    .map_err(map_db_error)
}
