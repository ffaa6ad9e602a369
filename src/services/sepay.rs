use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::invoice::{InvoiceRecord, OverpayPolicy};
use crate::domain::payment::{PaymentMethod, PaymentStatus};
use crate::domain::sepay::{extract_reference_code, SepayTransactionRecord, SepayWebhookPayload};
use crate::error::{map_db_error, AppError, AppResult};
use crate::services::invoice_lifecycle::{lock_invoice, lock_invoice_by_reference, settle_locked};
use crate::services::payment_ledger::insert_payment;

/// What happened to an inbound gateway event. Every variant is a
/// success from the gateway's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Settled against an invoice (possibly flagged for review).
    Matched {
        invoice_id: Uuid,
        needs_review: bool,
    },
    /// No invoice reference found; retained for manual reconciliation.
    Unmatched,
    /// Same gateway transaction id seen before; no effect.
    Duplicate,
}

/// Ingest one bank-transfer notification. Dedup, matching, payment
/// creation and settlement run in a single transaction, so a crash
/// leaves either the full effect or none. The unique constraint on
/// `sepay_transaction_id` closes the race between two concurrent
/// deliveries of the same event: the second insert sees no row and
/// stops before touching any invoice.
pub async fn process_webhook(
    pool: &PgPool,
    reference_prefix: &str,
    payload: &SepayWebhookPayload,
) -> AppResult<WebhookOutcome> {
    let mut tx = pool.begin().await.map_err(map_db_error)?;

    let inserted: Option<(Uuid,)> = sqlx::query_as(
        "INSERT INTO sepay_transactions
             (sepay_transaction_id, gateway, content, transfer_amount, status)
         VALUES ($1, $2, $3, $4, 'unmatched')
         ON CONFLICT (sepay_transaction_id) DO NOTHING
         RETURNING id",
    )
    .bind(payload.id)
    .bind(&payload.gateway)
    .bind(&payload.content)
    .bind(payload.transfer_amount)
    .fetch_optional(&mut *tx)
    .await
    .map_err(map_db_error)?;

    let Some((row_id,)) = inserted else {
        tx.rollback().await.map_err(map_db_error)?;
        tracing::info!(sepay_id = payload.id, "Duplicate webhook delivery ignored");
        return Ok(WebhookOutcome::Duplicate);
    };

    let reference = extract_reference_code(
        reference_prefix,
        &[payload.content.as_deref(), payload.code.as_deref()],
    );

    let invoice = match &reference {
        Some(code) => lock_invoice_by_reference(&mut tx, code).await?,
        None => None,
    };

    let Some(invoice) = invoice else {
        // Expected operational case, not an error: keep the row for the
        // manual reconciliation queue and acknowledge the event.
        tx.commit().await.map_err(map_db_error)?;
        tracing::info!(
            sepay_id = payload.id,
            reference = reference.as_deref().unwrap_or("-"),
            "Webhook retained as unmatched"
        );
        return Ok(WebhookOutcome::Unmatched);
    };

    if payload.transfer_amount <= Decimal::ZERO {
        tx.commit().await.map_err(map_db_error)?;
        tracing::warn!(sepay_id = payload.id, "Non-positive transfer amount, retained as unmatched");
        return Ok(WebhookOutcome::Unmatched);
    }

    let outcome = settle_transaction(
        &mut tx,
        row_id,
        &invoice,
        payload.transfer_amount,
        payload.id,
    )
    .await?;

    tx.commit().await.map_err(map_db_error)?;
    Ok(outcome)
}

/// Resolve an unmatched transaction to an invoice by hand (manual
/// reconciliation queue). Same settlement path as the automatic match.
pub async fn match_manual(
    pool: &PgPool,
    transaction_id: Uuid,
    invoice_id: Uuid,
) -> AppResult<(SepayTransactionRecord, InvoiceRecord)> {
    let mut tx = pool.begin().await.map_err(map_db_error)?;

    let record: SepayTransactionRecord =
        sqlx::query_as("SELECT * FROM sepay_transactions WHERE id = $1 FOR UPDATE")
            .bind(transaction_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_db_error)?
            .ok_or_else(|| {
                AppError::NotFound("Không tìm thấy giao dịch ngân hàng.".to_string())
            })?;

    if record.status != "unmatched" {
        return Err(AppError::Conflict(format!(
            "Giao dịch đã được xử lý (trạng thái: {}).",
            record.status
        )));
    }
    if record.transfer_amount <= Decimal::ZERO {
        return Err(AppError::InvalidAmount(
            "Giao dịch không có số tiền hợp lệ.".to_string(),
        ));
    }

    let invoice = lock_invoice(&mut tx, invoice_id).await?;
    settle_transaction(
        &mut tx,
        record.id,
        &invoice,
        record.transfer_amount,
        record.sepay_transaction_id,
    )
    .await?;

    let updated: SepayTransactionRecord =
        sqlx::query_as("SELECT * FROM sepay_transactions WHERE id = $1")
            .bind(transaction_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_db_error)?;
    let updated_invoice: InvoiceRecord =
        sqlx::query_as("SELECT * FROM invoices WHERE id = $1")
            .bind(invoice_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_db_error)?;

    tx.commit().await.map_err(map_db_error)?;
    Ok((updated, updated_invoice))
}

pub async fn list_unmatched(
    pool: &PgPool,
    limit: i64,
) -> AppResult<Vec<SepayTransactionRecord>> {
    sqlx::query_as(
        "SELECT * FROM sepay_transactions
         WHERE status IN ('unmatched', 'needs_review')
         ORDER BY created_at DESC
         LIMIT $1",
    )
    .bind(limit.clamp(1, 500))
    .fetch_all(pool)
    .await
    .map_err(map_db_error)
}

/// Record the money and drive the settlement for a matched transaction.
/// Received funds are never dropped: an amount that would overpay (or
/// lands on an already-PAID invoice) settles what fits and flags the
/// payment and transaction `needs_review` for the manual queue.
async fn settle_transaction(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    transaction_row_id: Uuid,
    invoice: &InvoiceRecord,
    amount: Decimal,
    sepay_transaction_id: i64,
) -> AppResult<WebhookOutcome> {
    let (_, outcome) =
        settle_locked(tx, invoice, amount, OverpayPolicy::FlagForReview).await?;

    insert_payment(
        tx,
        invoice.id,
        amount,
        outcome.settled,
        PaymentMethod::BankTransfer,
        PaymentStatus::Confirmed,
        Some(&sepay_transaction_id.to_string()),
        None,
        outcome.needs_review,
    )
    .await?;

    let row_status = if outcome.needs_review {
        "needs_review"
    } else {
        "matched"
    };
    sqlx::query("UPDATE sepay_transactions SET invoice_id = $2, status = $3 WHERE id = $1")
        .bind(transaction_row_id)
        .bind(invoice.id)
        .bind(row_status)
        .execute(&mut **tx)
        .await
        .map_err(map_db_error)?;

    if outcome.needs_review {
        tracing::warn!(
            invoice_id = %invoice.id,
            sepay_id = sepay_transaction_id,
            unsettled = %outcome.unsettled,
            "Bank transfer exceeds invoice balance, flagged for review"
        );
    }

    Ok(WebhookOutcome::Matched {
        invoice_id: invoice.id,
        needs_review: outcome.needs_review,
    })
}
