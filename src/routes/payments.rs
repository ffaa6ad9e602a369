use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    domain::money::format_vnd,
    domain::payment::PaymentMethod,
    error::{AppError, AppResult},
    schemas::{validate_input, InitPaymentInput, RecordCashPaymentInput, UploadProofInput},
    services::notifications::queue_notification,
    services::payment_ledger,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/invoices/{invoice_id}/payments",
            axum::routing::get(list_payments).post(record_cash_payment),
        )
        .route(
            "/invoices/{invoice_id}/payments/init",
            axum::routing::post(init_payment),
        )
        .route(
            "/payments/{payment_id}/confirm",
            axum::routing::post(confirm_payment),
        )
        .route(
            "/payments/{payment_id}/proof",
            axum::routing::post(upload_proof),
        )
}

/// Cash (or other hand-recorded) money that already changed hands.
/// Recorded as CONFIRMED and settled in one step.
async fn record_cash_payment(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<RecordCashPaymentInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let pool = state.pool()?;

    let method = PaymentMethod::parse(&payload.method)?;
    if method == PaymentMethod::BankTransfer {
        return Err(AppError::BadRequest(
            "Thanh toán chuyển khoản được ghi nhận qua webhook ngân hàng.".to_string(),
        ));
    }

    let (payment, invoice) = payment_ledger::record_cash(
        pool,
        invoice_id,
        payload.amount,
        method,
        payload.note.as_deref(),
    )
    .await?;

    queue_notification(
        pool,
        &state.http_client,
        state.config.notify_webhook_url.as_deref(),
        "payment_confirmed",
        "Đã nhận thanh toán",
        &format!(
            "Hóa đơn {} nhận {} ({}).",
            invoice.reference_code,
            format_vnd(payment.amount),
            payload.method
        ),
        json!({ "invoice_id": invoice.id, "payment_id": payment.id }),
    )
    .await;

    Ok(Json(json!({
        "message": "Đã ghi nhận thanh toán.",
        "data": { "payment": payment, "invoice": invoice },
    })))
}

/// Open a PENDING payment intent (QR flow). Nothing settles until the
/// confirm step.
async fn init_payment(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<InitPaymentInput>,
) -> AppResult<Json<Value>> {
    let pool = state.pool()?;
    let method = PaymentMethod::parse(&payload.method)?;
    let payment = payment_ledger::init_payment(pool, invoice_id, method, payload.amount).await?;
    Ok(Json(json!({
        "message": "Đã khởi tạo thanh toán.",
        "data": payment,
    })))
}

async fn confirm_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let pool = state.pool()?;
    let (payment, invoice) = payment_ledger::confirm_qr(pool, payment_id).await?;

    queue_notification(
        pool,
        &state.http_client,
        state.config.notify_webhook_url.as_deref(),
        "payment_confirmed",
        "Đã nhận thanh toán",
        &format!(
            "Hóa đơn {} nhận {}.",
            invoice.reference_code,
            format_vnd(payment.amount)
        ),
        json!({ "invoice_id": invoice.id, "payment_id": payment.id }),
    )
    .await;

    Ok(Json(json!({
        "message": "Đã xác nhận thanh toán.",
        "data": { "payment": payment, "invoice": invoice },
    })))
}

async fn upload_proof(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    Json(payload): Json<UploadProofInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let pool = state.pool()?;
    let payment = payment_ledger::upload_proof(pool, payment_id, &payload.proof_url).await?;
    Ok(Json(json!({
        "message": "Đã lưu ảnh chứng từ.",
        "data": payment,
    })))
}

async fn list_payments(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let pool = state.pool()?;
    let payments = payment_ledger::list_for_invoice(pool, invoice_id).await?;
    Ok(Json(json!({ "data": payments })))
}
