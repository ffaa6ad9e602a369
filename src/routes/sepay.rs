use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    domain::sepay::SepayWebhookPayload,
    error::{AppError, AppResult},
    schemas::{clamp_limit_in_range, ManualMatchInput, LimitQuery},
    services::notifications::queue_notification,
    services::sepay::{self, WebhookOutcome},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/sepay/transactions/unmatched",
            axum::routing::get(list_unmatched),
        )
        .route(
            "/sepay/transactions/{transaction_id}/match",
            axum::routing::post(match_manual),
        )
}

/// Webhook endpoint, mounted outside the API prefix. The gateway
/// retries on non-2xx, so internal failures are logged and swallowed;
/// the dedup insert makes redelivery harmless either way.
pub fn public_router() -> axum::Router<AppState> {
    axum::Router::new().route("/public/sepay/webhook", axum::routing::post(webhook))
}

async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SepayWebhookPayload>,
) -> AppResult<Json<Value>> {
    // The gateway must always be acknowledged, even on a bad key;
    // otherwise it retries the same event indefinitely.
    if let Err(err) = verify_api_key(&headers, state.config.sepay_api_key.as_deref()) {
        tracing::warn!(sepay_id = payload.id, error = %err, "Webhook rejected, acknowledging anyway");
        return Ok(Json(json!({ "success": true })));
    }
    let pool = match state.pool() {
        Ok(pool) => pool,
        Err(err) => {
            tracing::error!(sepay_id = payload.id, error = %err, "Webhook received without a database");
            return Ok(Json(json!({ "success": true })));
        }
    };

    match sepay::process_webhook(pool, &state.config.sepay_reference_prefix, &payload).await {
        Ok(WebhookOutcome::Matched {
            invoice_id,
            needs_review,
        }) => {
            if needs_review {
                queue_notification(
                    pool,
                    &state.http_client,
                    state.config.notify_webhook_url.as_deref(),
                    "payment_review",
                    "Thanh toán cần kiểm tra",
                    &format!(
                        "Giao dịch Sepay {} vượt quá số tiền còn lại của hóa đơn, cần kiểm tra thủ công.",
                        payload.id
                    ),
                    json!({ "invoice_id": invoice_id, "sepay_transaction_id": payload.id }),
                )
                .await;
            }
            Ok(Json(json!({
                "success": true,
                "matched": true,
                "invoice_id": invoice_id,
                "needs_review": needs_review,
            })))
        }
        Ok(WebhookOutcome::Unmatched) => Ok(Json(json!({
            "success": true,
            "matched": false,
        }))),
        Ok(WebhookOutcome::Duplicate) => Ok(Json(json!({
            "success": true,
            "duplicate": true,
        }))),
        Err(err) => {
            tracing::error!(sepay_id = payload.id, error = %err, "Webhook processing failed");
            Ok(Json(json!({ "success": true })))
        }
    }
}

fn verify_api_key(headers: &HeaderMap, expected: Option<&str>) -> AppResult<()> {
    let Some(expected) = expected.filter(|key| !key.is_empty()) else {
        // No key configured: accept everything (local development).
        return Ok(());
    };
    let from_authorization = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            // Sepay sends "Apikey <key>"; dashboards use "Bearer <key>".
            value
                .strip_prefix("Apikey ")
                .or_else(|| value.strip_prefix("Bearer "))
        });
    let from_api_key_header = headers.get("x-api-key").and_then(|value| value.to_str().ok());
    let authorized = from_authorization
        .into_iter()
        .chain(from_api_key_header)
        .any(|key| key == expected);
    if authorized {
        Ok(())
    } else {
        Err(AppError::Unauthorized(
            "Webhook API key không hợp lệ.".to_string(),
        ))
    }
}

async fn list_unmatched(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> AppResult<Json<Value>> {
    let pool = state.pool()?;
    let limit = clamp_limit_in_range(query.limit, 1, 500);
    let rows = sepay::list_unmatched(pool, limit).await?;
    Ok(Json(json!({ "data": rows })))
}

async fn match_manual(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
    Json(payload): Json<ManualMatchInput>,
) -> AppResult<Json<Value>> {
    let pool = state.pool()?;
    let (transaction, invoice) = sepay::match_manual(pool, transaction_id, payload.invoice_id).await?;

    if transaction.status == "needs_review" {
        queue_notification(
            pool,
            &state.http_client,
            state.config.notify_webhook_url.as_deref(),
            "payment_review",
            "Thanh toán cần kiểm tra",
            &format!(
                "Giao dịch Sepay {} vượt quá số tiền còn lại của hóa đơn, cần kiểm tra thủ công.",
                transaction.sepay_transaction_id
            ),
            json!({
                "invoice_id": invoice.id,
                "sepay_transaction_id": transaction.sepay_transaction_id,
            }),
        )
        .await;
    }

    Ok(Json(json!({
        "message": "Đã đối soát giao dịch.",
        "data": { "transaction": transaction, "invoice": invoice },
    })))
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderMap;

    use super::verify_api_key;

    #[test]
    fn accepts_when_no_key_configured() {
        assert!(verify_api_key(&HeaderMap::new(), None).is_ok());
        assert!(verify_api_key(&HeaderMap::new(), Some("")).is_ok());
    }

    #[test]
    fn requires_matching_apikey_header() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Apikey secret".parse().unwrap());
        assert!(verify_api_key(&headers, Some("secret")).is_ok());
        assert!(verify_api_key(&headers, Some("other")).is_err());
        assert!(verify_api_key(&HeaderMap::new(), Some("secret")).is_err());
    }

    #[test]
    fn accepts_bearer_and_x_api_key_forms() {
        let mut bearer = HeaderMap::new();
        bearer.insert("authorization", "Bearer secret".parse().unwrap());
        assert!(verify_api_key(&bearer, Some("secret")).is_ok());

        let mut header = HeaderMap::new();
        header.insert("x-api-key", "secret".parse().unwrap());
        assert!(verify_api_key(&header, Some("secret")).is_ok());
    }
}
