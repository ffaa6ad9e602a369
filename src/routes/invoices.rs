use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    domain::invoice::{
        late_fee_preview, metered_utility_item, AdjustmentDiff, AdjustmentMode, InvoiceItemRecord,
        InvoiceRecord, InvoiceType, ItemKind, LineItem,
    },
    domain::money::format_vnd,
    domain::period::PeriodMonth,
    error::{map_db_error, AppResult},
    schemas::{
        clamp_limit_in_range, validate_input, GenerateAdjustmentInput, GenerateInvoiceInput,
        InvoiceItemInput, InvoiceListQuery,
    },
    services::invoice_generator::{self, ContractDiffs},
    services::invoice_lifecycle,
    services::notifications::queue_notification,
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/invoices",
            axum::routing::get(list_invoices).post(generate_invoice),
        )
        .route(
            "/invoices/adjustments",
            axum::routing::post(generate_adjustments),
        )
        .route("/invoices/{invoice_id}", axum::routing::get(get_invoice))
        .route(
            "/invoices/{invoice_id}/send",
            axum::routing::post(send_invoice),
        )
        .route(
            "/invoices/{invoice_id}/cancel",
            axum::routing::post(cancel_invoice),
        )
}

fn build_items(inputs: &[InvoiceItemInput]) -> AppResult<Vec<LineItem>> {
    inputs
        .iter()
        .map(|input| {
            let kind = ItemKind::parse(&input.item_type)?;
            // Metered items sent as raw meter readings get their
            // consumption computed server-side.
            if kind == ItemKind::UtilityMetered {
                if let (Some(previous), Some(current)) =
                    (input.previous_reading, input.current_reading)
                {
                    return metered_utility_item(
                        &input.description,
                        input.category.clone(),
                        previous,
                        current,
                        input.unit_price,
                    );
                }
            }
            LineItem::validate(
                kind,
                &input.description,
                input.category.clone(),
                input.quantity,
                input.unit_price,
                input.amount,
            )
        })
        .collect()
}

async fn generate_invoice(
    State(state): State<AppState>,
    Json(payload): Json<GenerateInvoiceInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let pool = state.pool()?;

    let period = PeriodMonth::from_str(&payload.period_month)?;
    let invoice_type = InvoiceType::parse(&payload.invoice_type)?;
    let items = build_items(&payload.items)?;

    let (invoice, items) = invoice_generator::generate(
        pool,
        &state.config.sepay_reference_prefix,
        payload.contract_id,
        period,
        payload.due_date,
        payload.late_fee_percent,
        invoice_type,
        items,
    )
    .await?;

    Ok(Json(json!({
        "message": "Đã tạo hóa đơn.",
        "data": invoice_payload(&invoice, &items),
    })))
}

async fn generate_adjustments(
    State(state): State<AppState>,
    Json(payload): Json<GenerateAdjustmentInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let pool = state.pool()?;

    let period = PeriodMonth::from_str(&payload.period_month)?;
    let mode = AdjustmentMode::parse(&payload.mode)?;
    let contract_diffs: Vec<ContractDiffs> = payload
        .contracts
        .iter()
        .map(|entry| ContractDiffs {
            contract_id: entry.contract_id,
            diffs: entry
                .diffs
                .iter()
                .map(|diff| AdjustmentDiff {
                    description: diff.description.clone(),
                    amount: diff.amount,
                })
                .collect(),
        })
        .collect();

    let due_days = payload
        .due_days
        .unwrap_or(state.config.adjustment_due_days);
    let created = invoice_generator::generate_adjustment(
        pool,
        &state.config.sepay_reference_prefix,
        payload.house_id,
        period,
        mode,
        &contract_diffs,
        due_days,
    )
    .await?;

    Ok(Json(json!({
        "message": format!("Đã tạo {} hóa đơn điều chỉnh.", created.len()),
        "data": created,
    })))
}

async fn list_invoices(
    State(state): State<AppState>,
    Query(query): Query<InvoiceListQuery>,
) -> AppResult<Json<Value>> {
    let pool = state.pool()?;
    let limit = clamp_limit_in_range(query.limit, 1, 500);

    let rows: Vec<InvoiceRecord> = sqlx::query_as(
        "SELECT * FROM invoices
         WHERE ($1::uuid IS NULL OR contract_id = $1)
           AND ($2::text IS NULL OR period_month = $2)
         ORDER BY created_at DESC
         LIMIT $3",
    )
    .bind(query.contract_id)
    .bind(query.period_month.as_deref())
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;

    // Status filters match the derived status, so an overdue invoice
    // shows up under "overdue" even though it is stored as "sent".
    let mut data = Vec::with_capacity(rows.len());
    for invoice in rows {
        let effective = invoice_lifecycle::read_status(&invoice)?;
        if let Some(wanted) = query.status.as_deref() {
            if effective.as_str() != wanted {
                continue;
            }
        }
        data.push(json!({
            "invoice": invoice,
            "status": effective.as_str(),
        }));
    }

    Ok(Json(json!({ "data": data })))
}

async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let pool = state.pool()?;

    let invoice = invoice_lifecycle::get_invoice(pool, invoice_id).await?;
    let items: Vec<InvoiceItemRecord> = sqlx::query_as(
        "SELECT * FROM invoice_items WHERE invoice_id = $1 ORDER BY id",
    )
    .bind(invoice_id)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;

    Ok(Json(json!({ "data": invoice_payload(&invoice, &items) })))
}

async fn send_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let pool = state.pool()?;
    let invoice = invoice_lifecycle::send(pool, invoice_id).await?;

    queue_notification(
        pool,
        &state.http_client,
        state.config.notify_webhook_url.as_deref(),
        "invoice_sent",
        "Hóa đơn mới",
        &format!(
            "Hóa đơn {} kỳ {} đã được gửi, tổng tiền {}.",
            invoice.reference_code,
            invoice.period_month,
            format_vnd(invoice.total_amount)
        ),
        json!({ "invoice_id": invoice.id, "reference_code": invoice.reference_code }),
    )
    .await;

    Ok(Json(json!({
        "message": "Đã gửi hóa đơn.",
        "data": invoice,
    })))
}

async fn cancel_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let pool = state.pool()?;
    let invoice = invoice_lifecycle::cancel(pool, invoice_id).await?;
    Ok(Json(json!({
        "message": "Đã hủy hóa đơn.",
        "data": invoice,
    })))
}

fn invoice_payload(invoice: &InvoiceRecord, items: &[InvoiceItemRecord]) -> Value {
    let effective = invoice_lifecycle::read_status(invoice)
        .map(|status| status.as_str().to_string())
        .unwrap_or_else(|_| invoice.status.clone());
    let late_fee = if effective == "overdue" {
        late_fee_preview(
            invoice.total_amount,
            invoice.paid_amount,
            invoice.late_fee_percent,
        )
    } else {
        rust_decimal::Decimal::ZERO
    };

    json!({
        "invoice": invoice,
        "status": effective,
        "items": items,
        "late_fee_preview": late_fee,
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use crate::schemas::InvoiceItemInput;

    use super::build_items;

    #[test]
    fn builds_tagged_items() {
        let items = build_items(&[InvoiceItemInput {
            item_type: "rent".to_string(),
            description: "Tiền thuê phòng 101".to_string(),
            category: None,
            quantity: dec!(1),
            unit_price: dec!(3000000),
            amount: None,
            previous_reading: None,
            current_reading: None,
        }])
        .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].amount, dec!(3000000));
    }

    #[test]
    fn meter_readings_override_quantity() {
        let items = build_items(&[InvoiceItemInput {
            item_type: "utility_metered".to_string(),
            description: "Điện tháng 9".to_string(),
            category: Some("electricity".to_string()),
            quantity: dec!(1),
            unit_price: dec!(3500),
            amount: None,
            previous_reading: Some(dec!(320)),
            current_reading: Some(dec!(350)),
        }])
        .unwrap();
        assert_eq!(items[0].quantity, dec!(30));
        assert_eq!(items[0].amount, dec!(105000));
    }

    #[test]
    fn rejects_unknown_item_type() {
        let result = build_items(&[InvoiceItemInput {
            item_type: "parking".to_string(),
            description: "Gửi xe".to_string(),
            category: None,
            quantity: dec!(1),
            unit_price: dec!(100000),
            amount: None,
            previous_reading: None,
            current_reading: None,
        }]);
        assert!(result.is_err());
    }
}
