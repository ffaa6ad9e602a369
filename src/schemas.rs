use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

pub fn clamp_limit_in_range(limit: Option<i64>, min: i64, max: i64) -> i64 {
    limit.unwrap_or(max.min(100)).clamp(min, max)
}

fn default_quantity_one() -> Decimal {
    Decimal::ONE
}
fn default_zero() -> Decimal {
    Decimal::ZERO
}
fn default_invoice_type_normal() -> String {
    "normal".to_string()
}
fn default_method_cash() -> String {
    "cash".to_string()
}
fn default_mode_positive_only() -> String {
    "positive_only".to_string()
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct InvoiceItemInput {
    pub item_type: String,
    #[validate(length(min = 1, max = 255))]
    pub description: String,
    pub category: Option<String>,
    #[serde(default = "default_quantity_one")]
    pub quantity: Decimal,
    #[serde(default = "default_zero")]
    pub unit_price: Decimal,
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub previous_reading: Option<Decimal>,
    #[serde(default)]
    pub current_reading: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct GenerateInvoiceInput {
    pub contract_id: Uuid,
    #[validate(length(min = 7, max = 7))]
    pub period_month: String,
    pub due_date: chrono::NaiveDate,
    #[serde(default = "default_zero")]
    pub late_fee_percent: Decimal,
    #[serde(default = "default_invoice_type_normal")]
    pub invoice_type: String,
    #[validate(length(min = 1))]
    pub items: Vec<InvoiceItemInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceListQuery {
    pub contract_id: Option<Uuid>,
    pub period_month: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RecordCashPaymentInput {
    pub amount: Decimal,
    #[serde(default = "default_method_cash")]
    pub method: String,
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitPaymentInput {
    pub amount: Decimal,
    pub method: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UploadProofInput {
    #[validate(length(min = 1, max = 2048))]
    pub proof_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffInput {
    pub description: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractDiffInput {
    pub contract_id: Uuid,
    pub diffs: Vec<DiffInput>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GenerateAdjustmentInput {
    pub house_id: Uuid,
    #[validate(length(min = 7, max = 7))]
    pub period_month: String,
    #[serde(default = "default_mode_positive_only")]
    pub mode: String,
    pub due_days: Option<i64>,
    #[validate(length(min = 1))]
    pub contracts: Vec<ContractDiffInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationQuery {
    pub landlord_id: Uuid,
    pub house_id: Uuid,
    pub month: u32,
    pub year: i32,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ApplyShortfallInput {
    pub due_days: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManualMatchInput {
    pub invoice_id: Uuid,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SaveSnapshotInput {
    #[validate(length(min = 1))]
    pub content: String,
    #[validate(length(max = 500))]
    pub change_note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::clamp_limit_in_range;

    #[test]
    fn clamps_limits() {
        assert_eq!(clamp_limit_in_range(None, 1, 500), 100);
        assert_eq!(clamp_limit_in_range(Some(0), 1, 500), 1);
        assert_eq!(clamp_limit_in_range(Some(9999), 1, 500), 500);
    }
}
