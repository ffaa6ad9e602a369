use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMethod {
    Cash,
    Qr,
    BankTransfer,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Qr => "qr",
            Self::BankTransfer => "bank_transfer",
        }
    }

    pub fn parse(raw: &str) -> AppResult<Self> {
        match raw {
            "cash" => Ok(Self::Cash),
            "qr" => Ok(Self::Qr),
            "bank_transfer" => Ok(Self::BankTransfer),
            other => Err(AppError::BadRequest(format!(
                "Phương thức thanh toán không hợp lệ: '{other}'."
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> AppResult<Self> {
        match raw {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            other => Err(AppError::Internal(format!(
                "Unknown payment status '{other}'."
            ))),
        }
    }
}

/// A payment row. `amount` is the money received; `settled_amount` is
/// the portion applied to the invoice. They differ only on flagged
/// overpayments awaiting manual review.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub settled_amount: Decimal,
    pub method: String,
    pub status: String,
    pub transaction_code: Option<String>,
    pub proof_image_url: Option<String>,
    pub needs_review: bool,
    pub note: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::{PaymentMethod, PaymentStatus};

    #[test]
    fn method_strings_round_trip() {
        for method in [PaymentMethod::Cash, PaymentMethod::Qr, PaymentMethod::BankTransfer] {
            assert_eq!(PaymentMethod::parse(method.as_str()).unwrap(), method);
        }
        assert!(PaymentMethod::parse("wire").is_err());
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Confirmed,
            PaymentStatus::Failed,
        ] {
            assert_eq!(PaymentStatus::parse(status.as_str()).unwrap(), status);
        }
    }
}
