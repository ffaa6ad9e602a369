use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::money::round_vnd;
use crate::error::{AppError, AppResult};

pub const CATEGORY_ELECTRICITY: &str = "electricity";
pub const CATEGORY_WATER: &str = "water";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortfallStatus {
    Pending,
    Applied,
}

impl ShortfallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applied => "applied",
        }
    }

    pub fn parse(raw: &str) -> AppResult<Self> {
        match raw {
            "pending" => Ok(Self::Pending),
            "applied" => Ok(Self::Applied),
            other => Err(AppError::Internal(format!(
                "Unknown shortfall status '{other}'."
            ))),
        }
    }
}

/// One utility category compared for a house and period.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryReconciliation {
    pub category: String,
    pub expense: Decimal,
    pub collected: Decimal,
    pub shortfall: Decimal,
}

/// The positive gap between what the landlord paid and what tenants
/// were billed. Over-collection is not a negative shortfall.
pub fn shortfall_of(expense: Decimal, collected: Decimal) -> Decimal {
    (expense - collected).max(Decimal::ZERO)
}

/// Split a shortfall across active rooms. Zero rooms yields zero per
/// room, not a division error.
pub fn per_room_split(total: Decimal, active_room_count: i64) -> Decimal {
    if active_room_count <= 0 {
        return Decimal::ZERO;
    }
    round_vnd(total / Decimal::from(active_room_count))
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UtilityShortfallRecord {
    pub id: Uuid,
    pub house_id: Uuid,
    pub period_month: String,
    pub electricity_shortfall: Decimal,
    pub water_shortfall: Decimal,
    pub total_shortfall: Decimal,
    pub per_room_amount: Decimal,
    pub active_room_count: i64,
    pub status: String,
    pub applied_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::{per_room_split, shortfall_of};

    #[test]
    fn shortfall_is_clamped_at_zero() {
        assert_eq!(shortfall_of(dec!(1000000), dec!(700000)), dec!(300000));
        assert_eq!(shortfall_of(dec!(700000), dec!(1000000)), dec!(0));
    }

    #[test]
    fn splits_across_active_rooms() {
        assert_eq!(per_room_split(dec!(300000), 5), dec!(60000));
        assert_eq!(per_room_split(dec!(100000), 3), dec!(33333));
    }

    #[test]
    fn zero_rooms_is_not_an_error() {
        assert_eq!(per_room_split(dec!(300000), 0), dec!(0));
    }
}
