use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::money::{ensure_non_negative, round_vnd};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceStatus {
    Draft,
    Sent,
    PartiallyPaid,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Sent => "sent",
            Self::PartiallyPaid => "partially_paid",
            Self::Paid => "paid",
            Self::Overdue => "overdue",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> AppResult<Self> {
        match raw {
            "draft" => Ok(Self::Draft),
            "sent" => Ok(Self::Sent),
            "partially_paid" => Ok(Self::PartiallyPaid),
            "paid" => Ok(Self::Paid),
            "overdue" => Ok(Self::Overdue),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(AppError::Internal(format!(
                "Unknown invoice status '{other}'."
            ))),
        }
    }

    pub fn is_cancellable(self) -> bool {
        matches!(self, Self::Draft | Self::Sent | Self::PartiallyPaid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceType {
    Normal,
    Adjustment,
}

impl InvoiceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Adjustment => "adjustment",
        }
    }

    pub fn parse(raw: &str) -> AppResult<Self> {
        match raw {
            "normal" => Ok(Self::Normal),
            "adjustment" => Ok(Self::Adjustment),
            other => Err(AppError::BadRequest(format!(
                "Loại hóa đơn không hợp lệ: '{other}'."
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeBasis {
    Fixed,
    PerUnit,
}

/// Tagged line-item kinds. Each tag owns its own amount rule so the
/// generator stays a thin validator over pre-tagged items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Rent,
    ServiceFee(FeeBasis),
    UtilityMetered,
    Adjustment,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rent => "rent",
            Self::ServiceFee(FeeBasis::Fixed) => "service_fee_fixed",
            Self::ServiceFee(FeeBasis::PerUnit) => "service_fee_per_unit",
            Self::UtilityMetered => "utility_metered",
            Self::Adjustment => "adjustment",
        }
    }

    pub fn parse(raw: &str) -> AppResult<Self> {
        match raw {
            "rent" => Ok(Self::Rent),
            "service_fee_fixed" => Ok(Self::ServiceFee(FeeBasis::Fixed)),
            "service_fee_per_unit" => Ok(Self::ServiceFee(FeeBasis::PerUnit)),
            "utility_metered" => Ok(Self::UtilityMetered),
            "adjustment" => Ok(Self::Adjustment),
            other => Err(AppError::BadRequest(format!(
                "Loại khoản mục không hợp lệ: '{other}'."
            ))),
        }
    }

    /// Expected amount for a generator-produced item of this kind.
    /// Adjustment items carry their signed amount as-is.
    pub fn expected_amount(self, quantity: Decimal, unit_price: Decimal) -> Option<Decimal> {
        match self {
            Self::Rent | Self::ServiceFee(FeeBasis::Fixed) => Some(round_vnd(unit_price)),
            Self::ServiceFee(FeeBasis::PerUnit) | Self::UtilityMetered => {
                Some(round_vnd(quantity * unit_price))
            }
            Self::Adjustment => None,
        }
    }
}

/// A validated line item ready for insertion.
#[derive(Debug, Clone)]
pub struct LineItem {
    pub kind: ItemKind,
    pub description: String,
    pub category: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
}

impl LineItem {
    /// Validate a pre-tagged item: non-negative quantity and unit price,
    /// and (for generator-evaluated kinds) amount matching the tag's rule
    /// to whole-đồng precision.
    pub fn validate(
        kind: ItemKind,
        description: &str,
        category: Option<String>,
        quantity: Decimal,
        unit_price: Decimal,
        amount: Option<Decimal>,
    ) -> AppResult<Self> {
        if description.trim().is_empty() {
            return Err(AppError::BadRequest(
                "Khoản mục phải có mô tả.".to_string(),
            ));
        }
        ensure_non_negative(quantity, "Số lượng")?;
        if kind != ItemKind::Adjustment {
            ensure_non_negative(unit_price, "Đơn giá")?;
        }

        let amount = match kind.expected_amount(quantity, unit_price) {
            Some(expected) => match amount {
                // Manual overrides are permitted but must stay within
                // rounding distance of the evaluated amount.
                Some(given) if (given - expected).abs() < Decimal::ONE => round_vnd(given),
                Some(given) => {
                    return Err(AppError::InvalidAmount(format!(
                        "Thành tiền {given} không khớp với số lượng × đơn giá ({expected})."
                    )))
                }
                None => expected,
            },
            None => round_vnd(amount.ok_or_else(|| {
                AppError::InvalidAmount("Khoản mục điều chỉnh phải có thành tiền.".to_string())
            })?),
        };

        Ok(Self {
            kind,
            description: description.trim().to_string(),
            category,
            quantity,
            unit_price,
            amount,
        })
    }
}

pub fn total_of(items: &[LineItem]) -> Decimal {
    items.iter().map(|item| item.amount).sum()
}

/// Build a metered-utility item from the latest two meter readings.
/// Consumption is `current - previous`; a decreasing reading means the
/// meter was misread (or replaced without a reset entry) and is
/// rejected rather than billed as zero.
pub fn metered_utility_item(
    description: &str,
    category: Option<String>,
    previous_reading: Decimal,
    current_reading: Decimal,
    unit_price: Decimal,
) -> AppResult<LineItem> {
    let consumption = current_reading - previous_reading;
    if consumption < Decimal::ZERO {
        return Err(AppError::InvalidAmount(format!(
            "Chỉ số mới ({current_reading}) nhỏ hơn chỉ số cũ ({previous_reading})."
        )));
    }
    LineItem::validate(
        ItemKind::UtilityMetered,
        description,
        category,
        consumption,
        unit_price,
        None,
    )
}

/// How to treat a settlement that would push `paid_amount` past
/// `total_amount` on a non-netting invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverpayPolicy {
    /// Manual entry paths: reject the operation outright.
    Reject,
    /// Webhook path: money was actually received, so settle what fits
    /// and flag the remainder for manual review.
    FlagForReview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementOutcome {
    pub settled: Decimal,
    pub unsettled: Decimal,
    pub new_paid: Decimal,
    pub new_status: InvoiceStatus,
    pub needs_review: bool,
}

/// Pure settlement arithmetic. The caller holds the invoice row lock;
/// this function only decides the numbers and the resulting status.
pub fn apply_settlement(
    total: Decimal,
    paid: Decimal,
    amount: Decimal,
    is_netting: bool,
    policy: OverpayPolicy,
) -> AppResult<SettlementOutcome> {
    if amount <= Decimal::ZERO {
        return Err(AppError::InvalidAmount(
            "Số tiền thanh toán phải lớn hơn 0.".to_string(),
        ));
    }

    let (settled, unsettled) = if is_netting {
        (amount, Decimal::ZERO)
    } else {
        let remaining = (total - paid).max(Decimal::ZERO);
        if amount > remaining {
            match policy {
                OverpayPolicy::Reject => {
                    return Err(AppError::OverpaymentRejected(format!(
                        "Thanh toán vượt quá số tiền còn lại của hóa đơn ({remaining})."
                    )))
                }
                OverpayPolicy::FlagForReview => (remaining, amount - remaining),
            }
        } else {
            (amount, Decimal::ZERO)
        }
    };

    let new_paid = paid + settled;
    let new_status = recompute_status(total, new_paid);

    Ok(SettlementOutcome {
        settled,
        unsettled,
        new_paid,
        new_status,
        needs_review: unsettled > Decimal::ZERO,
    })
}

/// Status from paid-vs-total alone. Settlement implicitly clears any
/// derived OVERDUE once enough money arrives.
pub fn recompute_status(total: Decimal, paid: Decimal) -> InvoiceStatus {
    if paid >= total {
        InvoiceStatus::Paid
    } else if paid > Decimal::ZERO {
        InvoiceStatus::PartiallyPaid
    } else {
        InvoiceStatus::Sent
    }
}

/// Lazy OVERDUE derivation: a pure function over the stored status, the
/// due date and the observation time. Never stored.
pub fn effective_status(
    stored: InvoiceStatus,
    due_date: NaiveDate,
    today: NaiveDate,
    paid: Decimal,
    total: Decimal,
) -> InvoiceStatus {
    match stored {
        InvoiceStatus::Sent | InvoiceStatus::PartiallyPaid
            if today > due_date && paid < total =>
        {
            InvoiceStatus::Overdue
        }
        other => other,
    }
}

/// Preview of the late fee on the unpaid remainder. Display-only; never
/// folded into `total_amount` automatically.
pub fn late_fee_preview(total: Decimal, paid: Decimal, late_fee_percent: Decimal) -> Decimal {
    let remaining = (total - paid).max(Decimal::ZERO);
    round_vnd(remaining * late_fee_percent / Decimal::ONE_HUNDRED)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentMode {
    PositiveOnly,
    NegativeOnly,
    Net,
}

impl AdjustmentMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PositiveOnly => "positive_only",
            Self::NegativeOnly => "negative_only",
            Self::Net => "net",
        }
    }

    pub fn parse(raw: &str) -> AppResult<Self> {
        match raw {
            "positive_only" => Ok(Self::PositiveOnly),
            "negative_only" => Ok(Self::NegativeOnly),
            "net" => Ok(Self::Net),
            other => Err(AppError::BadRequest(format!(
                "Chế độ điều chỉnh không hợp lệ: '{other}'."
            ))),
        }
    }

    pub fn is_netting(self) -> bool {
        matches!(self, Self::Net)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjustmentDiff {
    pub description: String,
    pub amount: Decimal,
}

/// Filter signed diffs by mode. Net collapses to one signed item; a net
/// of exactly zero yields no items at all.
pub fn filter_adjustment_diffs(mode: AdjustmentMode, diffs: &[AdjustmentDiff]) -> Vec<AdjustmentDiff> {
    match mode {
        AdjustmentMode::PositiveOnly => diffs
            .iter()
            .filter(|diff| diff.amount > Decimal::ZERO)
            .cloned()
            .collect(),
        AdjustmentMode::NegativeOnly => diffs
            .iter()
            .filter(|diff| diff.amount < Decimal::ZERO)
            .cloned()
            .collect(),
        AdjustmentMode::Net => {
            let net: Decimal = diffs.iter().map(|diff| diff.amount).sum();
            if net == Decimal::ZERO {
                Vec::new()
            } else {
                vec![AdjustmentDiff {
                    description: "Bù trừ điều chỉnh".to_string(),
                    amount: net,
                }]
            }
        }
    }
}

/// An invoice row as stored. Status strings are parsed on demand via
/// `InvoiceStatus::parse`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct InvoiceRecord {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub tenant_id: Uuid,
    pub house_id: Uuid,
    pub period_month: String,
    pub due_date: NaiveDate,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub late_fee_percent: Decimal,
    pub status: String,
    pub invoice_type: String,
    pub is_netting: bool,
    pub reference_code: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct InvoiceItemRecord {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub item_type: String,
    pub description: String,
    pub category: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::{
        apply_settlement, effective_status, filter_adjustment_diffs, late_fee_preview,
        recompute_status, AdjustmentDiff, AdjustmentMode, FeeBasis, InvoiceStatus, ItemKind,
        LineItem, OverpayPolicy,
    };

    fn diffs() -> Vec<AdjustmentDiff> {
        vec![
            AdjustmentDiff {
                description: "Điện".to_string(),
                amount: dec!(50000),
            },
            AdjustmentDiff {
                description: "Nước".to_string(),
                amount: dec!(-20000),
            },
            AdjustmentDiff {
                description: "Rác".to_string(),
                amount: dec!(-10000),
            },
        ]
    }

    #[test]
    fn settlement_moves_through_partial_to_paid() {
        let outcome =
            apply_settlement(dec!(3200000), dec!(0), dec!(1000000), false, OverpayPolicy::Reject)
                .expect("partial");
        assert_eq!(outcome.new_paid, dec!(1000000));
        assert_eq!(outcome.new_status, InvoiceStatus::PartiallyPaid);
        assert!(!outcome.needs_review);

        let outcome = apply_settlement(
            dec!(3200000),
            dec!(1000000),
            dec!(2200000),
            false,
            OverpayPolicy::Reject,
        )
        .expect("exact");
        assert_eq!(outcome.new_paid, dec!(3200000));
        assert_eq!(outcome.new_status, InvoiceStatus::Paid);
    }

    #[test]
    fn overpayment_is_rejected_on_manual_paths() {
        let err = apply_settlement(
            dec!(800000),
            dec!(500000),
            dec!(500000),
            false,
            OverpayPolicy::Reject,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "overpayment_rejected");
    }

    #[test]
    fn overpayment_is_clamped_and_flagged_on_webhook_path() {
        let outcome = apply_settlement(
            dec!(800000),
            dec!(500000),
            dec!(500000),
            false,
            OverpayPolicy::FlagForReview,
        )
        .expect("flagged");
        assert_eq!(outcome.settled, dec!(300000));
        assert_eq!(outcome.unsettled, dec!(200000));
        assert_eq!(outcome.new_paid, dec!(800000));
        assert_eq!(outcome.new_status, InvoiceStatus::Paid);
        assert!(outcome.needs_review);
    }

    #[test]
    fn payment_on_already_paid_invoice_settles_nothing_but_flags() {
        let outcome = apply_settlement(
            dec!(800000),
            dec!(800000),
            dec!(100000),
            false,
            OverpayPolicy::FlagForReview,
        )
        .expect("flagged");
        assert_eq!(outcome.settled, Decimal::ZERO);
        assert_eq!(outcome.unsettled, dec!(100000));
        assert_eq!(outcome.new_paid, dec!(800000));
        assert!(outcome.needs_review);
    }

    #[test]
    fn netting_invoices_skip_the_clamp() {
        let outcome = apply_settlement(
            dec!(-30000),
            dec!(0),
            dec!(10000),
            true,
            OverpayPolicy::Reject,
        )
        .expect("netting");
        assert_eq!(outcome.new_paid, dec!(10000));
        assert_eq!(outcome.new_status, InvoiceStatus::Paid);
    }

    #[test]
    fn zero_and_negative_amounts_are_invalid() {
        for amount in [dec!(0), dec!(-5)] {
            let err = apply_settlement(dec!(100), dec!(0), amount, false, OverpayPolicy::Reject)
                .unwrap_err();
            assert_eq!(err.kind(), "invalid_amount");
        }
    }

    #[test]
    fn recompute_covers_all_bands() {
        assert_eq!(recompute_status(dec!(100), dec!(0)), InvoiceStatus::Sent);
        assert_eq!(
            recompute_status(dec!(100), dec!(40)),
            InvoiceStatus::PartiallyPaid
        );
        assert_eq!(recompute_status(dec!(100), dec!(100)), InvoiceStatus::Paid);
    }

    #[test]
    fn overdue_is_derived_not_stored() {
        let due = NaiveDate::from_ymd_opt(2025, 9, 5).unwrap();
        let before = NaiveDate::from_ymd_opt(2025, 9, 5).unwrap();
        let after = NaiveDate::from_ymd_opt(2025, 9, 6).unwrap();

        assert_eq!(
            effective_status(InvoiceStatus::Sent, due, before, dec!(0), dec!(100)),
            InvoiceStatus::Sent
        );
        assert_eq!(
            effective_status(InvoiceStatus::Sent, due, after, dec!(0), dec!(100)),
            InvoiceStatus::Overdue
        );
        assert_eq!(
            effective_status(InvoiceStatus::PartiallyPaid, due, after, dec!(40), dec!(100)),
            InvoiceStatus::Overdue
        );
        // Fully paid never reads as overdue.
        assert_eq!(
            effective_status(InvoiceStatus::Paid, due, after, dec!(100), dec!(100)),
            InvoiceStatus::Paid
        );
        assert_eq!(
            effective_status(InvoiceStatus::Draft, due, after, dec!(0), dec!(100)),
            InvoiceStatus::Draft
        );
    }

    #[test]
    fn late_fee_applies_to_unpaid_remainder_only() {
        assert_eq!(late_fee_preview(dec!(1000000), dec!(400000), dec!(5)), dec!(30000));
        assert_eq!(late_fee_preview(dec!(1000000), dec!(1000000), dec!(5)), dec!(0));
    }

    #[test]
    fn negative_only_keeps_the_two_negative_items() {
        let kept = filter_adjustment_diffs(AdjustmentMode::NegativeOnly, &diffs());
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|diff| diff.amount < Decimal::ZERO));
    }

    #[test]
    fn positive_only_drops_refund_credits() {
        let kept = filter_adjustment_diffs(AdjustmentMode::PositiveOnly, &diffs());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].amount, dec!(50000));
    }

    #[test]
    fn net_collapses_to_algebraic_sum() {
        let kept = filter_adjustment_diffs(AdjustmentMode::Net, &diffs());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].amount, dec!(20000));

        let zero_sum = vec![
            AdjustmentDiff {
                description: "a".to_string(),
                amount: dec!(10),
            },
            AdjustmentDiff {
                description: "b".to_string(),
                amount: dec!(-10),
            },
        ];
        assert!(filter_adjustment_diffs(AdjustmentMode::Net, &zero_sum).is_empty());
    }

    #[test]
    fn generator_items_must_match_their_tag_rule() {
        let ok = LineItem::validate(
            ItemKind::UtilityMetered,
            "Điện tháng 9",
            Some("electricity".to_string()),
            dec!(120),
            dec!(3500),
            None,
        )
        .expect("valid item");
        assert_eq!(ok.amount, dec!(420000));

        let err = LineItem::validate(
            ItemKind::UtilityMetered,
            "Điện tháng 9",
            None,
            dec!(120),
            dec!(3500),
            Some(dec!(999999)),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "invalid_amount");
    }

    #[test]
    fn metered_item_bills_the_consumption_delta() {
        let item = super::metered_utility_item(
            "Điện tháng 9",
            Some("electricity".to_string()),
            dec!(320),
            dec!(350),
            dec!(3500),
        )
        .expect("valid readings");
        assert_eq!(item.quantity, dec!(30));
        assert_eq!(item.amount, dec!(105000));

        let err = super::metered_utility_item(
            "Điện tháng 9",
            Some("electricity".to_string()),
            dec!(350),
            dec!(320),
            dec!(3500),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "invalid_amount");
    }

    #[test]
    fn fixed_fee_ignores_quantity() {
        let item = LineItem::validate(
            ItemKind::ServiceFee(FeeBasis::Fixed),
            "Phí giữ xe",
            None,
            dec!(1),
            dec!(200000),
            None,
        )
        .expect("valid item");
        assert_eq!(item.amount, dec!(200000));
    }

    #[test]
    fn adjustment_items_carry_signed_amounts() {
        let item = LineItem::validate(
            ItemKind::Adjustment,
            "Hoàn tiền nước",
            Some("water".to_string()),
            dec!(1),
            dec!(0),
            Some(dec!(-20000)),
        )
        .expect("valid item");
        assert_eq!(item.amount, dec!(-20000));

        let err = LineItem::validate(ItemKind::Adjustment, "Thiếu", None, dec!(1), dec!(0), None)
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_amount");
    }

    #[test]
    fn negative_quantity_and_price_are_rejected() {
        assert!(LineItem::validate(
            ItemKind::Rent,
            "Tiền phòng",
            None,
            dec!(-1),
            dec!(3000000),
            None
        )
        .is_err());
        assert!(LineItem::validate(
            ItemKind::Rent,
            "Tiền phòng",
            None,
            dec!(1),
            dec!(-3000000),
            None
        )
        .is_err());
    }
}
