use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{AppError, AppResult};

/// Round to whole đồng. VND has no minor unit, so every stored amount
/// is an integral Decimal.
pub fn round_vnd(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

pub fn ensure_positive(amount: Decimal, what: &str) -> AppResult<()> {
    if amount <= Decimal::ZERO {
        return Err(AppError::InvalidAmount(format!(
            "{what} phải là số tiền dương."
        )));
    }
    Ok(())
}

pub fn ensure_non_negative(amount: Decimal, what: &str) -> AppResult<()> {
    if amount < Decimal::ZERO {
        return Err(AppError::InvalidAmount(format!("{what} không được âm.")));
    }
    Ok(())
}

/// Display helper for user-facing messages: `₫3.200.000`.
pub fn format_vnd(amount: Decimal) -> String {
    let rounded = round_vnd(amount);
    let negative = rounded < Decimal::ZERO;
    let digits = rounded.abs().to_string();
    let mut grouped = String::new();
    for (i, ch) in digits.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    let body: String = grouped.chars().rev().collect();
    if negative {
        format!("-₫{body}")
    } else {
        format!("₫{body}")
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::{ensure_positive, format_vnd, round_vnd};

    #[test]
    fn rounds_to_whole_dong() {
        assert_eq!(round_vnd(dec!(100.4)), dec!(100));
        assert_eq!(round_vnd(dec!(100.5)), dec!(101));
        assert_eq!(round_vnd(dec!(-100.5)), dec!(-101));
    }

    #[test]
    fn formats_with_dot_groups() {
        assert_eq!(format_vnd(dec!(3200000)), "₫3.200.000");
        assert_eq!(format_vnd(dec!(60000)), "₫60.000");
        assert_eq!(format_vnd(dec!(0)), "₫0");
        assert_eq!(format_vnd(dec!(-20000)), "-₫20.000");
    }

    #[test]
    fn rejects_non_positive_amounts() {
        assert!(ensure_positive(dec!(0), "Số tiền").is_err());
        assert!(ensure_positive(dec!(-1), "Số tiền").is_err());
        assert!(ensure_positive(dec!(1), "Số tiền").is_ok());
    }
}
