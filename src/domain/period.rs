use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AppError;

/// Canonical billing period: a `YYYY-MM` calendar month. Ordering is
/// chronological (derived field order: year, then month).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeriodMonth {
    year: i32,
    month: u32,
}

impl PeriodMonth {
    pub fn new(year: i32, month: u32) -> Result<Self, AppError> {
        if !(1..=12).contains(&month) {
            return Err(AppError::BadRequest(format!(
                "Tháng không hợp lệ: {month}."
            )));
        }
        if !(1970..=9999).contains(&year) {
            return Err(AppError::BadRequest(format!("Năm không hợp lệ: {year}.")));
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }
}

impl fmt::Display for PeriodMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for PeriodMonth {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let invalid =
            || AppError::BadRequest(format!("Kỳ hóa đơn không hợp lệ: '{trimmed}' (YYYY-MM)."));

        let (year_part, month_part) = trimmed.split_once('-').ok_or_else(invalid)?;
        if year_part.len() != 4 || month_part.len() != 2 {
            return Err(invalid());
        }
        let year = year_part.parse::<i32>().map_err(|_| invalid())?;
        let month = month_part.parse::<u32>().map_err(|_| invalid())?;
        Self::new(year, month)
    }
}

impl Serialize for PeriodMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PeriodMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(|e: AppError| D::Error::custom(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::PeriodMonth;

    #[test]
    fn parses_and_formats_round_trip() {
        let period: PeriodMonth = "2025-09".parse().expect("valid period");
        assert_eq!(period.to_string(), "2025-09");
        assert_eq!(period.year(), 2025);
        assert_eq!(period.month(), 9);
    }

    #[test]
    fn rejects_malformed_periods() {
        assert!("2025-13".parse::<PeriodMonth>().is_err());
        assert!("2025-00".parse::<PeriodMonth>().is_err());
        assert!("25-09".parse::<PeriodMonth>().is_err());
        assert!("2025/09".parse::<PeriodMonth>().is_err());
        assert!("2025-9".parse::<PeriodMonth>().is_err());
    }

    #[test]
    fn orders_chronologically() {
        let sep: PeriodMonth = "2025-09".parse().unwrap();
        let oct: PeriodMonth = "2025-10".parse().unwrap();
        let jan: PeriodMonth = "2026-01".parse().unwrap();
        assert!(sep < oct);
        assert!(oct < jan);
    }

    #[test]
    fn advances_across_year_boundary() {
        let dec: PeriodMonth = "2025-12".parse().unwrap();
        assert_eq!(dec.next().to_string(), "2026-01");
    }
}
