use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bank-transfer notification body as delivered by the Sepay gateway.
/// Field names follow the gateway's camelCase wire format.
#[derive(Debug, Clone, Deserialize)]
pub struct SepayWebhookPayload {
    pub id: i64,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default, rename = "transactionDate")]
    pub transaction_date: Option<String>,
    #[serde(default, rename = "accountNumber")]
    pub account_number: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, rename = "transferType")]
    pub transfer_type: Option<String>,
    #[serde(rename = "transferAmount")]
    pub transfer_amount: Decimal,
    #[serde(default)]
    pub accumulated: Option<Decimal>,
    #[serde(default, rename = "subAccount")]
    pub sub_account: Option<String>,
    #[serde(default, rename = "referenceCode")]
    pub reference_code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SepayTransactionRecord {
    pub id: Uuid,
    pub sepay_transaction_id: i64,
    pub invoice_id: Option<Uuid>,
    pub gateway: Option<String>,
    pub content: Option<String>,
    pub transfer_amount: Decimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Minimum alphanumeric suffix length after the prefix for a token to
/// count as a reference code. Bank memos are noisy free text; short
/// fragments are too easy to collide with.
const MIN_SUFFIX_LEN: usize = 4;

/// Scan free-text bank memo fields for an embedded invoice reference
/// code: the configured prefix followed by alphanumerics, bounded by
/// non-alphanumeric characters (or the ends of the text). Matching is
/// case-insensitive; the returned code is uppercase.
pub fn extract_reference_code(prefix: &str, texts: &[Option<&str>]) -> Option<String> {
    let prefix = prefix.trim().to_ascii_uppercase();
    if prefix.is_empty() {
        return None;
    }

    for text in texts.iter().flatten() {
        let upper = text.to_ascii_uppercase();
        let bytes = upper.as_bytes();
        let mut start = 0usize;
        while let Some(pos) = upper[start..].find(&prefix) {
            let begin = start + pos;
            let boundary_ok = begin == 0 || !bytes[begin - 1].is_ascii_alphanumeric();
            let mut end = begin + prefix.len();
            while end < bytes.len() && bytes[end].is_ascii_alphanumeric() {
                end += 1;
            }
            let suffix_len = end - begin - prefix.len();
            if boundary_ok && suffix_len >= MIN_SUFFIX_LEN {
                return Some(upper[begin..end].to_string());
            }
            start = begin + prefix.len().max(1);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::extract_reference_code;

    #[test]
    fn finds_code_in_noisy_memo_text() {
        let content = Some("CK DEN 970436 ND TRO7F3K2A tien phong thang 9");
        assert_eq!(
            extract_reference_code("TRO", &[content]),
            Some("TRO7F3K2A".to_string())
        );
    }

    #[test]
    fn matching_is_case_insensitive() {
        let content = Some("thanh toan tro7f3k2a");
        assert_eq!(
            extract_reference_code("TRO", &[content]),
            Some("TRO7F3K2A".to_string())
        );
    }

    #[test]
    fn ignores_lookalike_fragments() {
        // Prefix glued to preceding letters, or with too short a suffix.
        assert_eq!(extract_reference_code("TRO", &[Some("METRO12 TROAB")]), None);
        assert_eq!(extract_reference_code("TRO", &[Some("khong co ma")]), None);
        assert_eq!(extract_reference_code("TRO", &[None]), None);
    }

    #[test]
    fn falls_through_to_later_fields() {
        let content = Some("chuyen khoan");
        let code = Some("TRO99AA11");
        assert_eq!(
            extract_reference_code("TRO", &[content, code]),
            Some("TRO99AA11".to_string())
        );
    }

    #[test]
    fn skips_a_bad_hit_and_keeps_scanning() {
        let content = Some("TROAB roi TRO123456");
        assert_eq!(
            extract_reference_code("TRO", &[content]),
            Some("TRO123456".to_string())
        );
    }
}
