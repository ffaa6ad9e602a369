use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Immutable record of the contract text in force at a point in time.
/// Append-only; rows are only ever removed by the retention prune.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ContractSnapshotRecord {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub content: String,
    pub content_sha256: String,
    pub change_note: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub fn content_sha256(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::content_sha256;

    #[test]
    fn checksum_is_stable_hex() {
        let a = content_sha256("hop dong thue phong");
        let b = content_sha256("hop dong thue phong");
        let c = content_sha256("hop dong thue phong v2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }
}
