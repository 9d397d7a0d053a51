//! Record and version types returned by the CRUD engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A CRUD result: the merged (main + current-locale i18n) view of a row,
/// in the flat shape clients sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub collection: String,
    pub data: Value,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Record {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VersionOperation {
    Create,
    Update,
    Transition,
    Revert,
}

/// A row in `<collection>_versions`: an immutable snapshot captured on
/// every mutation when `options.versioning` is enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version_id: String,
    pub record_id: String,
    pub version_number: i64,
    pub operation: VersionOperation,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub stage: Option<String>,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindResult {
    pub docs: Vec<Record>,
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_reports_deleted_state() {
        let mut record = Record {
            id: "1".into(),
            collection: "posts".into(),
            data: Value::Null,
            created_at: None,
            updated_at: None,
            deleted_at: None,
        };
        assert!(!record.is_deleted());
        record.deleted_at = Some(Utc::now());
        assert!(record.is_deleted());
    }
}
