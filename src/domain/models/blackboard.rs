//! Shared blackboard entry model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of a blackboard entry, used for queries and subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCategory {
    CompanyData,
    Evidence,
    Scores,
    Insights,
    Coordination,
}

impl DataCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CompanyData => "company_data",
            Self::Evidence => "evidence",
            Self::Scores => "scores",
            Self::Insights => "insights",
            Self::Coordination => "coordination",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "company_data" => Some(Self::CompanyData),
            "evidence" => Some(Self::Evidence),
            "scores" => Some(Self::Scores),
            "insights" => Some(Self::Insights),
            "coordination" => Some(Self::Coordination),
            _ => None,
        }
    }
}

impl std::fmt::Display for DataCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A versioned entry on the blackboard.
///
/// Versions for a key start at 1 and increase by exactly 1 per write.
/// An expired entry is indistinguishable from an absent one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlackboardEntry {
    pub key: String,
    pub category: DataCategory,
    pub value: serde_json::Value,
    /// Worker id that produced this value.
    pub source: String,
    pub written_at: DateTime<Utc>,
    pub version: u64,
    pub expires_at: Option<DateTime<Utc>>,
}

impl BlackboardEntry {
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

/// Which backend the hybrid blackboard writes to and reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationMode {
    /// Primary backend only.
    WriteOld,
    /// Write both, read the primary.
    DualWriteReadOld,
    /// Write both, read the secondary.
    DualWriteReadNew,
}

impl Default for MigrationMode {
    fn default() -> Self {
        Self::WriteOld
    }
}

/// Counters exposed by blackboard implementations for diagnostics.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BlackboardStats {
    pub writes: u64,
    pub reads: u64,
    pub notifications: u64,
    pub expired_removed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn expiry_check() {
        let mut entry = BlackboardEntry {
            key: "k".to_string(),
            category: DataCategory::Evidence,
            value: serde_json::json!(1),
            source: "scout".to_string(),
            written_at: Utc::now(),
            version: 1,
            expires_at: None,
        };
        assert!(!entry.is_expired());

        entry.expires_at = Some(Utc::now() - Duration::seconds(1));
        assert!(entry.is_expired());

        entry.expires_at = Some(Utc::now() + Duration::minutes(5));
        assert!(!entry.is_expired());
    }

    #[test]
    fn category_round_trip() {
        for c in [
            DataCategory::CompanyData,
            DataCategory::Evidence,
            DataCategory::Scores,
            DataCategory::Insights,
            DataCategory::Coordination,
        ] {
            assert_eq!(DataCategory::parse(c.as_str()), Some(c));
        }
    }
}
