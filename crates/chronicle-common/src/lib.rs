use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod logging;

// ============================================================================
// Core domain entities
// ============================================================================

/// A forum post as first captured, before any analysis.
///
/// `source_key` is the natural key: globally unique, stable across
/// re-scrapes. Every other field may be refreshed on re-encounter.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RawItem {
    pub id: String,
    pub source_id: String,
    pub source_key: String,
    pub author_name: Option<String>,
    pub author_link: Option<String>,
    pub author_photo: Option<String>,
    pub text: String,
    pub scraped_at: DateTime<Utc>,
}

/// The classifier's verdict on whether a raw item matches the target
/// criterion. Exactly one per [`RawItem`].
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Classification {
    pub raw_item_id: String,
    pub is_relevant: bool,
    pub confidence: i16,
    pub classified_at: DateTime<Utc>,
}

/// A personalized outreach message tied to one raw item. Zero-or-one per
/// [`RawItem`] (enforced by a unique index on `raw_item_id`).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DraftMessage {
    pub id: String,
    pub raw_item_id: String,
    pub text: String,
    pub link: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Pending,
    Sent,
    Failed,
    Skipped,
}

/// A delivery attempt against a [`DraftMessage`]'s author. Many rows may
/// exist per raw item, but at most one with `status = Sent`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DispatchAttempt {
    pub id: String,
    pub raw_item_id: String,
    pub draft_id: String,
    pub status: DispatchStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Public,
    Private,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AccessMethod {
    Fast,
    Browser,
    None,
}

/// A configured community forum to be scraped. One row per target id.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Target {
    pub id: String,
    pub kind: TargetKind,
    pub access_method: AccessMethod,
    pub is_accessible: bool,
    pub last_probed_at: DateTime<Utc>,
    pub last_scraped_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Valid,
    Expired,
    Invalid,
    Refreshing,
    Blocked,
    Unknown,
}

/// The identity under which the authenticated browser operates. Single row;
/// most-recent write wins.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SessionState {
    pub status: SessionStatus,
    pub last_checked_at: DateTime<Utc>,
    pub last_valid_at: Option<DateTime<Utc>>,
    pub principal_id: Option<String>,
    pub principal_name: Option<String>,
    pub error: Option<String>,
}

/// Append-only operational log entry surfaced to the operator dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditEntry {
    pub id: String,
    pub kind: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.into(),
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Shared error taxonomy (spec §7)
// ============================================================================

/// Errors raised by the durable store adapter. `Transient` is retryable;
/// `Fatal` is not and should surface to the caller for a hard stop.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("transient store error: {0}")]
    Transient(String),
    #[error("fatal store error: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_retryability() {
        assert!(StoreError::Transient("timeout".into()).is_retryable());
        assert!(!StoreError::Fatal("bad schema".into()).is_retryable());
    }

    #[test]
    fn audit_entry_stamps_timestamp_and_id() {
        let a = AuditEntry::new("scrape", "target t1 inaccessible");
        assert_eq!(a.kind, "scrape");
        assert!(!a.id.is_empty());
    }
}
