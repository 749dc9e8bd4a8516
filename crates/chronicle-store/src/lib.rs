//! Durable store adapter (C1).
//!
//! Wraps an [`sqlx::PgPool`] with typed CRUD for every pipeline entity plus
//! the handful of cross-entity candidate queries the stages drive off of.
//! Every statement runs under a hard per-call timeout; a timeout or any
//! connection-shaped `sqlx::Error` becomes [`StoreError::Transient`], while
//! constraint/programming errors become [`StoreError::Fatal`].

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use chronicle_common::{
    AccessMethod, AuditEntry, Classification, DispatchAttempt, DispatchStatus, DraftMessage,
    RawItem, SessionState, SessionStatus, StoreError, Target, TargetKind,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, warn};

/// Hard ceiling on any single statement (spec §4.1).
const STATEMENT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct StoreAdapter {
    pool: PgPool,
}

impl StoreAdapter {
    /// Connect and run schema initialization. Mirrors the teacher's
    /// pool-construction pattern, minus the multi-backend trait — this
    /// pipeline only ever talks to Postgres.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await
            .map_err(|e| StoreError::Transient(format!("connect: {e}")))?;

        let adapter = Self { pool };
        adapter.init_schema().await?;
        Ok(adapter)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        let statements = [
            r#"CREATE TABLE IF NOT EXISTS raw_items (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                source_key TEXT NOT NULL UNIQUE,
                author_name TEXT,
                author_link TEXT,
                author_photo TEXT,
                text TEXT NOT NULL,
                scraped_at TIMESTAMPTZ NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS classifications (
                raw_item_id TEXT PRIMARY KEY REFERENCES raw_items(id),
                is_relevant BOOLEAN NOT NULL,
                confidence SMALLINT NOT NULL,
                classified_at TIMESTAMPTZ NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS draft_messages (
                id TEXT PRIMARY KEY,
                raw_item_id TEXT NOT NULL UNIQUE REFERENCES raw_items(id),
                text TEXT NOT NULL,
                link TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS dispatch_attempts (
                id TEXT PRIMARY KEY,
                raw_item_id TEXT NOT NULL REFERENCES raw_items(id),
                draft_id TEXT NOT NULL REFERENCES draft_messages(id),
                status TEXT NOT NULL,
                sent_at TIMESTAMPTZ,
                error TEXT
            )"#,
            r#"CREATE TABLE IF NOT EXISTS targets (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                access_method TEXT NOT NULL,
                is_accessible BOOLEAN NOT NULL,
                last_probed_at TIMESTAMPTZ NOT NULL,
                last_scraped_at TIMESTAMPTZ,
                error TEXT
            )"#,
            r#"CREATE TABLE IF NOT EXISTS session_state (
                id SMALLINT PRIMARY KEY DEFAULT 1 CHECK (id = 1),
                status TEXT NOT NULL,
                last_checked_at TIMESTAMPTZ NOT NULL,
                last_valid_at TIMESTAMPTZ,
                principal_id TEXT,
                principal_name TEXT,
                error TEXT
            )"#,
            r#"CREATE TABLE IF NOT EXISTS audit_entries (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )"#,
            "CREATE INDEX IF NOT EXISTS idx_raw_items_scraped_at ON raw_items(scraped_at)",
            "CREATE INDEX IF NOT EXISTS idx_dispatch_attempts_raw_item ON dispatch_attempts(raw_item_id)",
        ];

        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
        }
        Ok(())
    }

    // ========================================================================
    // RawItem
    // ========================================================================

    /// Idempotent insert-or-refresh by `source_key` (spec §4.1, §4.8.3).
    pub async fn upsert_raw(
        &self,
        source_id: &str,
        source_key: &str,
        author_name: Option<&str>,
        author_link: Option<&str>,
        author_photo: Option<&str>,
        text: &str,
    ) -> Result<RawItem, StoreError> {
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();
        let row = run(sqlx::query(
            r#"INSERT INTO raw_items (id, source_id, source_key, author_name, author_link, author_photo, text, scraped_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               ON CONFLICT (source_key) DO UPDATE SET
                   author_name = EXCLUDED.author_name,
                   author_link = EXCLUDED.author_link,
                   author_photo = EXCLUDED.author_photo,
                   text = EXCLUDED.text,
                   scraped_at = EXCLUDED.scraped_at
               RETURNING id, source_id, source_key, author_name, author_link, author_photo, text, scraped_at"#,
        )
        .bind(&id)
        .bind(source_id)
        .bind(source_key)
        .bind(author_name)
        .bind(author_link)
        .bind(author_photo)
        .bind(text)
        .bind(now)
        .fetch_one(&self.pool))
        .await?;

        Ok(raw_item_from_row(&row))
    }

    /// RawItems lacking a Classification, oldest first (spec §4.1).
    pub async fn candidates_for_classify(&self, limit: u32) -> Result<Vec<RawItem>, StoreError> {
        let rows = run(sqlx::query(
            r#"SELECT r.id, r.source_id, r.source_key, r.author_name, r.author_link, r.author_photo, r.text, r.scraped_at
               FROM raw_items r
               LEFT JOIN classifications c ON c.raw_item_id = r.id
               WHERE c.raw_item_id IS NULL
               ORDER BY r.scraped_at ASC
               LIMIT $1"#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool))
        .await?;

        Ok(rows.iter().map(raw_item_from_row).collect())
    }

    // ========================================================================
    // Classification
    // ========================================================================

    /// Persist a Classification exactly once (unique PK on `raw_item_id`).
    pub async fn insert_classification(
        &self,
        raw_item_id: &str,
        is_relevant: bool,
        confidence: i16,
    ) -> Result<(), StoreError> {
        run(sqlx::query(
            r#"INSERT INTO classifications (raw_item_id, is_relevant, confidence, classified_at)
               VALUES ($1, $2, $3, $4)
               ON CONFLICT (raw_item_id) DO NOTHING"#,
        )
        .bind(raw_item_id)
        .bind(is_relevant)
        .bind(confidence)
        .bind(Utc::now())
        .execute(&self.pool))
        .await?;
        Ok(())
    }

    /// Relevant classifications whose raw item has an author link, no draft
    /// yet, and no Dispatch(sent) (spec §4.1, §4.10).
    pub async fn candidates_for_generate(
        &self,
        limit: u32,
        min_confidence: i16,
    ) -> Result<Vec<(RawItem, Classification)>, StoreError> {
        let rows = run(sqlx::query(
            r#"SELECT r.id, r.source_id, r.source_key, r.author_name, r.author_link, r.author_photo, r.text, r.scraped_at,
                      c.is_relevant, c.confidence, c.classified_at
               FROM raw_items r
               JOIN classifications c ON c.raw_item_id = r.id
               LEFT JOIN draft_messages d ON d.raw_item_id = r.id
               WHERE c.is_relevant = TRUE
                 AND c.confidence >= $1
                 AND r.author_link IS NOT NULL
                 AND d.raw_item_id IS NULL
                 AND NOT EXISTS (
                     SELECT 1 FROM dispatch_attempts da
                     WHERE da.raw_item_id = r.id AND da.status = 'sent'
                 )
               ORDER BY r.scraped_at ASC
               LIMIT $2"#,
        )
        .bind(min_confidence)
        .bind(limit as i64)
        .fetch_all(&self.pool))
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let raw = raw_item_from_row(row);
                let classification = Classification {
                    raw_item_id: raw.id.clone(),
                    is_relevant: row.get("is_relevant"),
                    confidence: row.get("confidence"),
                    classified_at: row.get("classified_at"),
                };
                (raw, classification)
            })
            .collect())
    }

    // ========================================================================
    // DraftMessage
    // ========================================================================

    /// Persist a DraftMessage; unique constraint on `raw_item_id` collapses
    /// concurrent duplicate generates to one row (spec §5).
    pub async fn insert_draft(
        &self,
        raw_item_id: &str,
        text: &str,
        link: &str,
    ) -> Result<Option<DraftMessage>, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let row = run(sqlx::query(
            r#"INSERT INTO draft_messages (id, raw_item_id, text, link, created_at)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (raw_item_id) DO NOTHING
               RETURNING id, raw_item_id, text, link, created_at"#,
        )
        .bind(&id)
        .bind(raw_item_id)
        .bind(text)
        .bind(link)
        .bind(now)
        .fetch_optional(&self.pool))
        .await?;

        Ok(row.map(|r| DraftMessage {
            id: r.get("id"),
            raw_item_id: r.get("raw_item_id"),
            text: r.get("text"),
            link: r.get("link"),
            created_at: r.get("created_at"),
        }))
    }

    /// DraftMessages whose raw item has an author link and no Dispatch(sent)
    /// (spec §4.1, §4.11).
    pub async fn candidates_for_dispatch(
        &self,
        limit: u32,
    ) -> Result<Vec<(RawItem, DraftMessage)>, StoreError> {
        let rows = run(sqlx::query(
            r#"SELECT r.id, r.source_id, r.source_key, r.author_name, r.author_link, r.author_photo, r.text, r.scraped_at,
                      d.id AS draft_id, d.text AS draft_text, d.link AS draft_link, d.created_at AS draft_created_at
               FROM draft_messages d
               JOIN raw_items r ON r.id = d.raw_item_id
               WHERE r.author_link IS NOT NULL
                 AND NOT EXISTS (
                     SELECT 1 FROM dispatch_attempts da
                     WHERE da.raw_item_id = r.id AND da.status = 'sent'
                 )
               ORDER BY r.scraped_at ASC
               LIMIT $1"#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool))
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let raw = raw_item_from_row(row);
                let draft = DraftMessage {
                    id: row.get("draft_id"),
                    raw_item_id: raw.id.clone(),
                    text: row.get("draft_text"),
                    link: row.get("draft_link"),
                    created_at: row.get("draft_created_at"),
                };
                (raw, draft)
            })
            .collect())
    }

    // ========================================================================
    // DispatchAttempt
    // ========================================================================

    pub async fn insert_dispatch_attempt(
        &self,
        raw_item_id: &str,
        draft_id: &str,
        status: DispatchStatus,
        error: Option<&str>,
    ) -> Result<DispatchAttempt, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let sent_at = matches!(status, DispatchStatus::Sent).then(Utc::now);

        let row = run(sqlx::query(
            r#"INSERT INTO dispatch_attempts (id, raw_item_id, draft_id, status, sent_at, error)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING id, raw_item_id, draft_id, status, sent_at, error"#,
        )
        .bind(&id)
        .bind(raw_item_id)
        .bind(draft_id)
        .bind(status_to_text(status))
        .bind(sent_at)
        .bind(error)
        .fetch_one(&self.pool))
        .await?;

        Ok(DispatchAttempt {
            id: row.get("id"),
            raw_item_id: row.get("raw_item_id"),
            draft_id: row.get("draft_id"),
            status,
            sent_at: row.get("sent_at"),
            error: row.get("error"),
        })
    }

    /// Rolling-window quota gate (spec §4.11, resolved as rolling-24h not
    /// calendar-day — see DESIGN.md).
    pub async fn count_sent_in_window(&self, window: ChronoDuration) -> Result<i64, StoreError> {
        let since = Utc::now() - window;
        let row = run(sqlx::query(
            "SELECT COUNT(*) AS n FROM dispatch_attempts WHERE status = 'sent' AND sent_at >= $1",
        )
        .bind(since)
        .fetch_one(&self.pool))
        .await?;
        Ok(row.get("n"))
    }

    // ========================================================================
    // Target
    // ========================================================================

    pub async fn get_target(&self, id: &str) -> Result<Option<Target>, StoreError> {
        let row = run(sqlx::query(
            r#"SELECT id, kind, access_method, is_accessible, last_probed_at, last_scraped_at, error
               FROM targets WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool))
        .await?;
        Ok(row.map(|r| target_from_row(&r)))
    }

    pub async fn upsert_target(
        &self,
        id: &str,
        kind: TargetKind,
        access_method: AccessMethod,
        is_accessible: bool,
    ) -> Result<Target, StoreError> {
        let now = Utc::now();
        let row = run(sqlx::query(
            r#"INSERT INTO targets (id, kind, access_method, is_accessible, last_probed_at)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (id) DO UPDATE SET
                   kind = EXCLUDED.kind,
                   access_method = EXCLUDED.access_method,
                   is_accessible = EXCLUDED.is_accessible,
                   last_probed_at = EXCLUDED.last_probed_at
               RETURNING id, kind, access_method, is_accessible, last_probed_at, last_scraped_at, error"#,
        )
        .bind(id)
        .bind(kind_to_text(kind))
        .bind(access_method_to_text(access_method))
        .bind(is_accessible)
        .bind(now)
        .fetch_one(&self.pool))
        .await?;
        Ok(target_from_row(&row))
    }

    /// Clears the error and refreshes `last_scraped_at` (spec §4.7). A
    /// successful fast scrape against a target still of `kind=unknown`
    /// promotes it to `public` (spec §8 scenario 1) — a target that tolerates
    /// the cheap path without a session has demonstrated it doesn't need one.
    pub async fn mark_scraped(&self, id: &str, method: AccessMethod) -> Result<(), StoreError> {
        run(sqlx::query(
            r#"UPDATE targets SET
                   kind = CASE WHEN kind = 'unknown' AND $2 = 'fast' THEN 'public' ELSE kind END,
                   access_method = $2, is_accessible = TRUE, error = NULL, last_scraped_at = $3
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(access_method_to_text(method))
        .bind(Utc::now())
        .execute(&self.pool))
        .await?;
        Ok(())
    }

    /// Sets `usable=false` with the recorded error (spec §4.7).
    pub async fn mark_error(&self, id: &str, message: &str) -> Result<(), StoreError> {
        run(sqlx::query(
            "UPDATE targets SET is_accessible = FALSE, error = $2, last_probed_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(message)
        .bind(Utc::now())
        .execute(&self.pool))
        .await?;
        Ok(())
    }

    // ========================================================================
    // SessionState
    // ========================================================================

    pub async fn get_session_state(&self) -> Result<Option<SessionState>, StoreError> {
        let row = run(sqlx::query(
            r#"SELECT status, last_checked_at, last_valid_at, principal_id, principal_name, error
               FROM session_state WHERE id = 1"#,
        )
        .fetch_optional(&self.pool))
        .await?;
        Ok(row.map(|r| session_state_from_row(&r)))
    }

    pub async fn set_session_state(&self, state: &SessionState) -> Result<(), StoreError> {
        run(sqlx::query(
            r#"INSERT INTO session_state (id, status, last_checked_at, last_valid_at, principal_id, principal_name, error)
               VALUES (1, $1, $2, $3, $4, $5, $6)
               ON CONFLICT (id) DO UPDATE SET
                   status = EXCLUDED.status,
                   last_checked_at = EXCLUDED.last_checked_at,
                   last_valid_at = EXCLUDED.last_valid_at,
                   principal_id = EXCLUDED.principal_id,
                   principal_name = EXCLUDED.principal_name,
                   error = EXCLUDED.error"#,
        )
        .bind(session_status_to_text(state.status))
        .bind(state.last_checked_at)
        .bind(state.last_valid_at)
        .bind(&state.principal_id)
        .bind(&state.principal_name)
        .bind(&state.error)
        .execute(&self.pool))
        .await?;
        Ok(())
    }

    // ========================================================================
    // AuditEntry
    // ========================================================================

    pub async fn record_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        run(sqlx::query(
            "INSERT INTO audit_entries (id, kind, message, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(&entry.id)
        .bind(&entry.kind)
        .bind(&entry.message)
        .bind(entry.created_at)
        .execute(&self.pool))
        .await?;
        Ok(())
    }

    /// Health probe used by the self-healing controller (spec §4.15).
    pub async fn probe(&self) -> Result<(), StoreError> {
        run(sqlx::query("SELECT 1").fetch_one(&self.pool))
            .await
            .map(|_| ())
    }
}

async fn run<F, T>(fut: F) -> Result<T, StoreError>
where
    F: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(STATEMENT_TIMEOUT, fut).await {
        Ok(Ok(val)) => Ok(val),
        Ok(Err(e)) => Err(map_sqlx_err(e)),
        Err(_) => {
            warn!("store statement exceeded {:?} timeout", STATEMENT_TIMEOUT);
            Err(StoreError::Transient("statement timed out".to_string()))
        }
    }
}

fn map_sqlx_err(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            StoreError::Transient(e.to_string())
        }
        sqlx::Error::Database(db_err) => {
            // Constraint violations are logical, not infrastructure, faults.
            if db_err.is_unique_violation() || db_err.is_check_violation() {
                debug!(error = %db_err, "store constraint violation");
                StoreError::Fatal(db_err.to_string())
            } else {
                StoreError::Transient(db_err.to_string())
            }
        }
        _ => StoreError::Fatal(e.to_string()),
    }
}

fn raw_item_from_row(row: &sqlx::postgres::PgRow) -> RawItem {
    RawItem {
        id: row.get("id"),
        source_id: row.get("source_id"),
        source_key: row.get("source_key"),
        author_name: row.get("author_name"),
        author_link: row.get("author_link"),
        author_photo: row.get("author_photo"),
        text: row.get("text"),
        scraped_at: row.get("scraped_at"),
    }
}

fn target_from_row(row: &sqlx::postgres::PgRow) -> Target {
    Target {
        id: row.get("id"),
        kind: text_to_kind(row.get("kind")),
        access_method: text_to_access_method(row.get("access_method")),
        is_accessible: row.get("is_accessible"),
        last_probed_at: row.get("last_probed_at"),
        last_scraped_at: row.get("last_scraped_at"),
        error: row.get("error"),
    }
}

fn session_state_from_row(row: &sqlx::postgres::PgRow) -> SessionState {
    SessionState {
        status: text_to_session_status(row.get("status")),
        last_checked_at: row.get("last_checked_at"),
        last_valid_at: row.get("last_valid_at"),
        principal_id: row.get("principal_id"),
        principal_name: row.get("principal_name"),
        error: row.get("error"),
    }
}

fn status_to_text(status: DispatchStatus) -> &'static str {
    match status {
        DispatchStatus::Pending => "pending",
        DispatchStatus::Sent => "sent",
        DispatchStatus::Failed => "failed",
        DispatchStatus::Skipped => "skipped",
    }
}

fn kind_to_text(kind: TargetKind) -> &'static str {
    match kind {
        TargetKind::Public => "public",
        TargetKind::Private => "private",
        TargetKind::Unknown => "unknown",
    }
}

fn text_to_kind(s: String) -> TargetKind {
    match s.as_str() {
        "public" => TargetKind::Public,
        "private" => TargetKind::Private,
        _ => TargetKind::Unknown,
    }
}

fn access_method_to_text(method: AccessMethod) -> &'static str {
    match method {
        AccessMethod::Fast => "fast",
        AccessMethod::Browser => "browser",
        AccessMethod::None => "none",
    }
}

fn text_to_access_method(s: String) -> AccessMethod {
    match s.as_str() {
        "fast" => AccessMethod::Fast,
        "browser" => AccessMethod::Browser,
        _ => AccessMethod::None,
    }
}

fn session_status_to_text(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Valid => "valid",
        SessionStatus::Expired => "expired",
        SessionStatus::Invalid => "invalid",
        SessionStatus::Refreshing => "refreshing",
        SessionStatus::Blocked => "blocked",
        SessionStatus::Unknown => "unknown",
    }
}

fn text_to_session_status(s: String) -> SessionStatus {
    match s.as_str() {
        "valid" => SessionStatus::Valid,
        "expired" => SessionStatus::Expired,
        "invalid" => SessionStatus::Invalid,
        "refreshing" => SessionStatus::Refreshing,
        "blocked" => SessionStatus::Blocked,
        _ => SessionStatus::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_text() {
        for k in [TargetKind::Public, TargetKind::Private, TargetKind::Unknown] {
            assert_eq!(text_to_kind(kind_to_text(k).to_string()), k);
        }
    }

    #[test]
    fn access_method_round_trips_through_text() {
        for m in [AccessMethod::Fast, AccessMethod::Browser, AccessMethod::None] {
            assert_eq!(text_to_access_method(access_method_to_text(m).to_string()), m);
        }
    }

    #[test]
    fn session_status_round_trips_through_text() {
        for s in [
            SessionStatus::Valid,
            SessionStatus::Expired,
            SessionStatus::Invalid,
            SessionStatus::Refreshing,
            SessionStatus::Blocked,
            SessionStatus::Unknown,
        ] {
            assert_eq!(text_to_session_status(session_status_to_text(s).to_string()), s);
        }
    }

    #[test]
    fn non_database_error_maps_to_fatal_via_catch_all() {
        // RowNotFound isn't a Database error, so this exercises the catch-all
        // arm, not the constraint-violation branch below.
        assert!(matches!(map_sqlx_err(sqlx::Error::RowNotFound), StoreError::Fatal(_)));
    }

    #[derive(Debug)]
    struct MockDbError(sqlx::error::ErrorKind);

    impl std::fmt::Display for MockDbError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "mock database error")
        }
    }

    impl std::error::Error for MockDbError {}

    impl sqlx::error::DatabaseError for MockDbError {
        fn message(&self) -> &str {
            "mock database error"
        }
        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }
        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }
        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }
        fn kind(&self) -> sqlx::error::ErrorKind {
            self.0
        }
    }

    #[test]
    fn unique_violation_maps_to_fatal() {
        // Constraint collisions (duplicate Classification / DraftMessage insert
        // races) are logical outcomes, not infrastructure failures, and must
        // not be retried as if the store were unavailable.
        let e = sqlx::Error::Database(Box::new(MockDbError(sqlx::error::ErrorKind::UniqueViolation)));
        assert!(matches!(map_sqlx_err(e), StoreError::Fatal(_)));
    }

    #[test]
    fn foreign_key_violation_maps_to_transient() {
        // Only unique/check violations are treated as logical faults; other
        // database errors fall back to transient (retryable).
        let e = sqlx::Error::Database(Box::new(MockDbError(sqlx::error::ErrorKind::ForeignKeyViolation)));
        assert!(matches!(map_sqlx_err(e), StoreError::Transient(_)));
    }
}
