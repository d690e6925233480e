//! PostgreSQL release store implementation.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{PgExecutor, Row};

use crate::config::DatabaseConfig;
use crate::deployability::{evaluate, Deployability};
use crate::error::{ControlError, ControlResult};
use crate::release_spec::ReleaseSpec;
use crate::types::{
    AppId, Application, DownstreamKey, NewRelease, Release, ReleaseHistory, ReleaseStatus,
};
use crate::validation::{ValidationResult, ValidationState};

use super::{validation_state, CommitCheck, ReleaseStore};

const RELEASE_COLUMNS: &str = r#"
    sequence, channel_id, channel_cursor, version_label, semver, is_required,
    status, spec, validation_skipped, validation_result, created_at, deployed_at
"#;

/// PostgreSQL-backed release store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to PostgreSQL and create a new store.
    ///
    /// The required tables are created if they don't exist.
    pub async fn connect(config: &DatabaseConfig) -> ControlResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        Self::from_pool(pool).await
    }

    /// Create a store from an existing connection pool.
    pub async fn from_pool(pool: PgPool) -> ControlResult<Self> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Ensure the required tables exist.
    async fn ensure_schema(&self) -> ControlResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS applications (
                id TEXT PRIMARY KEY,
                slug TEXT NOT NULL,
                semver_required BOOLEAN NOT NULL DEFAULT FALSE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS downstreams (
                app_id TEXT NOT NULL REFERENCES applications(id) ON DELETE CASCADE,
                downstream_id TEXT NOT NULL,
                current_sequence BIGINT,
                PRIMARY KEY (app_id, downstream_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS releases (
                app_id TEXT NOT NULL,
                downstream_id TEXT NOT NULL,
                sequence BIGINT NOT NULL,
                channel_id TEXT NOT NULL,
                channel_cursor BIGINT NOT NULL,
                version_label TEXT NOT NULL,
                semver TEXT,
                is_required BOOLEAN NOT NULL DEFAULT FALSE,
                status TEXT NOT NULL,
                spec TEXT,
                validation_skipped BOOLEAN NOT NULL DEFAULT FALSE,
                validation_result JSONB,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                deployed_at TIMESTAMPTZ,
                PRIMARY KEY (app_id, downstream_id, sequence),
                FOREIGN KEY (app_id, downstream_id)
                    REFERENCES downstreams(app_id, downstream_id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Parse the columns shared by all release reads.
    fn parse_status(row: &PgRow) -> ControlResult<ReleaseStatus> {
        let status_str: String = row.get("status");
        status_str.parse().map_err(|e| {
            ControlError::Serialisation(format!("failed to parse status '{status_str}': {e}"))
        })
    }

    fn parse_validation_state(row: &PgRow) -> ControlResult<ValidationState> {
        let spec: Option<String> = row.get("spec");
        let skipped: bool = row.get("validation_skipped");
        let result_json: Option<serde_json::Value> = row.get("validation_result");

        let result = result_json
            .map(serde_json::from_value::<ValidationResult>)
            .transpose()
            .map_err(|e| {
                ControlError::Serialisation(format!("failed to deserialise validation result: {e}"))
            })?;

        validation_state(Self::parse_status(row)?, skipped, spec.as_deref(), result)
    }

    /// Parse a row into a Release.
    fn row_to_release(row: &PgRow) -> ControlResult<Release> {
        let semver_str: Option<String> = row.get("semver");
        let semver = semver_str
            .as_deref()
            .map(semver::Version::parse)
            .transpose()
            .map_err(|e| ControlError::Serialisation(format!("failed to parse semver: {e}")))?;

        Ok(Release {
            sequence: row.get("sequence"),
            channel_id: row.get("channel_id"),
            cursor: row.get("channel_cursor"),
            version_label: row.get("version_label"),
            semver,
            is_required: row.get("is_required"),
            has_failing_strict_validation: Self::parse_validation_state(row)?.failing_or_not_run(),
            status: Self::parse_status(row)?,
            created_at: row.get("created_at"),
            deployed_at: row.get("deployed_at"),
        })
    }

    async fn fetch_release_row<'e, E>(
        executor: E,
        key: &DownstreamKey,
        sequence: i64,
    ) -> ControlResult<Option<PgRow>>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            "SELECT {RELEASE_COLUMNS} FROM releases \
             WHERE app_id = $1 AND downstream_id = $2 AND sequence = $3"
        );
        Ok(sqlx::query(&query)
            .bind(key.app_id.as_str())
            .bind(key.downstream_id.as_str())
            .bind(sequence)
            .fetch_optional(executor)
            .await?)
    }

    async fn fetch_releases<'e, E>(executor: E, key: &DownstreamKey) -> ControlResult<Vec<Release>>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            "SELECT {RELEASE_COLUMNS} FROM releases \
             WHERE app_id = $1 AND downstream_id = $2 ORDER BY sequence DESC"
        );
        let rows = sqlx::query(&query)
            .bind(key.app_id.as_str())
            .bind(key.downstream_id.as_str())
            .fetch_all(executor)
            .await?;

        rows.iter().map(Self::row_to_release).collect()
    }

    async fn update_release(
        &self,
        key: &DownstreamKey,
        sequence: i64,
        sql: &str,
        result: Option<serde_json::Value>,
    ) -> ControlResult<()> {
        let mut query = sqlx::query(sql)
            .bind(key.app_id.as_str())
            .bind(key.downstream_id.as_str())
            .bind(sequence);
        if let Some(value) = result {
            query = query.bind(value);
        }

        if query.execute(&self.pool).await?.rows_affected() == 0 {
            return Err(ControlError::release_not_found(key, sequence));
        }
        Ok(())
    }
}

#[async_trait]
impl ReleaseStore for PostgresStore {
    async fn ping(&self) -> ControlResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_application(&self, application: &Application) -> ControlResult<()> {
        sqlx::query("INSERT INTO applications (id, slug, semver_required) VALUES ($1, $2, $3)")
            .bind(application.id.as_str())
            .bind(&application.slug)
            .bind(application.semver_required)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_application(&self, id: &AppId) -> ControlResult<Option<Application>> {
        let row = sqlx::query("SELECT id, slug, semver_required FROM applications WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Application {
            id: AppId::new(r.get::<String, _>("id")),
            slug: r.get("slug"),
            semver_required: r.get("semver_required"),
        }))
    }

    async fn insert_downstream(&self, key: &DownstreamKey) -> ControlResult<()> {
        sqlx::query("INSERT INTO downstreams (app_id, downstream_id) VALUES ($1, $2)")
            .bind(key.app_id.as_str())
            .bind(key.downstream_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_release(&self, key: &DownstreamKey, release: NewRelease) -> ControlResult<i64> {
        if let Some(spec) = &release.spec {
            ReleaseSpec::parse(spec)?;
        }

        let mut tx = self.pool.begin().await?;

        // Lock the downstream so concurrent inserts allocate distinct sequences.
        let locked = sqlx::query(
            "SELECT 1 FROM downstreams WHERE app_id = $1 AND downstream_id = $2 FOR UPDATE",
        )
        .bind(key.app_id.as_str())
        .bind(key.downstream_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        if locked.is_none() {
            return Err(ControlError::DownstreamNotFound(key.to_string()));
        }

        let sequence: i64 = sqlx::query(
            "SELECT COALESCE(MAX(sequence) + 1, 0) AS next FROM releases \
             WHERE app_id = $1 AND downstream_id = $2",
        )
        .bind(key.app_id.as_str())
        .bind(key.downstream_id.as_str())
        .fetch_one(&mut *tx)
        .await?
        .get("next");

        sqlx::query(
            r#"
            INSERT INTO releases (
                app_id, downstream_id, sequence, channel_id, channel_cursor,
                version_label, semver, is_required, status, spec
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(key.app_id.as_str())
        .bind(key.downstream_id.as_str())
        .bind(sequence)
        .bind(&release.channel_id)
        .bind(release.cursor)
        .bind(&release.version_label)
        .bind(release.semver.as_ref().map(ToString::to_string))
        .bind(release.is_required)
        .bind(release.status.as_str())
        .bind(&release.spec)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(sequence)
    }

    async fn get_release(&self, key: &DownstreamKey, sequence: i64) -> ControlResult<Option<Release>> {
        Self::fetch_release_row(&self.pool, key, sequence)
            .await?
            .as_ref()
            .map(Self::row_to_release)
            .transpose()
    }

    async fn get_release_history(&self, key: &DownstreamKey) -> ControlResult<ReleaseHistory> {
        let row = sqlx::query(
            "SELECT current_sequence FROM downstreams WHERE app_id = $1 AND downstream_id = $2",
        )
        .bind(key.app_id.as_str())
        .bind(key.downstream_id.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ControlError::DownstreamNotFound(key.to_string()))?;
        let current: Option<i64> = row.get("current_sequence");

        let releases = Self::fetch_releases(&self.pool, key).await?;
        ReleaseHistory::new(releases, current)
    }

    async fn get_release_spec(
        &self,
        key: &DownstreamKey,
        sequence: i64,
    ) -> ControlResult<Option<ReleaseSpec>> {
        let Some(row) = Self::fetch_release_row(&self.pool, key, sequence).await? else {
            return Ok(None);
        };
        let spec: Option<String> = row.get("spec");
        spec.as_deref().map_or_else(|| Ok(ReleaseSpec::default()), ReleaseSpec::parse).map(Some)
    }

    async fn get_validation_state(
        &self,
        key: &DownstreamKey,
        sequence: i64,
    ) -> ControlResult<Option<ValidationState>> {
        Self::fetch_release_row(&self.pool, key, sequence)
            .await?
            .as_ref()
            .map(Self::parse_validation_state)
            .transpose()
    }

    async fn get_status(
        &self,
        key: &DownstreamKey,
        sequence: i64,
    ) -> ControlResult<Option<ReleaseStatus>> {
        let row = sqlx::query(
            "SELECT status FROM releases WHERE app_id = $1 AND downstream_id = $2 AND sequence = $3",
        )
        .bind(key.app_id.as_str())
        .bind(key.downstream_id.as_str())
        .bind(sequence)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::parse_status).transpose()
    }

    async fn record_validation(
        &self,
        key: &DownstreamKey,
        sequence: i64,
        result: &ValidationResult,
    ) -> ControlResult<()> {
        let value = serde_json::to_value(result).map_err(|e| {
            ControlError::Serialisation(format!("failed to serialise validation result: {e}"))
        })?;

        self.update_release(
            key,
            sequence,
            r#"
            UPDATE releases
            SET validation_result = $4,
                status = CASE WHEN status = 'pending_validation' THEN 'pending' ELSE status END
            WHERE app_id = $1 AND downstream_id = $2 AND sequence = $3
            "#,
            Some(value),
        )
        .await
    }

    async fn skip_validation(&self, key: &DownstreamKey, sequence: i64) -> ControlResult<()> {
        self.update_release(
            key,
            sequence,
            r#"
            UPDATE releases
            SET validation_skipped = TRUE,
                status = CASE WHEN status = 'pending_validation' THEN 'pending' ELSE status END
            WHERE app_id = $1 AND downstream_id = $2 AND sequence = $3
            "#,
            None,
        )
        .await
    }

    async fn commit(
        &self,
        key: &DownstreamKey,
        sequence: i64,
        check: CommitCheck,
    ) -> ControlResult<Deployability> {
        // Dropping `tx` on any early return rolls everything back.
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT current_sequence FROM downstreams \
             WHERE app_id = $1 AND downstream_id = $2 FOR UPDATE",
        )
        .bind(key.app_id.as_str())
        .bind(key.downstream_id.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ControlError::DownstreamNotFound(key.to_string()))?;
        let previous: Option<i64> = row.get("current_sequence");

        if let CommitCheck::Deployable {
            semver_authoritative,
        } = check
        {
            let releases = Self::fetch_releases(&mut *tx, key).await?;
            let history = ReleaseHistory::new(releases, previous)?;
            let target = history
                .get(sequence)
                .ok_or_else(|| ControlError::release_not_found(key, sequence))?;
            let outcome = evaluate(target, Some(&history), semver_authoritative);
            if !outcome.is_deployable() {
                return Ok(outcome);
            }
        }

        let activated = sqlx::query(
            r#"
            UPDATE releases
            SET status = 'deployed', deployed_at = NOW()
            WHERE app_id = $1 AND downstream_id = $2 AND sequence = $3
            "#,
        )
        .bind(key.app_id.as_str())
        .bind(key.downstream_id.as_str())
        .bind(sequence)
        .execute(&mut *tx)
        .await?;
        if activated.rows_affected() == 0 {
            return Err(ControlError::release_not_found(key, sequence));
        }

        if let Some(previous) = previous.filter(|p| *p != sequence) {
            sqlx::query(
                r#"
                UPDATE releases SET status = 'superseded'
                WHERE app_id = $1 AND downstream_id = $2 AND sequence = $3
                "#,
            )
            .bind(key.app_id.as_str())
            .bind(key.downstream_id.as_str())
            .bind(previous)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "UPDATE downstreams SET current_sequence = $3 WHERE app_id = $1 AND downstream_id = $2",
        )
        .bind(key.app_id.as_str())
        .bind(key.downstream_id.as_str())
        .bind(sequence)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Deployability::Deployable)
    }
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    fn get_database_url() -> Option<String> {
        std::env::var("DATABASE_URL").ok()
    }

    async fn connect() -> PostgresStore {
        let url = get_database_url().expect("DATABASE_URL not set");
        let config = DatabaseConfig {
            url,
            ..DatabaseConfig::default()
        };
        PostgresStore::connect(&config).await.expect("failed to connect")
    }

    async fn seeded(store: &PostgresStore, app: &str) -> DownstreamKey {
        store
            .insert_application(&Application {
                id: AppId::new(app),
                slug: app.to_owned(),
                semver_required: false,
            })
            .await
            .expect("insert application failed");
        let key = DownstreamKey::new(app, "prod");
        store.insert_downstream(&key).await.expect("insert downstream failed");
        key
    }

    fn unique_app(prefix: &str) -> String {
        format!("{prefix}-{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default())
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL)"]
    async fn insert_and_read_history() {
        let store = connect().await;
        let key = seeded(&store, &unique_app("history")).await;

        let first = store
            .insert_release(
                &key,
                NewRelease::new("stable", 1, "1.0.0").with_semver(semver::Version::new(1, 0, 0)),
            )
            .await
            .expect("insert failed");
        let second = store
            .insert_release(&key, NewRelease::new("stable", 2, "2.0.0").required())
            .await
            .expect("insert failed");

        let history = store.get_release_history(&key).await.expect("history failed");
        let sequences: Vec<_> = history.releases.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![second, first]);
        assert!(history.current.is_none());
        assert_eq!(
            history.get(first).and_then(|r| r.semver.clone()),
            Some(semver::Version::new(1, 0, 0))
        );
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL)"]
    async fn commit_is_atomic() {
        let store = connect().await;
        let key = seeded(&store, &unique_app("commit")).await;

        let first = store
            .insert_release(&key, NewRelease::new("stable", 1, "1.0"))
            .await
            .expect("insert failed");
        store
            .commit(&key, first, CommitCheck::Unconditional)
            .await
            .expect("commit failed");

        let result = store.commit(&key, 99, CommitCheck::Unconditional).await;
        assert!(result.is_err());

        let history = store.get_release_history(&key).await.expect("history failed");
        let current = history.current.expect("no current release");
        assert_eq!(current.sequence, first);
        assert_eq!(current.status, ReleaseStatus::Deployed);
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (set DATABASE_URL)"]
    async fn validation_result_round_trip() {
        let store = connect().await;
        let key = seeded(&store, &unique_app("validation")).await;

        let seq = store
            .insert_release(
                &key,
                NewRelease::new("stable", 1, "1.0")
                    .with_spec("validation:\n  checks:\n    - name: k8s\n      strict: true\n")
                    .with_status(ReleaseStatus::PendingValidation),
            )
            .await
            .expect("insert failed");

        let failing = ValidationResult {
            results: vec![crate::validation::CheckOutcome {
                title: "k8s".to_owned(),
                strict: true,
                is_fail: true,
                ..Default::default()
            }],
        };
        store
            .record_validation(&key, seq, &failing)
            .await
            .expect("record failed");

        let state = store
            .get_validation_state(&key, seq)
            .await
            .expect("read failed")
            .expect("missing");
        assert_eq!(state.status, ReleaseStatus::Pending);
        assert!(state.strict_failure());
    }
}
