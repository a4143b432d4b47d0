//! Build repository.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shipyard_core::agent::LogLine;
use shipyard_core::build::BuildUpdate;
use shipyard_core::store::{ArtifactInfo, BuildStore};
use shipyard_core::{Build, BuildId, CommitSha, ProjectId};
use sqlx::PgPool;

use crate::{DbError, DbResult};

const TERMINAL_STATUSES: &str = "('succeeded', 'failed', 'broken', 'rejected')";

/// A build record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BuildRecord {
    pub id: uuid::Uuid,
    pub project_id: String,
    pub sha: String,
    pub number: i64,
    pub status: String,
    pub trigger: String,
    pub description: Option<String>,
    pub exit_status: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<BuildRecord> for Build {
    type Error = DbError;

    fn try_from(record: BuildRecord) -> DbResult<Self> {
        let corrupt = |e: shipyard_core::Error| DbError::Corrupt(format!("build {}: {}", record.id, e));

        Ok(Build {
            id: record.id.into(),
            project_id: ProjectId::new(record.project_id.clone()),
            sha: CommitSha::parse(&record.sha).map_err(corrupt)?,
            number: record.number,
            status: record.status.parse().map_err(corrupt)?,
            trigger: record.trigger.clone(),
            description: record.description.clone(),
            exit_status: record.exit_status,
            created_at: record.created_at,
            started_at: record.started_at,
            finished_at: record.finished_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LogRecord {
    message: String,
    level: String,
    status: Option<i32>,
    timestamp: Option<DateTime<Utc>>,
}

/// PostgreSQL implementation of BuildStore.
pub struct PgBuildStore {
    pool: PgPool,
}

impl PgBuildStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_build(
        &self,
        project_id: &ProjectId,
        sha: &CommitSha,
        trigger: &str,
    ) -> DbResult<Build> {
        let record = sqlx::query_as::<_, BuildRecord>(
            r#"
            INSERT INTO builds (id, project_id, sha, number, status, trigger, created_at)
            VALUES ($1, $2, $3, (SELECT COALESCE(MAX(number), 0) + 1 FROM builds WHERE project_id = $2), 'pending', $4, NOW())
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(project_id.as_str())
        .bind(sha.as_str())
        .bind(trigger)
        .fetch_one(&self.pool)
        .await?;
        record.try_into()
    }

    async fn fetch_build(&self, id: BuildId) -> DbResult<Build> {
        let record = sqlx::query_as::<_, BuildRecord>("SELECT * FROM builds WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("build {}", id)))?;
        record.try_into()
    }

    async fn fetch_builds(&self, query: &str, project_id: &ProjectId, sha: Option<&CommitSha>) -> DbResult<Vec<Build>> {
        let mut q = sqlx::query_as::<_, BuildRecord>(query).bind(project_id.as_str());
        if let Some(sha) = sha {
            q = q.bind(sha.as_str());
        }
        q.fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Build::try_from)
            .collect()
    }

    async fn write_status(&self, id: BuildId, update: &BuildUpdate) -> DbResult<Build> {
        let query = format!(
            r#"
            UPDATE builds SET
                status = $2,
                description = COALESCE($3, description),
                exit_status = COALESCE($4, exit_status),
                started_at = CASE WHEN $2 = 'running' AND started_at IS NULL THEN NOW() ELSE started_at END,
                finished_at = CASE WHEN $2 IN {terminal} THEN NOW() ELSE finished_at END
            WHERE id = $1 AND status NOT IN {terminal}
            RETURNING *
            "#,
            terminal = TERMINAL_STATUSES
        );

        let record = sqlx::query_as::<_, BuildRecord>(&query)
            .bind(id.as_uuid())
            .bind(update.status.as_str())
            .bind(update.description.as_deref())
            .bind(update.exit_status)
            .fetch_optional(&self.pool)
            .await?;

        match record {
            Some(record) => record.try_into(),
            None => {
                // Either the build does not exist or it is already terminal.
                let current = self.fetch_build(id).await?;
                Err(DbError::Conflict(format!(
                    "build {} is already {}",
                    id, current.status
                )))
            }
        }
    }

    async fn insert_logs(&self, id: BuildId, lines: &[LogLine]) -> DbResult<()> {
        if lines.is_empty() {
            return Ok(());
        }

        let mut query_builder = sqlx::QueryBuilder::new(
            "INSERT INTO build_logs (build_id, message, level, status, timestamp) ",
        );

        query_builder.push_values(lines.iter(), |mut b, line| {
            b.push_bind(*id.as_uuid())
                .push_bind(line.message.clone())
                .push_bind(line.level.as_str())
                .push_bind(line.status)
                .push_bind(line.timestamp);
        });

        query_builder.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn fetch_logs(&self, id: BuildId) -> DbResult<Vec<LogLine>> {
        let records = sqlx::query_as::<_, LogRecord>(
            "SELECT message, level, status, timestamp FROM build_logs WHERE build_id = $1 ORDER BY id",
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        records
            .into_iter()
            .map(|r| {
                Ok(LogLine {
                    level: r
                        .level
                        .parse()
                        .map_err(|e| DbError::Corrupt(format!("log of build {}: {}", id, e)))?,
                    message: r.message,
                    status: r.status,
                    timestamp: r.timestamp,
                })
            })
            .collect()
    }

    async fn upsert_artifact(&self, id: BuildId, filename: &str, data: Bytes) -> DbResult<ArtifactInfo> {
        sqlx::query(
            r#"
            INSERT INTO build_artifacts (build_id, filename, data, created_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (build_id, filename) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(id.as_uuid())
        .bind(filename)
        .bind(data.as_ref())
        .execute(&self.pool)
        .await?;

        Ok(ArtifactInfo {
            filename: filename.to_string(),
            size: data.len() as u64,
        })
    }

    async fn fetch_artifacts(&self, id: BuildId) -> DbResult<Vec<ArtifactInfo>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT filename, octet_length(data)::BIGINT
            FROM build_artifacts WHERE build_id = $1
            ORDER BY created_at, filename
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(filename, size)| ArtifactInfo {
                filename,
                size: size.max(0) as u64,
            })
            .collect())
    }
}

#[async_trait]
impl BuildStore for PgBuildStore {
    async fn create_build(
        &self,
        project_id: &ProjectId,
        sha: &CommitSha,
        trigger: &str,
    ) -> shipyard_core::Result<Build> {
        Ok(self.insert_build(project_id, sha, trigger).await?)
    }

    async fn get_build(&self, id: BuildId) -> shipyard_core::Result<Build> {
        Ok(self.fetch_build(id).await?)
    }

    async fn pending_builds(&self, project_id: &ProjectId) -> shipyard_core::Result<Vec<Build>> {
        Ok(self
            .fetch_builds(
                "SELECT * FROM builds WHERE project_id = $1 AND status = 'pending' ORDER BY number",
                project_id,
                None,
            )
            .await?)
    }

    async fn builds_for_commit(
        &self,
        project_id: &ProjectId,
        sha: &CommitSha,
    ) -> shipyard_core::Result<Vec<Build>> {
        Ok(self
            .fetch_builds(
                "SELECT * FROM builds WHERE project_id = $1 AND sha = $2 ORDER BY number DESC",
                project_id,
                Some(sha),
            )
            .await?)
    }

    async fn update_status(&self, id: BuildId, update: BuildUpdate) -> shipyard_core::Result<Build> {
        Ok(self.write_status(id, &update).await?)
    }

    async fn append_logs(&self, id: BuildId, lines: &[LogLine]) -> shipyard_core::Result<()> {
        Ok(self.insert_logs(id, lines).await?)
    }

    async fn logs(&self, id: BuildId) -> shipyard_core::Result<Vec<LogLine>> {
        Ok(self.fetch_logs(id).await?)
    }

    async fn put_artifact(
        &self,
        id: BuildId,
        filename: &str,
        data: Bytes,
    ) -> shipyard_core::Result<ArtifactInfo> {
        Ok(self.upsert_artifact(id, filename, data).await?)
    }

    async fn artifacts(&self, id: BuildId) -> shipyard_core::Result<Vec<ArtifactInfo>> {
        Ok(self.fetch_artifacts(id).await?)
    }
}
