use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::entity::{AlertLevel, SystemSample};
use crate::domain::repository::SystemSampleRepository;

pub struct SystemSamplePostgresRepository {
    pool: Arc<PgPool>,
}

impl SystemSamplePostgresRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SampleRow {
    sampled_at: DateTime<Utc>,
    cpu_pct: f64,
    mem_pct: f64,
    disk_pct: f64,
    active_connections: i64,
    requests_per_minute: i64,
    alert_level: String,
    partial: bool,
}

impl TryFrom<SampleRow> for SystemSample {
    type Error = anyhow::Error;

    fn try_from(r: SampleRow) -> Result<Self, Self::Error> {
        Ok(SystemSample {
            timestamp: r.sampled_at,
            cpu_pct: r.cpu_pct,
            mem_pct: r.mem_pct,
            disk_pct: r.disk_pct,
            active_connections: r.active_connections,
            requests_per_minute: r.requests_per_minute,
            alert_level: AlertLevel::from_str(&r.alert_level).map_err(|e| anyhow::anyhow!(e))?,
            partial: r.partial,
        })
    }
}

#[async_trait]
impl SystemSampleRepository for SystemSamplePostgresRepository {
    async fn insert(&self, sample: &SystemSample) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO admission.system_samples \
             (sampled_at, cpu_pct, mem_pct, disk_pct, active_connections, \
              requests_per_minute, alert_level, partial) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(sample.timestamp)
        .bind(sample.cpu_pct)
        .bind(sample.mem_pct)
        .bind(sample.disk_pct)
        .bind(sample.active_connections)
        .bind(sample.requests_per_minute)
        .bind(sample.alert_level.as_str())
        .bind(sample.partial)
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn latest(&self) -> anyhow::Result<Option<SystemSample>> {
        Ok(self.recent(1).await?.into_iter().next())
    }

    async fn recent(&self, limit: usize) -> anyhow::Result<Vec<SystemSample>> {
        let rows: Vec<SampleRow> = sqlx::query_as(
            "SELECT sampled_at, cpu_pct, mem_pct, disk_pct, active_connections, \
                    requests_per_minute, alert_level, partial \
             FROM admission.system_samples \
             ORDER BY sampled_at DESC, id DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(self.pool.as_ref())
        .await?;

        rows.into_iter().map(SystemSample::try_from).collect()
    }

    async fn prune(&self, before: DateTime<Utc>) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM admission.system_samples WHERE sampled_at < $1")
            .bind(before)
            .execute(self.pool.as_ref())
            .await?;
        Ok(result.rows_affected())
    }
}
