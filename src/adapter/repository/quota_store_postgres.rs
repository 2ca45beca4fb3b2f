use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::PgPool;

use crate::domain::entity::{
    ActionType, BlockState, DailyQuotaCounter, DailyTotal, QuotaUsage, UsageRecord,
    UsageStatistics, UserTotal,
};
use crate::domain::repository::{QuotaStore, IN_FLIGHT_WINDOW_SECS};

const COUNTER_COLUMNS: &str = "user_id, quota_date, api_calls_used, searches_used, \
     news_requests_used, last_request_at, is_blocked, block_reason, block_until";

pub struct QuotaStorePostgresRepository {
    pool: Arc<PgPool>,
}

impl QuotaStorePostgresRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct CounterRow {
    user_id: String,
    quota_date: NaiveDate,
    api_calls_used: i64,
    searches_used: i64,
    news_requests_used: i64,
    last_request_at: Option<DateTime<Utc>>,
    is_blocked: bool,
    block_reason: Option<String>,
    block_until: Option<DateTime<Utc>>,
}

impl From<CounterRow> for DailyQuotaCounter {
    fn from(r: CounterRow) -> Self {
        DailyQuotaCounter {
            user_id: r.user_id,
            quota_date: r.quota_date,
            api_calls_used: r.api_calls_used,
            searches_used: r.searches_used,
            news_requests_used: r.news_requests_used,
            last_request_at: r.last_request_at,
            is_blocked: r.is_blocked,
            block_reason: r.block_reason,
            block_until: r.block_until,
        }
    }
}

#[derive(sqlx::FromRow)]
struct BlockRow {
    block_reason: Option<String>,
    block_until: Option<DateTime<Utc>>,
}

/// アクション種別に対応するカウンター列。
fn counter_column(action: ActionType) -> &'static str {
    match action {
        ActionType::ApiCall => "api_calls_used",
        ActionType::StockSearch => "searches_used",
        ActionType::NewsRequest => "news_requests_used",
    }
}

async fn insert_usage_log<'e, E>(executor: E, record: &UsageRecord) -> anyhow::Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query(
        "INSERT INTO admission.usage_log \
         (id, request_id, user_id, tier, action_type, endpoint, ip_address, \
          request_time, response_time_ms, data_size_bytes) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
    )
    .bind(record.id)
    .bind(record.request_id)
    .bind(&record.user_id)
    .bind(record.tier.as_str())
    .bind(record.action_type.as_str())
    .bind(&record.endpoint)
    .bind(&record.ip_address)
    .bind(record.request_time)
    .bind(record.response_time_ms)
    .bind(record.data_size_bytes)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl QuotaStore for QuotaStorePostgresRepository {
    async fn current_usage(
        &self,
        user_id: &str,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> anyhow::Result<QuotaUsage> {
        let counter = self.counter(user_id, date).await?;
        let mut usage = QuotaUsage::from_counter(&counter);

        let windows: (i64, i64) = sqlx::query_as(
            "SELECT \
                COUNT(*) FILTER (WHERE request_time >= $2), \
                COUNT(*) FILTER (WHERE request_time >= $3) \
             FROM admission.usage_log \
             WHERE user_id = $1 AND response_time_ms IS NOT NULL AND request_time >= $2",
        )
        .bind(user_id)
        .bind(now - Duration::hours(1))
        .bind(now - Duration::minutes(1))
        .fetch_one(self.pool.as_ref())
        .await?;
        usage.requests_last_hour = windows.0;
        usage.requests_last_minute = windows.1;

        let in_flight: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM admission.usage_log s \
             WHERE s.user_id = $1 AND s.response_time_ms IS NULL AND s.request_time >= $2 \
               AND NOT EXISTS ( \
                   SELECT 1 FROM admission.usage_log c \
                   WHERE c.request_id = s.request_id AND c.response_time_ms IS NOT NULL)",
        )
        .bind(user_id)
        .bind(now - Duration::seconds(IN_FLIGHT_WINDOW_SECS))
        .fetch_one(self.pool.as_ref())
        .await?;
        usage.concurrent_active = in_flight.0;

        usage.block = self.is_blocked(user_id, now).await?;
        Ok(usage)
    }

    async fn counter(&self, user_id: &str, date: NaiveDate) -> anyhow::Result<DailyQuotaCounter> {
        // 行が無ければゼロで作成し、既存行はそのまま返す
        let row: CounterRow = sqlx::query_as(&format!(
            "INSERT INTO admission.daily_quota_counters (user_id, quota_date) \
             VALUES ($1, $2) \
             ON CONFLICT (user_id, quota_date) \
             DO UPDATE SET user_id = EXCLUDED.user_id \
             RETURNING {}",
            COUNTER_COLUMNS
        ))
        .bind(user_id)
        .bind(date)
        .fetch_one(self.pool.as_ref())
        .await?;
        Ok(row.into())
    }

    async fn record_start(&self, record: &UsageRecord) -> anyhow::Result<()> {
        insert_usage_log(self.pool.as_ref(), record).await
    }

    async fn record_completion(&self, record: &UsageRecord) -> anyhow::Result<DailyQuotaCounter> {
        let column = counter_column(record.action_type);
        let mut tx = self.pool.begin().await?;

        insert_usage_log(&mut *tx, record).await?;

        let row: CounterRow = sqlx::query_as(&format!(
            "INSERT INTO admission.daily_quota_counters \
             (user_id, quota_date, {col}, last_request_at) \
             VALUES ($1, $2, 1, $3) \
             ON CONFLICT (user_id, quota_date) \
             DO UPDATE SET {col} = admission.daily_quota_counters.{col} + 1, \
                           last_request_at = EXCLUDED.last_request_at \
             RETURNING {cols}",
            col = column,
            cols = COUNTER_COLUMNS
        ))
        .bind(&record.user_id)
        .bind(record.request_time.date_naive())
        .bind(record.request_time)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn is_blocked(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<BlockState>> {
        let row: Option<BlockRow> = sqlx::query_as(
            "SELECT block_reason, block_until FROM admission.daily_quota_counters \
             WHERE user_id = $1 AND is_blocked \
             ORDER BY quota_date DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        // 最新のブロック行だけを見る。期限切れなら古い行には遡らない
        Ok(row
            .map(|r| BlockState {
                reason: r.block_reason.unwrap_or_default(),
                until: r.block_until,
            })
            .filter(|b| b.is_active(now)))
    }

    async fn block(
        &self,
        user_id: &str,
        reason: &str,
        until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE admission.daily_quota_counters \
             SET is_blocked = FALSE, block_reason = NULL, block_until = NULL \
             WHERE user_id = $1 AND quota_date <> $2 AND is_blocked",
        )
        .bind(user_id)
        .bind(now.date_naive())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO admission.daily_quota_counters \
             (user_id, quota_date, is_blocked, block_reason, block_until) \
             VALUES ($1, $2, TRUE, $3, $4) \
             ON CONFLICT (user_id, quota_date) \
             DO UPDATE SET is_blocked = TRUE, \
                           block_reason = EXCLUDED.block_reason, \
                           block_until = EXCLUDED.block_until",
        )
        .bind(user_id)
        .bind(now.date_naive())
        .bind(reason)
        .bind(until)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn unblock(&self, user_id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE admission.daily_quota_counters \
             SET is_blocked = FALSE, block_reason = NULL, block_until = NULL \
             WHERE user_id = $1 AND is_blocked",
        )
        .bind(user_id)
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_completed_since(&self, since: DateTime<Utc>) -> anyhow::Result<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM admission.usage_log \
             WHERE response_time_ms IS NOT NULL AND request_time >= $1",
        )
        .bind(since)
        .fetch_one(self.pool.as_ref())
        .await?;
        Ok(row.0)
    }

    async fn statistics(
        &self,
        since: DateTime<Utc>,
        top_n: usize,
        now: DateTime<Utc>,
    ) -> anyhow::Result<UsageStatistics> {
        let pool = self.pool.as_ref();

        let totals: (i64, i64, f64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(DISTINCT user_id), \
                    COALESCE(AVG(response_time_ms), 0)::float8, \
                    COALESCE(SUM(data_size_bytes), 0)::bigint \
             FROM admission.usage_log \
             WHERE response_time_ms IS NOT NULL AND request_time >= $1",
        )
        .bind(since)
        .fetch_one(pool)
        .await?;

        let by_action: Vec<(String, i64)> = sqlx::query_as(
            "SELECT action_type, COUNT(*) FROM admission.usage_log \
             WHERE response_time_ms IS NOT NULL AND request_time >= $1 \
             GROUP BY action_type",
        )
        .bind(since)
        .fetch_all(pool)
        .await?;

        let by_tier: Vec<(String, i64)> = sqlx::query_as(
            "SELECT tier, COUNT(*) FROM admission.usage_log \
             WHERE response_time_ms IS NOT NULL AND request_time >= $1 \
             GROUP BY tier",
        )
        .bind(since)
        .fetch_all(pool)
        .await?;

        let daily: Vec<(NaiveDate, i64, i64)> = sqlx::query_as(
            "SELECT (request_time AT TIME ZONE 'UTC')::date AS day, \
                    COUNT(*), COUNT(DISTINCT user_id) \
             FROM admission.usage_log \
             WHERE response_time_ms IS NOT NULL AND request_time >= $1 \
             GROUP BY day ORDER BY day",
        )
        .bind(since)
        .fetch_all(pool)
        .await?;

        let top_users: Vec<(String, i64)> = sqlx::query_as(
            "SELECT user_id, COUNT(*) AS requests FROM admission.usage_log \
             WHERE response_time_ms IS NOT NULL AND request_time >= $1 \
             GROUP BY user_id ORDER BY requests DESC, user_id ASC LIMIT $2",
        )
        .bind(since)
        .bind(top_n as i64)
        .fetch_all(pool)
        .await?;

        let blocked: (i64,) = sqlx::query_as(
            "SELECT COUNT(DISTINCT user_id) FROM admission.daily_quota_counters \
             WHERE is_blocked AND (block_until IS NULL OR block_until > $1)",
        )
        .bind(now)
        .fetch_one(pool)
        .await?;

        Ok(UsageStatistics {
            since: Some(since),
            total_requests: totals.0,
            distinct_users: totals.1,
            average_response_time_ms: totals.2,
            total_data_bytes: totals.3,
            by_action: by_action.into_iter().collect::<BTreeMap<_, _>>(),
            by_tier: by_tier.into_iter().collect::<BTreeMap<_, _>>(),
            daily: daily
                .into_iter()
                .map(|(date, requests, distinct_users)| DailyTotal {
                    date,
                    requests,
                    distinct_users,
                })
                .collect(),
            top_users: top_users
                .into_iter()
                .map(|(user_id, requests)| UserTotal { user_id, requests })
                .collect(),
            blocked_users: blocked.0,
        })
    }

    async fn prune(
        &self,
        usage_before: DateTime<Utc>,
        counters_before: NaiveDate,
        now: DateTime<Utc>,
    ) -> anyhow::Result<(u64, u64)> {
        let mut tx = self.pool.begin().await?;

        let usage = sqlx::query("DELETE FROM admission.usage_log WHERE request_time < $1")
            .bind(usage_before)
            .execute(&mut *tx)
            .await?;

        // 有効なブロックを持つ行は保持期間を過ぎても残す
        let counters = sqlx::query(
            "DELETE FROM admission.daily_quota_counters \
             WHERE quota_date < $1 \
               AND NOT (is_blocked AND (block_until IS NULL OR block_until > $2))",
        )
        .bind(counters_before)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((usage.rows_affected(), counters.rows_affected()))
    }
}
