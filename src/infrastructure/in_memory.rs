use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio::sync::RwLock;

use crate::domain::entity::{
    BlockState, DailyQuotaCounter, DailyTotal, QuotaUsage, SystemSample, UsageRecord,
    UsageStatistics, UserTotal,
};
use crate::domain::repository::{QuotaStore, SystemSampleRepository, IN_FLIGHT_WINDOW_SECS};

#[derive(Default)]
struct QuotaState {
    records: Vec<UsageRecord>,
    counters: HashMap<(String, NaiveDate), DailyQuotaCounter>,
}

impl QuotaState {
    fn completed_since(&self, user_id: &str, since: DateTime<Utc>) -> i64 {
        self.records
            .iter()
            .filter(|r| r.user_id == user_id && r.is_completed() && r.request_time >= since)
            .count() as i64
    }

    fn in_flight(&self, user_id: &str, now: DateTime<Utc>) -> i64 {
        let since = now - Duration::seconds(IN_FLIGHT_WINDOW_SECS);
        let finished: HashSet<_> = self
            .records
            .iter()
            .filter(|r| r.user_id == user_id && r.is_completed())
            .map(|r| r.request_id)
            .collect();
        self.records
            .iter()
            .filter(|r| {
                r.user_id == user_id
                    && !r.is_completed()
                    && r.request_time >= since
                    && !finished.contains(&r.request_id)
            })
            .count() as i64
    }

    fn active_block(&self, user_id: &str, now: DateTime<Utc>) -> Option<BlockState> {
        self.counters
            .values()
            .filter(|c| c.user_id == user_id && c.is_blocked)
            .max_by_key(|c| c.quota_date)
            .and_then(|c| c.active_block(now))
    }
}

/// InMemoryQuotaStore は DB 無しで動かすための QuotaStore 実装。
///
/// 書き込みは単一の書き込みロック内で行うため、同一ユーザーの同時加算でも更新は失われない。
#[derive(Default)]
pub struct InMemoryQuotaStore {
    state: RwLock<QuotaState>,
}

impl InMemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// テストや移行用に利用ログを直接追記する。カウンターは変更しない。
    pub async fn insert_raw_record(&self, record: UsageRecord) {
        self.state.write().await.records.push(record);
    }

    /// テストや移行用にカウンター行を直接書き込む。
    pub async fn insert_raw_counter(&self, counter: DailyQuotaCounter) {
        let key = (counter.user_id.clone(), counter.quota_date);
        self.state.write().await.counters.insert(key, counter);
    }

    pub async fn record_count(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn counter_dates(&self, user_id: &str) -> Vec<NaiveDate> {
        let state = self.state.read().await;
        let mut dates: Vec<NaiveDate> = state
            .counters
            .values()
            .filter(|c| c.user_id == user_id)
            .map(|c| c.quota_date)
            .collect();
        dates.sort();
        dates
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn current_usage(
        &self,
        user_id: &str,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> anyhow::Result<QuotaUsage> {
        let mut state = self.state.write().await;
        let counter = state
            .counters
            .entry((user_id.to_string(), date))
            .or_insert_with(|| DailyQuotaCounter::new(user_id.to_string(), date))
            .clone();

        let mut usage = QuotaUsage::from_counter(&counter);
        usage.requests_last_hour = state.completed_since(user_id, now - Duration::hours(1));
        usage.requests_last_minute = state.completed_since(user_id, now - Duration::minutes(1));
        usage.concurrent_active = state.in_flight(user_id, now);
        usage.block = state.active_block(user_id, now);
        Ok(usage)
    }

    async fn counter(&self, user_id: &str, date: NaiveDate) -> anyhow::Result<DailyQuotaCounter> {
        let mut state = self.state.write().await;
        Ok(state
            .counters
            .entry((user_id.to_string(), date))
            .or_insert_with(|| DailyQuotaCounter::new(user_id.to_string(), date))
            .clone())
    }

    async fn record_start(&self, record: &UsageRecord) -> anyhow::Result<()> {
        self.state.write().await.records.push(record.clone());
        Ok(())
    }

    async fn record_completion(&self, record: &UsageRecord) -> anyhow::Result<DailyQuotaCounter> {
        let mut state = self.state.write().await;
        state.records.push(record.clone());
        let date = record.request_time.date_naive();
        let counter = state
            .counters
            .entry((record.user_id.clone(), date))
            .or_insert_with(|| DailyQuotaCounter::new(record.user_id.clone(), date));
        counter.increment(record.action_type, record.request_time);
        Ok(counter.clone())
    }

    async fn is_blocked(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<BlockState>> {
        Ok(self.state.read().await.active_block(user_id, now))
    }

    async fn block(
        &self,
        user_id: &str,
        reason: &str,
        until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        let date = now.date_naive();
        // 最新のブロックだけを有効にする
        for c in state
            .counters
            .values_mut()
            .filter(|c| c.user_id == user_id && c.quota_date != date)
        {
            c.is_blocked = false;
            c.block_reason = None;
            c.block_until = None;
        }
        let counter = state
            .counters
            .entry((user_id.to_string(), date))
            .or_insert_with(|| DailyQuotaCounter::new(user_id.to_string(), date));
        counter.is_blocked = true;
        counter.block_reason = Some(reason.to_string());
        counter.block_until = until;
        Ok(())
    }

    async fn unblock(&self, user_id: &str) -> anyhow::Result<bool> {
        let mut state = self.state.write().await;
        let mut cleared = false;
        for counter in state.counters.values_mut().filter(|c| c.user_id == user_id) {
            if counter.is_blocked {
                cleared = true;
            }
            counter.is_blocked = false;
            counter.block_reason = None;
            counter.block_until = None;
        }
        Ok(cleared)
    }

    async fn count_completed_since(&self, since: DateTime<Utc>) -> anyhow::Result<i64> {
        let state = self.state.read().await;
        Ok(state
            .records
            .iter()
            .filter(|r| r.is_completed() && r.request_time >= since)
            .count() as i64)
    }

    async fn statistics(
        &self,
        since: DateTime<Utc>,
        top_n: usize,
        now: DateTime<Utc>,
    ) -> anyhow::Result<UsageStatistics> {
        let state = self.state.read().await;
        let completed: Vec<&UsageRecord> = state
            .records
            .iter()
            .filter(|r| r.is_completed() && r.request_time >= since)
            .collect();

        let mut stats = UsageStatistics {
            since: Some(since),
            total_requests: completed.len() as i64,
            ..Default::default()
        };

        let mut users: HashSet<&str> = HashSet::new();
        let mut per_user: HashMap<&str, i64> = HashMap::new();
        let mut per_day: BTreeMap<NaiveDate, (i64, HashSet<&str>)> = BTreeMap::new();
        let mut response_total = 0i64;

        for record in &completed {
            users.insert(record.user_id.as_str());
            *per_user.entry(record.user_id.as_str()).or_default() += 1;
            *stats
                .by_action
                .entry(record.action_type.as_str().to_string())
                .or_default() += 1;
            *stats.by_tier.entry(record.tier.as_str().to_string()).or_default() += 1;
            let day = per_day.entry(record.request_time.date_naive()).or_default();
            day.0 += 1;
            day.1.insert(record.user_id.as_str());
            response_total += record.response_time_ms.unwrap_or(0);
            stats.total_data_bytes += record.data_size_bytes;
        }

        stats.distinct_users = users.len() as i64;
        if !completed.is_empty() {
            stats.average_response_time_ms = response_total as f64 / completed.len() as f64;
        }
        stats.daily = per_day
            .into_iter()
            .map(|(date, (requests, users))| DailyTotal {
                date,
                requests,
                distinct_users: users.len() as i64,
            })
            .collect();

        let mut top: Vec<UserTotal> = per_user
            .into_iter()
            .map(|(user_id, requests)| UserTotal {
                user_id: user_id.to_string(),
                requests,
            })
            .collect();
        top.sort_by(|a, b| b.requests.cmp(&a.requests).then(a.user_id.cmp(&b.user_id)));
        top.truncate(top_n);
        stats.top_users = top;

        let blocked: HashSet<&str> = state
            .counters
            .values()
            .filter(|c| c.active_block(now).is_some())
            .map(|c| c.user_id.as_str())
            .collect();
        stats.blocked_users = blocked.len() as i64;

        Ok(stats)
    }

    async fn prune(
        &self,
        usage_before: DateTime<Utc>,
        counters_before: NaiveDate,
        now: DateTime<Utc>,
    ) -> anyhow::Result<(u64, u64)> {
        let mut state = self.state.write().await;

        let before_records = state.records.len();
        state.records.retain(|r| r.request_time >= usage_before);
        let removed_records = (before_records - state.records.len()) as u64;

        let before_counters = state.counters.len();
        state
            .counters
            .retain(|_, c| c.quota_date >= counters_before || c.active_block(now).is_some());
        let removed_counters = (before_counters - state.counters.len()) as u64;

        Ok((removed_records, removed_counters))
    }
}

/// InMemorySampleRepository はメモリ上にサンプルを保持する。
#[derive(Default)]
pub struct InMemorySampleRepository {
    samples: RwLock<Vec<SystemSample>>,
}

impl InMemorySampleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SystemSampleRepository for InMemorySampleRepository {
    async fn insert(&self, sample: &SystemSample) -> anyhow::Result<()> {
        self.samples.write().await.push(sample.clone());
        Ok(())
    }

    async fn latest(&self) -> anyhow::Result<Option<SystemSample>> {
        let samples = self.samples.read().await;
        Ok(samples.iter().max_by_key(|s| s.timestamp).cloned())
    }

    async fn recent(&self, limit: usize) -> anyhow::Result<Vec<SystemSample>> {
        let mut samples = self.samples.read().await.clone();
        samples.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        samples.truncate(limit);
        Ok(samples)
    }

    async fn prune(&self, before: DateTime<Utc>) -> anyhow::Result<u64> {
        let mut samples = self.samples.write().await;
        let len = samples.len();
        samples.retain(|s| s.timestamp >= before);
        Ok((len - samples.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::domain::entity::{ActionType, MembershipTier};

    fn completed(user: &str, action: ActionType, at: DateTime<Utc>) -> UsageRecord {
        UsageRecord::completed(
            None,
            user.to_string(),
            MembershipTier::Free,
            action,
            "/api/quote".to_string(),
            "10.0.0.1".to_string(),
            at,
            150,
            512,
        )
    }

    fn started(user: &str, at: DateTime<Utc>) -> UsageRecord {
        UsageRecord::started(
            user.to_string(),
            MembershipTier::Free,
            ActionType::ApiCall,
            "/api/quote".to_string(),
            "10.0.0.1".to_string(),
            at,
        )
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(InMemoryQuotaStore::new());
        let now = Utc::now();
        let mut handles = Vec::new();
        for _ in 0..100 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .record_completion(&completed("user-1", ActionType::ApiCall, now))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let counter = store.counter("user-1", now.date_naive()).await.unwrap();
        assert_eq!(counter.api_calls_used, 100);
        assert_eq!(counter.searches_used, 0);
    }

    #[tokio::test]
    async fn test_current_usage_lazily_creates_counter() {
        let store = InMemoryQuotaStore::new();
        let now = Utc::now();
        let usage = store.current_usage("fresh", now.date_naive(), now).await.unwrap();
        assert_eq!(usage, QuotaUsage::default());
        assert_eq!(store.counter_dates("fresh").await, vec![now.date_naive()]);
    }

    #[tokio::test]
    async fn test_in_flight_counts_open_markers_only() {
        let store = InMemoryQuotaStore::new();
        let now = Utc::now();

        let open = started("user-1", now - Duration::seconds(5));
        store.record_start(&open).await.unwrap();

        let finished = started("user-1", now - Duration::seconds(3));
        store.record_start(&finished).await.unwrap();
        let mut done = completed("user-1", ActionType::ApiCall, now);
        done.request_id = finished.request_id;
        store.record_completion(&done).await.unwrap();

        let stale = started("user-1", now - Duration::seconds(31));
        store.record_start(&stale).await.unwrap();

        let usage = store.current_usage("user-1", now.date_naive(), now).await.unwrap();
        assert_eq!(usage.concurrent_active, 1);
        assert_eq!(usage.api_calls, 1);
        assert_eq!(usage.requests_last_minute, 1);
    }

    #[tokio::test]
    async fn test_window_counts() {
        let store = InMemoryQuotaStore::new();
        let now = Utc::now();
        store
            .insert_raw_record(completed("u", ActionType::ApiCall, now - Duration::seconds(30)))
            .await;
        store
            .insert_raw_record(completed("u", ActionType::ApiCall, now - Duration::minutes(30)))
            .await;
        store
            .insert_raw_record(completed("u", ActionType::ApiCall, now - Duration::hours(2)))
            .await;
        let usage = store.current_usage("u", now.date_naive(), now).await.unwrap();
        assert_eq!(usage.requests_last_minute, 1);
        assert_eq!(usage.requests_last_hour, 2);
    }

    #[tokio::test]
    async fn test_block_survives_day_rollover_and_unblock_clears() {
        let store = InMemoryQuotaStore::new();
        let yesterday = Utc::now() - Duration::days(1);
        store
            .block("user-1", "abuse", Some(yesterday + Duration::days(3)), yesterday)
            .await
            .unwrap();

        let now = Utc::now();
        store
            .record_completion(&completed("user-1", ActionType::ApiCall, now))
            .await
            .unwrap();

        let block = store.is_blocked("user-1", now).await.unwrap().unwrap();
        assert_eq!(block.reason, "abuse");
        let usage = store.current_usage("user-1", now.date_naive(), now).await.unwrap();
        assert!(usage.block.is_some());

        assert!(store.unblock("user-1").await.unwrap());
        assert!(store.is_blocked("user-1", now).await.unwrap().is_none());
        assert!(!store.unblock("user-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_latest_block_overrides_earlier_indefinite_block() {
        let store = InMemoryQuotaStore::new();
        let now = Utc::now();
        store
            .block("user-1", "old", None, now - Duration::days(1))
            .await
            .unwrap();
        store
            .block("user-1", "short", Some(now + Duration::seconds(60)), now)
            .await
            .unwrap();

        let block = store.is_blocked("user-1", now).await.unwrap().unwrap();
        assert_eq!(block.reason, "short");
        assert!(store
            .is_blocked("user-1", now + Duration::seconds(120))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_prune_respects_retention_windows() {
        let store = InMemoryQuotaStore::new();
        let now = Utc::now();
        let today = now.date_naive();

        store
            .insert_raw_record(completed("u", ActionType::ApiCall, now - Duration::days(31)))
            .await;
        store
            .insert_raw_record(completed("u", ActionType::ApiCall, now - Duration::days(29)))
            .await;
        store
            .insert_raw_counter(DailyQuotaCounter::new("u".to_string(), today - Duration::days(8)))
            .await;
        store
            .insert_raw_counter(DailyQuotaCounter::new("u".to_string(), today - Duration::days(6)))
            .await;

        let (records, counters) = store
            .prune(now - Duration::days(30), today - Duration::days(7), now)
            .await
            .unwrap();
        assert_eq!(records, 1);
        assert_eq!(counters, 1);
        assert_eq!(store.record_count().await, 1);
        assert_eq!(store.counter_dates("u").await, vec![today - Duration::days(6)]);
    }

    #[tokio::test]
    async fn test_prune_keeps_actively_blocked_counter() {
        let store = InMemoryQuotaStore::new();
        let now = Utc::now();
        let old = now - Duration::days(10);
        store.block("u", "fraud", None, old).await.unwrap();
        let (_, counters) = store
            .prune(now - Duration::days(30), now.date_naive() - Duration::days(7), now)
            .await
            .unwrap();
        assert_eq!(counters, 0);
        assert!(store.is_blocked("u", now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_statistics_aggregates() {
        let store = InMemoryQuotaStore::new();
        let now = Utc::now();
        for _ in 0..3 {
            store
                .record_completion(&completed("alice", ActionType::ApiCall, now))
                .await
                .unwrap();
        }
        store
            .record_completion(&completed("bob", ActionType::StockSearch, now))
            .await
            .unwrap();
        store.record_start(&started("carol", now)).await.unwrap();
        store.block("mallory", "abuse", None, now).await.unwrap();

        let stats = store
            .statistics(now - Duration::days(7), 1, now)
            .await
            .unwrap();
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.distinct_users, 2);
        assert_eq!(stats.by_action.get("api_call"), Some(&3));
        assert_eq!(stats.by_action.get("stock_search"), Some(&1));
        assert_eq!(stats.by_tier.get("free"), Some(&4));
        assert_eq!(stats.total_data_bytes, 4 * 512);
        assert!((stats.average_response_time_ms - 150.0).abs() < f64::EPSILON);
        assert_eq!(stats.top_users.len(), 1);
        assert_eq!(stats.top_users[0].user_id, "alice");
        assert_eq!(stats.blocked_users, 1);
        assert_eq!(stats.daily.len(), 1);
        assert_eq!(stats.daily[0].distinct_users, 2);
    }

    #[tokio::test]
    async fn test_sample_repository_latest_and_prune() {
        let repo = InMemorySampleRepository::new();
        let now = Utc::now();
        assert!(repo.latest().await.unwrap().is_none());

        repo.insert(&SystemSample::idle(now - Duration::days(8))).await.unwrap();
        repo.insert(&SystemSample::idle(now - Duration::minutes(1))).await.unwrap();
        repo.insert(&SystemSample::idle(now)).await.unwrap();

        assert_eq!(repo.latest().await.unwrap().unwrap().timestamp, now);
        let recent = repo.recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].timestamp, now);

        assert_eq!(repo.prune(now - Duration::days(7)).await.unwrap(), 1);
        assert_eq!(repo.recent(10).await.unwrap().len(), 2);
    }
}
