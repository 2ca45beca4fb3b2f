use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tier::MembershipTier;

/// 管理者ブロックの期限が無い場合に返す再試行までの秒数。
pub const INDEFINITE_BLOCK_RETRY_SECS: u64 = 3600;

/// ActionType はクォータを消費するアクション種別。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    ApiCall,
    StockSearch,
    NewsRequest,
}

impl ActionType {
    pub const ALL: [ActionType; 3] = [
        ActionType::ApiCall,
        ActionType::StockSearch,
        ActionType::NewsRequest,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            ActionType::ApiCall => "api_call",
            ActionType::StockSearch => "stock_search",
            ActionType::NewsRequest => "news_request",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "api_call" => Ok(ActionType::ApiCall),
            "stock_search" => Ok(ActionType::StockSearch),
            "news_request" => Ok(ActionType::NewsRequest),
            _ => Err(format!("unknown action type: {}", s)),
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// UsageRecord は利用ログの 1 行。追記のみで更新しない。
///
/// `response_time_ms` が `None` の行はリクエスト開始マーカーで、
/// 同じ `request_id` を持つ完了行が追記されるまで処理中として数えられる。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub request_id: Uuid,
    pub user_id: String,
    pub tier: MembershipTier,
    pub action_type: ActionType,
    pub endpoint: String,
    pub ip_address: String,
    pub request_time: DateTime<Utc>,
    pub response_time_ms: Option<i64>,
    pub data_size_bytes: i64,
}

impl UsageRecord {
    pub fn started(
        user_id: String,
        tier: MembershipTier,
        action_type: ActionType,
        endpoint: String,
        ip_address: String,
        request_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            user_id,
            tier,
            action_type,
            endpoint,
            ip_address,
            request_time,
            response_time_ms: None,
            data_size_bytes: 0,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn completed(
        request_id: Option<Uuid>,
        user_id: String,
        tier: MembershipTier,
        action_type: ActionType,
        endpoint: String,
        ip_address: String,
        request_time: DateTime<Utc>,
        response_time_ms: i64,
        data_size_bytes: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id: request_id.unwrap_or_else(Uuid::new_v4),
            user_id,
            tier,
            action_type,
            endpoint,
            ip_address,
            request_time,
            response_time_ms: Some(response_time_ms),
            data_size_bytes,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.response_time_ms.is_some()
    }
}

/// BlockState は管理者によるブロック状態。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockState {
    pub reason: String,
    pub until: Option<DateTime<Utc>>,
}

impl BlockState {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self.until {
            None => true,
            Some(until) => until > now,
        }
    }

    /// 再試行までの秒数。期限無しのブロックは固定値を返す。
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        match self.until {
            None => INDEFINITE_BLOCK_RETRY_SECS,
            Some(until) => (until - now).num_seconds().max(1) as u64,
        }
    }
}

/// DailyQuotaCounter はユーザー×日付ごとのカウンター行。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyQuotaCounter {
    pub user_id: String,
    pub quota_date: NaiveDate,
    pub api_calls_used: i64,
    pub searches_used: i64,
    pub news_requests_used: i64,
    pub last_request_at: Option<DateTime<Utc>>,
    pub is_blocked: bool,
    pub block_reason: Option<String>,
    pub block_until: Option<DateTime<Utc>>,
}

impl DailyQuotaCounter {
    pub fn new(user_id: String, quota_date: NaiveDate) -> Self {
        Self {
            user_id,
            quota_date,
            api_calls_used: 0,
            searches_used: 0,
            news_requests_used: 0,
            last_request_at: None,
            is_blocked: false,
            block_reason: None,
            block_until: None,
        }
    }

    pub fn used_for(&self, action: ActionType) -> i64 {
        match action {
            ActionType::ApiCall => self.api_calls_used,
            ActionType::StockSearch => self.searches_used,
            ActionType::NewsRequest => self.news_requests_used,
        }
    }

    pub fn increment(&mut self, action: ActionType, at: DateTime<Utc>) {
        match action {
            ActionType::ApiCall => self.api_calls_used += 1,
            ActionType::StockSearch => self.searches_used += 1,
            ActionType::NewsRequest => self.news_requests_used += 1,
        }
        self.last_request_at = Some(at);
    }

    /// 現時点で有効なブロックがあれば返す。
    pub fn active_block(&self, now: DateTime<Utc>) -> Option<BlockState> {
        if !self.is_blocked {
            return None;
        }
        let state = BlockState {
            reason: self.block_reason.clone().unwrap_or_default(),
            until: self.block_until,
        };
        state.is_active(now).then_some(state)
    }
}

/// QuotaUsage は判定に使う現在の利用状況スナップショット。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub api_calls: i64,
    pub searches: i64,
    pub news_requests: i64,
    pub requests_last_hour: i64,
    pub requests_last_minute: i64,
    pub concurrent_active: i64,
    pub block: Option<BlockState>,
}

impl QuotaUsage {
    pub fn from_counter(counter: &DailyQuotaCounter) -> Self {
        Self {
            api_calls: counter.api_calls_used,
            searches: counter.searches_used,
            news_requests: counter.news_requests_used,
            ..Default::default()
        }
    }

    pub fn used_for(&self, action: ActionType) -> i64 {
        match action {
            ActionType::ApiCall => self.api_calls,
            ActionType::StockSearch => self.searches,
            ActionType::NewsRequest => self.news_requests,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyTotal {
    pub date: NaiveDate,
    pub requests: i64,
    pub distinct_users: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTotal {
    pub user_id: String,
    pub requests: i64,
}

/// UsageStatistics は運用向けの集計結果。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStatistics {
    pub since: Option<DateTime<Utc>>,
    pub total_requests: i64,
    pub distinct_users: i64,
    pub average_response_time_ms: f64,
    pub total_data_bytes: i64,
    pub by_action: BTreeMap<String, i64>,
    pub by_tier: BTreeMap<String, i64>,
    pub daily: Vec<DailyTotal>,
    pub top_users: Vec<UserTotal>,
    pub blocked_users: i64,
}

/// PruneResult は保持期間切れ削除の件数。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneResult {
    pub usage_records: u64,
    pub counters: u64,
    pub samples: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_action_type_roundtrip() {
        for action in ActionType::ALL {
            assert_eq!(ActionType::from_str(action.as_str()).unwrap(), action);
        }
        assert!(ActionType::from_str("chart_view").is_err());
    }

    #[test]
    fn test_counter_increment_matching_field() {
        let now = Utc::now();
        let mut counter = DailyQuotaCounter::new("user-1".to_string(), now.date_naive());
        counter.increment(ActionType::StockSearch, now);
        counter.increment(ActionType::StockSearch, now);
        counter.increment(ActionType::NewsRequest, now);
        assert_eq!(counter.used_for(ActionType::ApiCall), 0);
        assert_eq!(counter.used_for(ActionType::StockSearch), 2);
        assert_eq!(counter.used_for(ActionType::NewsRequest), 1);
        assert_eq!(counter.last_request_at, Some(now));
    }

    #[test]
    fn test_active_block_respects_expiry() {
        let now = Utc::now();
        let mut counter = DailyQuotaCounter::new("user-1".to_string(), now.date_naive());
        assert!(counter.active_block(now).is_none());

        counter.is_blocked = true;
        counter.block_reason = Some("abuse".to_string());
        assert_eq!(counter.active_block(now).unwrap().until, None);

        counter.block_until = Some(now + Duration::minutes(5));
        assert!(counter.active_block(now).is_some());

        counter.block_until = Some(now - Duration::seconds(1));
        assert!(counter.active_block(now).is_none());
    }

    #[test]
    fn test_block_retry_after() {
        let now = Utc::now();
        let timed = BlockState {
            reason: "x".to_string(),
            until: Some(now + Duration::seconds(90)),
        };
        assert_eq!(timed.retry_after_secs(now), 90);
        let indefinite = BlockState {
            reason: "x".to_string(),
            until: None,
        };
        assert_eq!(indefinite.retry_after_secs(now), INDEFINITE_BLOCK_RETRY_SECS);
    }

    #[test]
    fn test_completed_record_keeps_request_id() {
        let request_id = Uuid::new_v4();
        let record = UsageRecord::completed(
            Some(request_id),
            "user-1".to_string(),
            MembershipTier::Pro,
            ActionType::ApiCall,
            "/quote".to_string(),
            "127.0.0.1".to_string(),
            Utc::now(),
            120,
            2048,
        );
        assert_eq!(record.request_id, request_id);
        assert!(record.is_completed());
        assert_ne!(record.id, request_id);
    }
}
