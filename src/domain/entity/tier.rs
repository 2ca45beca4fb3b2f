use serde::{Deserialize, Serialize};

use super::usage::ActionType;

/// 無制限を表すリミット値。
pub const UNLIMITED: i64 = -1;

/// MembershipTier は会員プランの階層を表す。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipTier {
    Free,
    Basic,
    Pro,
    Enterprise,
}

impl MembershipTier {
    pub const ALL: [MembershipTier; 4] = [
        MembershipTier::Free,
        MembershipTier::Basic,
        MembershipTier::Pro,
        MembershipTier::Enterprise,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            MembershipTier::Free => "free",
            MembershipTier::Basic => "basic",
            MembershipTier::Pro => "pro",
            MembershipTier::Enterprise => "enterprise",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "free" => Ok(MembershipTier::Free),
            "basic" => Ok(MembershipTier::Basic),
            "pro" => Ok(MembershipTier::Pro),
            "enterprise" => Ok(MembershipTier::Enterprise),
            _ => Err(format!("unknown membership tier: {}", s)),
        }
    }

    /// プランごとの固定リミットを返す。
    pub fn limits(&self) -> TierLimits {
        match self {
            MembershipTier::Free => TierLimits {
                api_calls_per_day: 100,
                stock_searches_per_day: 50,
                news_requests_per_day: 20,
                requests_per_hour: 50,
                requests_per_minute: 10,
                concurrent_requests: 2,
                priority: 1,
            },
            MembershipTier::Basic => TierLimits {
                api_calls_per_day: 1_000,
                stock_searches_per_day: 500,
                news_requests_per_day: 200,
                requests_per_hour: 300,
                requests_per_minute: 30,
                concurrent_requests: 5,
                priority: 2,
            },
            MembershipTier::Pro => TierLimits {
                api_calls_per_day: 10_000,
                stock_searches_per_day: 5_000,
                news_requests_per_day: 2_000,
                requests_per_hour: 2_000,
                requests_per_minute: 100,
                concurrent_requests: 10,
                priority: 3,
            },
            MembershipTier::Enterprise => TierLimits {
                api_calls_per_day: UNLIMITED,
                stock_searches_per_day: UNLIMITED,
                news_requests_per_day: UNLIMITED,
                requests_per_hour: UNLIMITED,
                requests_per_minute: UNLIMITED,
                concurrent_requests: 50,
                priority: 4,
            },
        }
    }

    pub fn priority(&self) -> u8 {
        self.limits().priority
    }
}

impl std::fmt::Display for MembershipTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// TierLimits はプランに紐づくクォータ上限。`-1` は無制限。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    pub api_calls_per_day: i64,
    pub stock_searches_per_day: i64,
    pub news_requests_per_day: i64,
    pub requests_per_hour: i64,
    pub requests_per_minute: i64,
    pub concurrent_requests: i64,
    pub priority: u8,
}

impl TierLimits {
    /// アクション種別に対応する日次上限を返す。
    pub fn daily_limit(&self, action: ActionType) -> i64 {
        match action {
            ActionType::ApiCall => self.api_calls_per_day,
            ActionType::StockSearch => self.stock_searches_per_day,
            ActionType::NewsRequest => self.news_requests_per_day,
        }
    }
}

/// 上限値が無制限かどうか。
pub fn is_unlimited(limit: i64) -> bool {
    limit == UNLIMITED
}
