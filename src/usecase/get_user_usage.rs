use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;

use crate::domain::entity::{
    is_unlimited, ActionType, BlockState, MembershipTier, QuotaUsage, TierLimits,
};
use crate::domain::repository::QuotaStore;
use crate::infrastructure::membership::{resolve_tier, MembershipLookup};

/// UserUsageView はユーザー 1 人分の当日の利用状況。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserUsageView {
    pub user_id: String,
    pub tier: MembershipTier,
    pub limits: TierLimits,
    pub date: NaiveDate,
    pub usage: QuotaUsage,
    /// アクション種別ごとの日次残数。無制限は null。
    pub remaining: BTreeMap<String, Option<i64>>,
    pub block: Option<BlockState>,
}

#[derive(Debug, thiserror::Error)]
pub enum GetUserUsageError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub struct GetUserUsageUseCase {
    membership: Arc<dyn MembershipLookup>,
    quota_store: Arc<dyn QuotaStore>,
}

impl GetUserUsageUseCase {
    pub fn new(membership: Arc<dyn MembershipLookup>, quota_store: Arc<dyn QuotaStore>) -> Self {
        Self {
            membership,
            quota_store,
        }
    }

    pub async fn execute(&self, user_id: &str) -> Result<UserUsageView, GetUserUsageError> {
        if user_id.trim().is_empty() {
            return Err(GetUserUsageError::Validation(
                "user_id is required".to_string(),
            ));
        }

        let now = Utc::now();
        let date = now.date_naive();
        let tier = resolve_tier(self.membership.as_ref(), user_id).await;
        let usage = self
            .quota_store
            .current_usage(user_id, date, now)
            .await
            .map_err(|e| GetUserUsageError::Internal(e.to_string()))?;

        let limits = tier.limits();
        let remaining = ActionType::ALL
            .iter()
            .map(|action| {
                let limit = limits.daily_limit(*action);
                let left = (!is_unlimited(limit)).then(|| (limit - usage.used_for(*action)).max(0));
                (action.as_str().to_string(), left)
            })
            .collect();

        Ok(UserUsageView {
            user_id: user_id.to_string(),
            tier,
            limits,
            date,
            block: usage.block.clone(),
            usage,
            remaining,
        })
    }
}
