use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::entity::{
    is_unlimited, ActionType, AdmissionMode, Decision, DenyReason, MembershipTier, QuotaUsage,
};
use crate::domain::repository::{QuotaStore, SystemStatusReader};
use crate::domain::service::AdmissionPolicy;
use crate::infrastructure::membership::{resolve_tier, MembershipLookup};

/// 利用状況を読めない場合の再試行秒数。
pub const STORE_FAILURE_RETRY_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct CanMakeRequestInput {
    pub user_id: String,
    pub action_type: ActionType,
}

#[derive(Debug, thiserror::Error)]
pub enum CanMakeRequestError {
    #[error("validation error: {0}")]
    Validation(String),
}

/// CanMakeRequestUseCase はリクエストを受け付けるかを判定する。状態は変更しない。
pub struct CanMakeRequestUseCase {
    membership: Arc<dyn MembershipLookup>,
    quota_store: Arc<dyn QuotaStore>,
    status: Arc<dyn SystemStatusReader>,
    policy: AdmissionPolicy,
    mode: AdmissionMode,
}

impl CanMakeRequestUseCase {
    pub fn new(
        membership: Arc<dyn MembershipLookup>,
        quota_store: Arc<dyn QuotaStore>,
        status: Arc<dyn SystemStatusReader>,
        policy: AdmissionPolicy,
        mode: AdmissionMode,
    ) -> Self {
        Self {
            membership,
            quota_store,
            status,
            policy,
            mode,
        }
    }

    pub async fn execute(
        &self,
        input: &CanMakeRequestInput,
    ) -> Result<Decision, CanMakeRequestError> {
        self.execute_at(input, Utc::now()).await
    }

    pub async fn execute_at(
        &self,
        input: &CanMakeRequestInput,
        now: DateTime<Utc>,
    ) -> Result<Decision, CanMakeRequestError> {
        if input.user_id.trim().is_empty() {
            return Err(CanMakeRequestError::Validation(
                "user_id is required".to_string(),
            ));
        }

        let tier = resolve_tier(self.membership.as_ref(), &input.user_id).await;

        let usage = match self
            .quota_store
            .current_usage(&input.user_id, now.date_naive(), now)
            .await
        {
            Ok(usage) => usage,
            Err(e) => {
                tracing::error!(
                    user_id = %input.user_id,
                    tier = %tier,
                    error = %e,
                    "failed to read quota usage, denying request"
                );
                return Ok(Decision::denied(
                    tier,
                    input.action_type,
                    DenyReason::SystemEmergency,
                    STORE_FAILURE_RETRY_SECS,
                ));
            }
        };

        let alert_level = self.status.last_status().alert_level;
        let limits = tier.limits();
        let decision = self
            .policy
            .decide(tier, &limits, &usage, alert_level, input.action_type, now);

        let Some(reason) = decision.reason.filter(|_| !decision.allowed) else {
            return Ok(decision);
        };

        if self.mode == AdmissionMode::Advisory && reason != DenyReason::Blocked {
            tracing::info!(
                user_id = %input.user_id,
                tier = %tier,
                action_type = %input.action_type,
                alert_level = %alert_level,
                reason = %reason,
                retry_after = decision.retry_after_secs,
                "advisory mode: denial not enforced"
            );
            return Ok(Decision::allowed(
                tier,
                remaining_daily(tier, &usage, input.action_type),
            ));
        }

        tracing::debug!(
            user_id = %input.user_id,
            tier = %tier,
            action_type = %input.action_type,
            alert_level = %alert_level,
            reason = %reason,
            retry_after = decision.retry_after_secs,
            "request denied"
        );
        Ok(decision)
    }
}

fn remaining_daily(tier: MembershipTier, usage: &QuotaUsage, action: ActionType) -> Option<i64> {
    let limit = tier.limits().daily_limit(action);
    (!is_unlimited(limit)).then(|| (limit - usage.used_for(action)).max(0))
}
