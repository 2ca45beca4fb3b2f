//! Tier-aware admission decision.
//!
//! The checks run in a fixed order and the first failing one wins:
//! admin block, resource pressure, daily quota, hourly/per-minute windows, concurrency.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::domain::entity::{
    is_unlimited, ActionType, AlertLevel, Decision, DenyReason, MembershipTier, QuotaUsage,
    TierLimits,
};

/// 1 時間ウィンドウ超過時の再試行秒数。
pub const HOURLY_RETRY_SECS: u64 = 3600;
/// 1 分ウィンドウ超過時の再試行秒数。
pub const MINUTE_RETRY_SECS: u64 = 60;
/// 同時実行数超過時の再試行秒数。
pub const CONCURRENT_RETRY_SECS: u64 = 30;

/// RandomSource は確率的スロットリングに使う一様乱数源。
///
/// `next_f64` は [0, 1) の値を返す。
pub trait RandomSource: Send + Sync {
    fn next_f64(&self) -> f64;
}

/// PressureRule は負荷レベル×プランごとの拒否確率と再試行秒数。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureRule {
    pub reason: DenyReason,
    pub chance: f64,
    pub retry_after_secs: u64,
}

impl PressureRule {
    const fn new(reason: DenyReason, chance: f64, retry_after_secs: u64) -> Self {
        Self {
            reason,
            chance,
            retry_after_secs,
        }
    }
}

/// 負荷レベルとプランから適用する拒否ルールを返す。拒否の可能性が無い組み合わせは None。
pub fn pressure_rule(level: AlertLevel, tier: MembershipTier) -> Option<PressureRule> {
    use DenyReason::{SystemBusy, SystemEmergency, SystemOverload};
    use MembershipTier::{Basic, Enterprise, Free, Pro};

    let rule = match (level, tier) {
        (AlertLevel::None, _) => return None,

        (AlertLevel::Emergency, Free) => PressureRule::new(SystemEmergency, 1.0, 1800),
        (AlertLevel::Emergency, Basic) => PressureRule::new(SystemEmergency, 1.0, 900),
        (AlertLevel::Emergency, Pro) => PressureRule::new(SystemEmergency, 1.0, 600),
        (AlertLevel::Emergency, Enterprise) => return None,

        (AlertLevel::Critical, Free) => PressureRule::new(SystemOverload, 1.0, 600),
        (AlertLevel::Critical, Basic) => PressureRule::new(SystemOverload, 0.8, 300),
        (AlertLevel::Critical, Pro) => PressureRule::new(SystemOverload, 0.4, 120),
        (AlertLevel::Critical, Enterprise) => PressureRule::new(SystemOverload, 0.1, 60),

        (AlertLevel::Warning, Free) => PressureRule::new(SystemBusy, 0.6, 180),
        (AlertLevel::Warning, Basic) => PressureRule::new(SystemBusy, 0.3, 90),
        (AlertLevel::Warning, Pro) => PressureRule::new(SystemBusy, 0.1, 30),
        (AlertLevel::Warning, Enterprise) => return None,
    };
    Some(rule)
}

/// 次の UTC 0 時までの秒数（最低 1 秒）。
pub fn seconds_until_utc_midnight(now: DateTime<Utc>) -> u64 {
    let next_day = now.date_naive() + Duration::days(1);
    let midnight = next_day
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or(now + Duration::days(1));
    (midnight - now).num_seconds().max(1) as u64
}

/// AdmissionPolicy は永続状態を持たない純粋な判定器。乱数源のみ注入される。
#[derive(Clone)]
pub struct AdmissionPolicy {
    random: Arc<dyn RandomSource>,
}

impl AdmissionPolicy {
    pub fn new(random: Arc<dyn RandomSource>) -> Self {
        Self { random }
    }

    pub fn decide(
        &self,
        tier: MembershipTier,
        limits: &TierLimits,
        usage: &QuotaUsage,
        alert_level: AlertLevel,
        action: ActionType,
        now: DateTime<Utc>,
    ) -> Decision {
        if let Some(block) = usage.block.as_ref().filter(|b| b.is_active(now)) {
            return Decision::denied(tier, action, DenyReason::Blocked, block.retry_after_secs(now));
        }

        if let Some(rule) = pressure_rule(alert_level, tier) {
            if self.triggers(rule.chance) {
                return Decision::denied(tier, action, rule.reason, rule.retry_after_secs);
            }
        }

        let daily_limit = limits.daily_limit(action);
        let used = usage.used_for(action);
        if !is_unlimited(daily_limit) && used >= daily_limit {
            return Decision::denied(
                tier,
                action,
                DenyReason::LimitExceeded,
                seconds_until_utc_midnight(now),
            );
        }

        if !is_unlimited(limits.requests_per_hour)
            && usage.requests_last_hour >= limits.requests_per_hour
        {
            return Decision::denied(tier, action, DenyReason::LimitExceeded, HOURLY_RETRY_SECS);
        }

        if !is_unlimited(limits.requests_per_minute)
            && usage.requests_last_minute >= limits.requests_per_minute
        {
            return Decision::denied(tier, action, DenyReason::LimitExceeded, MINUTE_RETRY_SECS);
        }

        if !is_unlimited(limits.concurrent_requests)
            && usage.concurrent_active >= limits.concurrent_requests
        {
            return Decision::denied(
                tier,
                action,
                DenyReason::ConcurrentLimit,
                CONCURRENT_RETRY_SECS,
            );
        }

        let remaining = (!is_unlimited(daily_limit)).then(|| daily_limit - used);
        Decision::allowed(tier, remaining)
    }

    // 確率 0 と 1 は乱数を引かずに確定させる。
    fn triggers(&self, chance: f64) -> bool {
        if chance <= 0.0 {
            false
        } else if chance >= 1.0 {
            true
        } else {
            self.random.next_f64() < chance
        }
    }
}
