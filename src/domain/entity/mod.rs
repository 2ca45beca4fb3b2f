pub mod decision;
pub mod sample;
pub mod tier;
pub mod usage;

pub use decision::{AdmissionMode, Decision, DenyReason};
pub use sample::{AlertLevel, AlertThresholds, SystemSample, ThresholdRow};
pub use tier::{is_unlimited, MembershipTier, TierLimits, UNLIMITED};
pub use usage::{
    ActionType, BlockState, DailyQuotaCounter, DailyTotal, PruneResult, QuotaUsage, UsageRecord,
    UsageStatistics, UserTotal,
};
