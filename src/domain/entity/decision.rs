use serde::{Deserialize, Serialize};

use super::tier::MembershipTier;
use super::usage::ActionType;

/// DenyReason はアドミッション拒否の理由。いずれも想定内の結果でありエラーではない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DenyReason {
    Blocked,
    SystemEmergency,
    SystemOverload,
    SystemBusy,
    LimitExceeded,
    ConcurrentLimit,
}

impl DenyReason {
    pub fn as_str(&self) -> &str {
        match self {
            DenyReason::Blocked => "Blocked",
            DenyReason::SystemEmergency => "SystemEmergency",
            DenyReason::SystemOverload => "SystemOverload",
            DenyReason::SystemBusy => "SystemBusy",
            DenyReason::LimitExceeded => "LimitExceeded",
            DenyReason::ConcurrentLimit => "ConcurrentLimit",
        }
    }

    /// リソース逼迫による拒否か。
    pub fn is_resource_pressure(&self) -> bool {
        matches!(
            self,
            DenyReason::SystemEmergency | DenyReason::SystemOverload | DenyReason::SystemBusy
        )
    }

    /// クライアント表示用のメッセージ。
    pub fn message(&self, tier: MembershipTier, action: ActionType) -> String {
        match self {
            DenyReason::Blocked => "Your account has been temporarily blocked.".to_string(),
            DenyReason::SystemEmergency => {
                "The service is under emergency load. Only priority access is available right now."
                    .to_string()
            }
            DenyReason::SystemOverload => {
                "The service is overloaded. Please retry shortly.".to_string()
            }
            DenyReason::SystemBusy => "The service is busy. Please retry shortly.".to_string(),
            DenyReason::LimitExceeded => format!(
                "You have reached the {} limit for the {} plan.",
                action.as_str().replace('_', " "),
                tier.as_str()
            ),
            DenyReason::ConcurrentLimit => {
                "Too many concurrent requests. Please wait for running requests to finish."
                    .to_string()
            }
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// AdmissionMode は判定結果を強制するか、ログ出力のみとするか。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionMode {
    #[default]
    Enforced,
    Advisory,
}

/// Decision はアドミッション判定の結果。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Option<DenyReason>,
    #[serde(rename = "retry_after")]
    pub retry_after_secs: u64,
    /// 日次上限に対する残数。無制限の場合は None。
    pub remaining: Option<i64>,
    pub message: String,
    pub tier: MembershipTier,
}

impl Decision {
    pub fn allowed(tier: MembershipTier, remaining: Option<i64>) -> Self {
        Self {
            allowed: true,
            reason: None,
            retry_after_secs: 0,
            remaining,
            message: String::new(),
            tier,
        }
    }

    pub fn denied(
        tier: MembershipTier,
        action: ActionType,
        reason: DenyReason,
        retry_after_secs: u64,
    ) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            retry_after_secs,
            remaining: None,
            message: reason.message(tier, action),
            tier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_json_shape() {
        let d = Decision::denied(
            MembershipTier::Free,
            ActionType::ApiCall,
            DenyReason::LimitExceeded,
            120,
        );
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["allowed"], false);
        assert_eq!(json["reason"], "LimitExceeded");
        assert_eq!(json["retry_after"], 120);
        assert_eq!(json["tier"], "free");
        assert!(json["message"].as_str().unwrap().contains("api call"));
    }

    #[test]
    fn test_allowed_decision() {
        let d = Decision::allowed(MembershipTier::Pro, Some(42));
        assert!(d.allowed);
        assert!(d.reason.is_none());
        assert_eq!(d.retry_after_secs, 0);
        assert_eq!(d.remaining, Some(42));
    }

    #[test]
    fn test_resource_pressure_reasons() {
        assert!(DenyReason::SystemBusy.is_resource_pressure());
        assert!(DenyReason::SystemOverload.is_resource_pressure());
        assert!(DenyReason::SystemEmergency.is_resource_pressure());
        assert!(!DenyReason::Blocked.is_resource_pressure());
        assert!(!DenyReason::LimitExceeded.is_resource_pressure());
    }

    #[test]
    fn test_admission_mode_default_enforced() {
        assert_eq!(AdmissionMode::default(), AdmissionMode::Enforced);
        let mode: AdmissionMode = serde_yaml::from_str("advisory").unwrap();
        assert_eq!(mode, AdmissionMode::Advisory);
    }
}
