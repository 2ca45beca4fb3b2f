use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// AlertLevel はシステム全体の負荷レベル。宣言順に深刻度が上がる。
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    #[default]
    None,
    Warning,
    Critical,
    Emergency,
}

impl AlertLevel {
    pub fn as_str(&self) -> &str {
        match self {
            AlertLevel::None => "none",
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
            AlertLevel::Emergency => "emergency",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "none" => Ok(AlertLevel::None),
            "warning" => Ok(AlertLevel::Warning),
            "critical" => Ok(AlertLevel::Critical),
            "emergency" => Ok(AlertLevel::Emergency),
            _ => Err(format!("unknown alert level: {}", s)),
        }
    }

    /// 管理者通知の対象となるレベルか。
    pub fn is_alerting(&self) -> bool {
        *self >= AlertLevel::Critical
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// SystemSample はリソースモニタの 1 回分の計測結果。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSample {
    pub timestamp: DateTime<Utc>,
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub disk_pct: f64,
    pub active_connections: i64,
    pub requests_per_minute: i64,
    pub alert_level: AlertLevel,
    /// 一部の計測に失敗し、0 で埋めた値を含む場合 true。
    #[serde(default)]
    pub partial: bool,
}

impl SystemSample {
    /// 計測前に使うゼロ値のサンプル。
    pub fn idle(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            cpu_pct: 0.0,
            mem_pct: 0.0,
            disk_pct: 0.0,
            active_connections: 0,
            requests_per_minute: 0,
            alert_level: AlertLevel::None,
            partial: false,
        }
    }
}

/// ThresholdRow は 1 レベル分の閾値。いずれか一つでも到達すればそのレベルになる。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRow {
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub disk_pct: f64,
    pub requests_per_minute: i64,
}

impl ThresholdRow {
    pub fn matches(&self, sample: &SystemSample) -> bool {
        sample.cpu_pct >= self.cpu_pct
            || sample.mem_pct >= self.mem_pct
            || sample.disk_pct >= self.disk_pct
            || sample.requests_per_minute >= self.requests_per_minute
    }
}

/// AlertThresholds は警告レベル判定の閾値表。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    #[serde(default = "default_warning")]
    pub warning: ThresholdRow,
    #[serde(default = "default_critical")]
    pub critical: ThresholdRow,
    #[serde(default = "default_emergency")]
    pub emergency: ThresholdRow,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            warning: default_warning(),
            critical: default_critical(),
            emergency: default_emergency(),
        }
    }
}

fn default_warning() -> ThresholdRow {
    ThresholdRow {
        cpu_pct: 60.0,
        mem_pct: 70.0,
        disk_pct: 80.0,
        requests_per_minute: 1000,
    }
}

fn default_critical() -> ThresholdRow {
    ThresholdRow {
        cpu_pct: 80.0,
        mem_pct: 85.0,
        disk_pct: 90.0,
        requests_per_minute: 2000,
    }
}

fn default_emergency() -> ThresholdRow {
    ThresholdRow {
        cpu_pct: 95.0,
        mem_pct: 95.0,
        disk_pct: 98.0,
        requests_per_minute: 3000,
    }
}

impl AlertThresholds {
    /// 深刻度の高い順に評価し、最初に一致したレベルを返す。
    pub fn classify(&self, sample: &SystemSample) -> AlertLevel {
        if self.emergency.matches(sample) {
            AlertLevel::Emergency
        } else if self.critical.matches(sample) {
            AlertLevel::Critical
        } else if self.warning.matches(sample) {
            AlertLevel::Warning
        } else {
            AlertLevel::None
        }
    }
}
