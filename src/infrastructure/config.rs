use std::collections::HashMap;

use serde::Deserialize;

use crate::domain::entity::{AdmissionMode, AlertThresholds, MembershipTier};
use crate::infrastructure::notifier::WebhookTarget;

/// Application configuration for admission server.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub membership: MembershipConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
}

const RETENTION_DAYS_RANGE: std::ops::RangeInclusive<i64> = 1..=3650;

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let cfg: Config = serde_yaml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.monitor.interval_secs == 0 {
            anyhow::bail!("monitor.interval_secs must be greater than 0");
        }
        for (name, days) in [
            ("usage_days", self.retention.usage_days),
            ("counter_days", self.retention.counter_days),
            ("sample_days", self.retention.sample_days),
        ] {
            if !RETENTION_DAYS_RANGE.contains(&days) {
                anyhow::bail!(
                    "retention.{} must be between {} and {}",
                    name,
                    RETENTION_DAYS_RANGE.start(),
                    RETENTION_DAYS_RANGE.end()
                );
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_environment() -> String {
    "dev".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8098
}

/// LogConfig はログ出力の設定。`format` は "json" または "text"。
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// DatabaseConfig はデータベース接続の設定を表す（URL形式）。
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_connect_timeout_seconds() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

/// MembershipConfig は会員プラン解決の設定。
///
/// `service_url` が無い場合は `overrides` と `default_tier` のみで解決する。
#[derive(Debug, Clone, Deserialize)]
pub struct MembershipConfig {
    #[serde(default = "default_tier")]
    pub default_tier: MembershipTier,
    #[serde(default)]
    pub overrides: HashMap<String, MembershipTier>,
    #[serde(default)]
    pub service_url: Option<String>,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cache_max_capacity")]
    pub cache_max_capacity: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            default_tier: default_tier(),
            overrides: HashMap::new(),
            service_url: None,
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_max_capacity: default_cache_max_capacity(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_tier() -> MembershipTier {
    MembershipTier::Free
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_cache_max_capacity() -> u64 {
    10_000
}

fn default_timeout_ms() -> u64 {
    2_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_disk_path")]
    pub disk_path: String,
    #[serde(default)]
    pub thresholds: AlertThresholds,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            disk_path: default_disk_path(),
            thresholds: AlertThresholds::default(),
        }
    }
}

fn default_interval_secs() -> u64 {
    60
}

fn default_disk_path() -> String {
    "/".to_string()
}

/// AdmissionConfig は判定モードと乱数シードの設定。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdmissionConfig {
    #[serde(default)]
    pub mode: AdmissionMode,
    /// 指定すると負荷時の確率判定が再現可能になる。
    #[serde(default)]
    pub random_seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_usage_days")]
    pub usage_days: i64,
    #[serde(default = "default_counter_days")]
    pub counter_days: i64,
    #[serde(default = "default_sample_days")]
    pub sample_days: i64,
    #[serde(default = "default_retention_schedule")]
    pub schedule: String,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            usage_days: default_usage_days(),
            counter_days: default_counter_days(),
            sample_days: default_sample_days(),
            schedule: default_retention_schedule(),
        }
    }
}

fn default_usage_days() -> i64 {
    30
}

fn default_counter_days() -> i64 {
    7
}

fn default_sample_days() -> i64 {
    7
}

fn default_retention_schedule() -> String {
    "0 3 * * *".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub admin_alert_url: Option<String>,
    #[serde(default)]
    pub webhooks: Vec<WebhookTarget>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            admin_alert_url: None,
            webhooks: Vec::new(),
            timeout_ms: default_timeout_ms(),
        }
    }
}
