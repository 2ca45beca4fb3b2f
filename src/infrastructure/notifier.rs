use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::entity::{AlertLevel, SystemSample};

/// AlertNotifier は負荷アラートの外部通知チャネル。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn send_admin_alert(&self, level: AlertLevel, sample: &SystemSample)
        -> anyhow::Result<()>;
    async fn send_webhook(&self, url: &str, payload: &serde_json::Value) -> anyhow::Result<()>;
}

/// LogAlertNotifier は通知先が未設定の場合に使う実装。ログ出力のみ行う。
pub struct LogAlertNotifier;

#[async_trait]
impl AlertNotifier for LogAlertNotifier {
    async fn send_admin_alert(
        &self,
        level: AlertLevel,
        sample: &SystemSample,
    ) -> anyhow::Result<()> {
        tracing::warn!(
            alert_level = %level,
            cpu_pct = sample.cpu_pct,
            mem_pct = sample.mem_pct,
            disk_pct = sample.disk_pct,
            requests_per_minute = sample.requests_per_minute,
            "LogAlertNotifier: admin alert not delivered (no channel configured)"
        );
        Ok(())
    }

    async fn send_webhook(&self, url: &str, _payload: &serde_json::Value) -> anyhow::Result<()> {
        tracing::debug!(url = %url, "LogAlertNotifier: webhook discarded");
        Ok(())
    }
}

/// AdminAlertMessage は通知サービスへ送る管理者向けアラート。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminAlertMessage {
    pub channel: String,
    pub subject: String,
    pub body: String,
    pub alert_level: AlertLevel,
    pub sample: SystemSample,
}

/// HttpAlertNotifier は通知サービスと Webhook へ JSON を POST する。
pub struct HttpAlertNotifier {
    http_client: reqwest::Client,
    admin_alert_url: Option<String>,
}

impl HttpAlertNotifier {
    pub fn new(admin_alert_url: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            admin_alert_url,
        })
    }

    async fn post_json<T: Serialize + ?Sized + Sync>(
        &self,
        url: &str,
        body: &T,
    ) -> anyhow::Result<()> {
        let resp = self.http_client.post(url).json(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("notification endpoint {} returned {}", url, status);
        }
        Ok(())
    }
}

#[async_trait]
impl AlertNotifier for HttpAlertNotifier {
    async fn send_admin_alert(
        &self,
        level: AlertLevel,
        sample: &SystemSample,
    ) -> anyhow::Result<()> {
        let Some(ref url) = self.admin_alert_url else {
            return LogAlertNotifier.send_admin_alert(level, sample).await;
        };
        let message = AdminAlertMessage {
            channel: "email".to_string(),
            subject: format!("[{}] system resource alert", level.as_str().to_uppercase()),
            body: alert_summary(level, sample),
            alert_level: level,
            sample: sample.clone(),
        };
        self.post_json(url, &message).await
    }

    async fn send_webhook(&self, url: &str, payload: &serde_json::Value) -> anyhow::Result<()> {
        self.post_json(url, payload).await
    }
}

/// WebhookKind は Webhook 先のペイロード形式。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookKind {
    Slack,
    Discord,
    #[default]
    Generic,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WebhookTarget {
    pub url: String,
    #[serde(default)]
    pub kind: WebhookKind,
}

/// アラート本文を組み立てる。
pub fn alert_summary(level: AlertLevel, sample: &SystemSample) -> String {
    format!(
        "System alert level {}: CPU {:.1}%, memory {:.1}%, disk {:.1}%, {} req/min, {} active connections (sampled at {})",
        level.as_str().to_uppercase(),
        sample.cpu_pct,
        sample.mem_pct,
        sample.disk_pct,
        sample.requests_per_minute,
        sample.active_connections,
        sample.timestamp.to_rfc3339(),
    )
}

/// Webhook 種別ごとのペイロード。
pub fn webhook_payload(
    kind: WebhookKind,
    level: AlertLevel,
    sample: &SystemSample,
) -> serde_json::Value {
    match kind {
        WebhookKind::Slack => serde_json::json!({ "text": alert_summary(level, sample) }),
        WebhookKind::Discord => serde_json::json!({ "content": alert_summary(level, sample) }),
        WebhookKind::Generic => serde_json::json!({
            "event_type": "SYSTEM_ALERT",
            "alert_level": level,
            "sample": sample,
        }),
    }
}

/// AlertDispatcher はアラート通知を別タスクで送る。失敗はログに残し、再送しない。
#[derive(Clone)]
pub struct AlertDispatcher {
    notifier: Arc<dyn AlertNotifier>,
    webhooks: Vec<WebhookTarget>,
}

impl AlertDispatcher {
    pub fn new(notifier: Arc<dyn AlertNotifier>, webhooks: Vec<WebhookTarget>) -> Self {
        Self { notifier, webhooks }
    }

    pub fn dispatch(&self, level: AlertLevel, sample: SystemSample) -> tokio::task::JoinHandle<()> {
        let notifier = self.notifier.clone();
        let webhooks = self.webhooks.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.send_admin_alert(level, &sample).await {
                tracing::warn!(alert_level = %level, error = %e, "failed to send admin alert");
            }
            for target in &webhooks {
                let payload = webhook_payload(target.kind, level, &sample);
                if let Err(e) = notifier.send_webhook(&target.url, &payload).await {
                    tracing::warn!(
                        url = %target.url,
                        alert_level = %level,
                        error = %e,
                        "failed to send alert webhook"
                    );
                }
            }
        })
    }
}
