use prometheus::{Encoder, Gauge, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tokio::sync::watch;
use tracing::info;

use crate::domain::entity::{AlertLevel, Decision, SystemSample};

/// AdmissionMetrics はアドミッション判定とシステム負荷の Prometheus メトリクス。
pub struct AdmissionMetrics {
    decisions_total: IntCounterVec,
    pressure_denials_total: IntCounterVec,
    alert_level: IntGauge,
    cpu_pct: Gauge,
    mem_pct: Gauge,
    disk_pct: Gauge,
    registry: Registry,
}

impl AdmissionMetrics {
    /// service_name はメトリクスの service ラベルに使用される。
    pub fn new(service_name: &str) -> anyhow::Result<Self> {
        let registry = Registry::new();

        let decisions_total = IntCounterVec::new(
            Opts::new(
                "admission_decisions_total",
                "Total number of admission decisions",
            )
            .const_label("service", service_name),
            &["outcome", "reason", "tier"],
        )?;
        let pressure_denials_total = IntCounterVec::new(
            Opts::new(
                "admission_pressure_denials_total",
                "Admission denials caused by system load",
            )
            .const_label("service", service_name),
            &["tier"],
        )?;
        let alert_level = IntGauge::with_opts(
            Opts::new(
                "system_alert_level",
                "Current alert level (0=none, 1=warning, 2=critical, 3=emergency)",
            )
            .const_label("service", service_name),
        )?;
        let cpu_pct = Gauge::with_opts(
            Opts::new("system_cpu_percent", "Last sampled CPU usage")
                .const_label("service", service_name),
        )?;
        let mem_pct = Gauge::with_opts(
            Opts::new("system_memory_percent", "Last sampled memory usage")
                .const_label("service", service_name),
        )?;
        let disk_pct = Gauge::with_opts(
            Opts::new("system_disk_percent", "Last sampled disk usage")
                .const_label("service", service_name),
        )?;

        registry.register(Box::new(decisions_total.clone()))?;
        registry.register(Box::new(pressure_denials_total.clone()))?;
        registry.register(Box::new(alert_level.clone()))?;
        registry.register(Box::new(cpu_pct.clone()))?;
        registry.register(Box::new(mem_pct.clone()))?;
        registry.register(Box::new(disk_pct.clone()))?;

        Ok(Self {
            decisions_total,
            pressure_denials_total,
            alert_level,
            cpu_pct,
            mem_pct,
            disk_pct,
            registry,
        })
    }

    pub fn record_decision(&self, decision: &Decision) {
        let tier = decision.tier.as_str();
        match decision.reason {
            Some(reason) => {
                self.decisions_total
                    .with_label_values(&["denied", reason.as_str(), tier])
                    .inc();
                if reason.is_resource_pressure() {
                    self.pressure_denials_total.with_label_values(&[tier]).inc();
                }
            }
            None => {
                self.decisions_total
                    .with_label_values(&["allowed", "", tier])
                    .inc();
            }
        }
    }

    pub fn record_sample(&self, sample: &SystemSample) {
        self.alert_level.set(alert_level_value(sample.alert_level));
        self.cpu_pct.set(sample.cpu_pct);
        self.mem_pct.set(sample.mem_pct);
        self.disk_pct.set(sample.disk_pct);
    }

    /// Prometheus テキストフォーマットでメトリクスを返す。
    pub fn gather_metrics(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

fn alert_level_value(level: AlertLevel) -> i64 {
    match level {
        AlertLevel::None => 0,
        AlertLevel::Warning => 1,
        AlertLevel::Critical => 2,
        AlertLevel::Emergency => 3,
    }
}

/// ResourceMonitor の公開ステータスを購読してゲージへ反映する。
pub async fn track_system_status(
    metrics: std::sync::Arc<AdmissionMetrics>,
    mut status: watch::Receiver<SystemSample>,
    mut shutdown: watch::Receiver<bool>,
) {
    metrics.record_sample(&status.borrow_and_update());
    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                metrics.record_sample(&status.borrow_and_update());
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("system status metrics tracker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;

    use crate::domain::entity::{ActionType, DenyReason, MembershipTier};

    #[test]
    fn test_record_decision_counts_by_reason_and_tier() {
        let metrics = AdmissionMetrics::new("test-server").unwrap();
        metrics.record_decision(&Decision::allowed(MembershipTier::Pro, Some(10)));
        metrics.record_decision(&Decision::denied(
            MembershipTier::Free,
            ActionType::ApiCall,
            DenyReason::SystemBusy,
            60,
        ));
        metrics.record_decision(&Decision::denied(
            MembershipTier::Free,
            ActionType::ApiCall,
            DenyReason::LimitExceeded,
            60,
        ));

        let text = metrics.gather_metrics().unwrap();
        assert!(text.contains(
            r#"admission_decisions_total{outcome="allowed",reason="",service="test-server",tier="pro"} 1"#
        ));
        assert!(text.contains(
            r#"admission_decisions_total{outcome="denied",reason="SystemBusy",service="test-server",tier="free"} 1"#
        ));
        assert!(text.contains(
            r#"admission_pressure_denials_total{service="test-server",tier="free"} 1"#
        ));
    }

    #[tokio::test]
    async fn test_track_system_status_updates_gauges() {
        let metrics = Arc::new(AdmissionMetrics::new("test-server").unwrap());
        let (status_tx, status_rx) = watch::channel(SystemSample::idle(Utc::now()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(track_system_status(metrics.clone(), status_rx, shutdown_rx));

        status_tx.send_replace(SystemSample {
            cpu_pct: 91.5,
            alert_level: AlertLevel::Critical,
            ..SystemSample::idle(Utc::now())
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(metrics.alert_level.get(), 2);
        assert_eq!(metrics.cpu_pct.get(), 91.5);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
