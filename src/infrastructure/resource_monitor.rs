use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::domain::entity::{AlertLevel, AlertThresholds, SystemSample};
use crate::domain::repository::{QuotaStore, SystemSampleRepository, SystemStatusReader};
use crate::infrastructure::host_probe::HostProbe;
use crate::infrastructure::notifier::AlertDispatcher;

/// MonitorTick は 1 回分の計測処理の結果。
pub struct MonitorTick {
    pub sample: SystemSample,
    /// 通知を送った場合、その送信タスク。
    pub alert_task: Option<JoinHandle<()>>,
}

/// 前回レベルから通知対象レベルへ上がった場合のみ通知する。
pub fn should_alert(previous: AlertLevel, current: AlertLevel) -> bool {
    current.is_alerting() && current > previous
}

/// ResourceMonitor は定期的にホストの負荷を計測し、最新状態を保持する。
///
/// 書き込みはモニタのループのみで、読み取り側は `last_status` で直近のサンプルを取得する。
pub struct ResourceMonitor {
    probe: Arc<dyn HostProbe>,
    quota_store: Arc<dyn QuotaStore>,
    sample_repo: Arc<dyn SystemSampleRepository>,
    thresholds: AlertThresholds,
    dispatcher: AlertDispatcher,
    status: watch::Sender<SystemSample>,
    last_level: Mutex<AlertLevel>,
}

impl ResourceMonitor {
    pub fn new(
        probe: Arc<dyn HostProbe>,
        quota_store: Arc<dyn QuotaStore>,
        sample_repo: Arc<dyn SystemSampleRepository>,
        thresholds: AlertThresholds,
        dispatcher: AlertDispatcher,
    ) -> Self {
        let (status, _) = watch::channel(SystemSample::idle(Utc::now()));
        Self {
            probe,
            quota_store,
            sample_repo,
            thresholds,
            dispatcher,
            status,
            last_level: Mutex::new(AlertLevel::None),
        }
    }

    /// 永続化済みの最新サンプルを読み込み、起動直後の状態とする。
    pub async fn restore(&self) {
        match self.sample_repo.latest().await {
            Ok(Some(sample)) => {
                info!(
                    alert_level = %sample.alert_level,
                    sampled_at = %sample.timestamp,
                    "restored last system sample"
                );
                self.set_last_level(sample.alert_level);
                self.status.send_replace(sample);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to load last system sample"),
        }
    }

    /// ホストのリソースを計測する。失敗した項目は 0 とし、`partial` を立てる。
    pub async fn sample(&self) -> SystemSample {
        let now = Utc::now();
        let mut sample = SystemSample::idle(now);

        match self.probe.cpu_pct().await {
            Ok(v) => sample.cpu_pct = v,
            Err(e) => {
                warn!(error = %e, "failed to read cpu load");
                sample.partial = true;
            }
        }
        match self.probe.mem_pct().await {
            Ok(v) => sample.mem_pct = v,
            Err(e) => {
                warn!(error = %e, "failed to read memory usage");
                sample.partial = true;
            }
        }
        match self.probe.disk_pct().await {
            Ok(v) => sample.disk_pct = v,
            Err(e) => {
                warn!(error = %e, "failed to read disk usage");
                sample.partial = true;
            }
        }
        match self.probe.active_connections().await {
            Ok(v) => sample.active_connections = v,
            Err(e) => {
                warn!(error = %e, "failed to read active connections");
                sample.partial = true;
            }
        }
        match self
            .quota_store
            .count_completed_since(now - chrono::Duration::seconds(60))
            .await
        {
            Ok(v) => sample.requests_per_minute = v,
            Err(e) => {
                warn!(error = %e, "failed to count requests per minute");
                sample.partial = true;
            }
        }
        sample
    }

    pub fn classify(&self, sample: &SystemSample) -> AlertLevel {
        self.thresholds.classify(sample)
    }

    /// 計測・判定・保存・通知を 1 回行う。
    pub async fn tick(&self) -> MonitorTick {
        let mut sample = self.sample().await;
        sample.alert_level = self.classify(&sample);

        if let Err(e) = self.sample_repo.insert(&sample).await {
            tracing::error!(error = %e, "failed to persist system sample");
        }
        self.status.send_replace(sample.clone());

        let previous = self.advance_last_level(sample.alert_level, sample.partial);
        let alert_task = if should_alert(previous, sample.alert_level) {
            warn!(
                previous = %previous,
                alert_level = %sample.alert_level,
                cpu_pct = sample.cpu_pct,
                mem_pct = sample.mem_pct,
                disk_pct = sample.disk_pct,
                requests_per_minute = sample.requests_per_minute,
                "system alert level escalated"
            );
            Some(self.dispatcher.dispatch(sample.alert_level, sample.clone()))
        } else {
            if previous != sample.alert_level {
                info!(
                    previous = %previous,
                    alert_level = %sample.alert_level,
                    "system alert level changed"
                );
            }
            None
        };

        MonitorTick { sample, alert_task }
    }

    /// interval ごとに tick を実行する。shutdown が通知されると、実行中の tick の完了後に終了する。
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = interval.as_secs(), "resource monitor started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("resource monitor stopped");
    }

    pub fn subscribe(&self) -> watch::Receiver<SystemSample> {
        self.status.subscribe()
    }

    fn set_last_level(&self, level: AlertLevel) -> AlertLevel {
        let mut guard = match self.last_level.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, level)
    }

    /// 欠損のあるサンプルではレベルを下げない。
    fn advance_last_level(&self, level: AlertLevel, partial: bool) -> AlertLevel {
        let mut guard = match self.last_level.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let previous = *guard;
        if !(partial && level < previous) {
            *guard = level;
        }
        previous
    }
}

impl SystemStatusReader for ResourceMonitor {
    fn last_status(&self) -> SystemSample {
        self.status.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::infrastructure::host_probe::MockHostProbe;
    use crate::infrastructure::in_memory::{InMemoryQuotaStore, InMemorySampleRepository};
    use crate::infrastructure::notifier::AlertNotifier;

    /// 送信回数を数える通知実装。
    #[derive(Default)]
    struct CountingNotifier {
        admin: AtomicUsize,
    }

    #[async_trait]
    impl AlertNotifier for CountingNotifier {
        async fn send_admin_alert(
            &self,
            _level: AlertLevel,
            _sample: &SystemSample,
        ) -> anyhow::Result<()> {
            self.admin.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn send_webhook(
            &self,
            _url: &str,
            _payload: &serde_json::Value,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// 呼び出しごとに CPU 値を順に返すプローブ。
    fn probe_with_cpu(values: Vec<f64>) -> MockHostProbe {
        let mut probe = MockHostProbe::new();
        let mut iter = values.into_iter();
        probe
            .expect_cpu_pct()
            .returning(move || Ok(iter.next().unwrap_or(0.0)));
        probe.expect_mem_pct().returning(|| Ok(40.0));
        probe.expect_disk_pct().returning(|| Ok(50.0));
        probe.expect_active_connections().returning(|| Ok(3));
        probe
    }

    fn monitor(
        probe: MockHostProbe,
        notifier: Arc<CountingNotifier>,
    ) -> (ResourceMonitor, Arc<InMemorySampleRepository>) {
        let samples = Arc::new(InMemorySampleRepository::new());
        let m = ResourceMonitor::new(
            Arc::new(probe),
            Arc::new(InMemoryQuotaStore::new()),
            samples.clone(),
            AlertThresholds::default(),
            AlertDispatcher::new(notifier, vec![]),
        );
        (m, samples)
    }

    async fn tick_and_wait(m: &ResourceMonitor) -> SystemSample {
        let tick = m.tick().await;
        if let Some(task) = tick.alert_task {
            task.await.unwrap();
        }
        tick.sample
    }

    #[test]
    fn test_should_alert_only_on_escalation() {
        assert!(should_alert(AlertLevel::None, AlertLevel::Critical));
        assert!(should_alert(AlertLevel::Warning, AlertLevel::Emergency));
        assert!(should_alert(AlertLevel::Critical, AlertLevel::Emergency));
        assert!(!should_alert(AlertLevel::Critical, AlertLevel::Critical));
        assert!(!should_alert(AlertLevel::Emergency, AlertLevel::Critical));
        assert!(!should_alert(AlertLevel::None, AlertLevel::Warning));
    }

    #[tokio::test]
    async fn test_last_status_defaults_to_idle() {
        let (m, _) = monitor(probe_with_cpu(vec![]), Arc::new(CountingNotifier::default()));
        let status = m.last_status();
        assert_eq!(status.alert_level, AlertLevel::None);
        assert_eq!(status.cpu_pct, 0.0);
    }

    #[tokio::test]
    async fn test_tick_persists_and_publishes() {
        let (m, samples) =
            monitor(probe_with_cpu(vec![65.0]), Arc::new(CountingNotifier::default()));
        let sample = tick_and_wait(&m).await;
        assert_eq!(sample.alert_level, AlertLevel::Warning);
        assert_eq!(sample.active_connections, 3);
        assert!(!sample.partial);
        assert_eq!(m.last_status(), sample);
        assert_eq!(samples.latest().await.unwrap(), Some(sample));
    }

    #[tokio::test]
    async fn test_alert_fires_once_per_escalation() {
        let notifier = Arc::new(CountingNotifier::default());
        let (m, _) = monitor(
            probe_with_cpu(vec![85.0, 85.0, 85.0, 96.0, 96.0, 10.0, 85.0]),
            notifier.clone(),
        );
        let mut levels = Vec::new();
        for _ in 0..7 {
            levels.push(tick_and_wait(&m).await.alert_level);
        }
        assert_eq!(
            levels,
            vec![
                AlertLevel::Critical,
                AlertLevel::Critical,
                AlertLevel::Critical,
                AlertLevel::Emergency,
                AlertLevel::Emergency,
                AlertLevel::None,
                AlertLevel::Critical,
            ]
        );
        // None→Critical, Critical→Emergency, None→Critical
        assert_eq!(notifier.admin.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_sampling_failure_does_not_escalate() {
        let mut probe = MockHostProbe::new();
        probe
            .expect_cpu_pct()
            .returning(|| Err(anyhow::anyhow!("/proc unreadable")));
        probe
            .expect_mem_pct()
            .returning(|| Err(anyhow::anyhow!("/proc unreadable")));
        probe
            .expect_disk_pct()
            .returning(|| Err(anyhow::anyhow!("df not found")));
        probe.expect_active_connections().returning(|| Ok(0));

        let notifier = Arc::new(CountingNotifier::default());
        let (m, _) = monitor(probe, notifier.clone());
        let sample = tick_and_wait(&m).await;
        assert!(sample.partial);
        assert_eq!(sample.alert_level, AlertLevel::None);
        assert_eq!(notifier.admin.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sampling_gap_does_not_repeat_alert() {
        let mut probe = MockHostProbe::new();
        let mut cpu = vec![Some(85.0), None, Some(85.0)].into_iter();
        probe.expect_cpu_pct().returning(move || match cpu.next().flatten() {
            Some(v) => Ok(v),
            None => Err(anyhow::anyhow!("/proc unreadable")),
        });
        probe.expect_mem_pct().returning(|| Ok(40.0));
        probe.expect_disk_pct().returning(|| Ok(50.0));
        probe.expect_active_connections().returning(|| Ok(3));

        let notifier = Arc::new(CountingNotifier::default());
        let (m, _) = monitor(probe, notifier.clone());
        assert_eq!(tick_and_wait(&m).await.alert_level, AlertLevel::Critical);
        let gap = tick_and_wait(&m).await;
        assert!(gap.partial);
        assert_eq!(gap.alert_level, AlertLevel::None);
        assert_eq!(tick_and_wait(&m).await.alert_level, AlertLevel::Critical);

        assert_eq!(notifier.admin.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_restore_seeds_status_and_suppresses_repeat_alert() {
        let notifier = Arc::new(CountingNotifier::default());
        let (m, samples) = monitor(probe_with_cpu(vec![85.0]), notifier.clone());
        let stored = SystemSample {
            cpu_pct: 90.0,
            alert_level: AlertLevel::Critical,
            ..SystemSample::idle(Utc::now())
        };
        samples.insert(&stored).await.unwrap();

        m.restore().await;
        assert_eq!(m.last_status(), stored);

        tick_and_wait(&m).await;
        assert_eq!(notifier.admin.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (m, samples) =
            monitor(probe_with_cpu(vec![10.0; 100]), Arc::new(CountingNotifier::default()));
        let m = Arc::new(m);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(m.clone().run(Duration::from_millis(10), rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(!samples.recent(100).await.unwrap().is_empty());
    }
}
