use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::info;

use crate::usecase::PruneUsageUseCase;

/// cron 式を解釈する。不正な式は起動時にエラーとする。
pub fn parse_schedule(expr: &str) -> anyhow::Result<croner::Cron> {
    croner::Cron::from_str(expr)
        .map_err(|e| anyhow::anyhow!("invalid cron expression {}: {}", expr, e))
}

/// 次回実行時刻までの待機時間。
pub fn next_wait(
    cron: &croner::Cron,
    now: DateTime<Utc>,
) -> Option<(DateTime<Utc>, std::time::Duration)> {
    let next = cron.find_next_occurrence(&now, false).ok()?;
    let wait = (next - now)
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(1));
    Some((next, wait))
}

/// 保持期間切れデータの削除を cron スケジュールで実行する。shutdown で停止する。
pub async fn run_retention_cron(
    cron: croner::Cron,
    prune_uc: Arc<PruneUsageUseCase>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let Some((fire_at, wait)) = next_wait(&cron, Utc::now()) else {
            tracing::error!("no next cron occurrence found, retention task exiting");
            return;
        };
        info!(
            next_run = %fire_at,
            wait_secs = wait.as_secs(),
            "sleeping until next retention run"
        );

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                if let Err(e) = prune_uc.execute().await {
                    tracing::error!(error = %e, "retention run failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!("retention scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::quota_store::MockQuotaStore;
    use crate::domain::repository::sample_repository::MockSystemSampleRepository;
    use crate::usecase::prune_usage::RetentionWindow;
    use chrono::TimeZone;

    #[test]
    fn test_parse_schedule() {
        assert!(parse_schedule("0 3 * * *").is_ok());
        assert!(parse_schedule("not a cron").is_err());
    }

    #[test]
    fn test_next_wait_daily() {
        let cron = parse_schedule("0 3 * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 2, 30, 0).unwrap();
        let (next, wait) = next_wait(&cron, now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 1, 3, 0, 0).unwrap());
        assert_eq!(wait.as_secs(), 1800);

        let later = Utc.with_ymd_and_hms(2024, 6, 1, 3, 0, 1).unwrap();
        let (next, _) = next_wait(&cron, later).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 2, 3, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn test_stops_on_shutdown() {
        let uc = Arc::new(PruneUsageUseCase::new(
            Arc::new(MockQuotaStore::new()),
            Arc::new(MockSystemSampleRepository::new()),
            RetentionWindow {
                usage_days: 30,
                counter_days: 7,
                sample_days: 7,
            },
        ));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_retention_cron(
            parse_schedule("0 3 * * *").unwrap(),
            uc,
            rx,
        ));
        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
