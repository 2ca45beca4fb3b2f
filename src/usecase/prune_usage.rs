use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::domain::entity::PruneResult;
use crate::domain::repository::{QuotaStore, SystemSampleRepository};

/// 保持日数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionWindow {
    pub usage_days: i64,
    pub counter_days: i64,
    pub sample_days: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum PruneUsageError {
    #[error("internal error: {0}")]
    Internal(String),
}

/// PruneUsageUseCase は保持期間を過ぎた利用ログ・カウンター・計測結果を削除する。
pub struct PruneUsageUseCase {
    quota_store: Arc<dyn QuotaStore>,
    sample_repo: Arc<dyn SystemSampleRepository>,
    window: RetentionWindow,
}

impl PruneUsageUseCase {
    pub fn new(
        quota_store: Arc<dyn QuotaStore>,
        sample_repo: Arc<dyn SystemSampleRepository>,
        window: RetentionWindow,
    ) -> Self {
        Self {
            quota_store,
            sample_repo,
            window,
        }
    }

    pub async fn execute(&self) -> Result<PruneResult, PruneUsageError> {
        self.execute_at(Utc::now()).await
    }

    pub async fn execute_at(&self, now: DateTime<Utc>) -> Result<PruneResult, PruneUsageError> {
        let usage_before = now - Duration::days(self.window.usage_days);
        let counters_before = (now - Duration::days(self.window.counter_days)).date_naive();
        let samples_before = now - Duration::days(self.window.sample_days);

        let (usage_records, counters) = self
            .quota_store
            .prune(usage_before, counters_before, now)
            .await
            .map_err(|e| PruneUsageError::Internal(e.to_string()))?;
        let samples = self
            .sample_repo
            .prune(samples_before)
            .await
            .map_err(|e| PruneUsageError::Internal(e.to_string()))?;

        let result = PruneResult {
            usage_records,
            counters,
            samples,
        };
        tracing::info!(
            usage_records = result.usage_records,
            counters = result.counters,
            samples = result.samples,
            "pruned expired usage data"
        );
        Ok(result)
    }
}
