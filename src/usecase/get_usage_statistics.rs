use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::domain::entity::UsageStatistics;
use crate::domain::repository::QuotaStore;

pub const DEFAULT_STATISTICS_DAYS: u32 = 7;
pub const MAX_STATISTICS_DAYS: u32 = 90;
const TOP_USERS: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum GetUsageStatisticsError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// GetUsageStatisticsUseCase は直近 N 日の利用統計を返す。
pub struct GetUsageStatisticsUseCase {
    quota_store: Arc<dyn QuotaStore>,
}

impl GetUsageStatisticsUseCase {
    pub fn new(quota_store: Arc<dyn QuotaStore>) -> Self {
        Self { quota_store }
    }

    pub async fn execute(&self, days: u32) -> Result<UsageStatistics, GetUsageStatisticsError> {
        if !(1..=MAX_STATISTICS_DAYS).contains(&days) {
            return Err(GetUsageStatisticsError::Validation(format!(
                "days must be between 1 and {}",
                MAX_STATISTICS_DAYS
            )));
        }

        let now = Utc::now();
        let since = now - Duration::days(days as i64);
        self.quota_store
            .statistics(since, TOP_USERS, now)
            .await
            .map_err(|e| GetUsageStatisticsError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::quota_store::MockQuotaStore;

    #[tokio::test]
    async fn success() {
        let mut store = MockQuotaStore::new();
        store
            .expect_statistics()
            .withf(|since, top_n, now| *top_n == 10 && *now - *since == Duration::days(7))
            .returning(|since, _, _| {
                Ok(UsageStatistics {
                    since: Some(since),
                    total_requests: 42,
                    ..Default::default()
                })
            });

        let uc = GetUsageStatisticsUseCase::new(Arc::new(store));
        let stats = uc.execute(DEFAULT_STATISTICS_DAYS).await.unwrap();
        assert_eq!(stats.total_requests, 42);
    }

    #[tokio::test]
    async fn days_out_of_range() {
        let uc = GetUsageStatisticsUseCase::new(Arc::new(MockQuotaStore::new()));
        assert!(matches!(
            uc.execute(0).await,
            Err(GetUsageStatisticsError::Validation(_))
        ));
        assert!(matches!(
            uc.execute(91).await,
            Err(GetUsageStatisticsError::Validation(_))
        ));
    }
}
