use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::domain::entity::{ActionType, DailyQuotaCounter, UsageRecord};
use crate::domain::repository::QuotaStore;
use crate::infrastructure::membership::{resolve_tier, MembershipLookup};

#[derive(Debug, Clone)]
pub struct RecordUsageInput {
    pub user_id: String,
    pub action_type: ActionType,
    pub endpoint: String,
    pub ip_address: Option<String>,
    pub response_time_ms: i64,
    pub data_size: i64,
    /// BeginRequest で払い出した ID。指定すると処理中マーカーが閉じられる。
    pub request_id: Option<Uuid>,
}

#[derive(Debug, thiserror::Error)]
pub enum RecordUsageError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// RecordUsageUseCase は完了したリクエストを記録し、当日カウンターを加算する。
pub struct RecordUsageUseCase {
    membership: Arc<dyn MembershipLookup>,
    quota_store: Arc<dyn QuotaStore>,
}

impl RecordUsageUseCase {
    pub fn new(membership: Arc<dyn MembershipLookup>, quota_store: Arc<dyn QuotaStore>) -> Self {
        Self {
            membership,
            quota_store,
        }
    }

    pub async fn execute(
        &self,
        input: &RecordUsageInput,
    ) -> Result<DailyQuotaCounter, RecordUsageError> {
        if input.user_id.trim().is_empty() {
            return Err(RecordUsageError::Validation(
                "user_id is required".to_string(),
            ));
        }
        if input.response_time_ms < 0 {
            return Err(RecordUsageError::Validation(
                "response_time_ms must not be negative".to_string(),
            ));
        }
        if input.data_size < 0 {
            return Err(RecordUsageError::Validation(
                "data_size must not be negative".to_string(),
            ));
        }

        let tier = resolve_tier(self.membership.as_ref(), &input.user_id).await;
        let record = UsageRecord::completed(
            input.request_id,
            input.user_id.clone(),
            tier,
            input.action_type,
            input.endpoint.clone(),
            input.ip_address.clone().unwrap_or_default(),
            Utc::now(),
            input.response_time_ms,
            input.data_size,
        );

        self.quota_store
            .record_completion(&record)
            .await
            .map_err(|e| {
                tracing::error!(
                    user_id = %input.user_id,
                    action_type = %input.action_type,
                    error = %e,
                    "failed to record usage"
                );
                RecordUsageError::Internal(e.to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::MembershipTier;
    use crate::domain::repository::quota_store::MockQuotaStore;
    use crate::infrastructure::membership::MockMembershipLookup;

    fn input() -> RecordUsageInput {
        RecordUsageInput {
            user_id: "user-1".to_string(),
            action_type: ActionType::NewsRequest,
            endpoint: "/news".to_string(),
            ip_address: None,
            response_time_ms: 120,
            data_size: 2048,
            request_id: Some(Uuid::new_v4()),
        }
    }

    fn free_lookup() -> MockMembershipLookup {
        let mut lookup = MockMembershipLookup::new();
        lookup.expect_tier_of().returning(|_| Ok(MembershipTier::Free));
        lookup
    }

    #[tokio::test]
    async fn success() {
        let input = input();
        let request_id = input.request_id;
        let mut store = MockQuotaStore::new();
        store
            .expect_record_completion()
            .withf(move |r| {
                Some(r.request_id) == request_id
                    && r.response_time_ms == Some(120)
                    && r.data_size_bytes == 2048
            })
            .times(1)
            .returning(|r| {
                let mut counter =
                    DailyQuotaCounter::new(r.user_id.clone(), r.request_time.date_naive());
                counter.increment(r.action_type, r.request_time);
                Ok(counter)
            });

        let uc = RecordUsageUseCase::new(Arc::new(free_lookup()), Arc::new(store));
        let counter = uc.execute(&input).await.unwrap();
        assert_eq!(counter.news_requests_used, 1);
        assert_eq!(counter.api_calls_used, 0);
    }

    #[tokio::test]
    async fn negative_response_time() {
        let uc = RecordUsageUseCase::new(
            Arc::new(MockMembershipLookup::new()),
            Arc::new(MockQuotaStore::new()),
        );
        let mut input = input();
        input.response_time_ms = -1;
        let result = uc.execute(&input).await;
        assert!(matches!(result, Err(RecordUsageError::Validation(_))));
    }

    #[tokio::test]
    async fn store_failure() {
        let mut store = MockQuotaStore::new();
        store
            .expect_record_completion()
            .returning(|_| Err(anyhow::anyhow!("deadlock detected")));
        let uc = RecordUsageUseCase::new(Arc::new(free_lookup()), Arc::new(store));
        let result = uc.execute(&input()).await;
        assert!(matches!(result, Err(RecordUsageError::Internal(_))));
    }
}
