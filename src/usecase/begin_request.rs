use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::domain::entity::{ActionType, UsageRecord};
use crate::domain::repository::QuotaStore;
use crate::infrastructure::membership::{resolve_tier, MembershipLookup};

#[derive(Debug, Clone)]
pub struct BeginRequestInput {
    pub user_id: String,
    pub action_type: ActionType,
    pub endpoint: String,
    pub ip_address: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum BeginRequestError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// BeginRequestUseCase は処理開始マーカーを追記し、完了時に使う request_id を返す。
pub struct BeginRequestUseCase {
    membership: Arc<dyn MembershipLookup>,
    quota_store: Arc<dyn QuotaStore>,
}

impl BeginRequestUseCase {
    pub fn new(membership: Arc<dyn MembershipLookup>, quota_store: Arc<dyn QuotaStore>) -> Self {
        Self {
            membership,
            quota_store,
        }
    }

    pub async fn execute(&self, input: &BeginRequestInput) -> Result<Uuid, BeginRequestError> {
        if input.user_id.trim().is_empty() {
            return Err(BeginRequestError::Validation(
                "user_id is required".to_string(),
            ));
        }

        let tier = resolve_tier(self.membership.as_ref(), &input.user_id).await;
        let record = UsageRecord::started(
            input.user_id.clone(),
            tier,
            input.action_type,
            input.endpoint.clone(),
            input.ip_address.clone().unwrap_or_default(),
            Utc::now(),
        );

        self.quota_store.record_start(&record).await.map_err(|e| {
            tracing::error!(user_id = %input.user_id, error = %e, "failed to record request start");
            BeginRequestError::Internal(e.to_string())
        })?;

        Ok(record.request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::MembershipTier;
    use crate::domain::repository::quota_store::MockQuotaStore;
    use crate::infrastructure::membership::MockMembershipLookup;

    fn input() -> BeginRequestInput {
        BeginRequestInput {
            user_id: "user-1".to_string(),
            action_type: ActionType::StockSearch,
            endpoint: "/stocks/search".to_string(),
            ip_address: Some("10.0.0.1".to_string()),
        }
    }

    #[tokio::test]
    async fn success() {
        let mut lookup = MockMembershipLookup::new();
        lookup
            .expect_tier_of()
            .returning(|_| Ok(MembershipTier::Basic));
        let mut store = MockQuotaStore::new();
        store
            .expect_record_start()
            .withf(|r| {
                r.user_id == "user-1"
                    && r.tier == MembershipTier::Basic
                    && r.action_type == ActionType::StockSearch
                    && r.response_time_ms.is_none()
            })
            .times(1)
            .returning(|_| Ok(()));

        let uc = BeginRequestUseCase::new(Arc::new(lookup), Arc::new(store));
        assert!(uc.execute(&input()).await.is_ok());
    }

    #[tokio::test]
    async fn store_failure() {
        let mut lookup = MockMembershipLookup::new();
        lookup.expect_tier_of().returning(|_| Ok(MembershipTier::Free));
        let mut store = MockQuotaStore::new();
        store
            .expect_record_start()
            .returning(|_| Err(anyhow::anyhow!("disk full")));

        let uc = BeginRequestUseCase::new(Arc::new(lookup), Arc::new(store));
        let result = uc.execute(&input()).await;
        assert!(matches!(result, Err(BeginRequestError::Internal(_))));
    }

    #[tokio::test]
    async fn missing_user_id() {
        let uc = BeginRequestUseCase::new(
            Arc::new(MockMembershipLookup::new()),
            Arc::new(MockQuotaStore::new()),
        );
        let mut input = input();
        input.user_id = String::new();
        let result = uc.execute(&input).await;
        assert!(matches!(result, Err(BeginRequestError::Validation(_))));
    }
}
