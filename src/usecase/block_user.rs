use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::domain::entity::BlockState;
use crate::domain::repository::QuotaStore;

#[derive(Debug, Clone)]
pub struct BlockUserInput {
    pub user_id: String,
    pub reason: String,
    /// None の場合は解除されるまで無期限。
    pub duration_secs: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum BlockUserError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// BlockUserUseCase は管理者によるブロックを設定する。
pub struct BlockUserUseCase {
    quota_store: Arc<dyn QuotaStore>,
}

impl BlockUserUseCase {
    pub fn new(quota_store: Arc<dyn QuotaStore>) -> Self {
        Self { quota_store }
    }

    pub async fn execute(&self, input: &BlockUserInput) -> Result<BlockState, BlockUserError> {
        if input.user_id.trim().is_empty() {
            return Err(BlockUserError::Validation("user_id is required".to_string()));
        }
        if input.reason.trim().is_empty() {
            return Err(BlockUserError::Validation("reason is required".to_string()));
        }
        if input.duration_secs == Some(0) {
            return Err(BlockUserError::Validation(
                "duration_secs must be greater than 0".to_string(),
            ));
        }

        let now = Utc::now();
        let until = match input.duration_secs {
            Some(secs) => {
                let secs = i64::try_from(secs).map_err(|_| {
                    BlockUserError::Validation("duration_secs is too large".to_string())
                })?;
                let until = Duration::try_seconds(secs)
                    .and_then(|d| now.checked_add_signed(d))
                    .ok_or_else(|| {
                        BlockUserError::Validation("duration_secs is too large".to_string())
                    })?;
                Some(until)
            }
            None => None,
        };

        self.quota_store
            .block(&input.user_id, &input.reason, until, now)
            .await
            .map_err(|e| BlockUserError::Internal(e.to_string()))?;

        tracing::warn!(
            user_id = %input.user_id,
            reason = %input.reason,
            until = ?until,
            "user blocked"
        );

        Ok(BlockState {
            reason: input.reason.clone(),
            until,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::quota_store::MockQuotaStore;

    #[tokio::test]
    async fn success_with_duration() {
        let mut store = MockQuotaStore::new();
        store
            .expect_block()
            .withf(|user_id, reason, until, now| {
                user_id == "user-1"
                    && reason == "scraping"
                    && *until == Some(*now + Duration::seconds(3600))
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let uc = BlockUserUseCase::new(Arc::new(store));
        let state = uc
            .execute(&BlockUserInput {
                user_id: "user-1".to_string(),
                reason: "scraping".to_string(),
                duration_secs: Some(3600),
            })
            .await
            .unwrap();
        assert_eq!(state.reason, "scraping");
        assert!(state.until.is_some());
    }

    #[tokio::test]
    async fn indefinite() {
        let mut store = MockQuotaStore::new();
        store
            .expect_block()
            .withf(|_, _, until, _| until.is_none())
            .returning(|_, _, _, _| Ok(()));

        let uc = BlockUserUseCase::new(Arc::new(store));
        let state = uc
            .execute(&BlockUserInput {
                user_id: "user-1".to_string(),
                reason: "fraud".to_string(),
                duration_secs: None,
            })
            .await
            .unwrap();
        assert!(state.until.is_none());
    }

    #[tokio::test]
    async fn validation() {
        let uc = BlockUserUseCase::new(Arc::new(MockQuotaStore::new()));
        let empty_reason = uc
            .execute(&BlockUserInput {
                user_id: "user-1".to_string(),
                reason: "".to_string(),
                duration_secs: None,
            })
            .await;
        assert!(matches!(empty_reason, Err(BlockUserError::Validation(_))));

        let zero = uc
            .execute(&BlockUserInput {
                user_id: "user-1".to_string(),
                reason: "x".to_string(),
                duration_secs: Some(0),
            })
            .await;
        assert!(matches!(zero, Err(BlockUserError::Validation(_))));
    }
}
