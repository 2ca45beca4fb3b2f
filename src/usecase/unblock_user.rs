use std::sync::Arc;

use crate::domain::repository::QuotaStore;

#[derive(Debug, thiserror::Error)]
pub enum UnblockUserError {
    #[error("user is not blocked: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub struct UnblockUserUseCase {
    quota_store: Arc<dyn QuotaStore>,
}

impl UnblockUserUseCase {
    pub fn new(quota_store: Arc<dyn QuotaStore>) -> Self {
        Self { quota_store }
    }

    pub async fn execute(&self, user_id: &str) -> Result<(), UnblockUserError> {
        let cleared = self
            .quota_store
            .unblock(user_id)
            .await
            .map_err(|e| UnblockUserError::Internal(e.to_string()))?;
        if !cleared {
            return Err(UnblockUserError::NotFound(user_id.to_string()));
        }
        tracing::info!(user_id = %user_id, "user unblocked");
        Ok(())
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
            .expect_unblock()
            .withf(|id| id == "user-1")
            .returning(|_| Ok(true));
        let uc = UnblockUserUseCase::new(Arc::new(store));
        assert!(uc.execute("user-1").await.is_ok());
    }

    #[tokio::test]
    async fn not_blocked() {
        let mut store = MockQuotaStore::new();
        store.expect_unblock().returning(|_| Ok(false));
        let uc = UnblockUserUseCase::new(Arc::new(store));
        let result = uc.execute("user-1").await;
        assert!(matches!(result, Err(UnblockUserError::NotFound(_))));
    }
}
