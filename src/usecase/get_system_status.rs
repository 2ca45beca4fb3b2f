use std::sync::Arc;

use serde::Serialize;

use crate::domain::entity::{AlertThresholds, SystemSample};
use crate::domain::repository::{SystemSampleRepository, SystemStatusReader};

const HISTORY_LIMIT: usize = 60;

/// SystemStatusView は直近の計測結果と履歴。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStatusView {
    pub current: SystemSample,
    pub thresholds: AlertThresholds,
    /// 新しい順。
    pub history: Vec<SystemSample>,
}

#[derive(Debug, thiserror::Error)]
pub enum GetSystemStatusError {
    #[error("internal error: {0}")]
    Internal(String),
}

pub struct GetSystemStatusUseCase {
    status: Arc<dyn SystemStatusReader>,
    sample_repo: Arc<dyn SystemSampleRepository>,
    thresholds: AlertThresholds,
}

impl GetSystemStatusUseCase {
    pub fn new(
        status: Arc<dyn SystemStatusReader>,
        sample_repo: Arc<dyn SystemSampleRepository>,
        thresholds: AlertThresholds,
    ) -> Self {
        Self {
            status,
            sample_repo,
            thresholds,
        }
    }

    pub async fn execute(&self) -> Result<SystemStatusView, GetSystemStatusError> {
        let history = self
            .sample_repo
            .recent(HISTORY_LIMIT)
            .await
            .map_err(|e| GetSystemStatusError::Internal(e.to_string()))?;
        Ok(SystemStatusView {
            current: self.status.last_status(),
            thresholds: self.thresholds,
            history,
        })
    }
}
