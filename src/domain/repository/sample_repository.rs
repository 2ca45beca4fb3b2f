use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::entity::SystemSample;

/// SystemSampleRepository はリソース計測結果の永続化を担当する。書き込みはモニタのみ。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SystemSampleRepository: Send + Sync {
    async fn insert(&self, sample: &SystemSample) -> anyhow::Result<()>;

    async fn latest(&self) -> anyhow::Result<Option<SystemSample>>;

    /// 新しい順に最大 limit 件を返す。
    async fn recent(&self, limit: usize) -> anyhow::Result<Vec<SystemSample>>;

    async fn prune(&self, before: DateTime<Utc>) -> anyhow::Result<u64>;
}

/// SystemStatusReader はアドミッション判定が参照する最新のシステム状態。
///
/// 実装は計測を行わず、保持している直近のサンプルを返すだけでなければならない。
pub trait SystemStatusReader: Send + Sync {
    fn last_status(&self) -> SystemSample;
}
