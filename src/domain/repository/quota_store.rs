use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::domain::entity::{
    BlockState, DailyQuotaCounter, QuotaUsage, UsageRecord, UsageStatistics,
};

/// 処理中とみなす開始マーカーの有効期間（秒）。
pub const IN_FLIGHT_WINDOW_SECS: i64 = 30;

/// QuotaStore は利用ログと日次カウンターの永続化を担当する。
///
/// 日次カウンターの加算は (user_id, date) 単位でアトミックでなければならない。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// 当日のカウンター（無ければゼロで作成）と直近ウィンドウの件数、処理中件数、ブロック状態を返す。
    async fn current_usage(
        &self,
        user_id: &str,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> anyhow::Result<QuotaUsage>;

    /// 指定日のカウンター行を取得する。無ければゼロで作成する。
    async fn counter(&self, user_id: &str, date: NaiveDate) -> anyhow::Result<DailyQuotaCounter>;

    /// 開始マーカーを追記する。カウンターは加算しない。
    async fn record_start(&self, record: &UsageRecord) -> anyhow::Result<()>;

    /// 完了行を追記し、当日カウンターの該当フィールドを加算する。
    async fn record_completion(&self, record: &UsageRecord) -> anyhow::Result<DailyQuotaCounter>;

    /// 現在有効なブロックを返す。当日または最新のブロック付き行を参照する。
    async fn is_blocked(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<BlockState>>;

    /// 当日行にブロックを設定する。
    async fn block(
        &self,
        user_id: &str,
        reason: &str,
        until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    /// ユーザーの全ブロックを解除する。解除した行があれば true を返す。
    async fn unblock(&self, user_id: &str) -> anyhow::Result<bool>;

    /// 指定時刻以降に完了したリクエスト数（全ユーザー）。
    async fn count_completed_since(&self, since: DateTime<Utc>) -> anyhow::Result<i64>;

    /// 指定時刻以降の利用統計。
    async fn statistics(
        &self,
        since: DateTime<Utc>,
        top_n: usize,
        now: DateTime<Utc>,
    ) -> anyhow::Result<UsageStatistics>;

    /// 保持期間切れの利用ログとカウンターを削除する。
    ///
    /// 有効なブロックを持つカウンター行は残す。戻り値は (利用ログ件数, カウンター件数)。
    async fn prune(
        &self,
        usage_before: DateTime<Utc>,
        counters_before: NaiveDate,
        now: DateTime<Utc>,
    ) -> anyhow::Result<(u64, u64)>;
}
