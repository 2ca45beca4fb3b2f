use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use serde::Deserialize;

use crate::domain::entity::MembershipTier;

/// MembershipLookup はユーザーの会員プランを解決する外部サービス。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MembershipLookup: Send + Sync {
    async fn tier_of(&self, user_id: &str) -> anyhow::Result<MembershipTier>;
}

/// プランを解決する。問い合わせに失敗した場合は最も制限の厳しい Free とみなす。
pub async fn resolve_tier(lookup: &dyn MembershipLookup, user_id: &str) -> MembershipTier {
    match lookup.tier_of(user_id).await {
        Ok(tier) => tier,
        Err(e) => {
            tracing::warn!(
                user_id = %user_id,
                error = %e,
                "membership lookup failed, falling back to free tier"
            );
            MembershipTier::Free
        }
    }
}

/// StaticMembershipLookup は設定ファイルの上書き値とデフォルトプランで解決する。
pub struct StaticMembershipLookup {
    default_tier: MembershipTier,
    overrides: HashMap<String, MembershipTier>,
}

impl StaticMembershipLookup {
    pub fn new(default_tier: MembershipTier, overrides: HashMap<String, MembershipTier>) -> Self {
        Self {
            default_tier,
            overrides,
        }
    }
}

#[async_trait]
impl MembershipLookup for StaticMembershipLookup {
    async fn tier_of(&self, user_id: &str) -> anyhow::Result<MembershipTier> {
        Ok(self
            .overrides
            .get(user_id)
            .copied()
            .unwrap_or(self.default_tier))
    }
}

#[derive(Debug, Deserialize)]
struct MembershipResponse {
    tier: String,
}

/// HttpMembershipLookup は会員サービスの `GET {base}/users/{id}/membership` を呼ぶ。
///
/// 404 はプラン未契約としてデフォルトプランを返す。
pub struct HttpMembershipLookup {
    http_client: reqwest::Client,
    base_url: reqwest::Url,
    default_tier: MembershipTier,
}

impl HttpMembershipLookup {
    pub fn new(
        base_url: String,
        default_tier: MembershipTier,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = reqwest::Url::parse(&base_url)?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("membership service url is not a base url: {}", base_url);
        }
        Ok(Self {
            http_client,
            base_url,
            default_tier,
        })
    }

    /// ユーザー ID は 1 セグメントとしてパーセントエンコードされる。
    fn membership_url(&self, user_id: &str) -> anyhow::Result<reqwest::Url> {
        if user_id.is_empty() || user_id == "." || user_id == ".." {
            anyhow::bail!("invalid user id for membership lookup: {:?}", user_id);
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("membership service url is not a base url"))?
            .pop_if_empty()
            .extend(["users", user_id, "membership"]);
        Ok(url)
    }
}

#[async_trait]
impl MembershipLookup for HttpMembershipLookup {
    async fn tier_of(&self, user_id: &str) -> anyhow::Result<MembershipTier> {
        let url = self.membership_url(user_id)?;
        let resp = self.http_client.get(url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(self.default_tier);
        }
        if !resp.status().is_success() {
            anyhow::bail!("membership service returned {}", resp.status());
        }
        let body: MembershipResponse = resp.json().await?;
        MembershipTier::from_str(&body.tier).map_err(|e| anyhow::anyhow!(e))
    }
}

/// CachedMembershipLookup は MembershipLookup を TTL 付きキャッシュでラップする。
/// 失敗した問い合わせはキャッシュしない。
pub struct CachedMembershipLookup {
    inner: Arc<dyn MembershipLookup>,
    cache: Cache<String, MembershipTier>,
}

impl CachedMembershipLookup {
    pub fn new(inner: Arc<dyn MembershipLookup>, max_capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { inner, cache }
    }
}

#[async_trait]
impl MembershipLookup for CachedMembershipLookup {
    async fn tier_of(&self, user_id: &str) -> anyhow::Result<MembershipTier> {
        if let Some(tier) = self.cache.get(user_id).await {
            return Ok(tier);
        }
        let tier = self.inner.tier_of(user_id).await?;
        self.cache.insert(user_id.to_string(), tier).await;
        Ok(tier)
    }
}
