//! 认证器协调模块
//!
//! 每种认证器资源对应一个电平触发的协调器：每次调用都从当前 spec 重新计算
//! 完整的验证结果，不在调用之间保留任何增量状态。资源不存在时静默跳过。
//! 协调器只通过 [`AuthenticatorStore`] 读取 spec 和写回 status，
//! 因此可以直接用内存中的假存储进行测试。

pub mod cache;
pub mod jwt;
pub mod webhook;

pub use cache::{AuthenticatorCache, CacheKey, CachedAuthenticator};
pub use jwt::{validate_jwt_authenticator, JwtAuthenticator};
pub use webhook::{validate_webhook_authenticator, WebhookAuthenticator};

use async_trait::async_trait;
use chrono::Utc;
use federa_common::{merge_conditions, ValidationOutcome};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::crd::{AuthenticatorStatus, JWTAuthenticatorSpec, WebhookAuthenticatorSpec};
use crate::error::Result;
use crate::validation::probe::DEFAULT_PROBE_TIMEOUT;
use crate::validation::{OidcProber, WebhookDialer};

/// 认证通过的用户
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// 用户名
    pub username: String,
    /// 用户组
    pub groups: Vec<String>,
}

/// 从存储中读取的认证器快照
#[derive(Debug, Clone)]
pub struct StoredAuthenticator<S> {
    /// spec，只读
    pub spec: S,
    /// 当前 status
    pub status: Option<AuthenticatorStatus>,
    /// metadata.generation
    pub generation: Option<i64>,
}

/// 认证器资源存储
#[async_trait]
pub trait AuthenticatorStore<S>: Send + Sync {
    /// 读取资源；不存在时返回 `None`
    async fn get(&self, name: &str) -> Result<Option<StoredAuthenticator<S>>>;

    /// 通过 status 子资源写回状态
    async fn patch_status(&self, name: &str, status: &AuthenticatorStatus) -> Result<()>;
}

/// 由验证结果计算新的 status
///
/// 与已有条件合并以保留未变化条件的 `lastTransitionTime`。
pub fn desired_status(
    outcome: &ValidationOutcome,
    existing: Option<&AuthenticatorStatus>,
    generation: Option<i64>,
) -> AuthenticatorStatus {
    let computed: Vec<_> = outcome.conditions.iter().cloned().collect();
    let existing = existing.map(|s| s.conditions.as_slice()).unwrap_or_default();

    AuthenticatorStatus {
        conditions: merge_conditions(&computed, existing, generation, Utc::now()),
        phase: Some(outcome.phase),
    }
}

/// 写回状态，状态未变化时跳过；返回是否真正发出了 patch
async fn write_status<S, St>(
    store: &St,
    kind: &str,
    name: &str,
    outcome: &ValidationOutcome,
    stored: &StoredAuthenticator<S>,
) -> Result<bool>
where
    St: AuthenticatorStore<S> + ?Sized,
{
    let status = desired_status(outcome, stored.status.as_ref(), stored.generation);
    if stored.status.as_ref() == Some(&status) {
        debug!(kind, name, "状态未变化，跳过更新");
        return Ok(false);
    }

    store.patch_status(name, &status).await?;
    if outcome.is_ready() {
        info!(kind, name, phase = %outcome.phase, "认证器状态已更新");
    } else {
        let failed: Vec<_> = outcome
            .conditions
            .iter()
            .filter(|c| !c.is_true() && c.type_ != federa_common::TYPE_READY)
            .map(|c| format!("{}={}", c.type_, c.status))
            .collect();
        warn!(kind, name, phase = %outcome.phase, conditions = ?failed, "认证器未就绪");
    }
    Ok(true)
}

/// JWTAuthenticator 协调器
pub struct JwtAuthenticatorReconciler<St> {
    store: Arc<St>,
    prober: Arc<dyn OidcProber>,
    cache: Arc<AuthenticatorCache>,
}

impl<St> JwtAuthenticatorReconciler<St>
where
    St: AuthenticatorStore<JWTAuthenticatorSpec>,
{
    /// 创建协调器
    pub fn new(store: Arc<St>, prober: Arc<dyn OidcProber>, cache: Arc<AuthenticatorCache>) -> Self {
        Self {
            store,
            prober,
            cache,
        }
    }

    /// 协调一个资源
    ///
    /// 资源不存在时返回 `Ok(None)`；否则返回本次计算的验证结果。
    /// 验证失败不是错误，只有读取或写回失败才返回错误。
    pub async fn reconcile(&self, name: &str) -> Result<Option<ValidationOutcome>> {
        let key = CacheKey::new(jwt::KIND, name);
        let Some(stored) = self.store.get(name).await? else {
            debug!(kind = jwt::KIND, name, "资源已删除，跳过");
            self.cache.remove(&key).await;
            return Ok(None);
        };

        let (outcome, authenticator) =
            validate_jwt_authenticator(&stored.spec, self.prober.as_ref()).await;
        match authenticator {
            Some(authenticator) => {
                self.cache
                    .insert(key, CachedAuthenticator::Jwt(Arc::new(authenticator)))
                    .await
            }
            None => {
                self.cache.remove(&key).await;
            }
        }

        write_status(self.store.as_ref(), jwt::KIND, name, &outcome, &stored).await?;
        Ok(Some(outcome))
    }
}

/// WebhookAuthenticator 协调器
pub struct WebhookAuthenticatorReconciler<St> {
    store: Arc<St>,
    dialer: Arc<dyn WebhookDialer>,
    cache: Arc<AuthenticatorCache>,
    timeout: Duration,
}

impl<St> WebhookAuthenticatorReconciler<St>
where
    St: AuthenticatorStore<WebhookAuthenticatorSpec>,
{
    /// 创建协调器
    pub fn new(
        store: Arc<St>,
        dialer: Arc<dyn WebhookDialer>,
        cache: Arc<AuthenticatorCache>,
    ) -> Self {
        Self {
            store,
            dialer,
            cache,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// 设置认证请求超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 协调一个资源
    pub async fn reconcile(&self, name: &str) -> Result<Option<ValidationOutcome>> {
        let key = CacheKey::new(webhook::KIND, name);
        let Some(stored) = self.store.get(name).await? else {
            debug!(kind = webhook::KIND, name, "资源已删除，跳过");
            self.cache.remove(&key).await;
            return Ok(None);
        };

        let (outcome, authenticator) =
            validate_webhook_authenticator(&stored.spec, self.dialer.as_ref(), self.timeout).await;
        match authenticator {
            Some(authenticator) => {
                self.cache
                    .insert(key, CachedAuthenticator::Webhook(Arc::new(authenticator)))
                    .await
            }
            None => {
                self.cache.remove(&key).await;
            }
        }

        write_status(self.store.as_ref(), webhook::KIND, name, &outcome, &stored).await?;
        Ok(Some(outcome))
    }
}
