//! 控制器模块
//!
//! 为每种认证器资源启动一个 kube 运行时控制器。控制器负责监听与去重，
//! 同一资源不会被并发协调；协调成功后按固定间隔重新同步，
//! 失败时按资源记录的指数退避重新入队。

use async_trait::async_trait;
use federa_common::ValidationOutcome;
use federa_controller::authenticator::{
    AuthenticatorStore, JwtAuthenticatorReconciler, WebhookAuthenticatorReconciler,
};
use federa_controller::authenticator::{jwt, webhook};
use federa_controller::crd::{JWTAuthenticatorSpec, WebhookAuthenticatorSpec};
use federa_controller::utils::ItemBackoff;
use federa_controller::{Error, Result};
use federa_supervisor::metrics::SupervisorMetrics;
use futures::StreamExt;
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::reconcile::{AuthenticatorResource, KubeAuthenticatorStore};

/// 按名称协调一种认证器
#[async_trait]
pub trait NamedReconciler: Send + Sync {
    /// 资源类型名
    const KIND: &'static str;

    /// 协调一个资源
    async fn reconcile(&self, name: &str) -> Result<Option<ValidationOutcome>>;
}

#[async_trait]
impl<St> NamedReconciler for JwtAuthenticatorReconciler<St>
where
    St: AuthenticatorStore<JWTAuthenticatorSpec>,
{
    const KIND: &'static str = jwt::KIND;

    async fn reconcile(&self, name: &str) -> Result<Option<ValidationOutcome>> {
        JwtAuthenticatorReconciler::reconcile(self, name).await
    }
}

#[async_trait]
impl<St> NamedReconciler for WebhookAuthenticatorReconciler<St>
where
    St: AuthenticatorStore<WebhookAuthenticatorSpec>,
{
    const KIND: &'static str = webhook::KIND;

    async fn reconcile(&self, name: &str) -> Result<Option<ValidationOutcome>> {
        WebhookAuthenticatorReconciler::reconcile(self, name).await
    }
}

/// 重新同步与退避设置
#[derive(Debug, Clone, Copy)]
pub struct ResyncSettings {
    /// 成功后的重新同步间隔
    pub resync: Duration,
    /// 初始退避
    pub backoff_base: Duration,
    /// 退避上限
    pub backoff_max: Duration,
}

/// 控制器上下文
pub struct ControllerContext<R> {
    reconciler: R,
    backoff: ItemBackoff<String>,
    resync: Duration,
    metrics: Arc<SupervisorMetrics>,
}

impl<R: NamedReconciler> ControllerContext<R> {
    /// 创建上下文
    pub fn new(reconciler: R, settings: ResyncSettings, metrics: Arc<SupervisorMetrics>) -> Self {
        Self {
            reconciler,
            backoff: ItemBackoff::new(settings.backoff_base, settings.backoff_max),
            resync: settings.resync,
            metrics,
        }
    }

    fn backoff_key(name: &str) -> String {
        format!("{}/{}", R::KIND, name)
    }

    /// 协调一个资源并返回下一次协调的时机
    pub async fn reconcile_name(&self, name: &str) -> Result<Action> {
        if let Some(outcome) = self.reconciler.reconcile(name).await? {
            self.metrics
                .record_authenticator_reconcile(R::KIND, &outcome.phase.to_string());
        }
        self.backoff.forget(&Self::backoff_key(name));
        Ok(Action::requeue(self.resync))
    }

    /// 协调失败后的重试时机
    pub fn retry_after(&self, name: &str, error: &Error) -> Action {
        let delay = self.backoff.next_delay(&Self::backoff_key(name));
        warn!(kind = R::KIND, name, error = %error, retry_in = ?delay, "协调失败，稍后重试");
        Action::requeue(delay)
    }
}

async fn reconcile<K, R>(obj: Arc<K>, ctx: Arc<ControllerContext<R>>) -> Result<Action>
where
    K: AuthenticatorResource,
    R: NamedReconciler,
{
    ctx.reconcile_name(&obj.name_any()).await
}

fn error_policy<K, R>(obj: Arc<K>, error: &Error, ctx: Arc<ControllerContext<R>>) -> Action
where
    K: AuthenticatorResource,
    R: NamedReconciler,
{
    ctx.retry_after(&obj.name_any(), error)
}

/// 运行一种认证器的控制器，直到监听流结束
pub async fn run_authenticator_controller<K, R, F>(
    api: Api<K>,
    make_reconciler: F,
    settings: ResyncSettings,
    metrics: Arc<SupervisorMetrics>,
) where
    K: AuthenticatorResource,
    R: NamedReconciler + 'static,
    F: FnOnce(Arc<KubeAuthenticatorStore<K>>) -> R,
{
    let controller = Controller::new(api.clone(), watcher::Config::default());
    let store = Arc::new(KubeAuthenticatorStore::new(api, controller.store()));
    let ctx = Arc::new(ControllerContext::new(
        make_reconciler(store),
        settings,
        metrics,
    ));

    info!(kind = R::KIND, "启动认证器控制器");
    controller
        .run(reconcile::<K, R>, error_policy::<K, R>, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _)) => debug!(kind = R::KIND, name = %obj.name, "协调成功"),
                Err(e) => warn!(kind = R::KIND, error = %e, "控制器错误"),
            }
        })
        .await;
    warn!(kind = R::KIND, "认证器控制器已退出");
}

#[cfg(test)]
mod tests {
    use super::*;
    use federa_common::{Condition, ConditionSet, Phase};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingReconciler {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl NamedReconciler for CountingReconciler {
        const KIND: &'static str = "TestAuthenticator";

        async fn reconcile(&self, _name: &str) -> Result<Option<ValidationOutcome>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Store("cache not synced".to_string()));
            }
            let mut conditions = ConditionSet::new();
            conditions.set(Condition::success("Ready", "ok"));
            Ok(Some(ValidationOutcome {
                conditions,
                phase: Phase::Ready,
            }))
        }
    }

    fn settings() -> ResyncSettings {
        ResyncSettings {
            resync: Duration::from_secs(180),
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_success_requeues_after_resync() {
        let metrics = Arc::new(SupervisorMetrics::new().unwrap());
        let ctx = ControllerContext::new(
            CountingReconciler {
                calls: AtomicUsize::new(0),
                fail: false,
            },
            settings(),
            metrics.clone(),
        );

        let action = ctx.reconcile_name("a").await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(180)));

        let (_, body) = metrics.encode().unwrap();
        assert!(String::from_utf8_lossy(&body).contains(
            r#"federa_authenticator_reconciles_total{kind="TestAuthenticator",phase="Ready"} 1"#
        ));
    }

    #[tokio::test]
    async fn test_failure_backs_off_per_resource() {
        let ctx = ControllerContext::new(
            CountingReconciler {
                calls: AtomicUsize::new(0),
                fail: true,
            },
            settings(),
            Arc::new(SupervisorMetrics::new().unwrap()),
        );

        let err = ctx.reconcile_name("a").await.unwrap_err();
        let first = ctx.retry_after("a", &err);
        let second = ctx.retry_after("a", &err);
        let _ = ctx.retry_after("b", &err);

        let delay = |action: Action| format!("{action:?}");
        assert_ne!(delay(first), delay(second));
        assert_eq!(ctx.backoff.failures(&"TestAuthenticator/a".to_string()), 2);
        assert_eq!(ctx.backoff.failures(&"TestAuthenticator/b".to_string()), 1);
        assert_eq!(ctx.reconciler.calls.load(Ordering::SeqCst), 1);
    }
}
