//! 事件处理模块
//!
//! 监听 Supervisor 命名空间中的 FederationDomain 与 `kubernetes.io/tls` Secret，
//! 任一资源发生变化都把命名空间放入工作队列，由 worker 调用证书观察者完整重建证书映射。

use federa_controller::crd::FederationDomain;
use federa_controller::tlscert::{IssuerCertSetter, TlsCertObserver};
use federa_controller::utils::ItemBackoff;
use federa_controller::workqueue::{run_workers, WorkQueue};
use federa_supervisor::config::SupervisorConfig;
use federa_supervisor::health_check::HealthState;
use federa_supervisor::metrics::SupervisorMetrics;
use futures::{future, Stream, StreamExt};
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::Client;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::reconcile::KubeTlsCertSource;

/// 只监听 TLS 类型 Secret 的字段选择器
pub fn tls_secret_field_selector() -> String {
    format!("type={}", federa_common::TLS_SECRET_TYPE)
}

/// 把监听事件转换为命名空间入队，直到流结束
pub async fn enqueue_on_change<S, K>(
    stream: S,
    queue: Arc<WorkQueue<String>>,
    namespace: String,
    kind: &'static str,
) where
    S: Stream<Item = watcher::Result<watcher::Event<K>>>,
{
    stream
        .for_each(|event| {
            match event {
                Ok(_) => {
                    debug!(kind, namespace = %namespace, "资源变化，重建证书映射");
                    queue.add(namespace.clone());
                }
                Err(e) => warn!(kind, namespace = %namespace, error = %e, "监听出错"),
            }
            future::ready(())
        })
        .await;
    warn!(kind, namespace = %namespace, "监听流已结束");
}

/// TLS 证书事件处理器
pub struct TlsCertEventHandler {
    client: Client,
    config: SupervisorConfig,
    setter: Arc<dyn IssuerCertSetter>,
    metrics: Arc<SupervisorMetrics>,
    health: Arc<HealthState>,
}

impl TlsCertEventHandler {
    /// 创建事件处理器
    pub fn new(
        client: Client,
        config: SupervisorConfig,
        setter: Arc<dyn IssuerCertSetter>,
        metrics: Arc<SupervisorMetrics>,
        health: Arc<HealthState>,
    ) -> Self {
        Self {
            client,
            config,
            setter,
            metrics,
            health,
        }
    }

    /// 启动监听与 worker，直到队列关闭
    pub async fn run(self) {
        let namespace = self.config.namespace.clone();
        let queue: Arc<WorkQueue<String>> = WorkQueue::new();

        let (domain_reader, domain_writer) = reflector::store::<FederationDomain>();
        let (secret_reader, secret_writer) = reflector::store::<Secret>();

        let domains: Api<FederationDomain> = Api::namespaced(self.client.clone(), &namespace);
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);

        let domain_stream = reflector(
            domain_writer,
            watcher(domains, watcher::Config::default()).default_backoff(),
        );
        let secret_stream = reflector(
            secret_writer,
            watcher(
                secrets,
                watcher::Config::default().fields(&tls_secret_field_selector()),
            )
            .default_backoff(),
        );

        tokio::spawn(enqueue_on_change(
            domain_stream,
            queue.clone(),
            namespace.clone(),
            "FederationDomain",
        ));
        tokio::spawn(enqueue_on_change(
            secret_stream,
            queue.clone(),
            namespace.clone(),
            "Secret",
        ));

        let source = Arc::new(KubeTlsCertSource::new(domain_reader, secret_reader));
        let observer = Arc::new(TlsCertObserver::new(
            source,
            self.setter.clone(),
            self.config.default_tls_secret_name.clone(),
        ));
        let backoff = Arc::new(ItemBackoff::new(
            self.config.backoff_base(),
            self.config.backoff_max(),
        ));

        info!(namespace = %namespace, workers = self.config.workers, "启动 TLS 证书观察者");
        let metrics = self.metrics.clone();
        let health = self.health.clone();
        run_workers(
            queue,
            backoff,
            self.config.workers,
            self.config.resync_interval(),
            move |namespace: String| {
                let observer = observer.clone();
                let metrics = metrics.clone();
                let health = health.clone();
                async move {
                    observer.reconcile(&namespace).await?;
                    metrics.record_tls_cert_rebuild();
                    health.mark_ready();
                    Ok::<(), federa_controller::Error>(())
                }
            },
        )
        .await;
    }
}
