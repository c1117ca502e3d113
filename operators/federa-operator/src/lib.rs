//! Federa Operator - 身份联邦控制平面的 Kubernetes 接线
//!
//! 该模块把控制平面核心接到 Kubernetes：为 JWTAuthenticator 与 WebhookAuthenticator
//! 运行验证控制器并写回状态，监听 FederationDomain 与 TLS Secret 以维护
//! Supervisor 的证书映射，同时运行面向客户端的 TLS 监听器。

pub mod controller;
pub mod crd;
pub mod event_handler;
pub mod reconcile;

use anyhow::{anyhow, Context, Result};
use federa_controller::authenticator::{
    AuthenticatorCache, JwtAuthenticatorReconciler, WebhookAuthenticatorReconciler,
};
use federa_controller::crd::{JWTAuthenticator, WebhookAuthenticator};
use federa_controller::issuer::{CertIssuerChain, ClientCertIssuer, LocalCaIssuer};
use federa_controller::validation::HttpProber;
use federa_supervisor::config::SupervisorConfig;
use federa_supervisor::Supervisor;
use kube::api::Api;
use kube::Client;
use std::sync::Arc;
use tracing::info;

use crate::controller::{run_authenticator_controller, ResyncSettings};
use crate::event_handler::TlsCertEventHandler;

/// 本地 CA 的通用名称
pub const LOCAL_CA_COMMON_NAME: &str = "federa-client-ca";

/// Operator 主结构体
pub struct FederaOperator {
    /// Kubernetes 客户端
    client: Client,
    /// TLS 服务端
    supervisor: Arc<Supervisor>,
    /// 验证通过的认证器
    cache: Arc<AuthenticatorCache>,
    /// 客户端证书签发链
    issuers: Arc<CertIssuerChain>,
}

impl FederaOperator {
    /// 使用默认的集群配置创建 Operator
    pub async fn new(config: SupervisorConfig) -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("无法创建 Kubernetes 客户端")?;
        Self::with_client(client, config)
    }

    /// 使用给定的客户端创建 Operator
    pub fn with_client(client: Client, config: SupervisorConfig) -> Result<Self> {
        let supervisor = Arc::new(Supervisor::new(config)?);
        let local_ca: Arc<dyn ClientCertIssuer> = Arc::new(
            LocalCaIssuer::generate(LOCAL_CA_COMMON_NAME).context("无法生成本地 CA")?,
        );
        let issuers = Arc::new(CertIssuerChain::new(vec![local_ca]));

        Ok(Self {
            client,
            supervisor,
            cache: Arc::new(AuthenticatorCache::new()),
            issuers,
        })
    }

    /// 验证通过的认证器缓存
    pub fn cache(&self) -> &Arc<AuthenticatorCache> {
        &self.cache
    }

    /// 客户端证书签发能力
    pub fn client_cert_issuer(&self) -> Arc<dyn ClientCertIssuer> {
        self.issuers.clone()
    }

    /// TLS 服务端
    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// 启动全部控制循环与监听器，收到 Ctrl-C 后返回
    pub async fn run(&self) -> Result<()> {
        let config = self.supervisor.config().clone();
        let settings = ResyncSettings {
            resync: config.resync_interval(),
            backoff_base: config.backoff_base(),
            backoff_max: config.backoff_max(),
        };
        let prober = Arc::new(HttpProber::new(config.probe_timeout()));
        let metrics = self.supervisor.metrics().clone();

        info!(
            namespace = %config.namespace,
            client_cert_issuers = %self.issuers.name(),
            "启动 Federa Operator"
        );

        let jwt = {
            let prober = prober.clone();
            let cache = self.cache.clone();
            run_authenticator_controller(
                Api::<JWTAuthenticator>::all(self.client.clone()),
                move |store| JwtAuthenticatorReconciler::new(store, prober, cache),
                settings,
                metrics.clone(),
            )
        };

        let webhook = {
            let cache = self.cache.clone();
            let timeout = config.probe_timeout();
            run_authenticator_controller(
                Api::<WebhookAuthenticator>::all(self.client.clone()),
                move |store| {
                    WebhookAuthenticatorReconciler::new(store, prober, cache).with_timeout(timeout)
                },
                settings,
                metrics.clone(),
            )
        };

        let tls_certs = TlsCertEventHandler::new(
            self.client.clone(),
            config,
            self.supervisor.cert_setter(),
            metrics,
            self.supervisor.health().clone(),
        )
        .run();

        tokio::select! {
            result = self.supervisor.run() => result,
            _ = jwt => Err(anyhow!("JWTAuthenticator 控制器意外退出")),
            _ = webhook => Err(anyhow!("WebhookAuthenticator 控制器意外退出")),
            _ = tls_certs => Err(anyhow!("TLS 证书观察者意外退出")),
            signal = tokio::signal::ctrl_c() => {
                signal.context("无法监听终止信号")?;
                info!("收到终止信号，停止 Federa Operator");
                Ok(())
            }
        }
    }
}
