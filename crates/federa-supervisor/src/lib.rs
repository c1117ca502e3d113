//! Federa Supervisor - 面向客户端的 TLS 服务端
//!
//! 该模块持有动态证书存储，并在 TLS 端口上按 SNI 选择证书、
//! 在明文端口上提供健康检查与指标。证书映射由 Operator 中的
//! TLS 证书观察者通过 [`IssuerCertSetter`] 能力写入。

pub mod config;
pub mod guard;
pub mod health_check;
pub mod listener;
pub mod metrics;

use anyhow::{Context, Result};
use federa_controller::tlscert::{CertRouter, DynamicCertStore, IssuerCertSetter};
use std::sync::Arc;
use tracing::info;

use crate::config::SupervisorConfig;
use crate::health_check::HealthState;
use crate::listener::TlsListener;
use crate::metrics::SupervisorMetrics;

/// Supervisor 主结构体
pub struct Supervisor {
    /// 配置
    config: SupervisorConfig,
    /// 签发者主机到证书的映射与默认证书
    store: Arc<DynamicCertStore>,
    /// 每连接的证书选择
    router: Arc<CertRouter>,
    /// 指标
    metrics: Arc<SupervisorMetrics>,
    /// 就绪状态
    health: Arc<HealthState>,
}

impl Supervisor {
    /// 创建新的 Supervisor 实例
    pub fn new(config: SupervisorConfig) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(DynamicCertStore::new());
        let router = Arc::new(CertRouter::new(store.clone()).context("无法生成引导证书")?);
        let metrics = Arc::new(SupervisorMetrics::new().context("无法注册指标")?);

        Ok(Self {
            config,
            store,
            router,
            metrics,
            health: HealthState::new(),
        })
    }

    /// 配置
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// 证书写入能力，交给 TLS 证书观察者使用
    pub fn cert_setter(&self) -> Arc<dyn IssuerCertSetter> {
        self.store.clone()
    }

    /// 证书路由
    pub fn router(&self) -> &Arc<CertRouter> {
        &self.router
    }

    /// 指标
    pub fn metrics(&self) -> &Arc<SupervisorMetrics> {
        &self.metrics
    }

    /// 就绪状态
    pub fn health(&self) -> &Arc<HealthState> {
        &self.health
    }

    /// 启动 TLS 监听器与健康检查服务器，任意一个出错即返回
    pub async fn run(&self) -> Result<()> {
        let listen_addr = self.config.listen_addr()?;
        let health_addr = self.config.health_addr()?;
        info!(%listen_addr, %health_addr, namespace = %self.config.namespace, "启动 Supervisor");

        let tls = TlsListener::new(self.router.clone(), self.metrics.clone());
        tokio::try_join!(
            tls.bind_and_serve(listen_addr),
            health_check::serve_health(health_addr, self.health.clone(), self.metrics.clone()),
        )?;

        Ok(())
    }
}
