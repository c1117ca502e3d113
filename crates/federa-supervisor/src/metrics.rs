//! 指标收集与导出模块
//!
//! 以 Prometheus 文本格式导出引导连接拒绝次数、证书映射重建次数
//! 以及按类型与阶段统计的认证器协调次数。

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Supervisor 指标
#[derive(Clone)]
pub struct SupervisorMetrics {
    /// Prometheus 注册表
    registry: Registry,
    /// 引导连接上被拒绝的请求数
    bootstrap_rejections_total: IntCounter,
    /// 证书映射重建次数
    tls_cert_rebuilds_total: IntCounter,
    /// 认证器协调次数
    authenticator_reconciles_total: IntCounterVec,
}

impl SupervisorMetrics {
    /// 创建并注册全部指标
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let bootstrap_rejections_total = IntCounter::new(
            "federa_bootstrap_rejections_total",
            "Requests rejected because the connection used the bootstrap certificate",
        )?;

        let tls_cert_rebuilds_total = IntCounter::new(
            "federa_tls_cert_rebuilds_total",
            "Number of issuer host certificate map rebuilds",
        )?;

        let authenticator_reconciles_total = IntCounterVec::new(
            Opts::new(
                "federa_authenticator_reconciles_total",
                "Number of authenticator reconciles by kind and resulting phase",
            ),
            &["kind", "phase"],
        )?;

        registry.register(Box::new(bootstrap_rejections_total.clone()))?;
        registry.register(Box::new(tls_cert_rebuilds_total.clone()))?;
        registry.register(Box::new(authenticator_reconciles_total.clone()))?;

        Ok(Self {
            registry,
            bootstrap_rejections_total,
            tls_cert_rebuilds_total,
            authenticator_reconciles_total,
        })
    }

    /// 记录一次引导连接拒绝
    pub fn record_bootstrap_rejection(&self) {
        self.bootstrap_rejections_total.inc();
    }

    /// 记录一次证书映射重建
    pub fn record_tls_cert_rebuild(&self) {
        self.tls_cert_rebuilds_total.inc();
    }

    /// 记录一次认证器协调
    pub fn record_authenticator_reconcile(&self, kind: &str, phase: &str) {
        self.authenticator_reconciles_total
            .with_label_values(&[kind, phase])
            .inc();
    }

    /// 以文本格式编码全部指标
    pub fn encode(&self) -> prometheus::Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((encoder.format_type().to_string(), buffer))
    }

    /// 获取 Prometheus 注册表
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
