//! TLS 证书观察者
//!
//! 命名空间内任何 TLS Secret 或 FederationDomain 的变化都会触发该命名空间的
//! 完整重建：列出全部联邦域，逐个解析签发者并加载证书，构建新的映射后一次性换入。
//! 单个条目的错误只会跳过该条目，不会中断整个重建。

use async_trait::async_trait;
use federa_common::{FederationDomainRef, IssuerHost, TlsSecret};
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

use super::store::{IssuerCertSetter, IssuerHostCertMap, ServingCert};
use crate::error::Result;

/// Secret 读取错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretError {
    /// Secret 不存在
    #[error("secret {namespace}/{name} not found")]
    NotFound {
        /// 命名空间
        namespace: String,
        /// 名称
        name: String,
    },

    /// Secret 内容无效
    #[error("secret {name} is invalid: {reason}")]
    Invalid {
        /// 名称
        name: String,
        /// 原因
        reason: String,
    },

    /// 存储不可用
    #[error("could not read secret: {0}")]
    Unavailable(String),
}

/// 证书观察者读取的资源
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TlsCertSource: Send + Sync {
    /// 列出命名空间内全部联邦域
    async fn list_federation_domains(&self, namespace: &str) -> Result<Vec<FederationDomainRef>>;

    /// 读取一个 TLS Secret
    async fn get_tls_secret(&self, namespace: &str, name: &str)
        -> std::result::Result<TlsSecret, SecretError>;
}

/// TLS 证书观察者
pub struct TlsCertObserver<S> {
    source: Arc<S>,
    setter: Arc<dyn IssuerCertSetter>,
    default_secret_name: Option<String>,
}

impl<S: TlsCertSource> TlsCertObserver<S> {
    /// 创建观察者
    ///
    /// `default_secret_name` 为默认证书所在 Secret 的名称，未配置时不设置默认证书。
    pub fn new(
        source: Arc<S>,
        setter: Arc<dyn IssuerCertSetter>,
        default_secret_name: Option<String>,
    ) -> Self {
        Self {
            source,
            setter,
            default_secret_name: default_secret_name.filter(|n| !n.is_empty()),
        }
    }

    /// 重建一个命名空间的证书映射与默认证书
    pub async fn reconcile(&self, namespace: &str) -> Result<()> {
        let map = self.build_map(namespace).await?;
        let hosts = map.len();
        self.setter.set_issuer_host_to_cert_map(map);
        debug!(namespace, hosts, "已替换签发者证书映射");

        let default_cert = self.load_default(namespace).await;
        self.setter.set_default_cert(default_cert);
        Ok(())
    }

    async fn build_map(&self, namespace: &str) -> Result<IssuerHostCertMap> {
        let mut domains = self.source.list_federation_domains(namespace).await?;
        // 同一主机名出现多次时按名称排序后最后一个生效，保证重建结果稳定
        domains.sort_by(|a, b| a.name.cmp(&b.name));

        let mut map = IssuerHostCertMap::new();
        for fd in &domains {
            let host = match IssuerHost::from_issuer(&fd.issuer) {
                Ok(host) => host,
                Err(e) => {
                    debug!(namespace, name = %fd.name, issuer = %fd.issuer, error = %e, "跳过签发者无效的联邦域");
                    continue;
                }
            };

            let Some(secret_name) = fd.tls_secret_name.as_deref() else {
                continue;
            };

            match self.load_cert(namespace, secret_name).await {
                Ok(cert) => {
                    map.insert(host, cert);
                }
                Err(e) => {
                    error!(
                        namespace,
                        name = %fd.name,
                        secret = secret_name,
                        error = %e,
                        "无法加载联邦域的 TLS 证书"
                    );
                }
            }
        }
        Ok(map)
    }

    async fn load_default(&self, namespace: &str) -> Option<Arc<ServingCert>> {
        let name = self.default_secret_name.as_deref()?;
        match self.load_cert(namespace, name).await {
            Ok(cert) => {
                debug!(namespace, secret = name, "已设置默认 TLS 证书");
                Some(cert)
            }
            Err(SecretError::NotFound { .. }) => {
                debug!(namespace, secret = name, "默认 TLS 证书不存在，已清除");
                None
            }
            Err(e) => {
                error!(namespace, secret = name, error = %e, "无法加载默认 TLS 证书，已清除");
                None
            }
        }
    }

    async fn load_cert(
        &self,
        namespace: &str,
        name: &str,
    ) -> std::result::Result<Arc<ServingCert>, SecretError> {
        let secret = self.source.get_tls_secret(namespace, name).await?;
        ServingCert::from_pem(&secret.cert_pem, &secret.key_pem)
            .map(Arc::new)
            .map_err(|e| SecretError::Invalid {
                name: name.to_string(),
                reason: e.to_string(),
            })
    }
}
