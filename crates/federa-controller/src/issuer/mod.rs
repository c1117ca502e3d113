//! 客户端证书签发模块
//!
//! [`ClientCertIssuer`] 是签发能力的抽象；单个后端（例如 [`LocalCaIssuer`]）
//! 与有序回退链 [`CertIssuerChain`] 都实现该能力，因此链可以嵌套。

mod chain;
mod local_ca;

pub use chain::{CertIssuerChain, EMPTY_CHAIN_NAME};
pub use local_ca::{LocalCaIssuer, LOCAL_CA_ISSUER_NAME};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::time::Duration;
use thiserror::Error;

/// 签发出的证书与私钥（PEM）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertPem {
    /// 证书 PEM
    pub cert_pem: Vec<u8>,
    /// 私钥 PEM
    pub key_pem: Vec<u8>,
}

/// 签发错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IssueError {
    /// 链中没有任何签发者
    #[error("failed to issue cert")]
    NoIssuers,

    /// 链中全部签发者都失败，每一项都带有签发者名称
    #[error("[{}]", .0.join(", "))]
    AllFailed(Vec<String>),

    /// 单个后端的失败
    #[error("{0}")]
    Backend(String),
}

/// 客户端证书签发能力
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClientCertIssuer: Send + Sync {
    /// 签发者名称，仅用于诊断
    fn name(&self) -> String;

    /// 为用户签发一张客户端证书
    async fn issue_client_cert_pem(
        &self,
        username: &str,
        groups: &[String],
        ttl: Duration,
    ) -> Result<IssuedCertPem, IssueError>;
}
