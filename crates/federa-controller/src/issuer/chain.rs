//! 有序回退签发链

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ClientCertIssuer, IssueError, IssuedCertPem};

/// 空链的名称
pub const EMPTY_CHAIN_NAME: &str = "empty-client-cert-issuers";

/// 按顺序尝试每个签发者，返回第一个成功的结果
///
/// 全部失败时聚合每个签发者的错误；链为空时返回固定的哨兵错误。
#[derive(Clone, Default)]
pub struct CertIssuerChain {
    issuers: Vec<Arc<dyn ClientCertIssuer>>,
}

impl CertIssuerChain {
    /// 由签发者列表创建
    pub fn new(issuers: Vec<Arc<dyn ClientCertIssuer>>) -> Self {
        Self { issuers }
    }

    /// 在链尾追加一个签发者
    pub fn push(&mut self, issuer: Arc<dyn ClientCertIssuer>) {
        self.issuers.push(issuer);
    }

    /// 签发者数量
    pub fn len(&self) -> usize {
        self.issuers.len()
    }

    /// 链是否为空
    pub fn is_empty(&self) -> bool {
        self.issuers.is_empty()
    }
}

impl std::fmt::Debug for CertIssuerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CertIssuerChain").field(&self.name()).finish()
    }
}

#[async_trait]
impl ClientCertIssuer for CertIssuerChain {
    fn name(&self) -> String {
        if self.issuers.is_empty() {
            return EMPTY_CHAIN_NAME.to_string();
        }
        self.issuers
            .iter()
            .map(|issuer| issuer.name())
            .collect::<Vec<_>>()
            .join(",")
    }

    async fn issue_client_cert_pem(
        &self,
        username: &str,
        groups: &[String],
        ttl: Duration,
    ) -> Result<IssuedCertPem, IssueError> {
        if self.issuers.is_empty() {
            return Err(IssueError::NoIssuers);
        }

        let mut errors = Vec::with_capacity(self.issuers.len());
        for issuer in &self.issuers {
            match issuer.issue_client_cert_pem(username, groups, ttl).await {
                Ok(issued) => {
                    debug!(issuer = %issuer.name(), username, "签发客户端证书成功");
                    return Ok(issued);
                }
                Err(e) => {
                    debug!(issuer = %issuer.name(), username, error = %e, "签发者失败，尝试下一个");
                    errors.push(format!("{} failed to issue client cert: {e}", issuer.name()));
                }
            }
        }

        warn!(username, issuers = %self.name(), "全部签发者均失败");
        Err(IssueError::AllFailed(errors))
    }
}
