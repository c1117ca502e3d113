//! 签发者主机名模型
//!
//! 签发者（Issuer）URL 既是外部 OIDC 提供方的身份标识，也是 SNI 路由键。
//! 主机名按 URL 语义不区分大小写，因此所有查找都基于小写、去掉端口的主机名。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::error::{Error, Result};

/// 规范化后的签发者主机名（小写，不含端口）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IssuerHost(String);

impl IssuerHost {
    /// 从签发者 URL 解析主机名
    pub fn from_issuer(issuer: &str) -> Result<Self> {
        let url = Url::parse(issuer).map_err(|e| Error::InvalidIssuer {
            issuer: issuer.to_string(),
            reason: e.to_string(),
        })?;

        let host = url.host_str().ok_or_else(|| Error::InvalidIssuer {
            issuer: issuer.to_string(),
            reason: "缺少主机名".to_string(),
        })?;

        Ok(Self::normalize(host))
    }

    /// 从 TLS 客户端提供的 SNI 名称构造
    pub fn from_server_name(name: &str) -> Self {
        Self::normalize(name)
    }

    fn normalize(host: &str) -> Self {
        Self(host.trim_end_matches('.').to_ascii_lowercase())
    }

    /// 主机名字符串
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IssuerHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for IssuerHost {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_issuer(s)
    }
}
