//! TLS 资源快照模型
//!
//! 描述证书观察者所需的外部资源的最小视图：联邦域（FederationDomain）
//! 的签发者与 TLS Secret 名称，以及 `kubernetes.io/tls` 类型 Secret 的内容。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Secret 中证书链所在的键
pub const TLS_CERT_KEY: &str = "tls.crt";

/// Secret 中私钥所在的键
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";

/// TLS Secret 的类型
pub const TLS_SECRET_TYPE: &str = "kubernetes.io/tls";

/// 联邦域快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationDomainRef {
    /// 资源名称
    pub name: String,
    /// `spec.issuer`
    pub issuer: String,
    /// `spec.tls.secretName`
    pub tls_secret_name: Option<String>,
}

/// TLS Secret 内容（PEM）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSecret {
    /// Secret 名称
    pub name: String,
    /// `tls.crt`
    pub cert_pem: Vec<u8>,
    /// `tls.key`
    pub key_pem: Vec<u8>,
}

impl TlsSecret {
    /// 从 Secret 的 data 字段构造
    pub fn from_data(name: &str, data: &BTreeMap<String, Vec<u8>>) -> Result<Self> {
        let field = |key: &str| {
            data.get(key).cloned().ok_or_else(|| Error::MissingSecretKey {
                secret: name.to_string(),
                key: key.to_string(),
            })
        };

        Ok(Self {
            name: name.to_string(),
            cert_pem: field(TLS_CERT_KEY)?,
            key_pem: field(TLS_PRIVATE_KEY_KEY)?,
        })
    }
}
