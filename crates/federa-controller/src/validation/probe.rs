//! 网络探针
//!
//! OIDC 发现、JWKS 获取以及 webhook 拨号都需要访问外部网络。它们以 trait 的形式
//! 注入到验证流程中，生产环境使用基于 reqwest 的 [`HttpProber`]，测试中使用 mock。
//! 所有请求都带有超时，超时被当作普通的探测失败处理。

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

use super::tls::TrustBundle;
use crate::utils::error_chain;

/// OIDC 发现文档路径
pub const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";

/// 默认探测超时
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// OIDC 发现文档中本控制平面关心的字段
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscoveryDocument {
    /// 提供方声明的签发者
    pub issuer: String,
    /// JWKS 地址
    #[serde(default)]
    pub jwks_uri: Option<String>,
}

/// 探测错误，消息中保留底层错误原文
#[derive(Error, Debug)]
pub enum ProbeError {
    /// 请求超时
    #[error("request to {url} timed out: {reason}")]
    Timeout {
        /// 请求地址
        url: String,
        /// 底层错误
        reason: String,
    },

    /// DNS、TLS 校验、连接被拒绝等传输层错误
    #[error("{0}")]
    Transport(String),

    /// 非 2xx 响应
    #[error("{url} responded with unexpected status {status}")]
    Status {
        /// 请求地址
        url: String,
        /// HTTP 状态码
        status: u16,
    },

    /// 响应无法解析
    #[error("could not decode response from {url}: {reason}")]
    Decode {
        /// 请求地址
        url: String,
        /// 底层错误
        reason: String,
    },

    /// HTTP 客户端构造失败
    #[error("could not build http client: {0}")]
    Client(String),
}

impl ProbeError {
    fn from_reqwest(url: &Url, err: reqwest::Error) -> Self {
        let reason = error_chain(&err);
        if err.is_timeout() {
            ProbeError::Timeout {
                url: url.to_string(),
                reason,
            }
        } else {
            ProbeError::Transport(reason)
        }
    }
}

/// OIDC 提供方探针
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OidcProber: Send + Sync {
    /// 对签发者执行 OIDC 发现
    async fn discover(
        &self,
        issuer: &Url,
        trust: &TrustBundle,
    ) -> Result<DiscoveryDocument, ProbeError>;

    /// 获取并解析 JWKS
    async fn fetch_jwks(&self, jwks_uri: &Url, trust: &TrustBundle) -> Result<JwkSet, ProbeError>;
}

/// Webhook 服务端拨号探针
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WebhookDialer: Send + Sync {
    /// 与 webhook 服务端完成一次 TLS 握手
    async fn dial(&self, endpoint: &Url, trust: &TrustBundle) -> Result<(), ProbeError>;
}

/// 签发者对应的发现文档地址
pub fn discovery_url(issuer: &Url) -> Result<Url, url::ParseError> {
    let base = issuer.as_str().trim_end_matches('/');
    Url::parse(&format!("{base}{WELL_KNOWN_PATH}"))
}

/// 根据信任根构造 HTTP 客户端
///
/// 指定了 CA 证书包时只信任该证书包，否则使用内置信任根。
pub fn build_http_client(trust: &TrustBundle, timeout: Duration) -> Result<reqwest::Client, ProbeError> {
    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::limited(5));

    if !trust.is_empty() {
        builder = builder.tls_built_in_root_certs(false);
        for der in trust.roots() {
            let cert = reqwest::Certificate::from_der(der)
                .map_err(|e| ProbeError::Client(error_chain(&e)))?;
            builder = builder.add_root_certificate(cert);
        }
    }

    builder
        .build()
        .map_err(|e| ProbeError::Client(error_chain(&e)))
}

/// 基于 reqwest 的探针实现
#[derive(Debug, Clone)]
pub struct HttpProber {
    timeout: Duration,
}

impl HttpProber {
    /// 创建新的探针
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &Url,
        trust: &TrustBundle,
    ) -> Result<T, ProbeError> {
        let client = build_http_client(trust, self.timeout)?;
        debug!(url = %url, "发起探测请求");

        let response = client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| ProbeError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ProbeError::from_reqwest(url, e))?;
        serde_json::from_slice(&body).map_err(|e| ProbeError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

impl Default for HttpProber {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

#[async_trait]
impl OidcProber for HttpProber {
    async fn discover(
        &self,
        issuer: &Url,
        trust: &TrustBundle,
    ) -> Result<DiscoveryDocument, ProbeError> {
        let url = discovery_url(issuer).map_err(|e| ProbeError::Transport(e.to_string()))?;
        self.get_json(&url, trust).await
    }

    async fn fetch_jwks(&self, jwks_uri: &Url, trust: &TrustBundle) -> Result<JwkSet, ProbeError> {
        self.get_json(jwks_uri, trust).await
    }
}

#[async_trait]
impl WebhookDialer for HttpProber {
    async fn dial(&self, endpoint: &Url, trust: &TrustBundle) -> Result<(), ProbeError> {
        let client = build_http_client(trust, self.timeout)?;
        // 任意 HTTP 响应都说明 TLS 握手已经成功
        client
            .head(endpoint.clone())
            .send()
            .await
            .map(|_| ())
            .map_err(|e| ProbeError::from_reqwest(endpoint, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_url() {
        let issuer = Url::parse("https://issuer.example.com/some/path/").unwrap();
        assert_eq!(
            discovery_url(&issuer).unwrap().as_str(),
            "https://issuer.example.com/some/path/.well-known/openid-configuration"
        );

        let issuer = Url::parse("https://issuer.example.com").unwrap();
        assert_eq!(
            discovery_url(&issuer).unwrap().as_str(),
            "https://issuer.example.com/.well-known/openid-configuration"
        );
    }

    #[test]
    fn test_discovery_document_parse() {
        let doc: DiscoveryDocument = serde_json::from_str(
            r#"{"issuer":"https://issuer.example.com","jwks_uri":"https://issuer.example.com/jwks.json","response_types_supported":["code"]}"#,
        )
        .unwrap();
        assert_eq!(doc.jwks_uri.as_deref(), Some("https://issuer.example.com/jwks.json"));
    }

    #[test]
    fn test_client_with_custom_roots() {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::default();
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let ca = params.self_signed(&key).unwrap();
        let bundle = TrustBundle::from_pem(ca.pem().as_bytes()).unwrap();

        assert!(build_http_client(&bundle, Duration::from_secs(1)).is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_issuer_is_transport_error() {
        let prober = HttpProber::new(Duration::from_secs(2));
        let issuer = Url::parse("https://127.0.0.1:1").unwrap();

        let err = prober
            .discover(&issuer, &TrustBundle::default())
            .await
            .unwrap_err();
        assert!(
            matches!(err, ProbeError::Transport(_) | ProbeError::Timeout { .. }),
            "{err}"
        );
    }
}
