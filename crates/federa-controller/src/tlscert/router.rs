//! 按连接选择服务证书
//!
//! 握手时按 SNI 查找签发者证书，找不到时使用默认证书，仍然没有时使用自签名的
//! 引导证书，并把该连接标记为引导连接。引导证书只用于让客户端完成握手，
//! 从而在应用层得到明确的错误，而不是原始的 TLS 失败。

use chrono::Utc;
use rcgen::{CertificateParams, DnType, KeyPair};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use super::store::{DynamicCertStore, ServingCert};
use crate::error::{Error, Result};

/// 引导证书的 CN 与 SAN
pub const BOOTSTRAP_CERT_NAME: &str = "federa-bootstrap-cert";

/// 引导证书有效期
pub const BOOTSTRAP_CERT_VALIDITY: Duration = Duration::from_secs(2 * 60 * 60);

/// 距离过期不足该时长时重新生成引导证书
const BOOTSTRAP_RENEW_BEFORE: Duration = Duration::from_secs(10 * 60);

/// 单个连接的引导标记
///
/// 连接建立时创建，握手使用引导证书时置位，之后只读；随连接一起销毁。
#[derive(Debug, Default)]
pub struct BootstrapConnState {
    bootstrap: AtomicBool,
}

impl BootstrapConnState {
    /// 为新连接创建标记
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 标记该连接使用了引导证书
    pub fn mark_bootstrap(&self) {
        self.bootstrap.store(true, Ordering::Release);
    }

    /// 该连接是否使用了引导证书
    pub fn is_bootstrap(&self) -> bool {
        self.bootstrap.load(Ordering::Acquire)
    }
}

/// 证书选择结果
#[derive(Debug, Clone)]
pub struct CertSelection {
    /// 选中的证书
    pub cert: Arc<ServingCert>,
    /// 是否为引导证书
    pub bootstrap: bool,
}

/// 生成自签名引导证书
pub fn generate_bootstrap_cert() -> Result<ServingCert> {
    let certificate_error = |e: rcgen::Error| Error::Certificate(e.to_string());

    let key = KeyPair::generate().map_err(certificate_error)?;
    let mut params =
        CertificateParams::new(vec![BOOTSTRAP_CERT_NAME.to_string()]).map_err(certificate_error)?;
    params
        .distinguished_name
        .push(DnType::CommonName, BOOTSTRAP_CERT_NAME);
    let now = time::OffsetDateTime::now_utc();
    params.not_before = now - Duration::from_secs(60);
    params.not_after = now + BOOTSTRAP_CERT_VALIDITY;

    let cert = params.self_signed(&key).map_err(certificate_error)?;
    ServingCert::from_pem(cert.pem().as_bytes(), key.serialize_pem().as_bytes())
}

/// 证书路由器
#[derive(Debug)]
pub struct CertRouter {
    store: Arc<DynamicCertStore>,
    bootstrap: Mutex<Arc<ServingCert>>,
}

impl CertRouter {
    /// 创建路由器并生成第一张引导证书
    pub fn new(store: Arc<DynamicCertStore>) -> Result<Self> {
        let bootstrap = generate_bootstrap_cert()?;
        Ok(Self {
            store,
            bootstrap: Mutex::new(Arc::new(bootstrap)),
        })
    }

    /// 证书存储
    pub fn store(&self) -> &Arc<DynamicCertStore> {
        &self.store
    }

    /// 当前引导证书，临近过期时重新生成
    pub fn bootstrap_cert(&self) -> Arc<ServingCert> {
        let mut current = self.bootstrap.lock().unwrap_or_else(PoisonError::into_inner);
        let renew_at = current.not_after() - BOOTSTRAP_RENEW_BEFORE.as_secs() as i64;
        if Utc::now().timestamp() >= renew_at {
            match generate_bootstrap_cert() {
                Ok(fresh) => {
                    debug!("已重新生成引导证书");
                    *current = Arc::new(fresh);
                }
                Err(e) => warn!(error = %e, "重新生成引导证书失败，继续使用旧证书"),
            }
        }
        Arc::clone(&current)
    }

    /// 为一次握手选择证书
    pub fn select(&self, server_name: Option<&str>) -> CertSelection {
        if let Some(cert) = server_name.and_then(|name| self.store.lookup(name)) {
            return CertSelection {
                cert,
                bootstrap: false,
            };
        }
        if let Some(cert) = self.store.default_cert() {
            return CertSelection {
                cert,
                bootstrap: false,
            };
        }
        CertSelection {
            cert: self.bootstrap_cert(),
            bootstrap: true,
        }
    }

    /// 为一个连接构造 rustls 服务端配置
    pub fn server_config(self: &Arc<Self>, conn: Arc<BootstrapConnState>) -> Arc<ServerConfig> {
        let resolver = ConnectionCertResolver {
            router: Arc::clone(self),
            conn,
        };
        let mut config = ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_cert_resolver(Arc::new(resolver));
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Arc::new(config)
    }
}

/// 绑定到单个连接的证书解析器
struct ConnectionCertResolver {
    router: Arc<CertRouter>,
    conn: Arc<BootstrapConnState>,
}

impl ResolvesServerCert for ConnectionCertResolver {
    fn resolve(&self, client_hello: ClientHello) -> Option<Arc<CertifiedKey>> {
        let selection = self.router.select(client_hello.server_name());
        if selection.bootstrap {
            self.conn.mark_bootstrap();
        }
        Some(selection.cert.certified_key())
    }
}
