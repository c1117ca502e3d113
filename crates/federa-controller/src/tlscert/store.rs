//! 服务证书存储
//!
//! 证书观察者是唯一的写者，TLS 握手路径是大量并发的读者。
//! 映射表以写时复制的方式整体替换：写者构建完整的新表后一次性换入，
//! 读者通过 `ArcSwap` 无锁地取得当前表的 `Arc`，因此总是看到旧表或新表，
//! 从不看到半成品，写者也不会阻塞握手。

use arc_swap::{ArcSwap, ArcSwapOption};
use federa_common::IssuerHost;
use rustls::sign::{self, CertifiedKey};
use rustls::{Certificate, PrivateKey};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use x509_parser::prelude::*;

use crate::error::{Error, Result};

/// 可直接用于 TLS 握手的服务证书
#[derive(Clone)]
pub struct ServingCert {
    chain_der: Vec<Vec<u8>>,
    key_der: Vec<u8>,
    certified: Arc<CertifiedKey>,
    not_after: i64,
}

impl ServingCert {
    /// 从 PEM 证书链与私钥解析
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let chain_der = rustls_pemfile::certs(&mut &cert_pem[..])
            .map_err(|e| Error::Certificate(format!("could not read certificate PEM: {e}")))?;
        let leaf = chain_der
            .first()
            .ok_or_else(|| Error::Certificate("no certificate found in tls.crt".to_string()))?;
        let (_, parsed) = X509Certificate::from_der(leaf)
            .map_err(|e| Error::Certificate(format!("could not parse certificate: {e}")))?;
        let not_after = parsed.validity().not_after.timestamp();

        let key_der = rustls_pemfile::read_all(&mut &key_pem[..])
            .map_err(|e| Error::Certificate(format!("could not read private key PEM: {e}")))?
            .into_iter()
            .find_map(|item| match item {
                rustls_pemfile::Item::PKCS8Key(key)
                | rustls_pemfile::Item::RSAKey(key)
                | rustls_pemfile::Item::ECKey(key) => Some(key),
                _ => None,
            })
            .ok_or_else(|| Error::Certificate("no private key found in tls.key".to_string()))?;

        let signing_key = sign::any_supported_type(&PrivateKey(key_der.clone()))
            .map_err(|e| Error::Certificate(format!("unsupported private key: {e}")))?;
        let certified = CertifiedKey::new(
            chain_der.iter().cloned().map(Certificate).collect(),
            signing_key,
        );

        Ok(Self {
            chain_der,
            key_der,
            certified: Arc::new(certified),
            not_after,
        })
    }

    /// 证书链（DER），叶子证书在前
    pub fn chain_der(&self) -> &[Vec<u8>] {
        &self.chain_der
    }

    /// rustls 使用的证书与签名密钥
    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        Arc::clone(&self.certified)
    }

    /// 叶子证书过期时间（Unix 秒）
    pub fn not_after(&self) -> i64 {
        self.not_after
    }
}

impl PartialEq for ServingCert {
    fn eq(&self, other: &Self) -> bool {
        self.chain_der == other.chain_der && self.key_der == other.key_der
    }
}

impl Eq for ServingCert {}

impl fmt::Debug for ServingCert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServingCert")
            .field("chain_len", &self.chain_der.len())
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

/// 签发者主机名到服务证书的映射
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssuerHostCertMap {
    entries: BTreeMap<IssuerHost, Arc<ServingCert>>,
}

impl IssuerHostCertMap {
    /// 创建空映射
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入一项；同一主机名的旧证书被替换
    pub fn insert(&mut self, host: IssuerHost, cert: Arc<ServingCert>) -> Option<Arc<ServingCert>> {
        self.entries.insert(host, cert)
    }

    /// 按主机名查找
    pub fn get(&self, host: &IssuerHost) -> Option<&Arc<ServingCert>> {
        self.entries.get(host)
    }

    /// 全部主机名
    pub fn hosts(&self) -> impl Iterator<Item = &IssuerHost> {
        self.entries.keys()
    }

    /// 条目数量
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 证书观察者使用的写入能力
pub trait IssuerCertSetter: Send + Sync {
    /// 整体替换主机名映射
    fn set_issuer_host_to_cert_map(&self, map: IssuerHostCertMap);

    /// 设置或清除默认证书
    fn set_default_cert(&self, cert: Option<Arc<ServingCert>>);
}

/// 动态证书存储
#[derive(Debug, Default)]
pub struct DynamicCertStore {
    map: ArcSwap<IssuerHostCertMap>,
    default_cert: ArcSwapOption<ServingCert>,
}

impl DynamicCertStore {
    /// 创建空存储
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前映射的快照
    pub fn snapshot(&self) -> Arc<IssuerHostCertMap> {
        self.map.load_full()
    }

    /// 按 SNI 名称查找，不区分大小写
    pub fn lookup(&self, server_name: &str) -> Option<Arc<ServingCert>> {
        let host = IssuerHost::from_server_name(server_name);
        self.snapshot().get(&host).cloned()
    }

    /// 当前默认证书
    pub fn default_cert(&self) -> Option<Arc<ServingCert>> {
        self.default_cert.load_full()
    }
}

impl IssuerCertSetter for DynamicCertStore {
    fn set_issuer_host_to_cert_map(&self, map: IssuerHostCertMap) {
        self.map.store(Arc::new(map));
    }

    fn set_default_cert(&self, cert: Option<Arc<ServingCert>>) {
        self.default_cert.store(cert);
    }
}
