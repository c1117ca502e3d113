//! 动态 TLS 证书模块
//!
//! - [`observer`]：从 Secret 与 FederationDomain 重建签发者证书映射
//! - [`store`]：写时复制的证书存储
//! - [`router`]：按连接选择证书，带自签名引导回退

pub mod observer;
pub mod router;
pub mod store;

pub use observer::{SecretError, TlsCertObserver, TlsCertSource};
pub use router::{BootstrapConnState, CertRouter, CertSelection, BOOTSTRAP_CERT_NAME};
pub use store::{DynamicCertStore, IssuerCertSetter, IssuerHostCertMap, ServingCert};
