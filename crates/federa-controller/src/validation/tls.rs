//! TLS 配置探针
//!
//! 解析资源中可选的 CA 证书包：先 base64 解码，再逐个解析 PEM 中的 X.509 证书。

use base64::Engine;
use federa_common::Condition;
use x509_parser::prelude::*;

use crate::crd::TlsSpec;

/// TLS 配置条件类型
pub const TYPE_TLS_CONFIGURATION_VALID: &str = "TLSConfigurationValid";

/// TLS 配置无效的原因
pub const REASON_INVALID_TLS_CONFIGURATION: &str = "InvalidTLSConfiguration";

/// 解析后的信任根（DER）
///
/// 为空表示使用系统内置的信任根。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustBundle {
    roots: Vec<Vec<u8>>,
}

impl TrustBundle {
    /// 从 base64 编码的 PEM 证书包解析
    pub fn from_base64(data: &str) -> Result<Self, String> {
        let pem_bytes = base64::engine::general_purpose::STANDARD
            .decode(data.trim())
            .map_err(|e| e.to_string())?;
        Self::from_pem(&pem_bytes)
    }

    /// 从 PEM 证书包解析
    pub fn from_pem(pem_bytes: &[u8]) -> Result<Self, String> {
        let blocks = ::pem::parse_many(pem_bytes).map_err(|e| e.to_string())?;

        let mut roots = Vec::new();
        for block in blocks.iter().filter(|b| b.tag() == "CERTIFICATE") {
            X509Certificate::from_der(block.contents())
                .map_err(|e| format!("could not parse certificate: {e}"))?;
            roots.push(block.contents().to_vec());
        }

        if roots.is_empty() {
            return Err("no certificates found in CA bundle".to_string());
        }
        Ok(Self { roots })
    }

    /// DER 编码的信任根
    pub fn roots(&self) -> &[Vec<u8>] {
        &self.roots
    }

    /// 是否未指定信任根
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

/// 验证可选的 TLS 配置
pub fn validate_tls_config(tls: Option<&TlsSpec>) -> (Condition, Option<TrustBundle>) {
    let data = tls
        .and_then(|t| t.certificate_authority_data.as_deref())
        .filter(|d| !d.trim().is_empty());

    match data {
        None => (
            Condition::success(TYPE_TLS_CONFIGURATION_VALID, "no CA bundle specified"),
            Some(TrustBundle::default()),
        ),
        Some(data) => match TrustBundle::from_base64(data) {
            Ok(bundle) => (
                Condition::success(
                    TYPE_TLS_CONFIGURATION_VALID,
                    "successfully parsed specified CA bundle",
                ),
                Some(bundle),
            ),
            Err(e) => (
                Condition::failure(
                    TYPE_TLS_CONFIGURATION_VALID,
                    REASON_INVALID_TLS_CONFIGURATION,
                    format!("spec.tls.certificateAuthorityData is invalid: {e}"),
                ),
                None,
            ),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use federa_common::ConditionStatus;

    fn test_ca_pem() -> String {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::default();
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params.self_signed(&key).unwrap().pem()
    }

    fn spec(data: &str) -> TlsSpec {
        TlsSpec {
            certificate_authority_data: Some(data.to_string()),
        }
    }

    #[test]
    fn test_no_bundle() {
        let (condition, bundle) = validate_tls_config(None);
        assert!(condition.is_true());
        assert_eq!(condition.message, "no CA bundle specified");
        assert!(bundle.unwrap().is_empty());

        let (condition, _) = validate_tls_config(Some(&TlsSpec::default()));
        assert_eq!(condition.message, "no CA bundle specified");
    }

    #[test]
    fn test_valid_bundle() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(test_ca_pem());
        let (condition, bundle) = validate_tls_config(Some(&spec(&encoded)));

        assert!(condition.is_true());
        assert_eq!(condition.message, "successfully parsed specified CA bundle");
        assert_eq!(bundle.unwrap().roots().len(), 1);
    }

    #[test]
    fn test_invalid_base64() {
        let (condition, bundle) = validate_tls_config(Some(&spec("invalid base64-encoded data")));

        assert!(bundle.is_none());
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason, REASON_INVALID_TLS_CONFIGURATION);
        assert!(condition
            .message
            .starts_with("spec.tls.certificateAuthorityData is invalid: "));
    }

    #[test]
    fn test_base64_without_certificates() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("not a pem bundle");
        let (condition, bundle) = validate_tls_config(Some(&spec(&encoded)));

        assert!(bundle.is_none());
        assert_eq!(condition.status, ConditionStatus::False);
    }

    #[test]
    fn test_corrupt_certificate() {
        let bad = ::pem::encode(&::pem::Pem::new("CERTIFICATE", vec![1, 2, 3]));
        let encoded = base64::engine::general_purpose::STANDARD.encode(bad);
        let (condition, _) = validate_tls_config(Some(&spec(&encoded)));

        assert_eq!(condition.status, ConditionStatus::False);
        assert!(condition.message.contains("could not parse certificate"));
    }
}
