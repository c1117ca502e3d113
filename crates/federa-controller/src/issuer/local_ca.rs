//! 进程内 CA 签发者
//!
//! 启动时生成一个 ECDSA P-256 自签名 CA，用它签发短期客户端证书：
//! CN 为用户名，O 为用户组，扩展用途为 clientAuth。作为签发链的最后一个回退。

use async_trait::async_trait;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose,
};
use std::time::Duration;
use tracing::info;

use super::{ClientCertIssuer, IssueError, IssuedCertPem};

/// 签发者名称
pub const LOCAL_CA_ISSUER_NAME: &str = "local CA";

/// 签发时间向前回拨，容忍时钟偏差
const BACKDATE: Duration = Duration::from_secs(5 * 60);

/// CA 证书有效期
const CA_VALIDITY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// 进程内 CA 签发者
pub struct LocalCaIssuer {
    ca_cert: Certificate,
    ca_key: KeyPair,
}

impl LocalCaIssuer {
    /// 生成新的 CA
    pub fn generate(common_name: &str) -> Result<Self, IssueError> {
        let ca_key = KeyPair::generate().map_err(backend)?;

        let mut params = CertificateParams::default();
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let (not_before, not_after) = validity(CA_VALIDITY);
        params.not_before = not_before;
        params.not_after = not_after;

        let ca_cert = params.self_signed(&ca_key).map_err(backend)?;
        info!(common_name, "已生成本地客户端证书 CA");

        Ok(Self { ca_cert, ca_key })
    }

    /// CA 证书 PEM，供验证方配置信任
    pub fn ca_cert_pem(&self) -> String {
        self.ca_cert.pem()
    }
}

impl std::fmt::Debug for LocalCaIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCaIssuer").finish_non_exhaustive()
    }
}

fn backend(e: rcgen::Error) -> IssueError {
    IssueError::Backend(e.to_string())
}

fn validity(ttl: Duration) -> (time::OffsetDateTime, time::OffsetDateTime) {
    let now = time::OffsetDateTime::now_utc();
    (now - BACKDATE, now + ttl)
}

#[async_trait]
impl ClientCertIssuer for LocalCaIssuer {
    fn name(&self) -> String {
        LOCAL_CA_ISSUER_NAME.to_string()
    }

    async fn issue_client_cert_pem(
        &self,
        username: &str,
        groups: &[String],
        ttl: Duration,
    ) -> Result<IssuedCertPem, IssueError> {
        if username.is_empty() {
            return Err(IssueError::Backend("username must not be empty".to_string()));
        }

        let key = KeyPair::generate().map_err(backend)?;

        let mut params = CertificateParams::default();
        params.distinguished_name.push(DnType::CommonName, username);
        if !groups.is_empty() {
            params
                .distinguished_name
                .push(DnType::OrganizationName, groups.join(","));
        }
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        let (not_before, not_after) = validity(ttl);
        params.not_before = not_before;
        params.not_after = not_after;

        let cert = params
            .signed_by(&key, &self.ca_cert, &self.ca_key)
            .map_err(backend)?;

        Ok(IssuedCertPem {
            cert_pem: cert.pem().into_bytes(),
            key_pem: key.serialize_pem().into_bytes(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use x509_parser::prelude::*;

    #[tokio::test]
    async fn test_issue_client_cert() {
        let issuer = LocalCaIssuer::generate("federa client CA").unwrap();
        let ttl = Duration::from_secs(5 * 60);

        let issued = issuer
            .issue_client_cert_pem("alice", &["admins".to_string(), "devs".to_string()], ttl)
            .await
            .unwrap();

        let block = ::pem::parse(&issued.cert_pem).unwrap();
        let (_, cert) = X509Certificate::from_der(block.contents()).unwrap();

        let cn = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok());
        assert_eq!(cn, Some("alice"));
        let org = cert
            .subject()
            .iter_organization()
            .next()
            .and_then(|o| o.as_str().ok());
        assert_eq!(org, Some("admins,devs"));

        let eku = cert.extended_key_usage().unwrap().unwrap();
        assert!(eku.value.client_auth);

        let validity = cert.validity();
        let lifetime = validity.not_after.timestamp() - validity.not_before.timestamp();
        assert!((lifetime - (ttl + BACKDATE).as_secs() as i64).abs() <= 2);

        let ca_block = ::pem::parse(issuer.ca_cert_pem()).unwrap();
        let (_, ca) = X509Certificate::from_der(ca_block.contents()).unwrap();
        assert_eq!(cert.issuer(), ca.subject());
        assert!(String::from_utf8(issued.key_pem).unwrap().contains("PRIVATE KEY"));
    }

    #[tokio::test]
    async fn test_empty_username_is_rejected() {
        let issuer = LocalCaIssuer::generate("federa client CA").unwrap();
        let err = issuer
            .issue_client_cert_pem("", &[], Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, IssueError::Backend(_)));
        assert_eq!(issuer.name(), LOCAL_CA_ISSUER_NAME);
    }
}
