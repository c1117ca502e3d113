//! 资源存储适配模块
//!
//! 把 kube 的 reflector 缓存与 API 客户端适配为控制平面所需的窄接口：
//! 认证器从缓存读取 spec、通过 status 子资源写回状态；
//! 证书观察者从缓存列出联邦域并读取 TLS Secret。

use async_trait::async_trait;
use federa_common::{FederationDomainRef, TlsSecret};
use federa_controller::authenticator::{AuthenticatorStore, StoredAuthenticator};
use federa_controller::crd::{
    AuthenticatorStatus, FederationDomain, JWTAuthenticator, JWTAuthenticatorSpec,
    WebhookAuthenticator, WebhookAuthenticatorSpec,
};
use federa_controller::tlscert::{SecretError, TlsCertSource};
use federa_controller::{Error, Result};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::debug;

/// 可被认证器协调器读取的集群级资源
pub trait AuthenticatorResource:
    Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
    /// spec 类型
    type Spec: Clone + Send + Sync + 'static;

    /// 读取 spec、status 与 generation
    fn snapshot(&self) -> StoredAuthenticator<Self::Spec>;
}

impl AuthenticatorResource for JWTAuthenticator {
    type Spec = JWTAuthenticatorSpec;

    fn snapshot(&self) -> StoredAuthenticator<Self::Spec> {
        StoredAuthenticator {
            spec: self.spec.clone(),
            status: self.status.clone(),
            generation: self.metadata.generation,
        }
    }
}

impl AuthenticatorResource for WebhookAuthenticator {
    type Spec = WebhookAuthenticatorSpec;

    fn snapshot(&self) -> StoredAuthenticator<Self::Spec> {
        StoredAuthenticator {
            spec: self.spec.clone(),
            status: self.status.clone(),
            generation: self.metadata.generation,
        }
    }
}

/// 基于 reflector 缓存与 API 客户端的认证器存储
pub struct KubeAuthenticatorStore<K: AuthenticatorResource> {
    api: Api<K>,
    reader: Store<K>,
}

impl<K: AuthenticatorResource> KubeAuthenticatorStore<K> {
    /// 创建存储
    pub fn new(api: Api<K>, reader: Store<K>) -> Self {
        Self { api, reader }
    }
}

#[async_trait]
impl<K: AuthenticatorResource> AuthenticatorStore<K::Spec> for KubeAuthenticatorStore<K> {
    async fn get(&self, name: &str) -> Result<Option<StoredAuthenticator<K::Spec>>> {
        Ok(self
            .reader
            .get(&ObjectRef::new(name))
            .map(|obj| obj.snapshot()))
    }

    async fn patch_status(&self, name: &str, status: &AuthenticatorStatus) -> Result<()> {
        let patch = serde_json::json!({ "status": status });
        self.api
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::StatusPatch {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        debug!(kind = %K::kind(&()), name, "已写回状态");
        Ok(())
    }
}

/// 基于 reflector 缓存的证书来源
///
/// Secret 缓存只包含 `kubernetes.io/tls` 类型的 Secret，其他类型视为不存在。
#[derive(Clone)]
pub struct KubeTlsCertSource {
    domains: Store<FederationDomain>,
    secrets: Store<Secret>,
}

impl KubeTlsCertSource {
    /// 创建证书来源
    pub fn new(domains: Store<FederationDomain>, secrets: Store<Secret>) -> Self {
        Self { domains, secrets }
    }
}

#[async_trait]
impl TlsCertSource for KubeTlsCertSource {
    async fn list_federation_domains(&self, namespace: &str) -> Result<Vec<FederationDomainRef>> {
        Ok(self
            .domains
            .state()
            .iter()
            .filter(|fd| fd.namespace().as_deref() == Some(namespace))
            .map(|fd| FederationDomainRef::from(fd.as_ref()))
            .collect())
    }

    async fn get_tls_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> std::result::Result<TlsSecret, SecretError> {
        let secret = self
            .secrets
            .get(&ObjectRef::new(name).within(namespace))
            .ok_or_else(|| SecretError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;

        let data: BTreeMap<String, Vec<u8>> = secret
            .data
            .clone()
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, value.0))
            .collect();

        TlsSecret::from_data(name, &data).map_err(|e| SecretError::Invalid {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use federa_controller::crd::{FederationDomainSpec, FederationDomainTlsSpec};
    use k8s_openapi::ByteString;
    use kube::runtime::reflector;
    use kube::runtime::watcher;

    const NAMESPACE: &str = "federa-supervisor";

    fn domain(name: &str, namespace: &str, issuer: &str, secret: Option<&str>) -> FederationDomain {
        let mut fd = FederationDomain::new(
            name,
            FederationDomainSpec {
                issuer: issuer.to_string(),
                tls: secret.map(|s| FederationDomainTlsSpec {
                    secret_name: s.to_string(),
                }),
            },
        );
        fd.metadata.namespace = Some(namespace.to_string());
        fd
    }

    fn tls_secret(name: &str, data: &[(&str, &[u8])]) -> Secret {
        let mut secret = Secret::default();
        secret.metadata.name = Some(name.to_string());
        secret.metadata.namespace = Some(NAMESPACE.to_string());
        secret.type_ = Some(federa_common::TLS_SECRET_TYPE.to_string());
        secret.data = Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.to_vec())))
                .collect(),
        );
        secret
    }

    fn source(domains: Vec<FederationDomain>, secrets: Vec<Secret>) -> KubeTlsCertSource {
        let (domain_reader, mut domain_writer) = reflector::store();
        domain_writer.apply_watcher_event(&watcher::Event::Restarted(domains));
        let (secret_reader, mut secret_writer) = reflector::store();
        secret_writer.apply_watcher_event(&watcher::Event::Restarted(secrets));
        KubeTlsCertSource::new(domain_reader, secret_reader)
    }

    #[tokio::test]
    async fn test_lists_only_requested_namespace() {
        let source = source(
            vec![
                domain("a", NAMESPACE, "https://a.example.com", Some("a-tls")),
                domain("b", "other", "https://b.example.com", None),
            ],
            vec![],
        );

        let domains = source.list_federation_domains(NAMESPACE).await.unwrap();
        assert_eq!(domains.len(), 1);
        assert_eq!(domains[0].name, "a");
        assert_eq!(domains[0].tls_secret_name.as_deref(), Some("a-tls"));
    }

    #[tokio::test]
    async fn test_secret_lookup() {
        let source = source(
            vec![],
            vec![
                tls_secret("serving", &[("tls.crt", b"cert"), ("tls.key", b"key")]),
                tls_secret("broken", &[("tls.crt", b"cert")]),
            ],
        );

        let secret = source.get_tls_secret(NAMESPACE, "serving").await.unwrap();
        assert_eq!(secret.cert_pem, b"cert");

        assert!(matches!(
            source.get_tls_secret(NAMESPACE, "broken").await,
            Err(SecretError::Invalid { .. })
        ));
        assert_eq!(
            source.get_tls_secret(NAMESPACE, "missing").await,
            Err(SecretError::NotFound {
                namespace: NAMESPACE.to_string(),
                name: "missing".to_string(),
            })
        );
    }

    #[test]
    fn test_snapshot_carries_generation() {
        let mut authenticator = JWTAuthenticator::new(
            "jwt",
            JWTAuthenticatorSpec {
                issuer: "https://issuer.example.com".to_string(),
                audience: "fake-audience".to_string(),
                claims: Default::default(),
                tls: None,
            },
        );
        authenticator.metadata.generation = Some(3);

        let stored = authenticator.snapshot();
        assert_eq!(stored.generation, Some(3));
        assert_eq!(stored.spec.audience, "fake-audience");
        assert!(stored.status.is_none());
    }
}
