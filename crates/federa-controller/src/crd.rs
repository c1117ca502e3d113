//! 自定义资源定义模块
//!
//! 认证器（JWTAuthenticator、WebhookAuthenticator）为集群级资源，
//! 联邦域（FederationDomain）为命名空间级资源。控制平面只读取 spec，
//! 并且只通过 status 子资源写回验证结果。

use federa_common::{Condition, FederationDomainRef, Phase};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// 默认用户名声明
pub const DEFAULT_USERNAME_CLAIM: &str = "username";

/// 默认用户组声明
pub const DEFAULT_GROUPS_CLAIM: &str = "groups";

/// JWT 认证器规范
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "authentication.federa.dev",
    version = "v1alpha1",
    kind = "JWTAuthenticator",
    plural = "jwtauthenticators",
    status = "AuthenticatorStatus",
    category = "federa",
    category = "authenticator",
    printcolumn = r#"{"name":"Issuer","type":"string","jsonPath":".spec.issuer"}"#,
    printcolumn = r#"{"name":"Audience","type":"string","jsonPath":".spec.audience"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct JWTAuthenticatorSpec {
    /// OIDC 签发者 URL，必须为 https
    #[schemars(length(min = 1), regex(pattern = r"^https://"))]
    pub issuer: String,

    /// 令牌中必须包含的受众
    #[schemars(length(min = 1))]
    pub audience: String,

    /// 声明映射
    #[serde(default)]
    pub claims: ClaimsSpec,

    /// 访问签发者时使用的 TLS 配置
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSpec>,
}

/// 声明映射
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClaimsSpec {
    /// 作为用户名的声明，默认 `username`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_claim: Option<String>,

    /// 作为用户组的声明，默认 `groups`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups_claim: Option<String>,
}

impl ClaimsSpec {
    /// 生效的用户名声明
    pub fn username(&self) -> &str {
        self.username_claim.as_deref().unwrap_or(DEFAULT_USERNAME_CLAIM)
    }

    /// 生效的用户组声明
    pub fn groups(&self) -> &str {
        self.groups_claim.as_deref().unwrap_or(DEFAULT_GROUPS_CLAIM)
    }
}

/// TLS 配置
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsSpec {
    /// base64 编码的 PEM CA 证书包
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority_data: Option<String>,
}

/// Webhook 认证器规范
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "authentication.federa.dev",
    version = "v1alpha1",
    kind = "WebhookAuthenticator",
    plural = "webhookauthenticators",
    status = "AuthenticatorStatus",
    category = "federa",
    category = "authenticator",
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".spec.endpoint"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAuthenticatorSpec {
    /// Webhook 地址，必须为 https
    #[schemars(length(min = 1), regex(pattern = r"^https://"))]
    pub endpoint: String,

    /// 访问 webhook 时使用的 TLS 配置
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSpec>,
}

/// 认证器状态
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorStatus {
    /// 全部条件
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// 整体阶段
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
}

/// 联邦域规范
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "config.federa.dev",
    version = "v1alpha1",
    kind = "FederationDomain",
    plural = "federationdomains",
    namespaced,
    category = "federa",
    printcolumn = r#"{"name":"Issuer","type":"string","jsonPath":".spec.issuer"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FederationDomainSpec {
    /// 该联邦域的签发者 URL
    #[schemars(length(min = 1))]
    pub issuer: String,

    /// 服务该签发者时使用的 TLS 证书
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<FederationDomainTlsSpec>,
}

/// 联邦域 TLS 配置
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FederationDomainTlsSpec {
    /// 同命名空间中 `kubernetes.io/tls` 类型 Secret 的名称
    pub secret_name: String,
}

impl From<&FederationDomain> for FederationDomainRef {
    fn from(fd: &FederationDomain) -> Self {
        Self {
            name: fd.name_any(),
            issuer: fd.spec.issuer.clone(),
            tls_secret_name: fd
                .spec
                .tls
                .as_ref()
                .map(|tls| tls.secret_name.clone())
                .filter(|name| !name.is_empty()),
        }
    }
}
