//! JWT 认证器验证流程
//!
//! 阶段顺序固定：
//! 1. `TLSConfigurationValid`
//! 2. `IssuerURLValid`
//! 3. `DiscoveryURLValid`
//! 4. `JWKSURLValid`
//! 5. `JWKSFetchValid`
//! 6. `AuthenticatorValid`
//! 7. `Ready`
//!
//! 前两个阶段只检查 spec 本身，彼此独立；从第三个阶段开始，任何一个阶段失败
//! 都会让后续阶段保持 `Unknown/UnableToValidate`。

use federa_common::{Condition, ValidationOutcome};
use jsonwebtoken::jwk::{AlgorithmParameters, JwkSet, PublicKeyUse};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::AuthenticatedUser;
use crate::crd::{ClaimsSpec, JWTAuthenticatorSpec};
use crate::validation::{validate_tls_config, validate_url_condition, OidcProber, TYPE_TLS_CONFIGURATION_VALID};

/// 资源类型名称
pub const KIND: &str = "JWTAuthenticator";

pub const TYPE_ISSUER_URL_VALID: &str = "IssuerURLValid";
pub const TYPE_DISCOVERY_URL_VALID: &str = "DiscoveryURLValid";
pub const TYPE_JWKS_URL_VALID: &str = "JWKSURLValid";
pub const TYPE_JWKS_FETCH_VALID: &str = "JWKSFetchValid";
pub const TYPE_AUTHENTICATOR_VALID: &str = "AuthenticatorValid";

pub const REASON_INVALID_ISSUER_URL: &str = "InvalidIssuerURL";
pub const REASON_INVALID_DISCOVERY_PROBE: &str = "InvalidDiscoveryProbe";
pub const REASON_INVALID_JWKS_URL: &str = "InvalidJWKSURL";
pub const REASON_INVALID_JWKS_URI: &str = "InvalidJWKSURI";
pub const REASON_INVALID_AUTHENTICATOR: &str = "InvalidAuthenticator";

/// 除 `Ready` 以外的全部阶段
pub const STAGES: [&str; 6] = [
    TYPE_TLS_CONFIGURATION_VALID,
    TYPE_ISSUER_URL_VALID,
    TYPE_DISCOVERY_URL_VALID,
    TYPE_JWKS_URL_VALID,
    TYPE_JWKS_FETCH_VALID,
    TYPE_AUTHENTICATOR_VALID,
];

/// 认证器构造错误
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthenticatorError {
    /// JWKS 中没有可用于签名验证的密钥
    #[error("no usable signing keys in jwks")]
    NoUsableKeys,

    /// 声明映射无效
    #[error("invalid claims mapping: {0}")]
    InvalidClaims(String),
}

/// 令牌验证错误
#[derive(Error, Debug)]
pub enum TokenError {
    /// 令牌格式或签名无效
    #[error("invalid token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),

    /// 令牌使用了不接受的签名算法
    #[error("unsupported token signing algorithm {0:?}")]
    UnsupportedAlgorithm(Algorithm),

    /// 没有与令牌头匹配的密钥
    #[error("no key matches token header (kid {kid:?}, alg {alg:?})")]
    NoMatchingKey {
        /// 令牌头中的 kid
        kid: Option<String>,
        /// 令牌头中的算法
        alg: Algorithm,
    },

    /// 令牌缺少或包含错误类型的声明
    #[error("claim {claim:?} {reason}")]
    Claim {
        /// 声明名称
        claim: String,
        /// 原因
        reason: &'static str,
    },
}

/// 非对称密钥族；JWKS 是公开的，对称密钥（`kty: oct`）一律不接受
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyFamily {
    Rsa,
    Ec,
    Okp,
}

impl KeyFamily {
    fn of_params(params: &AlgorithmParameters) -> Option<Self> {
        match params {
            AlgorithmParameters::RSA(_) => Some(KeyFamily::Rsa),
            AlgorithmParameters::EllipticCurve(_) => Some(KeyFamily::Ec),
            AlgorithmParameters::OctetKeyPair(_) => Some(KeyFamily::Okp),
            AlgorithmParameters::OctetKey(_) => None,
        }
    }

    fn of_alg(alg: Algorithm) -> Option<Self> {
        match alg {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => None,
            Algorithm::ES256 | Algorithm::ES384 => Some(KeyFamily::Ec),
            Algorithm::EdDSA => Some(KeyFamily::Okp),
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => Some(KeyFamily::Rsa),
        }
    }
}

struct VerificationKey {
    kid: Option<String>,
    family: KeyFamily,
    key: DecodingKey,
}

/// 内存中的 JWT 认证器
///
/// 绑定签发者、受众、声明映射以及从 JWKS 构造的验证密钥。
pub struct JwtAuthenticator {
    issuer: String,
    audience: String,
    username_claim: String,
    groups_claim: String,
    keys: Vec<VerificationKey>,
}

impl std::fmt::Debug for JwtAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtAuthenticator")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("username_claim", &self.username_claim)
            .field("groups_claim", &self.groups_claim)
            .field("keys", &self.keys.len())
            .finish()
    }
}

impl JwtAuthenticator {
    /// 构造认证器
    pub fn new(
        issuer: &str,
        audience: &str,
        claims: &ClaimsSpec,
        jwks: &JwkSet,
    ) -> Result<Self, AuthenticatorError> {
        let username_claim = claims.username().trim();
        let groups_claim = claims.groups().trim();
        if username_claim.is_empty() {
            return Err(AuthenticatorError::InvalidClaims(
                "username claim must not be empty".to_string(),
            ));
        }
        if groups_claim.is_empty() {
            return Err(AuthenticatorError::InvalidClaims(
                "groups claim must not be empty".to_string(),
            ));
        }

        let keys: Vec<_> = jwks
            .keys
            .iter()
            .filter(|jwk| !matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)))
            .filter_map(|jwk| {
                let Some(family) = KeyFamily::of_params(&jwk.algorithm) else {
                    debug!(kid = ?jwk.common.key_id, "跳过对称 JWK");
                    return None;
                };
                match DecodingKey::from_jwk(jwk) {
                    Ok(key) => Some(VerificationKey {
                        kid: jwk.common.key_id.clone(),
                        family,
                        key,
                    }),
                    Err(e) => {
                        debug!(kid = ?jwk.common.key_id, error = %e, "跳过无法使用的 JWK");
                        None
                    }
                }
            })
            .collect();

        if keys.is_empty() {
            return Err(AuthenticatorError::NoUsableKeys);
        }

        Ok(Self {
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            username_claim: username_claim.to_string(),
            groups_claim: groups_claim.to_string(),
            keys,
        })
    }

    /// 签发者
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// 受众
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// 验证令牌并按声明映射提取用户信息
    pub fn authenticate(&self, token: &str) -> Result<AuthenticatedUser, TokenError> {
        let header = decode_header(token)?;
        let family =
            KeyFamily::of_alg(header.alg).ok_or(TokenError::UnsupportedAlgorithm(header.alg))?;

        let candidates = self.keys.iter().filter(|k| {
            k.family == family
                && match (&header.kid, &k.kid) {
                    (Some(want), Some(have)) => want == have,
                    _ => true,
                }
        });

        let mut validation = Validation::new(header.alg);
        validation.set_audience(&[&self.audience]);
        validation.set_issuer(&[&self.issuer]);

        let mut last_error = None;
        for candidate in candidates {
            match decode::<Value>(token, &candidate.key, &validation) {
                Ok(data) => return self.user_from_claims(&data.claims),
                Err(e) => last_error = Some(e),
            }
        }

        match last_error {
            Some(e) => Err(TokenError::Invalid(e)),
            None => Err(TokenError::NoMatchingKey {
                kid: header.kid,
                alg: header.alg,
            }),
        }
    }

    fn user_from_claims(&self, claims: &Value) -> Result<AuthenticatedUser, TokenError> {
        let username = match claims.get(&self.username_claim) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(_) => {
                return Err(TokenError::Claim {
                    claim: self.username_claim.clone(),
                    reason: "must be a non-empty string",
                })
            }
            None => {
                return Err(TokenError::Claim {
                    claim: self.username_claim.clone(),
                    reason: "is missing",
                })
            }
        };

        let groups = match claims.get(&self.groups_claim) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| TokenError::Claim {
                    claim: self.groups_claim.clone(),
                    reason: "must be a string or a list of strings",
                })?,
            Some(_) => {
                return Err(TokenError::Claim {
                    claim: self.groups_claim.clone(),
                    reason: "must be a string or a list of strings",
                })
            }
        };

        Ok(AuthenticatedUser { username, groups })
    }
}

/// 运行完整的验证流程
///
/// 返回的结果已经计算了 `Ready`；只有全部阶段通过时才会返回认证器。
pub async fn validate_jwt_authenticator(
    spec: &JWTAuthenticatorSpec,
    prober: &dyn OidcProber,
) -> (ValidationOutcome, Option<JwtAuthenticator>) {
    let mut outcome = ValidationOutcome::pending(&STAGES);
    let authenticator = run_stages(spec, prober, &mut outcome).await;
    let outcome = outcome.finish(KIND);
    let authenticator = authenticator.filter(|_| outcome.is_ready());
    (outcome, authenticator)
}

async fn run_stages(
    spec: &JWTAuthenticatorSpec,
    prober: &dyn OidcProber,
    outcome: &mut ValidationOutcome,
) -> Option<JwtAuthenticator> {
    let (tls_condition, trust) = validate_tls_config(spec.tls.as_ref());
    outcome.set(tls_condition);

    let (issuer_condition, issuer) = validate_url_condition(
        TYPE_ISSUER_URL_VALID,
        REASON_INVALID_ISSUER_URL,
        "spec.issuer",
        &spec.issuer,
    );
    outcome.set(issuer_condition);

    let trust = trust?;
    let issuer = issuer?;

    let document = match prober.discover(&issuer, &trust).await {
        Ok(document) => document,
        Err(e) => {
            outcome.set(Condition::failure(
                TYPE_DISCOVERY_URL_VALID,
                REASON_INVALID_DISCOVERY_PROBE,
                format!("could not perform oidc discovery on provider issuer: {e}"),
            ));
            return None;
        }
    };
    if document.issuer.trim_end_matches('/') != spec.issuer.trim_end_matches('/') {
        outcome.set(Condition::failure(
            TYPE_DISCOVERY_URL_VALID,
            REASON_INVALID_DISCOVERY_PROBE,
            format!(
                "could not perform oidc discovery on provider issuer: issuer did not match the issuer returned by provider, expected {:?} got {:?}",
                spec.issuer, document.issuer
            ),
        ));
        return None;
    }
    outcome.set(Condition::success(
        TYPE_DISCOVERY_URL_VALID,
        "discovery performed successfully",
    ));

    let (jwks_condition, jwks_uri) = match document.jwks_uri.as_deref().filter(|u| !u.is_empty()) {
        Some(raw) => validate_url_condition(
            TYPE_JWKS_URL_VALID,
            REASON_INVALID_JWKS_URL,
            "jwks_uri",
            raw,
        ),
        None => (
            Condition::failure(
                TYPE_JWKS_URL_VALID,
                REASON_INVALID_JWKS_URL,
                "could not get provider jwks_uri from discovery document",
            ),
            None,
        ),
    };
    outcome.set(jwks_condition);
    let jwks_uri = jwks_uri?;

    let jwks = match prober.fetch_jwks(&jwks_uri, &trust).await {
        Ok(jwks) if jwks.keys.is_empty() => {
            outcome.set(Condition::failure(
                TYPE_JWKS_FETCH_VALID,
                REASON_INVALID_JWKS_URI,
                "could not fetch keys from jwks_uri: jwks_uri returned no keys",
            ));
            return None;
        }
        Ok(jwks) => jwks,
        Err(e) => {
            outcome.set(Condition::failure(
                TYPE_JWKS_FETCH_VALID,
                REASON_INVALID_JWKS_URI,
                format!("could not fetch keys from jwks_uri: {e}"),
            ));
            return None;
        }
    };
    outcome.set(Condition::success(TYPE_JWKS_FETCH_VALID, "successfully fetched jwks"));

    match JwtAuthenticator::new(&spec.issuer, &spec.audience, &spec.claims, &jwks) {
        Ok(authenticator) => {
            outcome.set(Condition::success(
                TYPE_AUTHENTICATOR_VALID,
                "authenticator initialized",
            ));
            Some(authenticator)
        }
        Err(e) => {
            outcome.set(Condition::failure(
                TYPE_AUTHENTICATOR_VALID,
                REASON_INVALID_AUTHENTICATOR,
                format!("could not initialize jwt authenticator: {e}"),
            ));
            None
        }
    }
}
