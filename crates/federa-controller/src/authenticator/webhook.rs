//! Webhook 认证器验证流程
//!
//! 阶段顺序：`TLSConfigurationValid`、`EndpointURLValid`、`WebhookConnectionValid`、
//! `AuthenticatorValid`，最后计算 `Ready`。短路规则与 JWT 认证器相同。

use federa_common::{Condition, ValidationOutcome};
use k8s_openapi::api::authentication::v1::{TokenReview, TokenReviewSpec};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::AuthenticatedUser;
use crate::crd::WebhookAuthenticatorSpec;
use crate::utils::error_chain;
use crate::validation::probe::build_http_client;
use crate::validation::{
    validate_tls_config, validate_url_condition, TrustBundle, WebhookDialer,
    TYPE_TLS_CONFIGURATION_VALID,
};

/// 资源类型名称
pub const KIND: &str = "WebhookAuthenticator";

pub const TYPE_ENDPOINT_URL_VALID: &str = "EndpointURLValid";
pub const TYPE_WEBHOOK_CONNECTION_VALID: &str = "WebhookConnectionValid";
pub const TYPE_AUTHENTICATOR_VALID: &str = "AuthenticatorValid";

pub const REASON_INVALID_ENDPOINT_URL: &str = "InvalidEndpointURL";
pub const REASON_UNABLE_TO_DIAL_SERVER: &str = "UnableToDialServer";
pub const REASON_UNABLE_TO_CREATE_CLIENT: &str = "UnableToCreateClient";

/// 除 `Ready` 以外的全部阶段
pub const STAGES: [&str; 4] = [
    TYPE_TLS_CONFIGURATION_VALID,
    TYPE_ENDPOINT_URL_VALID,
    TYPE_WEBHOOK_CONNECTION_VALID,
    TYPE_AUTHENTICATOR_VALID,
];

/// Webhook 认证错误
#[derive(Error, Debug)]
pub enum WebhookError {
    /// 请求失败
    #[error("token review request failed: {0}")]
    Request(String),

    /// 服务端返回非 2xx
    #[error("webhook responded with status {0}")]
    Status(u16),

    /// 服务端拒绝了令牌
    #[error("token rejected: {0}")]
    Rejected(String),
}

/// 通过 TokenReview webhook 认证令牌的认证器
#[derive(Debug, Clone)]
pub struct WebhookAuthenticator {
    endpoint: Url,
    client: reqwest::Client,
}

impl WebhookAuthenticator {
    /// 构造认证器
    pub fn new(endpoint: Url, trust: &TrustBundle, timeout: Duration) -> Result<Self, String> {
        let client = build_http_client(trust, timeout).map_err(|e| e.to_string())?;
        Ok(Self { endpoint, client })
    }

    /// Webhook 地址
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// 发送 TokenReview 请求并返回认证结果
    pub async fn authenticate(&self, token: &str) -> Result<AuthenticatedUser, WebhookError> {
        let review = TokenReview {
            spec: TokenReviewSpec {
                token: Some(token.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&review)
            .send()
            .await
            .map_err(|e| WebhookError::Request(error_chain(&e)))?;
        if !response.status().is_success() {
            return Err(WebhookError::Status(response.status().as_u16()));
        }

        let review: TokenReview = response
            .json()
            .await
            .map_err(|e| WebhookError::Request(error_chain(&e)))?;
        let status = review.status.unwrap_or_default();

        if status.authenticated != Some(true) {
            return Err(WebhookError::Rejected(
                status.error.unwrap_or_else(|| "not authenticated".to_string()),
            ));
        }

        let user = status.user.unwrap_or_default();
        match user.username.filter(|u| !u.is_empty()) {
            Some(username) => Ok(AuthenticatedUser {
                username,
                groups: user.groups.unwrap_or_default(),
            }),
            None => Err(WebhookError::Rejected("response has no username".to_string())),
        }
    }
}

/// 运行完整的验证流程
pub async fn validate_webhook_authenticator(
    spec: &WebhookAuthenticatorSpec,
    dialer: &dyn WebhookDialer,
    timeout: Duration,
) -> (ValidationOutcome, Option<WebhookAuthenticator>) {
    let mut outcome = ValidationOutcome::pending(&STAGES);
    let authenticator = run_stages(spec, dialer, timeout, &mut outcome).await;
    let outcome = outcome.finish(KIND);
    let authenticator = authenticator.filter(|_| outcome.is_ready());
    (outcome, authenticator)
}

async fn run_stages(
    spec: &WebhookAuthenticatorSpec,
    dialer: &dyn WebhookDialer,
    timeout: Duration,
    outcome: &mut ValidationOutcome,
) -> Option<WebhookAuthenticator> {
    let (tls_condition, trust) = validate_tls_config(spec.tls.as_ref());
    outcome.set(tls_condition);

    let (endpoint_condition, endpoint) = validate_url_condition(
        TYPE_ENDPOINT_URL_VALID,
        REASON_INVALID_ENDPOINT_URL,
        "spec.endpoint",
        &spec.endpoint,
    );
    outcome.set(endpoint_condition);

    let trust = trust?;
    let endpoint = endpoint?;

    if let Err(e) = dialer.dial(&endpoint, &trust).await {
        outcome.set(Condition::failure(
            TYPE_WEBHOOK_CONNECTION_VALID,
            REASON_UNABLE_TO_DIAL_SERVER,
            format!("cannot dial server: {e}"),
        ));
        return None;
    }
    outcome.set(Condition::success(
        TYPE_WEBHOOK_CONNECTION_VALID,
        "successfully dialed webhook server",
    ));

    match WebhookAuthenticator::new(endpoint, &trust, timeout) {
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
                REASON_UNABLE_TO_CREATE_CLIENT,
                format!("unable to create client for this webhook: {e}"),
            ));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::probe::MockWebhookDialer;
    use crate::validation::ProbeError;
    use federa_common::{ConditionStatus, Phase, TYPE_READY};

    fn spec(endpoint: &str) -> WebhookAuthenticatorSpec {
        WebhookAuthenticatorSpec {
            endpoint: endpoint.to_string(),
            tls: None,
        }
    }

    #[tokio::test]
    async fn test_webhook_ready() {
        let mut dialer = MockWebhookDialer::new();
        dialer.expect_dial().times(1).returning(|_, _| Ok(()));

        let (outcome, authenticator) = validate_webhook_authenticator(
            &spec("https://webhook.example.com/authenticate"),
            &dialer,
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(outcome.phase, Phase::Ready);
        assert_eq!(outcome.conditions.len(), 5);
        assert_eq!(
            outcome.conditions.get(TYPE_WEBHOOK_CONNECTION_VALID).unwrap().message,
            "successfully dialed webhook server"
        );
        assert_eq!(
            authenticator.unwrap().endpoint().as_str(),
            "https://webhook.example.com/authenticate"
        );
    }

    #[tokio::test]
    async fn test_http_endpoint_is_rejected() {
        let mut dialer = MockWebhookDialer::new();
        dialer.expect_dial().never();

        let (outcome, _) = validate_webhook_authenticator(
            &spec("http://webhook.example.com"),
            &dialer,
            Duration::from_secs(5),
        )
        .await;

        let endpoint = outcome.conditions.get(TYPE_ENDPOINT_URL_VALID).unwrap();
        assert_eq!(endpoint.reason, REASON_INVALID_ENDPOINT_URL);
        assert_eq!(
            outcome.conditions.get(TYPE_WEBHOOK_CONNECTION_VALID).unwrap().status,
            ConditionStatus::Unknown
        );
    }

    #[tokio::test]
    async fn test_dial_failure() {
        let mut dialer = MockWebhookDialer::new();
        dialer
            .expect_dial()
            .returning(|_, _| Err(ProbeError::Transport("connection refused".to_string())));

        let (outcome, authenticator) = validate_webhook_authenticator(
            &spec("https://webhook.example.com"),
            &dialer,
            Duration::from_secs(5),
        )
        .await;

        assert!(authenticator.is_none());
        let dial = outcome.conditions.get(TYPE_WEBHOOK_CONNECTION_VALID).unwrap();
        assert_eq!(dial.reason, REASON_UNABLE_TO_DIAL_SERVER);
        assert!(dial.message.contains("connection refused"));
        assert_eq!(
            outcome.conditions.get(TYPE_READY).unwrap().message,
            "the WebhookAuthenticator is not ready: see other conditions for details"
        );
    }
}
