//! 验证探针模块
//!
//! 每个探针都是独立、可组合的检查，消费前一阶段的结果并产出一个条件。
//! 纯函数探针（TLS 配置、URL 形状）在本模块中实现；需要网络的探针
//! （OIDC 发现、JWKS 获取、webhook 拨号）通过 [`probe`] 中的 trait 注入。

pub mod probe;
pub mod tls;

pub use probe::{DiscoveryDocument, HttpProber, OidcProber, ProbeError, WebhookDialer};
pub use tls::{validate_tls_config, TrustBundle, TYPE_TLS_CONFIGURATION_VALID};

use federa_common::Condition;
use url::Url;

/// 解析并检查一个必须为 https 的绝对 URL
///
/// `field` 为出错时写入消息的字段路径，例如 `spec.issuer`。
pub fn parse_https_url(field: &str, raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("{field} URL {raw:?} is invalid: {e}"))?;

    if url.scheme() != "https" {
        return Err(format!(
            "{field} URL {raw:?} has invalid scheme {:?}, require 'https'",
            url.scheme()
        ));
    }
    if url.host_str().is_none() {
        return Err(format!("{field} URL {raw:?} has no host"));
    }
    Ok(url)
}

/// 生成一个 URL 检查阶段的条件
pub fn validate_url_condition(
    type_: &str,
    reason: &str,
    field: &str,
    raw: &str,
) -> (Condition, Option<Url>) {
    match parse_https_url(field, raw) {
        Ok(url) => (
            Condition::success(type_, format!("{field} is a valid URL")),
            Some(url),
        ),
        Err(message) => (Condition::failure(type_, reason, message), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://issuer.example.com", true)]
    #[case("https://issuer.example.com:8443/path", true)]
    #[case("http://issuer.example.com", false)]
    #[case("", false)]
    #[case("issuer.example.com", false)]
    #[case("https://", false)]
    fn test_parse_https_url(#[case] raw: &str, #[case] valid: bool) {
        assert_eq!(parse_https_url("spec.issuer", raw).is_ok(), valid, "{raw}");
    }

    #[test]
    fn test_url_condition_message() {
        let (condition, url) =
            validate_url_condition("IssuerURLValid", "InvalidIssuerURL", "spec.issuer", "");
        assert!(url.is_none());
        assert_eq!(condition.reason, "InvalidIssuerURL");
        assert!(condition.message.starts_with("spec.issuer URL \"\" is invalid"));
    }
}
