//! 自定义资源定义模块
//!
//! 汇总 Federa 注册到集群中的全部自定义资源，供 `federa-operator crds` 输出安装用的 YAML。

use anyhow::{Context, Result};
use federa_controller::crd::{FederationDomain, JWTAuthenticator, WebhookAuthenticator};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

/// 全部自定义资源定义
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        JWTAuthenticator::crd(),
        WebhookAuthenticator::crd(),
        FederationDomain::crd(),
    ]
}

/// 以多文档 YAML 输出全部自定义资源定义
pub fn crds_yaml() -> Result<String> {
    let mut out = String::new();
    for crd in all_crds() {
        let name = crd.metadata.name.clone().unwrap_or_default();
        let yaml = serde_yaml::to_string(&crd).with_context(|| format!("无法序列化 CRD {name}"))?;
        out.push_str("---\n");
        out.push_str(&yaml);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_crds_names() {
        let names: Vec<_> = all_crds()
            .into_iter()
            .filter_map(|crd| crd.metadata.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "jwtauthenticators.authentication.federa.dev",
                "webhookauthenticators.authentication.federa.dev",
                "federationdomains.config.federa.dev",
            ]
        );
    }

    #[test]
    fn test_crds_yaml_is_multi_document() {
        let yaml = crds_yaml().unwrap();
        assert_eq!(yaml.matches("---\n").count(), 3);
        assert!(yaml.contains("kind: CustomResourceDefinition"));
        assert!(yaml.contains("minLength: 1"));
    }
}
