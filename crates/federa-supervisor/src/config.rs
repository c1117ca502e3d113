//! 配置管理模块
//!
//! 该模块负责加载 Supervisor 的配置文件，支持 YAML/JSON 格式，
//! 并允许通过 `FEDERA_` 前缀的环境变量覆盖任意字段（嵌套字段使用 `__` 分隔，
//! 例如 `FEDERA_BACKOFF__MAX_SECONDS=30`）。

use anyhow::{anyhow, bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "FEDERA";

/// 重新同步间隔与退避上限允许的最大值（秒）
pub const MAX_INTERVAL_SECONDS: u64 = 24 * 60 * 60;

/// Supervisor 配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// 观察 FederationDomain 与 TLS Secret 的命名空间
    pub namespace: String,
    /// TLS 监听地址
    pub listen_address: String,
    /// 健康检查与指标监听地址（明文）
    pub health_address: String,
    /// 默认 TLS 证书所在的 Secret
    pub default_tls_secret_name: Option<String>,
    /// 每个工作队列的 worker 数量
    pub workers: usize,
    /// 周期性重新同步间隔（秒）
    pub resync_interval_seconds: u64,
    /// 失败重试退避
    pub backoff: BackoffConfig,
    /// 网络探测超时（秒）
    pub probe_timeout_seconds: u64,
    /// 日志级别
    pub log_level: String,
}

/// 失败重试退避配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// 初始退避（毫秒）
    pub base_millis: u64,
    /// 退避上限（秒）
    pub max_seconds: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_millis: 500,
            max_seconds: 60,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            namespace: "federa-supervisor".to_string(),
            listen_address: "0.0.0.0:8443".to_string(),
            health_address: "0.0.0.0:8080".to_string(),
            default_tls_secret_name: None,
            workers: 2,
            resync_interval_seconds: 180,
            backoff: BackoffConfig::default(),
            probe_timeout_seconds: 30,
            log_level: "info".to_string(),
        }
    }
}

impl SupervisorConfig {
    /// 加载配置：默认值，然后是配置文件（可选），最后是环境变量
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// 与 [`load`](Self::load) 相同，但可以指定环境变量来源
    pub fn load_with_env(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            let file = path.to_str().ok_or_else(|| anyhow!("配置路径无效: {:?}", path))?;
            let format = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml") | Some("yml") => FileFormat::Yaml,
                Some("json") => FileFormat::Json,
                _ => bail!("不支持的配置文件格式，仅支持 YAML 或 JSON: {:?}", path),
            };
            builder = builder.add_source(File::with_name(file).format(format));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config = builder
            .build()
            .with_context(|| format!("无法加载配置文件: {:?}", path))?
            .try_deserialize::<SupervisorConfig>()
            .context("配置格式错误")?;

        config.validate()?;
        Ok(config)
    }

    /// 检查配置的一致性
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            bail!("namespace 不能为空");
        }
        if self.workers == 0 {
            bail!("workers 必须大于 0");
        }
        if self.backoff.base_millis == 0 {
            bail!("backoff.base_millis 必须大于 0");
        }
        if self.resync_interval_seconds > MAX_INTERVAL_SECONDS {
            bail!("resync_interval_seconds 不能超过 {MAX_INTERVAL_SECONDS}");
        }
        if self.backoff.max_seconds > MAX_INTERVAL_SECONDS {
            bail!("backoff.max_seconds 不能超过 {MAX_INTERVAL_SECONDS}");
        }
        if self.resync_interval() <= self.backoff_max() {
            bail!(
                "resync_interval_seconds ({}) 必须大于 backoff.max_seconds ({})",
                self.resync_interval_seconds,
                self.backoff.max_seconds
            );
        }
        self.listen_addr()?;
        self.health_addr()?;
        Ok(())
    }

    /// TLS 监听地址
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen_address
            .parse()
            .with_context(|| format!("listen_address 无效: {}", self.listen_address))
    }

    /// 健康检查监听地址
    pub fn health_addr(&self) -> Result<SocketAddr> {
        self.health_address
            .parse()
            .with_context(|| format!("health_address 无效: {}", self.health_address))
    }

    /// 重新同步间隔
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_seconds)
    }

    /// 初始退避
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff.base_millis)
    }

    /// 退避上限
    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff.max_seconds)
    }

    /// 网络探测超时
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_file() {
        let config = SupervisorConfig::load_with_env(None, Some(HashMap::new())).unwrap();
        assert_eq!(config, SupervisorConfig::default());
        assert_eq!(config.resync_interval(), Duration::from_secs(180));
    }

    #[test]
    fn test_yaml_file_with_partial_fields() {
        let file = write_config(
            ".yaml",
            "namespace: identity\ndefault_tls_secret_name: default-tls\nbackoff:\n  max_seconds: 30\n",
        );
        let config = SupervisorConfig::load_with_env(Some(file.path()), Some(HashMap::new())).unwrap();

        assert_eq!(config.namespace, "identity");
        assert_eq!(config.default_tls_secret_name.as_deref(), Some("default-tls"));
        assert_eq!(config.backoff.max_seconds, 30);
        assert_eq!(config.backoff.base_millis, 500);
    }

    #[test]
    fn test_json_file() {
        let file = write_config(".json", r#"{"workers": 4, "listen_address": "127.0.0.1:9443"}"#);
        let config = SupervisorConfig::load_with_env(Some(file.path()), Some(HashMap::new())).unwrap();

        assert_eq!(config.workers, 4);
        assert_eq!(config.listen_addr().unwrap().port(), 9443);
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_config(".yaml", "workers: 4\n");
        let env = HashMap::from([
            ("FEDERA_WORKERS".to_string(), "8".to_string()),
            ("FEDERA_BACKOFF__BASE_MILLIS".to_string(), "250".to_string()),
        ]);
        let config = SupervisorConfig::load_with_env(Some(file.path()), Some(env)).unwrap();

        assert_eq!(config.workers, 8);
        assert_eq!(config.backoff_base(), Duration::from_millis(250));
    }

    #[test]
    fn test_unsupported_extension() {
        let file = write_config(".toml", "workers = 4\n");
        assert!(SupervisorConfig::load_with_env(Some(file.path()), Some(HashMap::new())).is_err());
    }

    #[test]
    fn test_resync_must_exceed_backoff_cap() {
        let file = write_config(".yaml", "resync_interval_seconds: 30\n");
        let err = SupervisorConfig::load_with_env(Some(file.path()), Some(HashMap::new())).unwrap_err();
        assert!(err.to_string().contains("resync_interval_seconds"));
    }

    #[test]
    fn test_backoff_cap_is_bounded() {
        let file = write_config(
            ".yaml",
            "resync_interval_seconds: 100000\nbackoff:\n  max_seconds: 90000\n",
        );
        let err = SupervisorConfig::load_with_env(Some(file.path()), Some(HashMap::new())).unwrap_err();
        assert!(err.to_string().contains("不能超过"), "{err}");
    }
}
