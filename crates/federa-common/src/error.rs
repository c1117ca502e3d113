//! 错误处理模块
//!
//! 该模块提供 Federa 项目的统一错误类型，供共享模型以及
//! 上层控制器复用。

use thiserror::Error;

/// Federa 统一错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 签发者 URL 无效
    #[error("无效的签发者 URL {issuer}: {reason}")]
    InvalidIssuer {
        /// 原始签发者字符串
        issuer: String,
        /// 失败原因
        reason: String,
    },

    /// 证书或私钥错误
    #[error("证书错误: {0}")]
    Certificate(String),

    /// Secret 中缺少必需的键
    #[error("Secret {secret} 缺少键 {key}")]
    MissingSecretKey {
        /// Secret 名称
        secret: String,
        /// 缺少的键
        key: String,
    },

    /// JSON 错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),
}

/// Federa 结果类型别名
pub type Result<T> = std::result::Result<T, Error>;
