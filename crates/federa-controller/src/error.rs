//! 控制平面错误类型

use thiserror::Error;

/// 控制平面错误
///
/// 协调函数返回的任何错误都会触发工作队列的退避重试。
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API 错误
    #[error("Kubernetes API 错误: {0}")]
    Kube(#[from] kube::Error),

    /// 资源存储读取失败
    #[error("读取资源失败: {0}")]
    Store(String),

    /// 状态子资源更新失败
    #[error("更新 {name} 的状态失败: {reason}")]
    StatusPatch {
        /// 资源名称
        name: String,
        /// 失败原因
        reason: String,
    },

    /// 证书解析或生成失败
    #[error("证书错误: {0}")]
    Certificate(String),

    /// 共享模型错误
    #[error(transparent)]
    Common(#[from] federa_common::Error),
}

/// 控制平面结果类型别名
pub type Result<T> = std::result::Result<T, Error>;
