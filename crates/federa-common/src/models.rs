//! 数据模型模块
//!
//! 该模块定义了 Federa 项目中使用的核心数据模型：条件集合、
//! 签发者主机名与 TLS 证书相关的资源快照。

pub mod condition;
pub mod issuer;
pub mod tls;
