//! Federa 控制平面
//!
//! 该模块实现 Federa 的控制循环核心：认证器配置的验证协调、客户端证书签发链，
//! 以及签发者主机名到服务证书的动态路由。进程装配（Kubernetes 客户端、监听器）
//! 由 operator 与 supervisor 完成，这里只依赖窄接口，便于直接调用测试。

pub mod authenticator;
pub mod crd;
pub mod error;
pub mod issuer;
pub mod tlscert;
pub mod utils;
pub mod validation;
pub mod workqueue;

pub use error::{Error, Result};
