//! Federa Common - 跨模块共享工具与数据结构
//!
//! 该模块提供 Federa 项目中所有组件共享的数据结构和错误处理，
//! 包括健康状态条件集合、签发者主机名以及 TLS Secret 模型。

pub mod models;
pub mod error;

/// 重新导出常用类型，方便使用
pub use error::Error;
pub use error::Result;
pub use models::condition::*;
pub use models::issuer::*;
pub use models::tls::*;
