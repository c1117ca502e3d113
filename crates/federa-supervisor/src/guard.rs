//! 引导连接路径守卫
//!
//! 使用引导证书完成握手的连接只能访问少量固定路径，其余请求返回 500
//! 并记录一条警告，这是运维人员发现 TLS 配置错误的主要信号。

use federa_controller::tlscert::BootstrapConnState;
use hyper::header::HOST;
use hyper::{Body, Request, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

/// 引导连接可以访问的路径
pub const BOOTSTRAP_ALLOWED_PATHS: &[&str] = &["/healthz"];

/// 拒绝引导连接请求时的响应体
pub const BOOTSTRAP_REJECTION_MESSAGE: &str =
    "federa supervisor has invalid TLS serving certificate configuration";

/// 单个 TLS 连接的信息
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// 引导标记
    pub state: Arc<BootstrapConnState>,
    /// 客户端提供的 SNI 名称
    pub server_name: Option<String>,
    /// 对端地址
    pub remote_addr: SocketAddr,
}

/// 检查一次请求；需要拒绝时返回 500 响应
pub fn bootstrap_guard(conn: &ConnectionInfo, req: &Request<Body>) -> Option<Response<Body>> {
    if !conn.state.is_bootstrap() {
        return None;
    }

    let path = req.uri().path();
    if BOOTSTRAP_ALLOWED_PATHS.contains(&path) {
        return None;
    }

    let host = req
        .headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().host())
        .unwrap_or_default();

    warn!(
        proto = ?req.version(),
        method = %req.method(),
        host,
        sni = conn.server_name.as_deref().unwrap_or_default(),
        path,
        remote_addr = %conn.remote_addr,
        "拒绝使用引导证书的连接上的请求，TLS 服务证书配置无效"
    );

    let mut response = Response::new(Body::from(BOOTSTRAP_REJECTION_MESSAGE));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    Some(response)
}
