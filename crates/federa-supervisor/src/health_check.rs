//! 健康检查模块
//!
//! 在独立的明文端口上提供 `/healthz`、`/readyz` 与 `/metrics`，
//! 供 Kubernetes 探针与 Prometheus 抓取。

use anyhow::{Context, Result};
use hyper::header::CONTENT_TYPE;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

use crate::metrics::SupervisorMetrics;

/// 就绪状态
#[derive(Debug, Default)]
pub struct HealthState {
    ready: AtomicBool,
}

impl HealthState {
    /// 创建未就绪的状态
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 标记就绪，第一次证书映射重建完成后调用
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// 是否就绪
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

fn text_response(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
}

/// 处理一次健康检查请求
pub fn handle_health_request(
    req: &Request<Body>,
    state: &HealthState,
    metrics: &SupervisorMetrics,
) -> Response<Body> {
    match req.uri().path() {
        "/healthz" => text_response(StatusCode::OK, "ok"),
        "/readyz" if state.is_ready() => text_response(StatusCode::OK, "ok"),
        "/readyz" => text_response(StatusCode::SERVICE_UNAVAILABLE, "not ready"),
        "/metrics" => match metrics.encode() {
            Ok((content_type, body)) => {
                let mut response = text_response(StatusCode::OK, body);
                if let Ok(value) = content_type.parse() {
                    response.headers_mut().insert(CONTENT_TYPE, value);
                }
                response
            }
            Err(e) => {
                error!(error = %e, "编码指标失败");
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "could not encode metrics")
            }
        },
        _ => text_response(StatusCode::NOT_FOUND, "not found"),
    }
}

/// 启动健康检查服务器，直到出错才返回
pub async fn serve_health(
    addr: SocketAddr,
    state: Arc<HealthState>,
    metrics: Arc<SupervisorMetrics>,
) -> Result<()> {
    let make_svc = make_service_fn(move |_| {
        let state = state.clone();
        let metrics = metrics.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let response = handle_health_request(&req, &state, &metrics);
                async move { Ok::<_, Infallible>(response) }
            }))
        }
    });

    let server = Server::try_bind(&addr)
        .with_context(|| format!("无法绑定健康检查地址 {addr}"))?
        .serve(make_svc);
    info!("健康检查服务器启动在 {}", addr);

    server.await.context("健康检查服务器错误")
}
