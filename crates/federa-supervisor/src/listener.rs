//! TLS 监听器
//!
//! 每个新连接都会得到一个新的引导标记和绑定到该标记的 rustls 配置，
//! 握手完成后由 hyper 在该连接上处理 HTTP/1.1 请求，每个请求先经过引导路径守卫。

use anyhow::{Context, Result};
use federa_controller::tlscert::{BootstrapConnState, CertRouter};
use hyper::server::conn::Http;
use hyper::service::service_fn;
use hyper::{Body, Request, Response, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

use crate::guard::{bootstrap_guard, ConnectionInfo};
use crate::metrics::SupervisorMetrics;

/// TLS 握手的默认超时
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// 按 SNI 选择证书的 TLS 监听器
#[derive(Clone)]
pub struct TlsListener {
    router: Arc<CertRouter>,
    metrics: Arc<SupervisorMetrics>,
    handshake_timeout: Duration,
}

impl TlsListener {
    /// 创建监听器
    pub fn new(router: Arc<CertRouter>, metrics: Arc<SupervisorMetrics>) -> Self {
        Self {
            router,
            metrics,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    /// 设置 TLS 握手超时
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// 绑定地址并持续接受连接
    pub async fn bind_and_serve(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("无法绑定 TLS 监听地址 {addr}"))?;
        info!("TLS 监听器启动在 {}", addr);
        self.serve(listener).await
    }

    /// 在已绑定的监听器上持续接受连接
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, remote_addr) = listener.accept().await.context("接受连接失败")?;
            let this = self.clone();
            tokio::spawn(async move { this.handle_connection(stream, remote_addr).await });
        }
    }

    async fn handle_connection(self, stream: TcpStream, remote_addr: SocketAddr) {
        let state = BootstrapConnState::new();
        let acceptor = TlsAcceptor::from(self.router.server_config(state.clone()));

        let tls = match tokio::time::timeout(self.handshake_timeout, acceptor.accept(stream)).await {
            Ok(Ok(tls)) => tls,
            Ok(Err(e)) => {
                debug!(remote_addr = %remote_addr, error = %e, "TLS 握手失败");
                return;
            }
            Err(_) => {
                debug!(remote_addr = %remote_addr, timeout = ?self.handshake_timeout, "TLS 握手超时");
                return;
            }
        };

        let conn = Arc::new(ConnectionInfo {
            state,
            server_name: tls.get_ref().1.server_name().map(str::to_string),
            remote_addr,
        });

        let metrics = self.metrics.clone();
        let service = service_fn(move |req: Request<Body>| {
            let response = handle_request(&conn, &metrics, &req);
            async move { Ok::<_, Infallible>(response) }
        });

        if let Err(e) = Http::new()
            .http1_only(true)
            .serve_connection(tls, service)
            .await
        {
            debug!(remote_addr = %remote_addr, error = %e, "连接处理结束");
        }
    }
}

/// 处理 TLS 连接上的一次请求
pub fn handle_request(
    conn: &ConnectionInfo,
    metrics: &SupervisorMetrics,
    req: &Request<Body>,
) -> Response<Body> {
    if let Some(rejection) = bootstrap_guard(conn, req) {
        metrics.record_bootstrap_rejection();
        return rejection;
    }

    let (status, body) = match req.uri().path() {
        "/healthz" => (StatusCode::OK, "ok"),
        _ => (StatusCode::NOT_FOUND, "not found"),
    };
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use federa_common::IssuerHost;
    use federa_controller::tlscert::{
        DynamicCertStore, IssuerCertSetter, IssuerHostCertMap, ServingCert, BOOTSTRAP_CERT_NAME,
    };
    use rustls::{Certificate, ClientConfig, RootCertStore, ServerName};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_rustls::TlsConnector;

    struct Harness {
        addr: SocketAddr,
        router: Arc<CertRouter>,
        store: Arc<DynamicCertStore>,
        metrics: Arc<SupervisorMetrics>,
    }

    async fn start() -> Harness {
        start_with_timeout(DEFAULT_HANDSHAKE_TIMEOUT).await
    }

    async fn start_with_timeout(handshake_timeout: Duration) -> Harness {
        let store = Arc::new(DynamicCertStore::new());
        let router = Arc::new(CertRouter::new(store.clone()).unwrap());
        let metrics = Arc::new(SupervisorMetrics::new().unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server =
            TlsListener::new(router.clone(), metrics.clone()).with_handshake_timeout(handshake_timeout);
        tokio::spawn(server.serve(listener));

        Harness {
            addr,
            router,
            store,
            metrics,
        }
    }

    async fn get(addr: SocketAddr, server_name: &str, root_der: &[u8], path: &str) -> String {
        let mut roots = RootCertStore::empty();
        roots.add(&Certificate(root_der.to_vec())).unwrap();
        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));

        let tcp = TcpStream::connect(addr).await.unwrap();
        let name = ServerName::try_from(server_name).unwrap();
        let mut tls = connector.connect(name, tcp).await.unwrap();

        let request = format!("GET {path} HTTP/1.1\r\nHost: {server_name}\r\nConnection: close\r\n\r\n");
        tls.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        let _ = tls.read_to_end(&mut response).await;
        String::from_utf8_lossy(&response).into_owned()
    }

    #[test_log::test(tokio::test)]
    async fn test_issuer_cert_is_selected_by_sni() {
        let harness = start().await;

        let key = rcgen::KeyPair::generate().unwrap();
        let params = rcgen::CertificateParams::new(vec!["issuer.example.com".to_string()]).unwrap();
        let cert = params.self_signed(&key).unwrap();
        let serving =
            ServingCert::from_pem(cert.pem().as_bytes(), key.serialize_pem().as_bytes()).unwrap();

        let mut map = IssuerHostCertMap::new();
        map.insert(
            IssuerHost::from_issuer("https://Issuer.Example.com/path").unwrap(),
            Arc::new(serving),
        );
        harness.store.set_issuer_host_to_cert_map(map);

        let response = get(harness.addr, "issuer.example.com", cert.der(), "/anything").await;
        assert!(response.starts_with("HTTP/1.1 404"), "{response}");
    }

    #[test_log::test(tokio::test)]
    async fn test_bootstrap_connection_is_guarded() {
        let harness = start().await;
        let bootstrap = harness.router.bootstrap_cert();
        let root = bootstrap.chain_der()[0].clone();

        let response = get(harness.addr, BOOTSTRAP_CERT_NAME, &root, "/some/path").await;
        assert!(response.starts_with("HTTP/1.1 500"), "{response}");
        assert!(response.contains(crate::guard::BOOTSTRAP_REJECTION_MESSAGE));

        let response = get(harness.addr, BOOTSTRAP_CERT_NAME, &root, "/healthz").await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");

        let (_, body) = harness.metrics.encode().unwrap();
        assert!(String::from_utf8_lossy(&body).contains("federa_bootstrap_rejections_total 1"));
    }

    #[test_log::test(tokio::test)]
    async fn test_stalled_handshake_is_dropped() {
        let harness = start_with_timeout(Duration::from_millis(100)).await;

        // 只建立 TCP 连接，不发送 ClientHello
        let mut tcp = TcpStream::connect(harness.addr).await.unwrap();
        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(5), tcp.read(&mut buf))
            .await
            .expect("server kept the stalled connection open");
        assert!(matches!(read, Ok(0) | Err(_)), "{read:?}");
    }
}
