//! Media server
//!
//! Serves one directory read-only under a [`MediaRoute`], over plain HTTP or
//! TLS. Each accepted connection runs in its own task so shutdown can ask
//! every connection to finish its current request, wait for a grace period
//! and then abort whatever is left.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::Router;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::error::{Result, ServerError, ShutdownError};
use crate::route::MediaRoute;
use crate::tls;

/// Certificate chain and private key, both PEM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Directory served under `route`
    pub image_dir: PathBuf,
    pub route: MediaRoute,
    /// Serve TLS instead of plain HTTP
    pub tls: Option<TlsConfig>,
}

impl ServerConfig {
    /// Serve `image_dir` on `listen_addr` under the default route, without TLS
    pub fn new(listen_addr: SocketAddr, image_dir: impl Into<PathBuf>) -> Self {
        Self {
            listen_addr,
            image_dir: image_dir.into(),
            route: MediaRoute::default(),
            tls: None,
        }
    }

    /// Mount the image directory under `route` instead
    pub fn with_route(mut self, route: MediaRoute) -> Self {
        self.route = route;
        self
    }

    /// Serve TLS with the given material; `None` keeps plain HTTP
    pub fn with_tls(mut self, tls: Option<TlsConfig>) -> Self {
        self.tls = tls;
        self
    }
}

/// Router serving `image_dir` below the route's mount path
pub fn media_router(route: &MediaRoute, image_dir: &Path) -> Router {
    let files = ServeDir::new(image_dir);
    let router = if route.prefix().is_empty() {
        Router::new().fallback_service(files)
    } else {
        Router::new().nest_service(&route.mount_path(), files)
    };
    router.layer(TraceLayer::new_for_http())
}

/// How a shutdown ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every connection finished within the grace period
    Graceful,
    /// Connections still open after the grace period were aborted
    Forced { aborted: usize },
}

pub struct MediaServer {
    config: ServerConfig,
    router: Router,
}

impl MediaServer {
    /// Create a server; the router is built here and owned by the server
    pub fn new(config: ServerConfig) -> Self {
        let router = media_router(&config.route, &config.image_dir);
        Self { config, router }
    }

    /// Load TLS material, bind and start accepting in the background
    pub async fn start(self) -> Result<ServerHandle> {
        let acceptor = match &self.config.tls {
            Some(tls) => Some(tls::load_acceptor(&tls.cert_path, &tls.key_path)?),
            None => None,
        };

        let addr = self.config.listen_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let tls = acceptor.is_some();
        info!(
            addr = %local_addr,
            tls,
            mount = %self.config.route.mount_path(),
            dir = %self.config.image_dir.display(),
            "Media server listening"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept = tokio::spawn(accept_loop(listener, self.router, acceptor, shutdown_rx));

        Ok(ServerHandle {
            local_addr,
            tls,
            shutdown_tx,
            accept,
        })
    }
}

/// A running server
pub struct ServerHandle {
    local_addr: SocketAddr,
    tls: bool,
    shutdown_tx: watch::Sender<bool>,
    accept: JoinHandle<JoinSet<()>>,
}

impl ServerHandle {
    /// Address the listener is bound to (the real port when 0 was requested)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// Stop accepting, drain in-flight connections for up to `grace`, then abort the rest
    pub async fn shutdown(self, grace: Duration) -> std::result::Result<ShutdownOutcome, ShutdownError> {
        // Only fails when every receiver is gone, i.e. nothing is left to stop
        let _ = self.shutdown_tx.send(true);

        let mut connections = self.accept.await.map_err(ShutdownError::AcceptLoop)?;
        info!(
            in_flight = connections.len(),
            grace_ms = grace.as_millis() as u64,
            "Draining media server connections"
        );

        match tokio::time::timeout(grace, drain(&mut connections)).await {
            Ok(drained) => {
                drained?;
                info!("Media server stopped");
                Ok(ShutdownOutcome::Graceful)
            }
            Err(_) => {
                let aborted = connections.len();
                connections.abort_all();
                drain(&mut connections).await?;
                warn!(aborted, "Grace period expired, connections aborted");
                Ok(ShutdownOutcome::Forced { aborted })
            }
        }
    }
}

/// Wait for every task; cancellations are expected, panics are not
async fn drain(connections: &mut JoinSet<()>) -> std::result::Result<(), ShutdownError> {
    while let Some(joined) = connections.join_next().await {
        if let Err(e) = joined {
            if e.is_panic() {
                return Err(ShutdownError::ConnectionPanicked(e));
            }
        }
    }
    Ok(())
}

async fn accept_loop(
    listener: TcpListener,
    router: Router,
    tls: Option<TlsAcceptor>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinSet<()> {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "Accepted connection");
                    connections.spawn(serve_connection(
                        stream,
                        peer,
                        router.clone(),
                        tls.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    // usually fd exhaustion; back off instead of spinning
                    warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        warn!(error = %e, "Connection task panicked");
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    debug!(open = connections.len(), "Stopped accepting connections");
    connections
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Router,
    tls: Option<TlsAcceptor>,
    shutdown: watch::Receiver<bool>,
) {
    match tls {
        Some(acceptor) => match acceptor.accept(stream).await {
            Ok(stream) => serve_http(stream, peer, router, shutdown).await,
            Err(e) => debug!(peer = %peer, error = %e, "TLS handshake failed"),
        },
        None => serve_http(stream, peer, router, shutdown).await,
    }
}

async fn serve_http<S>(
    stream: S,
    peer: SocketAddr,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let conn = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), TowerToHyperService::new(router));
    tokio::pin!(conn);

    let mut draining = *shutdown.borrow();
    if draining {
        conn.as_mut().graceful_shutdown();
    }

    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    debug!(peer = %peer, error = %e, "Connection closed with error");
                }
                break;
            }
            _ = shutdown.changed(), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const IMAGE: &[u8] = b"not really an iso, but bytes are bytes";

    fn image_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("test-config.iso"), IMAGE).unwrap();
        dir
    }

    fn local_config(dir: &Path) -> ServerConfig {
        ServerConfig::new("127.0.0.1:0".parse().unwrap(), dir)
    }

    fn self_signed(dir: &Path) -> TlsConfig {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let tls = TlsConfig {
            cert_path: dir.join("tls.crt"),
            key_path: dir.join("tls.key"),
        };
        fs::write(&tls.cert_path, cert.pem()).unwrap();
        fs::write(&tls.key_path, key_pair.serialize_pem()).unwrap();
        tls
    }

    #[tokio::test]
    async fn test_serves_image_over_http() {
        let dir = image_dir();
        let handle = MediaServer::new(local_config(dir.path())).start().await.unwrap();
        assert!(!handle.is_tls());
        let base = format!("http://{}", handle.local_addr());

        let response = reqwest::get(format!("{}/images/test-config.iso", base))
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.bytes().await.unwrap().as_ref(), IMAGE);

        let missing = reqwest::get(format!("{}/images/other.iso", base)).await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        // only the route prefix is served
        let outside = reqwest::get(format!("{}/test-config.iso", base)).await.unwrap();
        assert_eq!(outside.status(), reqwest::StatusCode::NOT_FOUND);

        assert_eq!(
            handle.shutdown(Duration::from_secs(5)).await.unwrap(),
            ShutdownOutcome::Graceful
        );
    }

    #[tokio::test]
    async fn test_read_only() {
        let dir = image_dir();
        let handle = MediaServer::new(local_config(dir.path())).start().await.unwrap();

        let response = reqwest::Client::new()
            .put(format!("http://{}/images/test-config.iso", handle.local_addr()))
            .body("overwrite")
            .send()
            .await
            .unwrap();
        assert!(!response.status().is_success());
        assert_eq!(fs::read(dir.path().join("test-config.iso")).unwrap(), IMAGE);

        handle.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_serves_image_over_tls() {
        let dir = image_dir();
        let config = local_config(dir.path()).with_tls(Some(self_signed(dir.path())));
        let handle = MediaServer::new(config).start().await.unwrap();
        assert!(handle.is_tls());
        let port = handle.local_addr().port();

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap();
        let response = client
            .get(format!("https://127.0.0.1:{}/images/test-config.iso", port))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.bytes().await.unwrap().as_ref(), IMAGE);

        // plain HTTP on the TLS port gets no HTTP response
        let plain = reqwest::get(format!("http://127.0.0.1:{}/images/test-config.iso", port)).await;
        assert!(plain.is_err());

        handle.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_tls_material() {
        let dir = image_dir();
        let config = local_config(dir.path()).with_tls(Some(TlsConfig {
            cert_path: dir.path().join("missing.crt"),
            key_path: dir.path().join("missing.key"),
        }));

        let err = MediaServer::new(config).start().await.err().unwrap();
        assert!(matches!(err, ServerError::TlsMaterial { .. }));
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let dir = image_dir();
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ServerConfig::new(taken.local_addr().unwrap(), dir.path());

        let err = MediaServer::new(config).start().await.err().unwrap();
        assert!(matches!(err, ServerError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_without_connections() {
        let dir = image_dir();
        let handle = MediaServer::new(local_config(dir.path())).start().await.unwrap();
        let addr = handle.local_addr();

        assert_eq!(
            handle.shutdown(Duration::from_millis(100)).await.unwrap(),
            ShutdownOutcome::Graceful
        );
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_forces_stalled_download() {
        let dir = image_dir();
        // larger than loopback socket buffers so the response can't complete
        fs::write(dir.path().join("big.iso"), vec![0u8; 64 * 1024 * 1024]).unwrap();
        let handle = MediaServer::new(local_config(dir.path())).start().await.unwrap();

        let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
        stream
            .write_all(b"GET /images/big.iso HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut head = [0u8; 12];
        stream.read_exact(&mut head).await.unwrap();
        assert_eq!(&head, b"HTTP/1.1 200");

        let outcome = handle.shutdown(Duration::from_millis(200)).await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::Forced { aborted: 1 });
    }
}
