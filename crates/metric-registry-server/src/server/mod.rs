//! Scrape server lifecycle.
//!
//! Modes, chosen once at registry construction:
//! - `Plain`  : HTTP on loopback
//! - `Tls`    : HTTPS on loopback, client certificate required (mutual TLS)
//! - `Public` : HTTP on all interfaces
//! - none     : attached; the caller mounts [`crate::Registry::router`] on its
//!   own server and no listener is opened
//!
//! `Unstarted -> Bound -> Serving` happens inside [`start`]; the serve task is
//! aborted when the returned [`ServerHandle`] is dropped.

pub mod tls;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use axum::Router;
use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tower::Service;

use metric_registry_core::{MetricsError, Result};

/// Longest a peer may take to complete the TLS handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How the registry exposes its scrape endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerOption {
    Plain {
        port: u16,
    },
    Tls {
        port: u16,
        cert_file: PathBuf,
        key_file: PathBuf,
        ca_file: PathBuf,
    },
    Public {
        port: u16,
    },
}

/// Plain HTTP on loopback; port 0 picks an ephemeral port.
pub fn server(port: u16) -> ServerOption {
    ServerOption::Plain { port }
}

/// Mutual-TLS HTTPS on loopback.
pub fn tls_server(
    port: u16,
    cert_file: impl Into<PathBuf>,
    key_file: impl Into<PathBuf>,
    ca_file: impl Into<PathBuf>,
) -> ServerOption {
    ServerOption::Tls {
        port,
        cert_file: cert_file.into(),
        key_file: key_file.into(),
        ca_file: ca_file.into(),
    }
}

/// Plain HTTP on all interfaces.
pub fn public_server(port: u16) -> ServerOption {
    ServerOption::Public { port }
}

impl ServerOption {
    pub fn bind_addr(&self) -> SocketAddr {
        match self {
            ServerOption::Plain { port } | ServerOption::Tls { port, .. } => {
                SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), *port)
            }
            ServerOption::Public { port } => {
                SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), *port)
            }
        }
    }

    fn mode(&self) -> &'static str {
        match self {
            ServerOption::Plain { .. } => "plain",
            ServerOption::Tls { .. } => "tls",
            ServerOption::Public { .. } => "public",
        }
    }
}

/// A bound, serving listener.
#[derive(Debug)]
pub struct ServerHandle {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Bind the listener for `option` and spawn the serve loop for `router`.
pub async fn start(option: &ServerOption, router: Router) -> Result<ServerHandle> {
    // Load TLS material before binding so a bad config never holds a port.
    let acceptor = match option {
        ServerOption::Tls {
            cert_file,
            key_file,
            ca_file,
            ..
        } => Some(tls::acceptor(cert_file, key_file, ca_file)?),
        _ => None,
    };

    let bind = option.bind_addr();
    let listener = TcpListener::bind(bind).await.map_err(|e| MetricsError::Bind {
        addr: bind.to_string(),
        reason: e.to_string(),
    })?;
    let addr = listener.local_addr().map_err(|e| MetricsError::Bind {
        addr: bind.to_string(),
        reason: e.to_string(),
    })?;
    tracing::info!(%addr, mode = option.mode(), "metrics server listening");

    let task = match acceptor {
        Some(acceptor) => tokio::spawn(serve_tls(listener, acceptor, router)),
        None => tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(error = %e, "metrics server failed");
            }
        }),
    };

    Ok(ServerHandle { addr, task })
}

async fn serve_tls(listener: TcpListener, acceptor: TlsAcceptor, router: Router) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let router = router.clone();
        tokio::spawn(async move {
            let Some(stream) = handshake(&acceptor, stream, peer, HANDSHAKE_TIMEOUT).await else {
                return;
            };

            let service = hyper::service::service_fn(move |req: Request<Incoming>| {
                router.clone().call(req)
            });
            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                tracing::debug!(%peer, error = %e, "connection closed with error");
            }
        });
    }
}

/// Run the server side of the handshake; `None` if it fails or stalls.
async fn handshake<S>(
    acceptor: &TlsAcceptor,
    stream: S,
    peer: SocketAddr,
    limit: Duration,
) -> Option<TlsStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::time::timeout(limit, acceptor.accept(stream)).await {
        Ok(Ok(s)) => Some(s),
        Ok(Err(e)) => {
            tracing::debug!(%peer, error = %e, "tls handshake rejected");
            None
        }
        Err(_) => {
            tracing::debug!(%peer, ?limit, "tls handshake timed out");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_unless_public() {
        assert!(server(0).bind_addr().ip().is_loopback());
        assert!(tls_server(0, "c", "k", "ca").bind_addr().ip().is_loopback());
        assert!(public_server(0).bind_addr().ip().is_unspecified());
    }

    #[tokio::test]
    async fn ephemeral_port_is_resolved() {
        let handle = start(&server(0), Router::new()).await.unwrap();
        assert_ne!(handle.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn tls_material_errors_before_bind() {
        let err = start(&tls_server(0, "/nonexistent/c", "/nonexistent/k", "/nonexistent/ca"), Router::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind().as_str(), "TLS");
    }

    #[tokio::test]
    async fn stalled_handshake_is_dropped() {
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec!["localhost".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        let provider = std::sync::Arc::new(rustls::crypto::ring::default_provider());
        let config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(
                vec![cert.der().clone()],
                rustls::pki_types::PrivateKeyDer::Pkcs8(key.serialize_der().into()),
            )
            .unwrap();
        let acceptor = TlsAcceptor::from(std::sync::Arc::new(config));

        // The client end stays open and silent.
        let (_client, server_end) = tokio::io::duplex(1024);
        let started = std::time::Instant::now();
        let peer = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        let stream = handshake(&acceptor, server_end, peer, Duration::from_millis(100)).await;
        assert!(stream.is_none());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
