//! Mutual-TLS acceptor built from PEM files.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio_rustls::TlsAcceptor;

use metric_registry_core::{MetricsError, Result};

/// Server presents `cert_file`/`key_file` and only accepts clients whose
/// certificate chains to a CA in `ca_file`.
pub fn acceptor(cert_file: &Path, key_file: &Path, ca_file: &Path) -> Result<TlsAcceptor> {
    Ok(TlsAcceptor::from(Arc::new(server_config(
        cert_file, key_file, ca_file,
    )?)))
}

pub fn server_config(cert_file: &Path, key_file: &Path, ca_file: &Path) -> Result<ServerConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let certs = load_certs(cert_file)?;
    let key = load_key(key_file)?;

    let mut roots = RootCertStore::empty();
    for ca in load_certs(ca_file)? {
        roots
            .add(ca)
            .map_err(|e| MetricsError::Tls(format!("{}: {e}", ca_file.display())))?;
    }

    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
        .build()
        .map_err(|e| MetricsError::Tls(format!("client verifier: {e}")))?;

    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| MetricsError::Tls(e.to_string()))?
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .map_err(|e| MetricsError::Tls(format!("{}: {e}", cert_file.display())))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| MetricsError::Tls(format!("open {}: {e}", path.display())))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| MetricsError::Tls(format!("{}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(MetricsError::Tls(format!(
            "{}: no certificates found",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|e| MetricsError::Tls(format!("{}: {e}", path.display())))?
        .ok_or_else(|| MetricsError::Tls(format!("{}: no private key found", path.display())))
}
