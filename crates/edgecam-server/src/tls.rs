//! HTTPS serving
//!
//! Browsers only expose WebRTC on secure origins, so the server can terminate
//! TLS itself when given a PEM certificate and key.

use anyhow::{anyhow, bail, Context, Result};
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::rustls::{self, ServerConfig};
use tokio_rustls::TlsAcceptor;

pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    tracing::debug!(
        "Loading certificate from {} and key from {}",
        cert_path.display(),
        key_path.display()
    );

    let cert_data = std::fs::read(cert_path)
        .with_context(|| format!("Failed to read certificate file {}", cert_path.display()))?;
    let key_data = std::fs::read(key_path)
        .with_context(|| format!("Failed to read private key file {}", key_path.display()))?;

    let cert_chain = rustls_pemfile::certs(&mut cert_data.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to parse certificate PEM")?;
    if cert_chain.is_empty() {
        bail!("No certificates found in {}", cert_path.display());
    }

    let private_key = rustls_pemfile::private_key(&mut key_data.as_slice())
        .context("Failed to parse private key PEM")?
        .ok_or_else(|| anyhow!("No private key found in {}", key_path.display()))?;

    // Explicit provider: webrtc pulls in rustls too, so the process default is ambiguous
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(cert_chain, private_key)
        .context("Certificate and key do not match")?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    tracing::info!("Loaded TLS certificate from {}", cert_path.display());
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Accept TLS connections until `shutdown` resolves
pub async fn serve<F>(
    listener: TcpListener,
    app: Router,
    acceptor: TlsAcceptor,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::pin!(shutdown);

    loop {
        let (stream, remote) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("Failed to accept connection: {}", e);
                    continue;
                }
            },
            _ = &mut shutdown => break,
        };

        let acceptor = acceptor.clone();
        let app = app.clone();

        tokio::spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::debug!("TLS handshake with {} failed: {}", remote, e);
                    return;
                }
            };

            let service = TowerToHyperService::new(app);
            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(TokioIo::new(stream), service)
                .await
            {
                tracing::debug!("Connection from {} closed with error: {}", remote, e);
            }
        });
    }

    tracing::info!("HTTPS listener stopped");
    Ok(())
}
