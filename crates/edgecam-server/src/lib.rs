//! Edgecam server library
//!
//! Exposes the server components for the binaries and for testing.

pub mod api;
pub mod error;
pub mod pipeline;
pub mod rtc;
pub mod session;
pub mod state;
pub mod streamer;
pub mod tls;

use anyhow::Result;
use std::future::Future;
use tokio::net::TcpListener;

/// Create the router and the state behind it
pub fn create_app(config: state::Config) -> Result<(axum::Router, state::AppState)> {
    let app_state = state::AppState::new(config)?;
    let router = api::create_router(app_state.clone());
    Ok((router, app_state))
}

/// Serve until `shutdown` resolves, then close every session
pub async fn run<F>(config: state::Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let tls_paths = config.tls_paths()?;
    let bind_address = config.bind_address();
    let (app, app_state) = create_app(config)?;

    let listener = TcpListener::bind(&bind_address).await?;
    let local_addr = listener.local_addr()?;

    match tls_paths {
        Some((cert_file, key_file)) => {
            let acceptor = tls::load_acceptor(&cert_file, &key_file)?;
            tracing::info!("Listening on https://{}", local_addr);
            tls::serve(listener, app, acceptor, shutdown).await?;
        }
        None => {
            tracing::info!("Listening on http://{}", local_addr);
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await?;
        }
    }

    let closed = app_state.sessions.shutdown().await;
    tracing::info!("Shut down, closed {} sessions", closed);
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
