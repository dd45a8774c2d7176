//! HTTP server.
//!
//! All proxy endpoints are served by a single fallback handler that hands
//! the request to [`Proxy::handle`]. Static assets, when configured, are
//! mounted next to it. With a `[tls]` section the router is served over
//! rustls.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tokio::net::TcpListener;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::app::Proxy;
use crate::config::{ServerConfig, TlsConfig};

/// Creates the application router.
pub fn build_router(proxy: Arc<Proxy>, static_dir: Option<&Path>) -> Router {
    let mut app = Router::new().fallback(dispatch).with_state(proxy);

    if let Some(dir) = static_dir {
        app = app
            .nest_service("/static", ServeDir::new(dir))
            .route_service("/robots.txt", ServeFile::new(dir.join("robots.txt")));
    }

    app.layer(TraceLayer::new_for_http())
}

async fn dispatch(State(proxy): State<Arc<Proxy>>, method: Method, uri: Uri, body: Bytes) -> Response {
    let request = crate::http::ProxyRequest::from_parts(method, &uri, &body);
    match proxy.handle(request).await {
        Ok(response) => response.into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#?}")).into_response(),
    }
}

/// The proxy's HTTP server.
pub struct Server {
    config: ServerConfig,
    proxy: Arc<Proxy>,
}

impl Server {
    /// Creates a server for `proxy`.
    #[must_use]
    pub fn new(config: ServerConfig, proxy: Arc<Proxy>) -> Self {
        Self { config, proxy }
    }

    /// Runs until a shutdown signal arrives, over HTTPS when `[tls]` is
    /// configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound, the TLS material
    /// is unusable, or serving fails.
    pub async fn run(self) -> anyhow::Result<()> {
        let app = build_router(self.proxy, self.config.static_dir.as_deref());
        let addr = self.config.bind_address();

        match &self.config.tls {
            Some(tls) => serve_tls(app, &addr, tls).await?,
            None => serve(app, &addr).await?,
        }

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

async fn serve(app: Router, addr: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    tracing::info!("Server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn serve_tls(app: Router, addr: &str, tls: &TlsConfig) -> anyhow::Result<()> {
    let (cert_pem, key_pem) = tls.read_pem()?;
    let tls_config = RustlsConfig::from_pem(cert_pem, key_pem)
        .await
        .with_context(|| format!("invalid TLS material in {}", tls.cert_file.display()))?;

    let socket_addr = tokio::net::lookup_host(addr)
        .await
        .with_context(|| format!("cannot resolve {addr}"))?
        .next()
        .with_context(|| format!("no address for {addr}"))?;

    let handle = Handle::new();
    tokio::spawn({
        let handle = handle.clone();
        async move {
            shutdown_signal().await;
            handle.graceful_shutdown(None);
        }
    });

    tracing::info!("Server listening on https://{socket_addr}");
    axum_server::bind_rustls(socket_addr, tls_config)
        .handle(handle)
        .serve(app.into_make_service())
        .await
        .with_context(|| format!("cannot serve on {socket_addr}"))?;
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM. A handler that cannot be installed never
/// fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
