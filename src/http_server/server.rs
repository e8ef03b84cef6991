//! # HTTP Server
//!
//! The inbound listener: debug routes plus the catch-all proxy route.
//! Shutdown is a graceful drain bounded by the configured grace period,
//! after which remaining connections are force-closed.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::response::Response;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use super::config::ServerConfig;
use super::debug_routes::debug_routes;
use crate::config::ConfigStore;
use crate::observability::Logger;
use crate::proxy::ProxyEngine;

/// State shared by every handler
pub struct AppState {
    /// The per-request pipeline
    pub engine: ProxyEngine,
    /// The active snapshot, for the debug surface
    pub store: Arc<ConfigStore>,
}

/// The inbound HTTP server
pub struct HttpServer {
    config: ServerConfig,
    router: Router,
}

impl HttpServer {
    /// Create a server over the shared state
    pub fn new(config: ServerConfig, state: Arc<AppState>) -> Self {
        let router = Self::build_router(state);
        Self { config, router }
    }

    /// Build the router: explicit debug routes first, everything else is
    /// the proxy path
    fn build_router(state: Arc<AppState>) -> Router {
        Router::new()
            .merge(debug_routes())
            .fallback(proxy_handler)
            .with_state(state)
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> String {
        self.config.socket_addr()
    }

    /// Get the router (for testing)
    pub fn router(self) -> Router {
        self.router
    }

    /// Bind and serve until the shutdown signal fires, then drain.
    pub async fn start(self, shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr: SocketAddr = self.config.socket_addr().parse().map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid bind address: {e}"),
            )
        })?;

        let listener = TcpListener::bind(addr).await?;
        let bound = listener.local_addr()?;
        Logger::info("HTTP_SERVER_STARTED", &[("addr", &bound.to_string())]);

        let grace = self.config.shutdown_grace();
        let mut drain_signal = shutdown;
        let mut force_signal = drain_signal.resubscribe();

        let serving = axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = drain_signal.recv().await;
        });
        let serving = async move { serving.await };

        tokio::select! {
            result = serving => {
                result?;
                Logger::info("HTTP_SERVER_STOPPED", &[("addr", &bound.to_string())]);
            }
            _ = async {
                let _ = force_signal.recv().await;
                tokio::time::sleep(grace).await;
            } => {
                Logger::warn(
                    "HTTP_SERVER_FORCE_CLOSED",
                    &[
                        ("addr", &bound.to_string()),
                        ("grace_seconds", &grace.as_secs().to_string()),
                    ],
                );
            }
        }

        Ok(())
    }
}

/// The catch-all proxy route
async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    state.engine.handle(addr.ip(), request).await
}
