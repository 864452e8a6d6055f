//! Server startup: validate configuration, start the dispatcher and serve HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::controller::SessionController;
use crate::dispatcher;
use crate::web::{self, AppState};

pub struct Server {
    config: ServerConfig,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Serve until the listener fails.
    pub async fn run(self) -> Result<()> {
        let (_addr, handle) = self.start().await?;
        handle.await.context("HTTP server task panicked")?
    }

    /// Start the server and return the bound address + task handle (for testing).
    pub async fn start(self) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
        self.config.validate().context("invalid configuration")?;

        let controller = SessionController::new(&self.config);
        let (chat, _dispatcher) = dispatcher::spawn(controller);

        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.config.listen_addr))?;
        let addr = listener.local_addr()?;
        tracing::info!(
            history_capacity = self.config.history_capacity,
            admin = self.config.admin_secret.is_some(),
            "HTTP/WebSocket listener on {addr}"
        );

        let router = web::router(Arc::new(AppState::new(chat, self.config)));
        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .context("HTTP server error")
        });

        Ok((addr, handle))
    }
}
