//! Server lifecycle and routing.
//!
//! [`FileServer`] owns at most one bound listener. Transitions run under a
//! single async mutex and are published on a watch channel:
//! `Stopped -> Starting -> Running -> Stopping -> Stopped`.

use axum::extract::{DefaultBodyLimit, Extension};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use axum_server::Handle;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, error, info, info_span, warn};

use crate::config::{MAX_UPLOAD_BODY_SIZE, ServerConfig};
use crate::error::ServerError;
use crate::storage::Storage;
use crate::{files, http, upload};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

struct RunningServer {
    handle: Handle,
    task: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// One shareable root on one port. The caller owns the value and decides
/// when to start and stop it.
pub struct FileServer {
    config: ServerConfig,
    running: Mutex<Option<RunningServer>>,
    state: watch::Sender<ServerState>,
}

impl FileServer {
    pub fn new(config: ServerConfig) -> Self {
        let (state, _) = watch::channel(ServerState::Stopped);
        Self {
            config,
            running: Mutex::new(None),
            state,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|running| running.local_addr)
    }

    /// Prepares the root, binds the listener and starts serving. Returns the
    /// bound address; calling it while running is a no-op. On failure the
    /// state is back to `Stopped`.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            warn!(addr = %current.local_addr, "server already running");
            return Ok(current.local_addr);
        }

        self.state.send_replace(ServerState::Starting);
        match self.launch().await {
            Ok(server) => {
                let addr = server.local_addr;
                *running = Some(server);
                self.state.send_replace(ServerState::Running);
                Ok(addr)
            }
            Err(err) => {
                self.state.send_replace(ServerState::Stopped);
                error!(error = %err, "server start failed");
                Err(err)
            }
        }
    }

    async fn launch(&self) -> Result<RunningServer, ServerError> {
        self.config.validate()?;
        let storage = Storage::open(&self.config.root).await.map_err(|err| {
            ServerError::InvalidInput(format!(
                "root directory {}: {err}",
                self.config.root.display()
            ))
        })?;

        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        let listener = listener.into_std()?;

        info!(
            root = ?storage.root_path(),
            addr = %local_addr,
            "📂 Starting file server"
        );
        let app = build_router(Arc::new(storage));
        let handle = Handle::new();
        let server = axum_server::from_tcp(listener)
            .handle(handle.clone())
            .serve(app.into_make_service_with_connect_info::<SocketAddr>());
        let task = tokio::spawn(async move {
            if let Err(err) = server.await {
                error!(error = %err, "http server terminated");
            }
        });

        Ok(RunningServer {
            handle,
            task,
            local_addr,
        })
    }

    /// Drains in-flight requests (bounded by the configured grace period) and
    /// releases the listener. Stopping a stopped server is a no-op.
    pub async fn stop(&self) -> Result<(), ServerError> {
        let mut running = self.running.lock().await;
        let Some(server) = running.take() else {
            debug!("stop requested while stopped");
            return Ok(());
        };

        self.state.send_replace(ServerState::Stopping);
        info!(
            addr = %server.local_addr,
            grace = ?self.config.shutdown_grace,
            "stopping file server"
        );
        server
            .handle
            .graceful_shutdown(Some(self.config.shutdown_grace));
        let joined = server.task.await;
        self.state.send_replace(ServerState::Stopped);
        if let Err(err) = joined {
            error!(error = %err, "http server task failed");
            return Err(ServerError::Io(std::io::Error::other(err)));
        }
        info!("file server stopped");
        Ok(())
    }
}

impl Drop for FileServer {
    fn drop(&mut self) {
        if let Some(server) = self.running.get_mut().take() {
            server.handle.shutdown();
        }
    }
}

/// The fixed routing table. Unknown paths and wrong methods both end in 404.
pub fn build_router(storage: Arc<Storage>) -> Router {
    Router::new()
        .route(
            "/",
            get(files::browse_directory).fallback(http::not_found),
        )
        .route(
            "/download",
            get(files::download_file).fallback(http::not_found),
        )
        .route(
            "/upload",
            post(upload::upload_file)
                .fallback(http::not_found)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BODY_SIZE)),
        )
        .fallback(http::not_found)
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip = %http::client_ip(request),
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(storage))
}
