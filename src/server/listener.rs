//! Accept loop and connection lifecycle

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::service::BinService;
use crate::Result;

use super::connection_limit::{ConnectionGuard, ConnectionLimit};
use super::routes::Router;
use super::SHUTDOWN_TIMEOUT_MS;

/// HTTP server in front of a [`BinService`]
pub struct Server {
    bind_addr: SocketAddr,
    router: Arc<Router>,
    connection_limit: ConnectionLimit,
    shutdown: CancellationToken,
}

impl Server {
    /// Create a server; it stops when `shutdown` is cancelled
    #[must_use]
    pub fn new(config: &Config, service: BinService, shutdown: CancellationToken) -> Self {
        let router = Router::new(
            service,
            config.limits.display_body_chars,
            config.server.keepalive(),
            shutdown.clone(),
        );

        Self {
            bind_addr: config.server.bind_addr(),
            router: Arc::new(router),
            connection_limit: ConnectionLimit::new(config.server.max_connections),
            shutdown,
        }
    }

    /// Bind the configured address and serve until shutdown
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be bound
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown
    ///
    /// # Errors
    ///
    /// Returns error if the listener address cannot be read
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        info!("Listening on {}", addr);

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    info!("Server {} shutting down", addr);
                    break;
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let Some(guard) = self.connection_limit.try_acquire() else {
                                warn!("Connection limit reached, rejecting {}", peer_addr);
                                drop(stream);
                                continue;
                            };

                            let router = Arc::clone(&self.router);
                            let shutdown = self.shutdown.clone();
                            connections.spawn(serve_connection(stream, peer_addr, router, shutdown, guard));
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        warn!("Connection task failed: {}", e);
                    }
                }
            }
        }

        drop(listener);

        // Connections see the same token and wind down on their own
        let shutdown_timeout = Duration::from_millis(SHUTDOWN_TIMEOUT_MS);
        let drained = tokio::time::timeout(shutdown_timeout, async {
            while let Some(result) = connections.join_next().await {
                if let Err(e) = result {
                    warn!("Task cleanup error: {}", e);
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(remaining = connections.len(), "Aborting connections after shutdown timeout");
            connections.shutdown().await;
        }

        info!("Shutdown complete");
        Ok(())
    }

    /// Address the server binds by default
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Connections currently being served
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.connection_limit.active_connections()
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    router: Arc<Router>,
    shutdown: CancellationToken,
    _guard: ConnectionGuard,
) {
    debug!("Accepted connection from {}", peer_addr);

    let service = service_fn(move |request| {
        let router = Arc::clone(&router);
        async move { Ok::<_, Infallible>(router.handle(request).await) }
    });

    let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    let result = tokio::select! {
        result = connection.as_mut() => result,
        () = shutdown.cancelled() => {
            connection.as_mut().graceful_shutdown();
            connection.await
        }
    };

    if let Err(e) = result {
        debug!("Connection from {} ended with error: {}", peer_addr, e);
    }
}
