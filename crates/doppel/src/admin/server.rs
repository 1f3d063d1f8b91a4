//! The management HTTP server.
//!
//! Connections get a 30 second service timeout. `Stop` (or ctrl-c) breaks
//! the accept loop, then in-flight handlers get up to five seconds to
//! drain before the process moves on.

use crate::admin::guard::AccessPolicy;
use crate::admin::handlers::system;
use crate::admin::router::route_request;
use crate::errors::EngineError;
use crate::imposter::registry::ImposterRegistry;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Effective server options, also reported by `GET /config`.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub port: u16,
    pub host: String,
    pub allow_injection: bool,
    pub origin: Option<String>,
    pub policy: AccessPolicy,
}

pub struct ManagementServer {
    options: Arc<ServerOptions>,
    registry: Arc<ImposterRegistry>,
    listener: TcpListener,
    shutdown: broadcast::Sender<()>,
}

impl ManagementServer {
    /// Bind the management port. Binding up front lets callers learn the
    /// final port before serving starts.
    pub async fn bind(
        options: ServerOptions,
        registry: Arc<ImposterRegistry>,
    ) -> Result<Self, EngineError> {
        let addr = (options.host.as_str(), options.port);
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            EngineError::CannotStartServer(format!(
                "cannot bind management port {}: {e}",
                options.port
            ))
        })?;
        let (shutdown, _) = broadcast::channel(1);
        Ok(ManagementServer {
            options: Arc::new(options),
            registry,
            listener,
            shutdown,
        })
    }

    pub fn port(&self) -> u16 {
        self.listener
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(self.options.port)
    }

    /// Handle used to stop the server from another task.
    pub fn stop_handle(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    /// Serve until stopped.
    pub async fn run(self) -> Result<(), EngineError> {
        system::mark_started();
        let listener = self.listener;
        info!(
            "management API listening on http://{}:{}",
            self.options.host,
            listener
                .local_addr()
                .map(|a| a.port())
                .unwrap_or(self.options.port)
        );

        let in_flight = Arc::new(AtomicUsize::new(0));
        let mut shutdown = self.shutdown.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("management accept error: {e}");
                            continue;
                        }
                    };
                    let registry = Arc::clone(&self.registry);
                    let options = Arc::clone(&self.options);
                    let in_flight = Arc::clone(&in_flight);
                    in_flight.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let registry = Arc::clone(&registry);
                            let options = Arc::clone(&options);
                            async move {
                                Ok::<_, std::convert::Infallible>(
                                    route_request(req, peer, registry, options).await,
                                )
                            }
                        });
                        let io = TokioIo::new(stream);
                        let served = tokio::time::timeout(
                            CONNECTION_TIMEOUT,
                            http1::Builder::new().serve_connection(io, service),
                        )
                        .await;
                        match served {
                            Ok(Err(e)) => debug!("management connection error: {e}"),
                            Err(_) => debug!("management connection timed out"),
                            Ok(Ok(())) => {}
                        }
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    });
                }
                _ = shutdown.recv() => {
                    info!("management server stopping");
                    break;
                }
            }
        }

        // Grace period for in-flight handlers, then force the exit.
        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
        while in_flight.load(Ordering::SeqCst) > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if in_flight.load(Ordering::SeqCst) > 0 {
            warn!("management server force-closing with connections in flight");
        }
        Ok(())
    }
}
