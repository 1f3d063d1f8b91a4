//! Protocol adapters: bind a listener for an imposter and pump connections
//! through the engine.
//!
//! Binding and serving are separate steps so the registry can learn the
//! final port (port 0 asks the OS), build the imposter with it, and only
//! then start the accept loop with a reference to the finished imposter.

pub mod http;
mod tls;

use crate::errors::EngineError;
use crate::imposter::core::Imposter;
use crate::imposter::types::ImposterConfig;
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};

/// Handle used to shut an imposter's listener down.
pub struct CloseHandle {
    shutdown: broadcast::Sender<()>,
}

impl CloseHandle {
    /// Signal the accept loop to stop. Idempotent; an already-stopped loop
    /// simply has no receiver left.
    pub fn close(&self) {
        let _ = self.shutdown.send(());
    }
}

/// A bound-but-not-yet-serving listener.
pub enum BoundListener {
    Plain(TcpListener),
    Tls(TcpListener, TlsAcceptor),
}

/// Bind the listener described by the config, returning the final port.
pub async fn bind(config: &ImposterConfig) -> Result<(u16, BoundListener), EngineError> {
    let host = config.host.clone().unwrap_or_else(|| "0.0.0.0".to_string());
    let port = config.port.unwrap_or(0);
    match config.protocol.as_str() {
        "http" => {
            let listener = bind_tcp(&host, port).await?;
            let port = local_port(&listener)?;
            Ok((port, BoundListener::Plain(listener)))
        }
        "https" => {
            let acceptor = tls::acceptor(config)?;
            let listener = bind_tcp(&host, port).await?;
            let port = local_port(&listener)?;
            Ok((port, BoundListener::Tls(listener, acceptor)))
        }
        other => Err(EngineError::CannotStartServer(format!(
            "unsupported protocol: {other}"
        ))),
    }
}

async fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, EngineError> {
    TcpListener::bind((host, port))
        .await
        .map_err(|e| EngineError::CannotStartServer(format!("cannot bind port {port}: {e}")))
}

fn local_port(listener: &TcpListener) -> Result<u16, EngineError> {
    listener
        .local_addr()
        .map(|addr| addr.port())
        .map_err(|e| EngineError::CannotStartServer(format!("cannot read bound address: {e}")))
}

/// Start the accept loop for a bound listener. Runs until the returned
/// handle is closed.
pub fn serve(listener: BoundListener, imposter: Arc<Imposter>) -> CloseHandle {
    let (shutdown, _) = broadcast::channel(1);
    let handle = CloseHandle {
        shutdown: shutdown.clone(),
    };
    let port = imposter.port();
    match listener {
        BoundListener::Plain(listener) => {
            tokio::spawn(accept_plain(listener, imposter, shutdown.subscribe(), port));
        }
        BoundListener::Tls(listener, acceptor) => {
            tokio::spawn(accept_tls(
                listener,
                acceptor,
                imposter,
                shutdown.subscribe(),
                port,
            ));
        }
    }
    handle
}

async fn accept_plain(
    listener: TcpListener,
    imposter: Arc<Imposter>,
    mut shutdown: broadcast::Receiver<()>,
    port: u16,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let imposter = Arc::clone(&imposter);
                    tokio::spawn(async move {
                        http::serve_connection(TokioIo::new(stream), imposter, addr).await;
                    });
                }
                Err(e) => error!("accept error on port {port}: {e}"),
            },
            _ = shutdown.recv() => {
                info!("imposter on port {port} shutting down");
                break;
            }
        }
    }
}

async fn accept_tls(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    imposter: Arc<Imposter>,
    mut shutdown: broadcast::Receiver<()>,
    port: u16,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let imposter = Arc::clone(&imposter);
                    let acceptor = acceptor.clone();
                    tokio::spawn(async move {
                        match acceptor.accept(stream).await {
                            Ok(tls_stream) => {
                                http::serve_connection(TokioIo::new(tls_stream), imposter, addr)
                                    .await;
                            }
                            Err(e) => debug!("TLS handshake failed on port {port}: {e}"),
                        }
                    });
                }
                Err(e) => error!("accept error on port {port}: {e}"),
            },
            _ = shutdown.recv() => {
                info!("imposter on port {port} shutting down");
                break;
            }
        }
    }
}
