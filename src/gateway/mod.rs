//! Connection gateway
//!
//! Accepts TCP connections, upgrades them to WebSockets on `<path_prefix>/<session_id>/`,
//! and hands each one to [`connection::serve_connection`] on its own task.

pub mod connection;

pub use connection::{ConnectionSettings, serve_connection};

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, warn};

use crate::config::GatewayConfig;
use crate::session::SessionHub;
use crate::store::SessionId;

/// Error types for gateway operations
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
    #[error("Send timed out after {0:?}")]
    SendTimeout(Duration),
    #[error("No session id in request path: {0}")]
    InvalidRoute(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Extract the session id from `<prefix>/<id>` with an optional trailing slash
pub fn parse_session_path(prefix: &str, path: &str) -> Option<SessionId> {
    let rest = path.strip_prefix(prefix.trim_end_matches('/'))?;
    let rest = rest.strip_prefix('/')?;
    let id = rest.strip_suffix('/').unwrap_or(rest);
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    id.parse().ok()
}

/// WebSocket front door for the session hub
#[derive(Clone)]
pub struct Gateway {
    hub: Arc<SessionHub>,
    path_prefix: Arc<str>,
    settings: ConnectionSettings,
}

impl Gateway {
    pub fn new(hub: Arc<SessionHub>, config: &GatewayConfig) -> Self {
        Self {
            hub,
            path_prefix: Arc::from(config.path_prefix.as_str()),
            settings: ConnectionSettings {
                outbound_buffer: config.outbound_buffer,
                send_timeout: Duration::from_millis(config.send_timeout_ms),
            },
        }
    }

    /// Accept connections until `shutdown` resolves
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let local_addr = listener.local_addr()?;
        info!(
            "Gateway listening on ws://{}{}/<session_id>/",
            local_addr, self.path_prefix
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let gateway = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = gateway.handle_tcp(stream, peer).await {
                                debug!(%peer, error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                _ = &mut shutdown => {
                    info!("Gateway shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Upgrade one TCP stream and serve it
    ///
    /// The session id is resolved during the handshake; a request whose path does not carry
    /// one is answered with 404 and never joins a group.
    async fn handle_tcp(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), GatewayError> {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "failed to disable Nagle on connection");
        }
        let mut session_id = None;
        let mut rejected_path = None;

        let websocket = accept_hdr_async(stream, |request: &Request, response: Response| {
            let path = request.uri().path();
            match parse_session_path(&self.path_prefix, path) {
                Some(id) => {
                    session_id = Some(id);
                    Ok(response)
                }
                None => {
                    rejected_path = Some(path.to_string());
                    let mut rejection = ErrorResponse::new(Some("Unknown session route".into()));
                    *rejection.status_mut() = StatusCode::NOT_FOUND;
                    Err(rejection)
                }
            }
        })
        .await;

        if let Some(path) = rejected_path {
            warn!(%peer, path = %path, "rejected connection without session id");
            return Err(GatewayError::InvalidRoute(path));
        }
        let websocket = websocket?;
        let Some(session_id) = session_id else {
            return Err(GatewayError::InvalidRoute(String::new()));
        };

        info!(%peer, "Client attempting to connect to session {}", session_id);
        serve_connection(self.hub.clone(), self.settings, session_id, websocket).await;
        Ok(())
    }
}
