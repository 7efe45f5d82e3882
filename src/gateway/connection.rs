//! Lifecycle of one client connection

use std::sync::Arc;
use std::time::Duration;

use futures_util::sink::{Sink, SinkExt};
use futures_util::stream::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Error as WsError, protocol::Message};
use tracing::{debug, info, warn};

use super::GatewayError;
use crate::protocol::{self, Reply};
use crate::registry::{ConnId, ConnectionHandle};
use crate::session::SessionHub;
use crate::store::SessionId;

/// Per-connection limits taken from the gateway configuration
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub outbound_buffer: usize,
    pub send_timeout: Duration,
}

/// Group membership that is released when dropped
///
/// Dropping runs on every exit path of the connection task (clean close, transport error,
/// panic, or the task being cancelled), so a connection can never stay in its group.
struct Membership {
    hub: Arc<SessionHub>,
    session_id: SessionId,
    conn_id: ConnId,
}

impl Membership {
    fn join(hub: Arc<SessionHub>, session_id: SessionId, handle: ConnectionHandle) -> Self {
        let conn_id = handle.id();
        hub.registry().join(session_id, handle);
        hub.metrics().record_connection_opened();
        info!("Client {} connected to session {}", conn_id, session_id);
        Self {
            hub,
            session_id,
            conn_id,
        }
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        self.hub.registry().leave(self.session_id, self.conn_id);
        self.hub.channel().release(self.session_id);
        self.hub.metrics().record_connection_closed();
        info!(
            "Client {} disconnected from session {}",
            self.conn_id, self.session_id
        );
    }
}

/// Serve an accepted WebSocket until either side closes it
///
/// Inbound text frames are dispatched through the hub's router and answered on the same
/// connection. Broadcasts and replies share one outbound queue drained by a writer task.
pub async fn serve_connection<W>(
    hub: Arc<SessionHub>,
    settings: ConnectionSettings,
    session_id: SessionId,
    websocket: W,
) where
    W: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + 'static,
{
    let (handle, outbound_rx) = ConnectionHandle::channel(settings.outbound_buffer);
    let conn_id = handle.id();
    let membership = Membership::join(hub.clone(), session_id, handle.clone());

    let (sink, mut inbound) = websocket.split();
    let mut writer = tokio::spawn(write_loop(sink, outbound_rx, settings.send_timeout));
    let mut writer_done = false;

    loop {
        tokio::select! {
            frame = inbound.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let reply = hub.router().dispatch(session_id, conn_id, &text).await;
                    if !respond(&handle, &reply).await {
                        break;
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    let reply = Reply::error("Malformed message: binary frames are not supported");
                    if !respond(&handle, &reply).await {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(session_id, conn_id, "client closed connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(session_id, conn_id, error = %e, "connection read failed");
                    break;
                }
            },
            result = &mut writer => {
                writer_done = true;
                match result {
                    Ok(Err(e)) => warn!(session_id, conn_id, error = %e, "dropping client"),
                    Err(e) => warn!(session_id, conn_id, error = %e, "writer task failed"),
                    Ok(Ok(())) => {}
                }
                break;
            }
        }
    }

    drop(membership);
    drop(handle);

    if !writer_done {
        // The writer exits once every sender is gone; give it one send timeout to flush.
        if timeout(settings.send_timeout, &mut writer).await.is_err() {
            writer.abort();
        }
    }
}

/// Queue a direct reply for the connection, returning false once it is gone
async fn respond(handle: &ConnectionHandle, reply: &Reply) -> bool {
    let Some(frame) = protocol::encode(reply) else {
        return true;
    };
    match handle.send(frame).await {
        Ok(()) => true,
        Err(e) => {
            debug!(conn_id = handle.id(), error = %e, "reply not delivered");
            false
        }
    }
}

/// Drain the outbound queue into the socket, bounding every write
async fn write_loop<K>(
    mut sink: K,
    mut outbound: mpsc::Receiver<Arc<str>>,
    send_timeout: Duration,
) -> Result<(), GatewayError>
where
    K: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        match timeout(send_timeout, sink.send(Message::Text(frame.to_string()))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(GatewayError::WebSocket(e)),
            Err(_) => return Err(GatewayError::SendTimeout(send_timeout)),
        }
    }

    let _ = sink.close().await;
    Ok(())
}
