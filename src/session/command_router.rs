//! Command Router: decodes inbound frames and dispatches them by action

use std::sync::Arc;

use tracing::{debug, warn};

use super::session_channel::SessionChannel;
use super::signal_relay::SignalRelay;
use crate::protocol::{Action, Envelope, ProtocolError, Reply};
use crate::registry::ConnId;
use crate::store::SessionId;

/// Routes lifecycle actions to the [`SessionChannel`] and negotiation to the [`SignalRelay`]
pub struct CommandRouter {
    channel: Arc<SessionChannel>,
    relay: SignalRelay,
}

impl CommandRouter {
    pub fn new(channel: Arc<SessionChannel>, relay: SignalRelay) -> Self {
        Self { channel, relay }
    }

    /// Handle one text frame and produce the reply for its sender
    pub async fn dispatch(&self, session_id: SessionId, origin: ConnId, text: &str) -> Reply {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(ProtocolError::UnknownAction(name)) => {
                warn!(session_id, origin, action = %name, "unknown action");
                return Reply::invalid_action();
            }
            Err(e) => {
                warn!(session_id, origin, error = %e, "dropping malformed message");
                return Reply::error(e.to_string());
            }
        };

        debug!(session_id, origin, action = %envelope.action, "received action");
        self.route(session_id, origin, envelope).await
    }

    async fn route(&self, session_id: SessionId, origin: ConnId, envelope: Envelope) -> Reply {
        match envelope.action {
            Action::Start | Action::Pause | Action::Stop => {
                match self.channel.apply(session_id, envelope.action).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!(session_id, origin, action = %envelope.action, error = %e, "lifecycle action rejected");
                        Reply::from(e)
                    }
                }
            }
            Action::Offer | Action::Answer | Action::IceCandidate => {
                self.relay
                    .relay(session_id, origin, envelope.action, &envelope.payload)
            }
        }
    }

    pub fn channel(&self) -> &Arc<SessionChannel> {
        &self.channel
    }
}
