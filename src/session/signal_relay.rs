//! Signal Relay: opaque forwarding of WebRTC negotiation messages

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::metrics::HubMetrics;
use crate::protocol::{self, Action, Reply};
use crate::registry::{ConnId, GroupRegistry};
use crate::store::SessionId;

/// Republishes offers, answers and ICE candidates to the rest of the session group
///
/// Payloads are never inspected. With `echo_to_sender` off the originating connection is
/// left out of the fan-out.
pub struct SignalRelay {
    registry: Arc<GroupRegistry>,
    metrics: Arc<HubMetrics>,
    echo_to_sender: bool,
}

impl SignalRelay {
    pub fn new(registry: Arc<GroupRegistry>, metrics: Arc<HubMetrics>, echo_to_sender: bool) -> Self {
        Self {
            registry,
            metrics,
            echo_to_sender,
        }
    }

    /// Forward `{"action": <action>, ...payload}` to the session group
    pub fn relay(
        &self,
        session_id: SessionId,
        origin: ConnId,
        action: Action,
        payload: &Map<String, Value>,
    ) -> Reply {
        if !action.is_signal() {
            return Reply::invalid_action();
        }

        let exclude = (!self.echo_to_sender).then_some(origin);
        let frame = protocol::signal_frame(action, payload);
        let delivered = self.registry.broadcast(session_id, &frame, exclude);
        debug!(session_id, origin, %action, delivered, "relayed signal");

        self.metrics.record_signal(action.as_str());
        Reply::relayed(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionHandle;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_relay_reaches_peers_only() {
        let metrics = Arc::new(HubMetrics::new());
        let registry = Arc::new(GroupRegistry::new(metrics.clone()));
        let relay = SignalRelay::new(registry.clone(), metrics, false);

        let (a, mut rx_a) = ConnectionHandle::channel(8);
        let (b, mut rx_b) = ConnectionHandle::channel(8);
        let (c, mut rx_c) = ConnectionHandle::channel(8);
        registry.join(7, a.clone());
        registry.join(7, b);
        registry.join(8, c);

        let reply = relay.relay(7, a.id(), Action::Offer, &payload(json!({"sdp": "xyz"})));
        assert_eq!(reply, Reply::relayed(Action::Offer));

        let received: Value = serde_json::from_str(&rx_b.try_recv().unwrap()).unwrap();
        assert_eq!(received, json!({"action": "offer", "sdp": "xyz"}));
        assert!(rx_a.try_recv().is_err());
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn test_relay_forwards_payload_text_unchanged() {
        let metrics = Arc::new(HubMetrics::new());
        let registry = Arc::new(GroupRegistry::new(metrics.clone()));
        let relay = SignalRelay::new(registry.clone(), metrics, false);

        let (a, _rx_a) = ConnectionHandle::channel(8);
        let (b, mut rx_b) = ConnectionHandle::channel(8);
        registry.join(7, a.clone());
        registry.join(7, b);

        let inbound = r#"{"action":"ice_candidate","sdpMid":"0","sdpMLineIndex":0,"usernameFragment":"f3a1","priority":2122252543000000000000}"#;
        let envelope = crate::protocol::Envelope::parse(inbound).unwrap();
        relay.relay(7, a.id(), envelope.action, &envelope.payload);

        assert_eq!(&*rx_b.try_recv().unwrap(), inbound);
    }

    #[test]
    fn test_relay_with_echo_includes_sender() {
        let metrics = Arc::new(HubMetrics::new());
        let registry = Arc::new(GroupRegistry::new(metrics.clone()));
        let relay = SignalRelay::new(registry.clone(), metrics.clone(), true);

        let (a, mut rx_a) = ConnectionHandle::channel(8);
        registry.join(3, a.clone());

        relay.relay(
            3,
            a.id(),
            Action::IceCandidate,
            &payload(json!({"candidate": "candidate:1 1 UDP 2122252543 10.0.0.2 49152 typ host"})),
        );

        let received: Value = serde_json::from_str(&rx_a.try_recv().unwrap()).unwrap();
        assert_eq!(received["action"], "ice_candidate");
        assert_eq!(metrics.snapshot().signals_relayed, 1);
    }

    #[test]
    fn test_lifecycle_action_is_not_relayed() {
        let metrics = Arc::new(HubMetrics::new());
        let registry = Arc::new(GroupRegistry::new(metrics.clone()));
        let relay = SignalRelay::new(registry.clone(), metrics, true);
        let (a, mut rx_a) = ConnectionHandle::channel(8);
        registry.join(1, a.clone());

        let reply = relay.relay(1, a.id(), Action::Stop, &Map::new());
        assert!(reply.is_error());
        assert!(rx_a.try_recv().is_err());
    }
}
