//! Live session hub
//!
//! This module wires the group registry, the lifecycle channel and the signal relay into a
//! single [`SessionHub`] that is built once per process and shared by every connection.

pub mod command_router;
pub mod session_channel;
pub mod signal_relay;

pub use command_router::CommandRouter;
pub use session_channel::{ChannelError, SessionChannel};
pub use signal_relay::SignalRelay;

use std::sync::Arc;

use crate::config::RelayConfig;
use crate::metrics::HubMetrics;
use crate::registry::GroupRegistry;
use crate::store::SessionStore;

/// Shared state of the real-time session channel
pub struct SessionHub {
    registry: Arc<GroupRegistry>,
    router: CommandRouter,
    metrics: Arc<HubMetrics>,
}

impl SessionHub {
    pub fn new(store: Arc<dyn SessionStore>, relay: &RelayConfig) -> Self {
        let metrics = Arc::new(HubMetrics::new());
        let registry = Arc::new(GroupRegistry::new(metrics.clone()));
        let channel = Arc::new(SessionChannel::new(
            store,
            registry.clone(),
            metrics.clone(),
        ));
        let relay = SignalRelay::new(registry.clone(), metrics.clone(), relay.echo_to_sender);

        Self {
            registry,
            router: CommandRouter::new(channel, relay),
            metrics,
        }
    }

    pub fn registry(&self) -> &Arc<GroupRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &CommandRouter {
        &self.router
    }

    pub fn channel(&self) -> &Arc<SessionChannel> {
        self.router.channel()
    }

    pub fn metrics(&self) -> &Arc<HubMetrics> {
        &self.metrics
    }
}
