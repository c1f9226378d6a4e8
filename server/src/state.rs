//! Central server state: the one place the owning task reaches into the
//! registry, the per-endpoint sessions, and the live connections. No
//! `Mutex` guards any of this: a single task mutates it exclusively and
//! everything else talks to that task over a channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use purcrdr_transport::Transport;

use crate::config::ServerConfig;
use crate::endpoint::EndpointId;
use crate::registry::Registry;
use crate::session::SessionInfo;

pub struct ServerState {
    pub config: ServerConfig,
    pub registry: Registry,
    pub sessions: HashMap<u64, SessionInfo>,
    pub connections: HashMap<EndpointId, Arc<dyn Transport>>,
}

impl ServerState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            registry: Registry::new(),
            sessions: HashMap::new(),
            connections: HashMap::new(),
        }
    }

    pub fn touch(&mut self, id: EndpointId, now: Instant) {
        self.registry.update_living(id, now);
    }

    pub fn remove_connection(&mut self, id: EndpointId) {
        self.connections.remove(&id);
        self.sessions.remove(&id.0);
    }
}
