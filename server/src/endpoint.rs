//! The `Endpoint` record: one accepted client's identity and lifecycle
//! state, independent of its transport or session data (those live in
//! [`crate::state::ServerState`]'s connection table and session map, keyed
//! by the same [`EndpointId`]).

use std::time::Instant;

use purcrdr_ids::EndpointName;
use purcrdr_transport::TransportKind;

/// Opaque arena index for an endpoint: no endpoint pointer ever crosses
/// the wire or a lookup table; everything is keyed by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointStatus {
    Authing,
    Ready,
    /// `READY` with a nonempty outbound queue. Does not affect registry
    /// membership, stays indexed under `living_index` the same as `Ready`;
    /// only tells the write path a flush is already in flight.
    Busy,
    Closing,
}

/// Why an endpoint was destroyed, recorded for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    Exiting,
    LostConnection,
    NoResponding,
}

#[derive(Debug, Clone)]
pub struct Endpoint {
    pub id: EndpointId,
    pub transport_kind: TransportKind,
    pub status: EndpointStatus,
    pub t_created: Instant,
    pub t_living: Instant,
    pub name: Option<EndpointName>,
}

impl Endpoint {
    pub fn new(id: EndpointId, transport_kind: TransportKind, now: Instant) -> Self {
        Self {
            id,
            transport_kind,
            status: EndpointStatus::Authing,
            t_created: now,
            t_living: now,
            name: None,
        }
    }
}
