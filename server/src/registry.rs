//! The endpoint registry: three indices over the same [`Endpoint`] arena,
//! a name lookup for `READY` endpoints, a liveness-ordered index for
//! housekeeping scans, and a FIFO of endpoints still `AUTHING`.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use purcrdr_ids::EndpointName;
use purcrdr_transport::TransportKind;
use tracing::{debug, warn};

use crate::endpoint::{CloseCause, Endpoint, EndpointId, EndpointStatus};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("endpoint name {0} is already registered")]
    Duplicated(EndpointName),
    #[error("endpoint is not in the dangling (AUTHING) set")]
    NotDangling,
}

#[derive(Default)]
pub struct Registry {
    endpoints: HashMap<EndpointId, Endpoint>,
    endpoint_map: HashMap<EndpointName, EndpointId>,
    /// Ordered by `t_living` ascending. A `BTreeMap` keyed on `(t_living,
    /// id)` gives the oldest-first walk housekeeping needs in O(log n) per
    /// update.
    living_index: std::collections::BTreeMap<(Instant, EndpointId), ()>,
    dangling: VecDeque<EndpointId>,
    next_id: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_endpoint(&mut self, transport_kind: TransportKind, now: Instant) -> EndpointId {
        let id = EndpointId(self.next_id);
        self.next_id += 1;
        self.endpoints.insert(id, Endpoint::new(id, transport_kind, now));
        self.dangling.push_back(id);
        id
    }

    pub fn get(&self, id: EndpointId) -> Option<&Endpoint> {
        self.endpoints.get(&id)
    }

    /// Promote a dangling (`AUTHING`) endpoint to `READY` under `name`.
    /// Fails if `name` is already registered, or if `id` isn't in the
    /// dangling set.
    pub fn make_ready(
        &mut self,
        id: EndpointId,
        name: EndpointName,
        now: Instant,
    ) -> Result<(), RegistryError> {
        let Some(pos) = self.dangling.iter().position(|&e| e == id) else {
            return Err(RegistryError::NotDangling);
        };
        if self.endpoint_map.contains_key(&name) {
            return Err(RegistryError::Duplicated(name));
        }
        self.dangling.remove(pos);
        self.endpoint_map.insert(name.clone(), id);
        self.living_index.insert((now, id), ());
        if let Some(ep) = self.endpoints.get_mut(&id) {
            ep.status = EndpointStatus::Ready;
            ep.t_living = now;
            ep.name = Some(name);
        }
        Ok(())
    }

    /// Remove `id` from whichever index currently holds it and drop its
    /// record. Returns the removed [`Endpoint`] for the caller to use in
    /// cleanup (closing its transport, tearing down its session).
    pub fn del_endpoint(&mut self, id: EndpointId, cause: CloseCause) -> Option<Endpoint> {
        let ep = self.endpoints.remove(&id)?;
        match ep.status {
            EndpointStatus::Authing => {
                self.dangling.retain(|&e| e != id);
            }
            EndpointStatus::Ready | EndpointStatus::Busy | EndpointStatus::Closing => {
                self.living_index.remove(&(ep.t_living, id));
                if let Some(name) = &ep.name {
                    self.endpoint_map.remove(name);
                }
            }
        }
        debug!(endpoint = ep.id.0, ?cause, "endpoint destroyed");
        Some(ep)
    }

    /// Bump `id`'s `t_living` to `now` and reposition it in the living
    /// index. `t_living` is non-decreasing and its index position is
    /// repaired after every inbound byte.
    pub fn update_living(&mut self, id: EndpointId, now: Instant) {
        let Some(ep) = self.endpoints.get_mut(&id) else {
            return;
        };
        if ep.status != EndpointStatus::Ready && ep.status != EndpointStatus::Busy {
            ep.t_living = now;
            return;
        }
        self.living_index.remove(&(ep.t_living, id));
        ep.t_living = now;
        self.living_index.insert((now, id), ());
    }

    pub fn by_name(&self, name: &EndpointName) -> Option<EndpointId> {
        self.endpoint_map.get(name).copied()
    }

    /// Dangling endpoints older than `max_no_responding` since
    /// `t_created`, in creation order.
    pub fn dangling_to_reap(&self, now: Instant, max_no_responding: Duration) -> Vec<EndpointId> {
        self.dangling
            .iter()
            .filter(|&&id| {
                self.endpoints
                    .get(&id)
                    .map(|ep| now.duration_since(ep.t_created) >= max_no_responding)
                    .unwrap_or(false)
            })
            .copied()
            .collect()
    }

    /// Walk `living_index` from the oldest entry, stopping as soon as one
    /// entry is within the ping window. Returns endpoints to ping (older
    /// than `ping_time` but younger than `kill_time`) and endpoints to kill
    /// (older than `kill_time`).
    pub fn no_responding_scan(
        &self,
        now: Instant,
        ping_time: Duration,
        kill_time: Duration,
    ) -> (Vec<EndpointId>, Vec<EndpointId>) {
        let mut to_ping = Vec::new();
        let mut to_kill = Vec::new();
        for (&(t_living, id), ()) in self.living_index.iter() {
            let age = now.duration_since(t_living);
            if age < ping_time {
                break;
            }
            if age >= kill_time {
                to_kill.push(id);
            } else {
                to_ping.push(id);
            }
        }
        if !to_kill.is_empty() {
            warn!(count = to_kill.len(), "endpoints exceeded the no-responding window");
        }
        (to_ping, to_kill)
    }

    /// Live (any status) endpoints currently using `kind`'s transport, for
    /// the `MAX_CLIENTS_EACH` per-listener accept cap.
    pub fn endpoints_of_kind(&self, kind: TransportKind) -> usize {
        self.endpoints.values().filter(|ep| ep.transport_kind == kind).count()
    }

    pub fn ready_count(&self) -> usize {
        self.living_index.len()
    }

    pub fn endpoint_map_len(&self) -> usize {
        self.endpoint_map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn name(s: &str) -> EndpointName {
        EndpointName::parse(s).unwrap()
    }

    #[test]
    fn make_ready_moves_from_dangling_to_map_and_index() {
        let mut reg = Registry::new();
        let now = Instant::now();
        let id = reg.new_endpoint(TransportKind::Unix, now);
        assert_eq!(reg.ready_count(), 0);
        reg.make_ready(id, name("@localhost/cn.fmsoft.test/t1"), now).unwrap();
        assert_eq!(reg.ready_count(), 1);
        assert_eq!(reg.endpoint_map_len(), 1);
        assert_eq!(reg.by_name(&name("@localhost/cn.fmsoft.test/t1")), Some(id));
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut reg = Registry::new();
        let now = Instant::now();
        let id1 = reg.new_endpoint(TransportKind::Unix, now);
        let id2 = reg.new_endpoint(TransportKind::Unix, now);
        reg.make_ready(id1, name("@localhost/app/r1"), now).unwrap();
        let err = reg.make_ready(id2, name("@localhost/app/r1"), now).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicated(_)));
    }

    #[test]
    fn index_consistency_invariant() {
        let mut reg = Registry::new();
        let now = Instant::now();
        for i in 0..5 {
            let id = reg.new_endpoint(TransportKind::Unix, now);
            reg.make_ready(id, name(&format!("@localhost/app/r{i}")), now).unwrap();
        }
        assert_eq!(reg.ready_count(), reg.endpoint_map_len());
    }

    #[test]
    fn dangling_reaped_after_timeout() {
        let mut reg = Registry::new();
        let created = Instant::now() - Duration::from_secs(200);
        let id = reg.new_endpoint(TransportKind::Unix, created);
        let reaped = reg.dangling_to_reap(Instant::now(), Duration::from_secs(90));
        assert_eq!(reaped, vec![id]);
    }

    #[test]
    fn no_responding_scan_orders_ping_then_kill() {
        let mut reg = Registry::new();
        let now = Instant::now();
        let fresh = reg.new_endpoint(TransportKind::Unix, now);
        reg.make_ready(fresh, name("@localhost/app/fresh"), now).unwrap();

        let stale_time = now - Duration::from_secs(70);
        let stale = reg.new_endpoint(TransportKind::Unix, stale_time);
        reg.make_ready(stale, name("@localhost/app/stale"), stale_time).unwrap();

        let dead_time = now - Duration::from_secs(100);
        let dead = reg.new_endpoint(TransportKind::Unix, dead_time);
        reg.make_ready(dead, name("@localhost/app/dead"), dead_time).unwrap();

        let (to_ping, to_kill) = reg.no_responding_scan(
            now,
            Duration::from_secs(60),
            Duration::from_secs(90),
        );
        assert_eq!(to_ping, vec![stale]);
        assert_eq!(to_kill, vec![dead]);
    }
}
