//! Port Registry (§4.2): the single in-process authority over the
//! `[port_start, port_end]` debug-port range. All transitions are
//! serialized behind one mutex; callers never see a torn state.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::net::{TcpListener, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::error::{Result, WorkerError};

/// Reservations older than this are reclaimed by the sweep (§3, §8).
pub const RESERVATION_TTL: Duration = Duration::from_secs(90);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortState {
    Free,
    Reserved,
    Active,
}

#[derive(Debug, Clone)]
struct PortEntry {
    state: PortState,
    holder: Option<String>,
    reserved_at: Option<Instant>,
}

impl PortEntry {
    fn free() -> Self {
        Self {
            state: PortState::Free,
            holder: None,
            reserved_at: None,
        }
    }
}

/// Snapshot of registry occupancy, for the status task (§6.1).
#[derive(Debug, Clone, Copy, Default)]
pub struct PortSnapshot {
    pub free_count: usize,
    pub reserved: usize,
    pub active: usize,
}

pub struct PortRegistry {
    entries: Mutex<BTreeMap<u16, PortEntry>>,
}

impl PortRegistry {
    pub fn new(port_start: u16, port_end: u16) -> Self {
        let mut entries = BTreeMap::new();
        for port in port_start..=port_end {
            entries.insert(port, PortEntry::free());
        }
        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Reserve the first FREE port whose OS-level bind succeeds (§4.2).
    /// A bind failure marks the entry occupied-by-a-foreign-process for
    /// this call only; the entry remains FREE in the registry so a later
    /// call can retry it once the foreign process releases it.
    pub fn reserve(&self, holder: &str) -> Result<u16> {
        let mut entries = self.entries.lock();
        let candidates: Vec<u16> = entries
            .iter()
            .filter(|(_, e)| e.state == PortState::Free)
            .map(|(port, _)| *port)
            .collect();

        for port in candidates {
            if os_port_is_free(port) {
                let entry = entries.get_mut(&port).expect("candidate port must exist");
                entry.state = PortState::Reserved;
                entry.holder = Some(holder.to_string());
                entry.reserved_at = Some(Instant::now());
                return Ok(port);
            }
        }

        Err(WorkerError::NoPortsAvailable)
    }

    /// RESERVED -> ACTIVE, only if `holder` matches the reservation.
    pub fn activate(&self, port: u16, holder: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(&port)
            .ok_or(WorkerError::NotReserved(port))?;

        match entry.state {
            PortState::Reserved => {
                if entry.holder.as_deref() != Some(holder) {
                    return Err(WorkerError::HolderMismatch(port));
                }
                entry.state = PortState::Active;
                Ok(())
            }
            _ => Err(WorkerError::NotReserved(port)),
        }
    }

    /// Any state -> FREE. Idempotent. A holder mismatch is returned to the
    /// caller to log but the release still happens (forced cleanup, §4.2).
    pub fn release(&self, port: u16, holder: &str) -> ReleaseOutcome {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(&port) else {
            return ReleaseOutcome::UnknownPort;
        };

        let mismatch = match &entry.holder {
            Some(h) if h != holder => true,
            _ => false,
        };
        *entry = PortEntry::free();

        if mismatch {
            ReleaseOutcome::ReleasedWithMismatch
        } else {
            ReleaseOutcome::Released
        }
    }

    /// Reclaim RESERVED entries whose reservation has outlived the TTL
    /// (§3, invariant 5).
    pub fn sweep_stale_reservations(&self) -> Vec<u16> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        let mut reclaimed = Vec::new();
        for (port, entry) in entries.iter_mut() {
            if entry.state == PortState::Reserved {
                if let Some(reserved_at) = entry.reserved_at {
                    if now.duration_since(reserved_at) > RESERVATION_TTL {
                        *entry = PortEntry::free();
                        reclaimed.push(*port);
                    }
                }
            }
        }
        reclaimed
    }

    pub fn snapshot(&self) -> PortSnapshot {
        let entries = self.entries.lock();
        let mut snap = PortSnapshot::default();
        for entry in entries.values() {
            match entry.state {
                PortState::Free => snap.free_count += 1,
                PortState::Reserved => snap.reserved += 1,
                PortState::Active => snap.active += 1,
            }
        }
        snap
    }

    /// True if `port` is ACTIVE and held by `holder` — used by invariant
    /// checks and tests to confirm the session/port pairing (§8, invariant 2).
    #[cfg(test)]
    fn is_active_holder(&self, port: u16, holder: &str) -> bool {
        let entries = self.entries.lock();
        entries
            .get(&port)
            .map(|e| e.state == PortState::Active && e.holder.as_deref() == Some(holder))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    ReleasedWithMismatch,
    UnknownPort,
}

/// Bind-probe a port on all interfaces; failure means something else
/// (foreign process, or the registry's own Chrome instance) already owns
/// it at the OS level.
fn os_port_is_free(port: u16) -> bool {
    let addr = ("0.0.0.0", port)
        .to_socket_addrs()
        .ok()
        .and_then(|mut it| it.next());
    match addr {
        Some(addr) => TcpListener::bind(addr).is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_activate_release_round_trip() {
        let registry = PortRegistry::new(20000, 20002);
        let port = registry.reserve("w1").unwrap();
        assert!((20000..=20002).contains(&port));

        registry.activate(port, "w1").unwrap();
        assert!(registry.is_active_holder(port, "w1"));

        assert_eq!(registry.release(port, "w1"), ReleaseOutcome::Released);
        let snap = registry.snapshot();
        assert_eq!(snap.free_count, 3);
        assert_eq!(snap.reserved, 0);
        assert_eq!(snap.active, 0);
    }

    #[test]
    fn activate_with_wrong_holder_is_rejected() {
        let registry = PortRegistry::new(20010, 20010);
        let port = registry.reserve("w1").unwrap();
        let err = registry.activate(port, "w2").unwrap_err();
        assert!(matches!(err, WorkerError::HolderMismatch(_)));
    }

    #[test]
    fn activate_without_reservation_fails() {
        let registry = PortRegistry::new(20020, 20020);
        let err = registry.activate(20020, "w1").unwrap_err();
        assert!(matches!(err, WorkerError::NotReserved(_)));
    }

    #[test]
    fn reserve_exhausts_and_reports_no_ports() {
        let registry = PortRegistry::new(20030, 20030);
        registry.reserve("w1").unwrap();
        let err = registry.reserve("w2").unwrap_err();
        assert!(matches!(err, WorkerError::NoPortsAvailable));
    }

    #[test]
    fn release_is_idempotent_and_flags_mismatch() {
        let registry = PortRegistry::new(20040, 20040);
        let port = registry.reserve("w1").unwrap();
        assert_eq!(
            registry.release(port, "someone-else"),
            ReleaseOutcome::ReleasedWithMismatch
        );
        // Second release of an already-free port is a no-op, not an error.
        assert_eq!(registry.release(port, "w1"), ReleaseOutcome::Released);
    }

    #[test]
    fn stale_reservation_is_reclaimed_after_ttl() {
        let registry = PortRegistry::new(20050, 20050);
        let port = registry.reserve("w1").unwrap();
        {
            let mut entries = registry.entries.lock();
            entries.get_mut(&port).unwrap().reserved_at =
                Some(Instant::now() - RESERVATION_TTL - Duration::from_secs(1));
        }
        let reclaimed = registry.sweep_stale_reservations();
        assert_eq!(reclaimed, vec![port]);
        assert_eq!(registry.snapshot().free_count, 1);
    }

    #[test]
    fn fresh_reservation_survives_sweep() {
        let registry = PortRegistry::new(20060, 20060);
        registry.reserve("w1").unwrap();
        assert!(registry.sweep_stale_reservations().is_empty());
        assert_eq!(registry.snapshot().reserved, 1);
    }
}
