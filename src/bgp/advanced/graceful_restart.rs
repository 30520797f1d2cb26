//! Graceful restart (RFC 4724, spec §4.6): marks a peer's routes stale across
//! a session drop instead of deleting them, so forwarding continues until an
//! End-of-RIB marker or a per-peer restart-timer deadline.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::wire::bgp_attributes::{Afi, Prefix, Safi};

#[derive(Debug, Clone)]
pub struct GracefulRestartCapability {
    pub restart_time_secs: u16,
    pub restarting: bool,
    pub preserved_families: Vec<(Afi, Safi)>,
}

/// Per-peer graceful-restart bookkeeping: which prefixes are stale, and the
/// deadline by which an End-of-RIB must arrive. Stale prefixes are tracked
/// per (AFI,SAFI) so that an End-of-RIB for one negotiated family (spec
/// §4.6) evicts only that family's still-stale routes, leaving any other
/// in-flight family's stale set untouched.
#[derive(Debug)]
pub struct RestartState {
    pub deadline: DateTime<Utc>,
    stale_prefixes: HashSet<(Afi, Safi, Prefix)>,
    eor_received: HashSet<(Afi, Safi)>,
}

impl RestartState {
    pub fn begin(all_prefixes: impl IntoIterator<Item = (Afi, Safi, Prefix)>, restart_time_secs: u16, now: DateTime<Utc>) -> Self {
        RestartState {
            deadline: now + chrono::Duration::seconds(i64::from(restart_time_secs)),
            stale_prefixes: all_prefixes.into_iter().collect(),
            eor_received: HashSet::new(),
        }
    }

    pub fn is_stale(&self, safi: Safi, prefix: &Prefix) -> bool {
        self.stale_prefixes.contains(&(prefix.afi(), safi, *prefix))
    }

    /// Called when a route is re-received from the reconnected peer: it is
    /// no longer stale.
    pub fn refresh(&mut self, safi: Safi, prefix: &Prefix) {
        self.stale_prefixes.remove(&(prefix.afi(), safi, *prefix));
    }

    /// Called on receipt of an End-of-RIB marker for `(afi, safi)`. Returns
    /// only that family's still-stale prefixes for eviction (spec §4.6 (a));
    /// stale prefixes of any other family are left untouched.
    pub fn end_of_rib(&mut self, afi: Afi, safi: Safi) -> Vec<Prefix> {
        self.eor_received.insert((afi, safi));
        let (evicted, remaining): (Vec<_>, Vec<_>) =
            self.stale_prefixes.drain().partition(|(a, s, _)| *a == afi && *s == safi);
        self.stale_prefixes = remaining.into_iter().collect();
        evicted.into_iter().map(|(_, _, p)| p).collect()
    }

    /// Has the restart timer expired? If so every still-stale route of
    /// every family is evicted (spec §4.6 (b)).
    pub fn expire_if_overdue(&mut self, now: DateTime<Utc>) -> Option<Vec<Prefix>> {
        if now >= self.deadline && !self.stale_prefixes.is_empty() {
            Some(self.stale_prefixes.drain().map(|(_, _, p)| p).collect())
        } else {
            None
        }
    }

    /// True once every negotiated family has had its End-of-RIB processed
    /// with nothing left stale, i.e. the restart is fully recovered and this
    /// state can be dropped.
    pub fn fully_recovered(&self) -> bool {
        self.stale_prefixes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix(n: u8) -> Prefix {
        Prefix::new(std::net::IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, n)), 32)
    }

    fn prefix6(n: u16) -> Prefix {
        Prefix::new(std::net::IpAddr::V6(std::net::Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, n)), 128)
    }

    #[test]
    fn end_of_rib_evicts_remaining_stale_routes() {
        let t0 = Utc::now();
        let mut state = RestartState::begin([(Afi::Ipv4, Safi::Unicast, prefix(1)), (Afi::Ipv4, Safi::Unicast, prefix(2))], 120, t0);
        state.refresh(Safi::Unicast, &prefix(1));
        let evicted = state.end_of_rib(Afi::Ipv4, Safi::Unicast);
        assert_eq!(evicted, vec![prefix(2)]);
    }

    #[test]
    fn end_of_rib_for_one_family_leaves_other_family_stale() {
        let t0 = Utc::now();
        let mut state = RestartState::begin(
            [(Afi::Ipv4, Safi::Unicast, prefix(1)), (Afi::Ipv6, Safi::Unicast, prefix6(1))],
            120,
            t0,
        );
        let evicted = state.end_of_rib(Afi::Ipv4, Safi::Unicast);
        assert_eq!(evicted, vec![prefix(1)]);
        assert!(state.is_stale(Safi::Unicast, &prefix6(1)));
        assert!(!state.is_stale(Safi::Unicast, &prefix(1)));
    }

    #[test]
    fn timer_expiry_evicts_everything_still_stale() {
        let t0 = Utc::now();
        let mut state = RestartState::begin([(Afi::Ipv4, Safi::Unicast, prefix(1))], 1, t0);
        assert!(state.expire_if_overdue(t0).is_none());
        let evicted = state.expire_if_overdue(t0 + chrono::Duration::seconds(2)).unwrap();
        assert_eq!(evicted, vec![prefix(1)]);
    }
}
