//! Route reflection (RFC 4456, spec §4.6): reflector-to-client/non-client
//! advertisement rules and ORIGINATOR_ID/CLUSTER_LIST loop prevention.

use std::net::Ipv4Addr;

use crate::bgp::rib::{BgpRoute, SourceTag};
use crate::wire::bgp_attributes::{type_code, PathAttribute};

#[derive(Debug, Clone)]
pub struct ReflectorConfig {
    pub local_router_id: Ipv4Addr,
    pub cluster_id: Ipv4Addr,
}

/// Where (relative to the reflector) a route was learned from, used to pick
/// which reflection rule of spec §4.6 applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnedVia {
    Ebgp,
    IbgpClient,
    IbgpNonClient,
}

/// Is `route` eligible to be reflected to some iBGP peer at all, given where
/// it was learned from? (The specific peer-kind fan-out rule is applied by
/// the caller per spec §4.6's three bullets; this answers the loop-prevention
/// half: ORIGINATOR_ID/CLUSTER_LIST.)
pub fn should_reflect(route: &BgpRoute, cfg: &ReflectorConfig) -> bool {
    if let Some(PathAttribute::OriginatorId(id)) = route.attr(type_code::ORIGINATOR_ID) {
        if *id == cfg.local_router_id {
            return false;
        }
    }
    if let Some(PathAttribute::ClusterList(list)) = route.attr(type_code::CLUSTER_LIST) {
        if list.contains(&cfg.cluster_id) {
            return false;
        }
    }
    true
}

/// Does the reflector fan `route` (learned via `learned_via`) out to a peer
/// that is `peer_is_client`? Spec §4.6's three bullets.
pub fn fans_out_to(learned_via: LearnedVia, peer_is_client: bool) -> bool {
    match learned_via {
        LearnedVia::Ebgp => true,
        LearnedVia::IbgpClient => true,
        LearnedVia::IbgpNonClient => peer_is_client,
    }
}

/// Stamp ORIGINATOR_ID (first reflection only) and prepend CLUSTER_LIST with
/// the local cluster id, as spec §4.6 requires on every reflection.
pub fn stamp_for_reflection(mut route: BgpRoute, cfg: &ReflectorConfig) -> BgpRoute {
    if route.attr(type_code::ORIGINATOR_ID).is_none() {
        let originator = match route.peer.router_id {
            std::net::IpAddr::V4(v4) => v4,
            std::net::IpAddr::V6(_) => cfg.local_router_id,
        };
        route.set_attr(PathAttribute::OriginatorId(originator));
    }
    let mut clusters = match route.attr(type_code::CLUSTER_LIST) {
        Some(PathAttribute::ClusterList(list)) => list.clone(),
        _ => Vec::new(),
    };
    clusters.insert(0, cfg.cluster_id);
    route.set_attr(PathAttribute::ClusterList(clusters));
    route
}

pub fn learned_via(learned_from_is_client: bool, local_as: u32, learned_from_as: u32) -> LearnedVia {
    if learned_from_as != local_as {
        LearnedVia::Ebgp
    } else if learned_from_is_client {
        LearnedVia::IbgpClient
    } else {
        LearnedVia::IbgpNonClient
    }
}

/// Read-only client/non-client peer tally for an observability hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReflectorStatistics {
    pub client_count: usize,
    pub non_client_count: usize,
}

/// Tally a reflector's configured iBGP peers by client/non-client, given each
/// peer's `route_reflector_client` flag.
pub fn tally_clients(peers: impl Iterator<Item = bool>) -> ReflectorStatistics {
    let mut stats = ReflectorStatistics::default();
    for is_client in peers {
        if is_client {
            stats.client_count += 1;
        } else {
            stats.non_client_count += 1;
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bgp::rib::PeerIdentity;
    use chrono::Utc;
    use crate::wire::bgp_attributes::Prefix;

    fn cfg() -> ReflectorConfig {
        ReflectorConfig { local_router_id: Ipv4Addr::new(1, 1, 1, 1), cluster_id: Ipv4Addr::new(1, 1, 1, 1) }
    }

    fn sample_route() -> BgpRoute {
        BgpRoute::new(
            Prefix::new("10.0.0.0".parse().unwrap(), 8),
            vec![],
            PeerIdentity { address: "192.0.2.2".parse().unwrap(), router_id: "192.0.2.2".parse().unwrap() },
            SourceTag::FromPeer,
            Utc::now(),
        )
    }

    #[test]
    fn loop_prevented_on_own_originator_id() {
        let mut route = sample_route();
        route.set_attr(PathAttribute::OriginatorId(Ipv4Addr::new(1, 1, 1, 1)));
        assert!(!should_reflect(&route, &cfg()));
    }

    #[test]
    fn loop_prevented_on_own_cluster_id() {
        let mut route = sample_route();
        route.set_attr(PathAttribute::ClusterList(vec![Ipv4Addr::new(1, 1, 1, 1)]));
        assert!(!should_reflect(&route, &cfg()));
    }

    #[test]
    fn fan_out_rules() {
        assert!(fans_out_to(LearnedVia::Ebgp, false));
        assert!(fans_out_to(LearnedVia::IbgpClient, false));
        assert!(!fans_out_to(LearnedVia::IbgpNonClient, false));
        assert!(fans_out_to(LearnedVia::IbgpNonClient, true));
    }

    #[test]
    fn tallies_client_and_non_client_peers() {
        let stats = tally_clients(vec![true, false, true, true].into_iter());
        assert_eq!(stats.client_count, 3);
        assert_eq!(stats.non_client_count, 1);
    }
}
