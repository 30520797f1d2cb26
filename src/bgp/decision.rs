//! BGP decision process (spec C5, §4.5): tie-breaking best-path selection,
//! egress transforms and advertisement rules.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};

use chrono::{DateTime, Utc};

use crate::bgp::advanced::flap::{self, FlapDampener};
use crate::bgp::advanced::reflector::{self, ReflectorConfig};
use crate::bgp::rib::{AdjRibIn, BgpRoute, LocRib, PeerIdentity, SourceTag};
use crate::wire::bgp_attributes::{type_code, Community, PathAttribute, Prefix};

/// One outcome of a decision-process run over a changed prefix.
#[derive(Debug, Clone)]
pub enum DecisionOutcome {
    InstallBest(BgpRoute),
    WithdrawBest,
}

/// A peer's update to one prefix, as handed from a session task to the
/// decision process (spec §5, design note "Global mutable state (the RIBs)
/// -> single-owner task with message passing"): `route = None` is a
/// withdrawal.
#[derive(Debug, Clone)]
pub struct ChangedRoute {
    pub peer: PeerIdentity,
    pub peer_as: u32,
    pub prefix: Prefix,
    pub route: Option<BgpRoute>,
    /// Whether this peer has flap damping enabled and is an eBGP neighbor
    /// (spec §4.6: "suppression applies only to eBGP-learned routes by
    /// default").
    pub flap_eligible: bool,
}

/// The single task-owned decision process (spec C5): holds its own copy of
/// every peer's Adj-RIB-In (fed exclusively by `ChangedRoute` messages, never
/// by a lock shared with session tasks) and the one Loc-RIB. Recomputation
/// is per-prefix, so concurrent changes to unrelated prefixes from different
/// sessions never contend (spec §5: "no ordering across sessions; the
/// decision process reconciles").
pub struct DecisionProcess {
    pub local_as: u32,
    pub deterministic: bool,
    pub reflector: Option<ReflectorConfig>,
    adj_rib_in: HashMap<IpAddr, AdjRibIn>,
    pub loc_rib: LocRib,
    pub flap: FlapDampener,
}

impl DecisionProcess {
    pub fn new(local_as: u32, deterministic: bool, reflector: Option<ReflectorConfig>) -> Self {
        DecisionProcess {
            local_as,
            deterministic,
            reflector,
            adj_rib_in: HashMap::new(),
            loc_rib: LocRib::new(),
            flap: FlapDampener::default(),
        }
    }

    /// Apply one peer's change to this process's copy of that peer's
    /// Adj-RIB-In, record any flap-damping event it represents, then
    /// recompute the best path for the affected prefix. Returns `None` when
    /// the best route for the prefix did not change (spec §8's
    /// linearizability property holds per-prefix).
    pub fn apply_change(&mut self, change: ChangedRoute, now: DateTime<Utc>) -> Option<DecisionOutcome> {
        let rib = self.adj_rib_in.entry(change.peer.address).or_default();
        let previous = rib.lookup(&change.prefix).cloned();
        match &change.route {
            Some(route) => {
                rib.insert_or_replace(route.clone());
            }
            None => {
                rib.remove(&change.prefix);
            }
        }

        if change.flap_eligible {
            let penalty = match (&previous, &change.route) {
                (_, None) => Some(flap::WITHDRAWAL_PENALTY),
                (Some(prev), Some(new)) if prev.attributes != new.attributes => Some(flap::ATTRIBUTE_CHANGE_PENALTY),
                _ => None,
            };
            if let Some(p) = penalty {
                self.flap.record_event(change.prefix, p, now);
            }
        }

        self.recompute(change.prefix, now)
    }

    /// Remove everything learned from `peer` (session teardown without
    /// graceful restart), recomputing every prefix that peer contributed.
    /// The prefix is returned alongside each outcome since `WithdrawBest`
    /// itself carries none, and callers (FIB sync, advertisement fan-out)
    /// need it.
    pub fn remove_peer(&mut self, peer: IpAddr, now: DateTime<Utc>) -> Vec<(Prefix, DecisionOutcome)> {
        let Some(rib) = self.adj_rib_in.remove(&peer) else { return Vec::new() };
        let prefixes: Vec<Prefix> = rib.prefixes().copied().collect();
        prefixes.into_iter().filter_map(|p| self.recompute(p, now).map(|outcome| (p, outcome))).collect()
    }

    fn recompute(&mut self, prefix: Prefix, now: DateTime<Utc>) -> Option<DecisionOutcome> {
        if self.flap.is_suppressed_at(prefix, now) {
            return None;
        }
        let candidates: Vec<&BgpRoute> = self.adj_rib_in.values().filter_map(|rib| rib.lookup(&prefix)).collect();
        let best = select_best(candidates, self.local_as, self.deterministic).cloned();
        let previous_peer = self.loc_rib.lookup(&prefix).map(|r| r.peer);

        match best {
            Some(mut route) => {
                route.best = true;
                let changed = previous_peer != Some(route.peer);
                self.loc_rib.install(route.clone());
                if changed || previous_peer.is_none() {
                    Some(DecisionOutcome::InstallBest(route))
                } else {
                    None
                }
            }
            None => {
                if self.loc_rib.remove(&prefix).is_some() {
                    Some(DecisionOutcome::WithdrawBest)
                } else {
                    None
                }
            }
        }
    }
}

/// Compare two candidate routes under the ordered tie-breakers of spec
/// §4.5. Returns `Ordering::Less` when `a` is preferred over `b`.
pub fn compare(a: &BgpRoute, b: &BgpRoute, local_as: u32, deterministic: bool) -> Ordering {
    // 1. Higher LOCAL_PREF wins.
    b.local_pref()
        .cmp(&a.local_pref())
        // 2. Shorter AS_PATH length wins.
        .then_with(|| a.as_path().path_length().cmp(&b.as_path().path_length()))
        // 3. Lower ORIGIN wins.
        .then_with(|| a.origin().cmp(&b.origin()))
        // 4. Lower MED wins, only compared within the same neighbor AS.
        .then_with(|| {
            let a_nb = a.as_path().neighbor_asn();
            let b_nb = b.as_path().neighbor_asn();
            if a_nb.is_some() && a_nb == b_nb {
                a.med().cmp(&b.med())
            } else {
                Ordering::Equal
            }
        })
        // 5. eBGP over iBGP.
        .then_with(|| {
            let a_ebgp = a.as_path().neighbor_asn().map(|n| n != local_as).unwrap_or(false);
            let b_ebgp = b.as_path().neighbor_asn().map(|n| n != local_as).unwrap_or(false);
            b_ebgp.cmp(&a_ebgp)
        })
        // 6. Older route wins (stability), unless deterministic mode is set.
        .then_with(|| if deterministic { Ordering::Equal } else { a.timestamp.cmp(&b.timestamp) })
        // 7. Lower BGP-identifier of the advertising peer wins.
        .then_with(|| a.peer.router_id.cmp(&b.peer.router_id))
        // 8. Lower peer address wins (final tiebreaker).
        .then_with(|| a.peer.address.cmp(&b.peer.address))
}

/// Select the best route among `candidates` (post-import-policy, post-flap
/// suppression), per the decision process of spec §4.5.
pub fn select_best<'a>(candidates: impl IntoIterator<Item = &'a BgpRoute>, local_as: u32, deterministic: bool) -> Option<&'a BgpRoute> {
    candidates
        .into_iter()
        .min_by(|a, b| compare(a, b, local_as, deterministic))
}

/// Is `peer_as` an eBGP neighbor relative to `local_as`?
pub fn is_ebgp(peer_as: u32, local_as: u32) -> bool {
    peer_as != local_as
}

/// Apply the egress transforms of spec §4.5 to a best route being advertised
/// to `peer`. `next_hop_self` supplies the locally-chosen interface address
/// used when next-hop-self applies (eBGP, or iBGP when requested).
pub fn apply_egress_transforms(
    mut route: BgpRoute,
    local_as: u32,
    peer_as: u32,
    next_hop_self: Ipv4Addr,
    force_next_hop_self: bool,
) -> BgpRoute {
    let ebgp = is_ebgp(peer_as, local_as);

    if ebgp || force_next_hop_self {
        route.set_attr(PathAttribute::NextHop(next_hop_self));
    }

    if ebgp {
        let prepended = route.as_path().prepend(local_as);
        route.set_attr(PathAttribute::AsPath(prepended));
        route.remove_attr(type_code::LOCAL_PREF);
    } else if route.attr(type_code::LOCAL_PREF).is_none() {
        route.set_attr(PathAttribute::LocalPref(100));
    }

    route
}

/// Should `route` (already best in Loc-RIB, learned from `learned_from`) be
/// advertised to `peer`, given the peer's iBGP/eBGP-ness and route-reflector
/// role? Implements spec §4.5's advertisement rules plus §4.6 reflection.
#[allow(clippy::too_many_arguments)]
pub fn should_advertise_to(
    route: &BgpRoute,
    learned_from: &PeerIdentity,
    peer: &PeerIdentity,
    local_as: u32,
    peer_as: u32,
    _local_router_id: Ipv4Addr,
    reflector: Option<&ReflectorConfig>,
) -> bool {
    // A route learned from peer X must never go back to X.
    if learned_from.address == peer.address {
        return false;
    }

    if route.communities().contains(&Community::NO_ADVERTISE) {
        return false;
    }
    let ebgp_dest = is_ebgp(peer_as, local_as);
    if ebgp_dest && route.communities().contains(&Community::NO_EXPORT) {
        return false;
    }

    if ebgp_dest {
        // Loop prevention on egress (spec §3 invariant 4): never advertise a
        // route whose AS_PATH already contains the destination's AS.
        return !route.as_path().contains(peer_as);
    }

    // iBGP destination: non-transitivity unless reflection permits it.
    let locally_sourced = matches!(route.source, SourceTag::LocalOrigination | SourceTag::Aggregate);
    match reflector {
        Some(cfg) => locally_sourced || reflector::should_reflect(route, cfg),
        None => locally_sourced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bgp::rib::SourceTag;
    use crate::wire::bgp_attributes::{AsPath, AsPathSegment, Origin, Prefix};
    use chrono::Utc;

    fn peer(addr: &str, rid: &str) -> PeerIdentity {
        PeerIdentity { address: addr.parse().unwrap(), router_id: rid.parse().unwrap() }
    }

    fn route(as_path: Vec<u32>, local_pref: Option<u32>, peer_addr: &str) -> BgpRoute {
        let prefix = Prefix::new("10.0.0.0".parse().unwrap(), 8);
        let mut attrs = vec![
            PathAttribute::Origin(Origin::Igp),
            PathAttribute::AsPath(AsPath { segments: vec![AsPathSegment::Sequence(as_path)] }),
        ];
        if let Some(lp) = local_pref {
            attrs.push(PathAttribute::LocalPref(lp));
        }
        BgpRoute::new(prefix, attrs, peer(peer_addr, peer_addr), SourceTag::FromPeer, Utc::now())
    }

    #[test]
    fn shorter_as_path_wins_s2() {
        let p1 = route(vec![65100, 65200], None, "192.0.2.1");
        let p2 = route(vec![65100], None, "192.0.2.2");
        let best = select_best([&p1, &p2], 65001, false).unwrap();
        assert_eq!(best.peer.address, "192.0.2.2".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn local_pref_overrides_as_path_length() {
        let p1 = route(vec![65100, 65200], Some(200), "192.0.2.1");
        let p2 = route(vec![65100], None, "192.0.2.2");
        let best = select_best([&p1, &p2], 65001, false).unwrap();
        assert_eq!(best.peer.address, "192.0.2.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn egress_prepends_as_for_ebgp_only() {
        let r = route(vec![65002], None, "192.0.2.2");
        let out = apply_egress_transforms(r.clone(), 65001, 65002, Ipv4Addr::new(192, 0, 2, 1), false);
        assert_eq!(out.as_path().path_length(), 2);

        let out_ibgp = apply_egress_transforms(r, 65001, 65001, Ipv4Addr::new(192, 0, 2, 1), false);
        assert_eq!(out_ibgp.as_path().path_length(), 1);
        assert_eq!(out_ibgp.local_pref(), 100);
    }

    #[test]
    fn ibgp_learned_route_not_sent_to_other_ibgp_peer_s3() {
        let learned_from = peer("192.0.2.3", "192.0.2.3"); // B
        let dest = peer("192.0.2.4", "192.0.2.4"); // C
        let r = route(vec![], None, "192.0.2.3");
        assert!(!should_advertise_to(&r, &learned_from, &dest, 65001, 65001, Ipv4Addr::new(192, 0, 2, 1), None));
    }

    #[test]
    fn egress_as_path_loop_prevention_blocks_peer_already_in_path() {
        let learned_from = peer("192.0.2.3", "192.0.2.3");
        let dest = peer("192.0.2.5", "192.0.2.5");
        let r = route(vec![65100, 65555], None, "192.0.2.3");
        assert!(!should_advertise_to(&r, &learned_from, &dest, 65001, 65555, Ipv4Addr::new(192, 0, 2, 1), None));
        assert!(should_advertise_to(&r, &learned_from, &dest, 65001, 65999, Ipv4Addr::new(192, 0, 2, 1), None));
    }

    #[test]
    fn decision_process_tracks_loc_rib_as_ribs_change_s2() {
        let prefix = Prefix::new("10.0.0.0".parse().unwrap(), 8);
        let mut dp = DecisionProcess::new(65001, false, None);
        let now = Utc::now();

        let p1 = peer("192.0.2.1", "192.0.2.1");
        let p2 = peer("192.0.2.2", "192.0.2.2");
        let r1 = route(vec![65100, 65200], None, "192.0.2.1");
        let r2 = route(vec![65100], None, "192.0.2.2");

        dp.apply_change(ChangedRoute { peer: p1, peer_as: 65100, prefix, route: Some(r1), flap_eligible: false }, now);
        let outcome = dp.apply_change(ChangedRoute { peer: p2, peer_as: 65100, prefix, route: Some(r2), flap_eligible: false }, now);
        assert!(matches!(outcome, Some(DecisionOutcome::InstallBest(ref r)) if r.peer.address == p2.address));
        assert_eq!(dp.loc_rib.lookup(&prefix).unwrap().peer.address, p2.address);

        let outcome = dp.apply_change(ChangedRoute { peer: p2, peer_as: 65100, prefix, route: None, flap_eligible: false }, now);
        assert!(matches!(outcome, Some(DecisionOutcome::InstallBest(ref r)) if r.peer.address == p1.address));
        assert_eq!(dp.loc_rib.lookup(&prefix).unwrap().peer.address, p1.address);
    }

    #[test]
    fn decision_process_withdraws_when_last_route_is_removed() {
        let prefix = Prefix::new("10.0.0.0".parse().unwrap(), 8);
        let mut dp = DecisionProcess::new(65001, false, None);
        let now = Utc::now();
        let p1 = peer("192.0.2.1", "192.0.2.1");
        let r1 = route(vec![65100], None, "192.0.2.1");
        dp.apply_change(ChangedRoute { peer: p1, peer_as: 65100, prefix, route: Some(r1), flap_eligible: false }, now);
        let outcome = dp.apply_change(ChangedRoute { peer: p1, peer_as: 65100, prefix, route: None, flap_eligible: false }, now);
        assert!(matches!(outcome, Some(DecisionOutcome::WithdrawBest)));
        assert!(dp.loc_rib.lookup(&prefix).is_none());
    }

    #[test]
    fn remove_peer_withdraws_every_prefix_it_contributed() {
        let prefix = Prefix::new("10.0.0.0".parse().unwrap(), 8);
        let mut dp = DecisionProcess::new(65001, false, None);
        let now = Utc::now();
        let p1 = peer("192.0.2.1", "192.0.2.1");
        let r1 = route(vec![65100], None, "192.0.2.1");
        dp.apply_change(ChangedRoute { peer: p1, peer_as: 65100, prefix, route: Some(r1), flap_eligible: false }, now);
        let outcomes = dp.remove_peer(p1.address, now);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].0, prefix);
        assert!(matches!(outcomes[0].1, DecisionOutcome::WithdrawBest));
    }

    #[test]
    fn flap_eligible_withdrawal_accumulates_penalty_and_suppresses() {
        let prefix = Prefix::new("10.0.0.0".parse().unwrap(), 8);
        let mut dp = DecisionProcess::new(65001, false, None);
        dp.flap = FlapDampener::new(crate::bgp::advanced::flap::DampingConfig {
            half_life_secs: 900,
            suppress_threshold: 1500.0,
            reuse_threshold: 750.0,
            max_suppress_secs: 3600,
            cutoff_threshold: 1000.0,
        });
        let t0 = Utc::now();
        let p1 = peer("192.0.2.1", "192.0.2.1");
        let r1 = route(vec![65100], None, "192.0.2.1");

        dp.apply_change(ChangedRoute { peer: p1, peer_as: 65100, prefix, route: Some(r1.clone()), flap_eligible: true }, t0);
        dp.apply_change(ChangedRoute { peer: p1, peer_as: 65100, prefix, route: None, flap_eligible: true }, t0 + chrono::Duration::seconds(1));
        dp.apply_change(ChangedRoute { peer: p1, peer_as: 65100, prefix, route: Some(r1.clone()), flap_eligible: true }, t0 + chrono::Duration::seconds(2));
        let outcome = dp.apply_change(ChangedRoute { peer: p1, peer_as: 65100, prefix, route: None, flap_eligible: true }, t0 + chrono::Duration::seconds(3));

        // Suppressed: withdrawal outcome is frozen out rather than reported.
        assert!(outcome.is_none());
    }
}
