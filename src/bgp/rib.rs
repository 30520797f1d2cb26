//! RIB primitives (spec C2, §4.2): Adj-RIB-In, Loc-RIB, Adj-RIB-Out.
//!
//! Keyed by hash maps throughout — longest-match lookup is the FIB's job, not
//! this spec's (§4.2), so prefix ordering is not required for correctness.

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};

use crate::wire::bgp_attributes::{Origin, PathAttribute, Prefix};

/// Where a route came from, for logging and the decision process (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTag {
    FromPeer,
    LocalOrigination,
    Aggregate,
}

/// RPKI origin-validation outcome, written onto the route by the RPKI module
/// (spec §4.6) if it's enabled for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpkiState {
    Valid,
    Invalid,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerIdentity {
    pub address: IpAddr,
    pub router_id: IpAddr,
}

/// One route: prefix, its attribute set, peer identity, provenance, timestamp
/// and flags (spec §3). Attributes are keyed by type code so an attribute can
/// appear at most once (invariant 2).
#[derive(Debug, Clone)]
pub struct BgpRoute {
    pub prefix: Prefix,
    pub attributes: HashMap<u8, PathAttribute>,
    pub peer: PeerIdentity,
    pub source: SourceTag,
    pub timestamp: DateTime<Utc>,
    pub best: bool,
    pub stale: bool,
    pub rpki_state: Option<RpkiState>,
}

impl BgpRoute {
    pub fn new(
        prefix: Prefix,
        attributes: Vec<PathAttribute>,
        peer: PeerIdentity,
        source: SourceTag,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut map = HashMap::with_capacity(attributes.len());
        for attr in attributes {
            map.insert(attr.type_code(), attr);
        }
        BgpRoute { prefix, attributes: map, peer, source, timestamp, best: false, stale: false, rpki_state: None }
    }

    pub fn attr(&self, type_code: u8) -> Option<&PathAttribute> {
        self.attributes.get(&type_code)
    }

    pub fn set_attr(&mut self, attr: PathAttribute) {
        self.attributes.insert(attr.type_code(), attr);
    }

    pub fn remove_attr(&mut self, type_code: u8) {
        self.attributes.remove(&type_code);
    }

    pub fn origin(&self) -> Origin {
        match self.attr(crate::wire::bgp_attributes::type_code::ORIGIN) {
            Some(PathAttribute::Origin(o)) => *o,
            _ => Origin::Incomplete,
        }
    }

    pub fn as_path(&self) -> crate::wire::bgp_attributes::AsPath {
        match self.attr(crate::wire::bgp_attributes::type_code::AS_PATH) {
            Some(PathAttribute::AsPath(path)) => path.clone(),
            _ => Default::default(),
        }
    }

    pub fn local_pref(&self) -> u32 {
        match self.attr(crate::wire::bgp_attributes::type_code::LOCAL_PREF) {
            Some(PathAttribute::LocalPref(v)) => *v,
            _ => 100,
        }
    }

    pub fn med(&self) -> u32 {
        match self.attr(crate::wire::bgp_attributes::type_code::MED) {
            Some(PathAttribute::Med(v)) => *v,
            _ => 0,
        }
    }

    pub fn communities(&self) -> &[crate::wire::bgp_attributes::Community] {
        match self.attr(crate::wire::bgp_attributes::type_code::COMMUNITIES) {
            Some(PathAttribute::Communities(list)) => list,
            _ => &[],
        }
    }

    /// The origin AS used by RPKI validation: the rightmost ASN in AS_PATH,
    /// or `None` for a locally-originated route with an empty path.
    pub fn origin_asn(&self) -> Option<u32> {
        self.as_path().origin_asn()
    }
}

/// Per-peer mapping prefix -> the single retained route from that peer.
#[derive(Debug, Default)]
pub struct AdjRibIn {
    routes: HashMap<Prefix, BgpRoute>,
}

impl AdjRibIn {
    pub fn new() -> Self {
        Self::default()
    }

    /// A re-announce for the same prefix replaces, per spec §3.
    pub fn insert_or_replace(&mut self, route: BgpRoute) -> Option<BgpRoute> {
        self.routes.insert(route.prefix, route)
    }

    pub fn remove(&mut self, prefix: &Prefix) -> Option<BgpRoute> {
        self.routes.remove(prefix)
    }

    pub fn lookup(&self, prefix: &Prefix) -> Option<&BgpRoute> {
        self.routes.get(prefix)
    }

    pub fn lookup_mut(&mut self, prefix: &Prefix) -> Option<&mut BgpRoute> {
        self.routes.get_mut(prefix)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BgpRoute> {
        self.routes.values()
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &Prefix> {
        self.routes.keys()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// The best-path-selected local RIB: exactly one route per prefix.
#[derive(Debug, Default)]
pub struct LocRib {
    routes: HashMap<Prefix, BgpRoute>,
}

impl LocRib {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, route: BgpRoute) -> Option<BgpRoute> {
        self.routes.insert(route.prefix, route)
    }

    pub fn remove(&mut self, prefix: &Prefix) -> Option<BgpRoute> {
        self.routes.remove(prefix)
    }

    pub fn lookup(&self, prefix: &Prefix) -> Option<&BgpRoute> {
        self.routes.get(prefix)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BgpRoute> {
        self.routes.values()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }
}

/// Per-peer mapping prefix -> route as it should appear on the wire to that
/// peer, after egress transforms (spec §4.5).
#[derive(Debug, Default)]
pub struct AdjRibOut {
    routes: HashMap<Prefix, BgpRoute>,
}

impl AdjRibOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, route: BgpRoute) -> Option<BgpRoute> {
        self.routes.insert(route.prefix, route)
    }

    pub fn remove(&mut self, prefix: &Prefix) -> Option<BgpRoute> {
        self.routes.remove(prefix)
    }

    pub fn lookup(&self, prefix: &Prefix) -> Option<&BgpRoute> {
        self.routes.get(prefix)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BgpRoute> {
        self.routes.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::bgp_attributes::{AsPath, AsPathSegment};
    use std::net::Ipv4Addr;

    fn peer() -> PeerIdentity {
        PeerIdentity { address: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 2)), router_id: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 2)) }
    }

    #[test]
    fn reannounce_replaces_in_adj_rib_in() {
        let mut rib = AdjRibIn::new();
        let prefix = Prefix::new("10.0.0.0".parse().unwrap(), 8);
        let route1 = BgpRoute::new(prefix, vec![], peer(), SourceTag::FromPeer, Utc::now());
        let mut route2 = BgpRoute::new(prefix, vec![], peer(), SourceTag::FromPeer, Utc::now());
        route2.set_attr(PathAttribute::AsPath(AsPath { segments: vec![AsPathSegment::Sequence(vec![65001])] }));
        rib.insert_or_replace(route1);
        rib.insert_or_replace(route2);
        assert_eq!(rib.len(), 1);
        assert_eq!(rib.lookup(&prefix).unwrap().as_path().path_length(), 1);
    }
}
