//! One OSPF area (spec §4.9): owns the area's LSDB and batches SPF runs with
//! a short hold-down so a burst of LSA installs triggers one Dijkstra pass
//! instead of one per LSA.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use crate::ospf::lsdb::{InstallOutcome, Lsdb};
use crate::ospf::spf;
use crate::ospf::types::RouteEntry;
use crate::wire::ospf::Lsa;

pub const DEFAULT_SPF_HOLDDOWN: Duration = Duration::from_secs(1);

pub struct Area {
    pub area_id: Ipv4Addr,
    pub lsdb: Lsdb,
    pub routing_table: Vec<RouteEntry>,
    spf_pending_since: Option<Instant>,
    holddown: Duration,
}

impl Area {
    pub fn new(area_id: Ipv4Addr) -> Self {
        Area { area_id, lsdb: Lsdb::new(), routing_table: Vec::new(), spf_pending_since: None, holddown: DEFAULT_SPF_HOLDDOWN }
    }

    /// Install an LSA, marking SPF as due if it actually changed the LSDB
    /// (spec §4.9: "re-run whenever a newer area-scoped LSA is installed").
    pub fn install_lsa(&mut self, lsa: Lsa) -> InstallOutcome {
        let outcome = self.lsdb.install(lsa);
        if outcome == InstallOutcome::Installed {
            self.mark_spf_due();
        }
        outcome
    }

    /// Age the LSDB, marking SPF as due if anything aged out (spec §4.9:
    /// "...or an LSA is aged out of the LSDB").
    pub fn age_and_mark(&mut self, seconds: u16) {
        if !self.lsdb.age_by(seconds).is_empty() {
            self.mark_spf_due();
        }
    }

    fn mark_spf_due(&mut self) {
        if self.spf_pending_since.is_none() {
            self.spf_pending_since = Some(Instant::now());
        }
    }

    pub fn spf_due(&self) -> bool {
        matches!(self.spf_pending_since, Some(since) if since.elapsed() >= self.holddown)
    }

    /// Run SPF if the hold-down has elapsed, returning the new routing table.
    pub fn run_spf_if_due(&mut self, router_id: Ipv4Addr) -> Option<&[RouteEntry]> {
        if !self.spf_due() {
            return None;
        }
        self.routing_table = spf::calculate(router_id, &self.lsdb);
        self.spf_pending_since = None;
        Some(&self.routing_table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::ospf::{LsaBody, LsaHeader, RouterLink, RouterLinkType, LSA_ROUTER};

    fn router_lsa(id: Ipv4Addr, seq: i32, links: Vec<RouterLink>) -> Lsa {
        Lsa {
            header: LsaHeader {
                age: 0,
                options: 0x02,
                lsa_type: LSA_ROUTER,
                link_state_id: id,
                advertising_router: id,
                sequence: seq,
                checksum: 0,
                length: 0,
            },
            body: LsaBody::Router { flags: 0, links },
        }
    }

    #[test]
    fn spf_not_due_until_holddown_elapses() {
        let mut area = Area::new(Ipv4Addr::UNSPECIFIED);
        area.holddown = Duration::from_secs(60);
        area.install_lsa(router_lsa(Ipv4Addr::new(10, 0, 0, 1), 1, vec![]));
        assert!(!area.spf_due());
        assert!(area.run_spf_if_due(Ipv4Addr::new(10, 0, 0, 1)).is_none());
    }

    #[test]
    fn spf_runs_once_holddown_elapses() {
        let mut area = Area::new(Ipv4Addr::UNSPECIFIED);
        area.holddown = Duration::from_millis(0);
        area.install_lsa(router_lsa(Ipv4Addr::new(10, 0, 0, 1), 1, vec![]));
        assert!(area.spf_due());
        assert!(area.run_spf_if_due(Ipv4Addr::new(10, 0, 0, 1)).is_some());
        assert!(!area.spf_due());
    }
}
