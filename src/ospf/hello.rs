//! The Hello protocol (spec §4.7, RFC 2328 §9.5/§10.5): building outbound
//! Hellos, validating inbound ones against the interface's parameters, and
//! DR/BDR election.

use std::net::Ipv4Addr;

use crate::ospf::types::OspfInterface;
use crate::wire::ospf::HelloPacket;

/// Build the Hello to send out `iface`, listing `neighbors` (router ids of
/// everyone we currently hear, per spec §4.7).
pub fn build_hello(iface: &OspfInterface, neighbors: &[Ipv4Addr]) -> HelloPacket {
    HelloPacket {
        network_mask: iface.mask,
        hello_interval: iface.hello_interval,
        options: 0x02, // E-bit: this area is not a stub
        router_priority: iface.router_priority,
        router_dead_interval: iface.dead_interval,
        designated_router: iface.designated_router,
        backup_designated_router: iface.backup_designated_router,
        neighbors: neighbors.to_vec(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelloRejection {
    NetworkMaskMismatch,
    HelloIntervalMismatch,
    DeadIntervalMismatch,
}

/// Validate a received Hello against our interface's parameters (spec §4.7:
/// "a received Hello must match the network mask, HelloInterval,
/// DeadInterval... mismatches are logged and dropped"). P2P links don't
/// carry a meaningful mask, so the caller skips that check there.
pub fn validate_hello(iface: &OspfInterface, hello: &HelloPacket, check_mask: bool) -> Result<(), HelloRejection> {
    if check_mask && hello.network_mask != iface.mask {
        return Err(HelloRejection::NetworkMaskMismatch);
    }
    if hello.hello_interval != iface.hello_interval {
        return Err(HelloRejection::HelloIntervalMismatch);
    }
    if hello.router_dead_interval != iface.dead_interval {
        return Err(HelloRejection::DeadIntervalMismatch);
    }
    Ok(())
}

/// Whether `our_router_id` appears in the neighbor's Hello neighbor list —
/// the 2-Way detector (spec §4.7).
pub fn is_bidirectional(hello: &HelloPacket, our_router_id: Ipv4Addr) -> bool {
    hello.neighbors.contains(&our_router_id)
}

#[derive(Debug, Clone, Copy)]
pub struct ElectionCandidate {
    pub router_id: Ipv4Addr,
    pub priority: u8,
    pub declared_dr: Ipv4Addr,
    pub declared_bdr: Ipv4Addr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectionResult {
    pub designated_router: Ipv4Addr,
    pub backup_designated_router: Ipv4Addr,
}

/// DR/BDR election over broadcast/NBMA segments (spec §4.7, RFC 2328 §9.4):
/// candidates are every neighbor at state ≥ 2-Way with priority > 0, plus
/// ourselves. BDR is elected first (highest priority among those NOT
/// declaring themselves DR, router-id tiebreak), then DR (highest priority
/// among those declaring themselves DR, tiebreak by router id; falls back to
/// the just-elected BDR if nobody declares DR).
pub fn elect_dr_bdr(candidates: &[ElectionCandidate]) -> ElectionResult {
    let eligible: Vec<ElectionCandidate> = candidates.iter().copied().filter(|c| c.priority > 0).collect();
    if eligible.is_empty() {
        return ElectionResult { designated_router: Ipv4Addr::UNSPECIFIED, backup_designated_router: Ipv4Addr::UNSPECIFIED };
    }

    let bdr_candidates: Vec<ElectionCandidate> = eligible.iter().copied().filter(|c| c.declared_dr != c.router_id).collect();
    let bdr = best_of(&bdr_candidates, |c| c.declared_bdr == c.router_id)
        .or_else(|| best_of(&bdr_candidates, |_| true))
        .map(|c| c.router_id)
        .unwrap_or(Ipv4Addr::UNSPECIFIED);

    let dr_candidates: Vec<ElectionCandidate> = eligible.iter().copied().filter(|c| c.declared_dr == c.router_id).collect();
    let dr = best_of(&dr_candidates, |_| true).map(|c| c.router_id).unwrap_or(bdr);

    ElectionResult { designated_router: dr, backup_designated_router: bdr }
}

fn best_of(candidates: &[ElectionCandidate], predicate: impl Fn(&ElectionCandidate) -> bool) -> Option<ElectionCandidate> {
    candidates
        .iter()
        .copied()
        .filter(|c| predicate(c))
        .max_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.router_id.cmp(&b.router_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: u8, priority: u8, dr: u8, bdr: u8) -> ElectionCandidate {
        ElectionCandidate {
            router_id: Ipv4Addr::new(10, 0, 0, id),
            priority,
            declared_dr: Ipv4Addr::new(10, 0, 0, dr),
            declared_bdr: Ipv4Addr::new(10, 0, 0, bdr),
        }
    }

    #[test]
    fn priority_zero_routers_never_elected() {
        let result = elect_dr_bdr(&[candidate(1, 0, 0, 0)]);
        assert_eq!(result.designated_router, Ipv4Addr::UNSPECIFIED);
    }

    #[test]
    fn highest_priority_declaring_dr_wins() {
        let candidates = [candidate(1, 1, 1, 0), candidate(2, 2, 2, 0)];
        let result = elect_dr_bdr(&candidates);
        assert_eq!(result.designated_router, Ipv4Addr::new(10, 0, 0, 2));
    }

    #[test]
    fn bdr_falls_back_to_highest_priority_non_dr_when_none_declare_bdr() {
        let candidates = [candidate(1, 1, 0, 0), candidate(2, 2, 0, 0)];
        let result = elect_dr_bdr(&candidates);
        assert_eq!(result.backup_designated_router, Ipv4Addr::new(10, 0, 0, 2));
    }

    #[test]
    fn hello_rejected_on_mismatched_dead_interval() {
        let iface = OspfInterface::new(Ipv4Addr::UNSPECIFIED, Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(255, 255, 255, 0), crate::ospf::types::NetworkType::Broadcast);
        let mut hello = build_hello(&iface, &[]);
        hello.router_dead_interval = iface.dead_interval + 1;
        assert_eq!(validate_hello(&iface, &hello, true), Err(HelloRejection::DeadIntervalMismatch));
    }
}
