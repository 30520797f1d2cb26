//! Link-state flooding (spec C8/§4.8, RFC 2328 §13): deciding whether a
//! received LSA is newer, managing the per-neighbor retransmission list, and
//! the broadcast-segment flooding scope (DR vs. non-DR, AllDRouters vs.
//! AllSPFRouters).

use std::time::{Duration, Instant};

use crate::ospf::lsdb::{InstallOutcome, Lsdb};
use crate::ospf::types::{NetworkType, ALL_D_ROUTERS, ALL_SPF_ROUTERS};
use crate::wire::ospf::{Lsa, LsaKey};

pub const DEFAULT_RETRANSMIT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStyle {
    /// Direct LSAck to the sender (P2P, or the LSA didn't come from the DR).
    Direct,
    /// Delayed, grouped LSAck (broadcast, LSA came from the DR).
    DelayedGroup,
}

/// What to do with a received LSA instance (spec §4.8): install if newer,
/// and if so flood it onward and ack; otherwise just ack (it was a
/// duplicate retransmission) or drop silently (it was strictly older, which
/// RFC 2328 treats as a hint to re-send our own copy — out of scope here).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FloodDecision {
    InstallFloodAck { ack_style: AckStyle },
    AckOnly { ack_style: AckStyle },
    Ignore,
}

/// Decide what to do with an incoming LSA and install it into `lsdb` if it's
/// newer. `from_dr` is whether the sending neighbor is this segment's DR.
pub fn receive_lsa(lsdb: &mut Lsdb, lsa: Lsa, network_type: NetworkType, from_dr: bool) -> FloodDecision {
    let ack_style = if network_type == NetworkType::Broadcast && from_dr {
        AckStyle::DelayedGroup
    } else {
        AckStyle::Direct
    };
    match lsdb.install(lsa) {
        InstallOutcome::Installed => FloodDecision::InstallFloodAck { ack_style },
        InstallOutcome::Duplicate => FloodDecision::AckOnly { ack_style },
        InstallOutcome::Older => FloodDecision::Ignore,
    }
}

/// The multicast destination a non-DR/BDR speaker floods to vs. what the DR
/// floods to (spec §4.8: "LSAs flood to AllDRouters if sent by a non-DR, or
/// to AllSPFRouters if sent by the DR").
pub fn flood_destination(network_type: NetworkType, sender_is_dr: bool) -> std::net::Ipv4Addr {
    if network_type == NetworkType::Broadcast && !sender_is_dr {
        ALL_D_ROUTERS
    } else {
        ALL_SPF_ROUTERS
    }
}

/// One outstanding (LSA, neighbor) retransmission awaiting an ack.
#[derive(Debug, Clone, Copy)]
pub struct PendingRetransmission {
    pub key: LsaKey,
    pub sent_at: Instant,
}

/// Tracks unacknowledged LSAs per neighbor, retransmitting at
/// `RxmtInterval` until acked (spec §4.8).
#[derive(Debug, Default)]
pub struct RetransmissionQueue {
    pending: Vec<PendingRetransmission>,
}

impl RetransmissionQueue {
    pub fn new() -> Self {
        RetransmissionQueue::default()
    }

    pub fn enqueue(&mut self, key: LsaKey) {
        if !self.pending.iter().any(|p| p.key == key) {
            self.pending.push(PendingRetransmission { key, sent_at: Instant::now() });
        }
    }

    pub fn ack(&mut self, key: &LsaKey) {
        self.pending.retain(|p| &p.key != key);
    }

    /// Keys due for retransmission, refreshing their send timestamp.
    pub fn due_for_retransmit(&mut self, interval: Duration) -> Vec<LsaKey> {
        let mut due = Vec::new();
        for pending in self.pending.iter_mut() {
            if pending.sent_at.elapsed() >= interval {
                due.push(pending.key);
                pending.sent_at = Instant::now();
            }
        }
        due
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::ospf::{LsaBody, LsaHeader, LSA_NETWORK};
    use std::net::Ipv4Addr;

    fn lsa(seq: i32) -> Lsa {
        Lsa {
            header: LsaHeader {
                age: 0,
                options: 0x02,
                lsa_type: LSA_NETWORK,
                link_state_id: Ipv4Addr::new(10, 0, 0, 1),
                advertising_router: Ipv4Addr::new(10, 0, 0, 1),
                sequence: seq,
                checksum: 1,
                length: 24,
            },
            body: LsaBody::Network { mask: Ipv4Addr::new(255, 255, 255, 0), attached_routers: vec![] },
        }
    }

    #[test]
    fn newer_lsa_installs_floods_and_acks() {
        let mut lsdb = Lsdb::new();
        let decision = receive_lsa(&mut lsdb, lsa(1), NetworkType::PointToPoint, false);
        assert_eq!(decision, FloodDecision::InstallFloodAck { ack_style: AckStyle::Direct });
    }

    #[test]
    fn duplicate_only_acks() {
        let mut lsdb = Lsdb::new();
        lsdb.install(lsa(5));
        let decision = receive_lsa(&mut lsdb, lsa(5), NetworkType::Broadcast, true);
        assert_eq!(decision, FloodDecision::AckOnly { ack_style: AckStyle::DelayedGroup });
    }

    #[test]
    fn retransmission_queue_waits_for_interval() {
        let mut queue = RetransmissionQueue::new();
        let key = lsa(1).header.key();
        queue.enqueue(key);
        assert!(queue.due_for_retransmit(Duration::from_secs(5)).is_empty());
        queue.ack(&key);
        assert!(queue.is_empty());
    }

    #[test]
    fn non_dr_floods_to_alldrouters() {
        assert_eq!(flood_destination(NetworkType::Broadcast, false), ALL_D_ROUTERS);
        assert_eq!(flood_destination(NetworkType::Broadcast, true), ALL_SPF_ROUTERS);
    }
}
