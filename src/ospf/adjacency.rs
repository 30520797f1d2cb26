//! Database Description exchange (spec §4.7, RFC 2328 §10.8): master/slave
//! sequence-number discipline and building the LS request list from the
//! peer's summarized LSA headers.
//!
//! Canonical sequencing (spec §9, design note 2 — the reference
//! implementation's DD sequencing is ambiguous across ExStart→Exchange; this
//! is the behavior we actually implement): the master picks its initial DD
//! sequence number and increments it for every subsequent DD it sends; the
//! slave adopts the master's sequence number on the first DBD and echoes it
//! back on every following one.

use crate::ospf::lsdb::Lsdb;
use crate::wire::ospf::LsaHeader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdOutcome {
    /// This DD advanced the exchange; `next_sequence` is what we should send
    /// (or expect) next.
    Advance { next_sequence: u32 },
    /// The DD's sequence number didn't match what this role expects.
    SequenceMismatch,
}

/// The master increments its own sequence number for each new DD it sends.
pub fn master_next_sequence(current: u32) -> u32 {
    current.wrapping_add(1)
}

/// Validate a DD received in the slave role: it must carry the sequence
/// number we're currently expecting (either our adopted initial number, or
/// one greater than the last one we echoed).
pub fn slave_validate(received_sequence: u32, expected_sequence: u32) -> DdOutcome {
    if received_sequence == expected_sequence {
        DdOutcome::Advance { next_sequence: received_sequence }
    } else {
        DdOutcome::SequenceMismatch
    }
}

/// Validate a DD received in the master role: the slave must echo back
/// exactly the sequence number we last sent.
pub fn master_validate(received_sequence: u32, our_sent_sequence: u32) -> DdOutcome {
    if received_sequence == our_sent_sequence {
        DdOutcome::Advance { next_sequence: master_next_sequence(our_sent_sequence) }
    } else {
        DdOutcome::SequenceMismatch
    }
}

/// From a peer's summarized LSA headers, the subset we need to request
/// because our LSDB doesn't have it or has an older instance (RFC 2328
/// §10.8's "Summary-List" processing).
pub fn build_request_list(lsdb: &Lsdb, peer_headers: &[LsaHeader]) -> Vec<LsaHeader> {
    peer_headers.iter().filter(|h| lsdb.is_newer_than_stored(h)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::ospf::{LsaBody, LSA_NETWORK};
    use std::net::Ipv4Addr;

    fn header(seq: i32) -> LsaHeader {
        LsaHeader {
            age: 0,
            options: 0x02,
            lsa_type: LSA_NETWORK,
            link_state_id: Ipv4Addr::new(10, 0, 0, 1),
            advertising_router: Ipv4Addr::new(10, 0, 0, 1),
            sequence: seq,
            checksum: 1,
            length: 24,
        }
    }

    #[test]
    fn request_list_skips_headers_we_already_have_current() {
        let mut lsdb = Lsdb::new();
        lsdb.install(crate::wire::ospf::Lsa {
            header: header(5),
            body: LsaBody::Network { mask: Ipv4Addr::new(255, 255, 255, 0), attached_routers: vec![] },
        });
        let requested = build_request_list(&lsdb, &[header(5), header(6)]);
        assert_eq!(requested.len(), 1);
        assert_eq!(requested[0].sequence, 6);
    }

    #[test]
    fn slave_adopts_masters_sequence() {
        assert_eq!(slave_validate(100, 100), DdOutcome::Advance { next_sequence: 100 });
        assert_eq!(slave_validate(99, 100), DdOutcome::SequenceMismatch);
    }

    #[test]
    fn master_requires_echo_then_increments() {
        assert_eq!(master_validate(100, 100), DdOutcome::Advance { next_sequence: 101 });
        assert_eq!(master_validate(50, 100), DdOutcome::SequenceMismatch);
    }
}
