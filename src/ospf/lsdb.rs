//! The Link-State Database (spec C2's OSPF half, RFC 2328 §12-13): stores one
//! LSA instance per `LsaKey`, applying the "newer" rule of §13.1 on install
//! and evicting MaxAge LSAs as they age.

use std::collections::HashMap;

use crate::wire::ospf::{Lsa, LsaHeader, LsaKey, MAX_AGE, MAX_AGE_DIFF};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    Duplicate,
    Older,
}

#[derive(Debug, Default)]
pub struct Lsdb {
    entries: HashMap<LsaKey, Lsa>,
}

/// True if `candidate` is newer than `current` per RFC 2328 §13.1: higher
/// (lollipop) sequence number wins; on a tie, higher checksum wins; on a
/// checksum tie, MaxAge beats non-MaxAge, else the lower age wins but only
/// if the two ages differ by more than MaxAgeDiff (otherwise treated as the
/// same instance).
pub fn is_newer(candidate: &LsaHeader, current: &LsaHeader) -> bool {
    if candidate.sequence != current.sequence {
        return candidate.sequence > current.sequence;
    }
    if candidate.checksum != current.checksum {
        return candidate.checksum > current.checksum;
    }
    let candidate_max = candidate.age >= MAX_AGE;
    let current_max = current.age >= MAX_AGE;
    if candidate_max != current_max {
        return candidate_max;
    }
    let diff = candidate.age.abs_diff(current.age);
    diff > MAX_AGE_DIFF && candidate.age < current.age
}

impl Lsdb {
    pub fn new() -> Self {
        Lsdb::default()
    }

    /// Install `lsa`, returning how it compared to what was already present.
    pub fn install(&mut self, lsa: Lsa) -> InstallOutcome {
        let key = lsa.header.key();
        match self.entries.get(&key) {
            None => {
                self.entries.insert(key, lsa);
                InstallOutcome::Installed
            }
            Some(current) => {
                if is_newer(&lsa.header, &current.header) {
                    self.entries.insert(key, lsa);
                    InstallOutcome::Installed
                } else if lsa.header.sequence == current.header.sequence && lsa.header.checksum == current.header.checksum {
                    InstallOutcome::Duplicate
                } else {
                    InstallOutcome::Older
                }
            }
        }
    }

    pub fn get(&self, key: &LsaKey) -> Option<&Lsa> {
        self.entries.get(key)
    }

    pub fn is_newer_than_stored(&self, header: &LsaHeader) -> bool {
        match self.entries.get(&header.key()) {
            None => true,
            Some(current) => is_newer(header, &current.header),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lsa> {
        self.entries.values()
    }

    pub fn iter_headers(&self) -> impl Iterator<Item = &LsaHeader> + '_ {
        self.entries.values().map(|lsa| &lsa.header)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Advance every LSA's age by `seconds`, evicting and returning the keys
    /// of any that reached MaxAge (spec §4.8's aging discipline).
    pub fn age_by(&mut self, seconds: u16) -> Vec<LsaKey> {
        let mut evicted = Vec::new();
        self.entries.retain(|key, lsa| {
            let aged = lsa.header.age.saturating_add(seconds);
            lsa.header.age = aged.min(MAX_AGE);
            if aged >= MAX_AGE {
                evicted.push(*key);
                false
            } else {
                true
            }
        });
        evicted
    }

    pub fn remove(&mut self, key: &LsaKey) -> Option<Lsa> {
        self.entries.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::ospf::{LsaBody, LSA_NETWORK};
    use std::net::Ipv4Addr;

    fn lsa(seq: i32, checksum: u16) -> Lsa {
        Lsa {
            header: LsaHeader {
                age: 0,
                options: 0x02,
                lsa_type: LSA_NETWORK,
                link_state_id: Ipv4Addr::new(10, 0, 0, 1),
                advertising_router: Ipv4Addr::new(10, 0, 0, 1),
                sequence: seq,
                checksum,
                length: 24,
            },
            body: LsaBody::Network { mask: Ipv4Addr::new(255, 255, 255, 0), attached_routers: vec![] },
        }
    }

    #[test]
    fn higher_sequence_replaces_lower() {
        let mut db = Lsdb::new();
        assert_eq!(db.install(lsa(1, 0)), InstallOutcome::Installed);
        assert_eq!(db.install(lsa(2, 0)), InstallOutcome::Installed);
        assert_eq!(db.get(&lsa(0, 0).header.key()).unwrap().header.sequence, 2);
    }

    #[test]
    fn lower_sequence_is_discarded() {
        let mut db = Lsdb::new();
        db.install(lsa(5, 0));
        assert_eq!(db.install(lsa(3, 0)), InstallOutcome::Older);
    }

    #[test]
    fn same_sequence_and_checksum_is_duplicate() {
        let mut db = Lsdb::new();
        db.install(lsa(1, 42));
        assert_eq!(db.install(lsa(1, 42)), InstallOutcome::Duplicate);
    }

    #[test]
    fn maxage_eviction_on_aging() {
        let mut db = Lsdb::new();
        db.install(lsa(1, 0));
        let evicted = db.age_by(MAX_AGE);
        assert_eq!(evicted.len(), 1);
        assert!(db.is_empty());
    }
}
