//! RPKI origin validation (RFC 6811, spec §4.6): a ROA store and the
//! Valid/Invalid/NotFound validation procedure.

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::bgp::rib::RpkiState;
use crate::error::ConfigError;
use crate::wire::bgp_attributes::Prefix;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Roa {
    pub prefix: IpNetwork,
    pub max_length: u8,
    pub asn: u32,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RoaFile {
    roas: Vec<Roa>,
}

/// ROA store: `(prefix, max-length, ASN)` records (spec §4.6, §6 persisted
/// state layout).
#[derive(Debug, Default)]
pub struct RoaStore {
    roas: Vec<Roa>,
}

impl RoaStore {
    pub fn new(roas: Vec<Roa>) -> Self {
        RoaStore { roas }
    }

    pub fn from_json_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let file: RoaFile = serde_json::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(RoaStore::new(file.roas))
    }

    pub fn to_json_file(&self, path: &str) -> Result<(), ConfigError> {
        let file = RoaFile { roas: self.roas.clone() };
        let contents = serde_json::to_string_pretty(&file).map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn insert(&mut self, roa: Roa) {
        self.roas.push(roa);
    }

    fn covers(roa_net: &IpNetwork, prefix: &Prefix) -> bool {
        roa_net.contains(prefix.addr) && roa_net.prefix() <= prefix.prefix_len
    }

    /// Validate `prefix` announced with origin AS `origin_asn`, per spec
    /// §4.6's Valid/Invalid/NotFound procedure.
    pub fn validate(&self, prefix: &Prefix, origin_asn: u32) -> RpkiState {
        let covering: Vec<&Roa> = self.roas.iter().filter(|r| Self::covers(&r.prefix, prefix)).collect();
        if covering.is_empty() {
            return RpkiState::NotFound;
        }
        let matches = covering
            .iter()
            .any(|r| prefix.prefix_len <= r.max_length && r.asn == origin_asn);
        if matches {
            RpkiState::Valid
        } else {
            RpkiState::Invalid
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_when_roa_matches_asn_and_length_s4() {
        let store = RoaStore::new(vec![Roa { prefix: "192.0.2.0/24".parse().unwrap(), max_length: 24, asn: 65001, source: None }]);
        let prefix = Prefix::new("192.0.2.0".parse().unwrap(), 24);
        assert_eq!(store.validate(&prefix, 65001), RpkiState::Valid);
    }

    #[test]
    fn invalid_when_origin_mismatches() {
        let store = RoaStore::new(vec![Roa { prefix: "192.0.2.0/24".parse().unwrap(), max_length: 24, asn: 65001, source: None }]);
        let prefix = Prefix::new("192.0.2.0".parse().unwrap(), 24);
        assert_eq!(store.validate(&prefix, 65999), RpkiState::Invalid);
    }

    #[test]
    fn not_found_when_no_covering_roa() {
        let store = RoaStore::default();
        let prefix = Prefix::new("198.51.100.0".parse().unwrap(), 24);
        assert_eq!(store.validate(&prefix, 65001), RpkiState::NotFound);
    }
}
