//! The forwarding-table installer (spec §6): the one collaborator both
//! protocol engines share. Operations are best-effort — a failed install is
//! logged and otherwise ignored, per spec §7's `FibError` handling ("logged;
//! session state unchanged").

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Mutex;

use log::{debug, warn};

use crate::error::FibError;

/// Which protocol (or static config) installed a route, used for
/// last-writer-wins / precedence on conflicting next hops (spec §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceTag {
    Ospf,
    Bgp,
    Static,
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SourceTag::Ospf => write!(f, "ospf"),
            SourceTag::Bgp => write!(f, "bgp"),
            SourceTag::Static => write!(f, "static"),
        }
    }
}

/// One route as seen by the FIB: prefix is carried as an opaque string by
/// the caller (an IP network in CIDR notation) since this collaborator does
/// not itself need to parse or match prefixes (spec §4.2: "longest-match
/// lookups are not part of this spec; the FIB handles that").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FibEntry {
    pub next_hop: IpAddr,
    pub source: SourceTag,
    pub metric: u32,
}

/// The FIB installer collaborator (spec §6): `install`/`remove`, exposed to
/// the agent. Implementations install into the host's forwarding table;
/// this crate only depends on the trait, never on a specific kernel API.
#[async_trait::async_trait]
pub trait FibInstaller: Send + Sync {
    async fn install(&self, prefix: &str, next_hop: IpAddr, source: SourceTag, metric: u32) -> Result<(), FibError>;
    async fn remove(&self, prefix: &str) -> Result<(), FibError>;
}

/// A precedence-aware in-memory FIB, useful both as a default no-op-ish
/// installer for environments with no real forwarding table (tests, a
/// route-reflector-only deployment) and as the source-tag precedence
/// reference implementation (spec §5: "source-tag precedence, OSPF-best
/// over BGP for equal-cost, configurable").
pub struct LoggingFibInstaller {
    table: Mutex<HashMap<String, FibEntry>>,
}

impl Default for LoggingFibInstaller {
    fn default() -> Self {
        LoggingFibInstaller { table: Mutex::new(HashMap::new()) }
    }
}

impl LoggingFibInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `incoming` should supersede whatever (if anything) occupies
    /// `prefix`, per the precedence rule: idempotent on identical params,
    /// else OSPF wins ties over BGP, else last-writer-wins.
    fn should_replace(existing: Option<&FibEntry>, incoming: &FibEntry) -> bool {
        match existing {
            None => true,
            Some(current) if current == incoming => false,
            Some(current) => !(current.source == SourceTag::Ospf && incoming.source == SourceTag::Bgp),
        }
    }

    pub fn snapshot(&self) -> HashMap<String, FibEntry> {
        self.table.lock().expect("fib table lock poisoned").clone()
    }
}

#[async_trait::async_trait]
impl FibInstaller for LoggingFibInstaller {
    async fn install(&self, prefix: &str, next_hop: IpAddr, source: SourceTag, metric: u32) -> Result<(), FibError> {
        let incoming = FibEntry { next_hop, source, metric };
        let mut table = self.table.lock().map_err(|_| FibError("fib table lock poisoned".to_string()))?;
        let existing = table.get(prefix);
        if !Self::should_replace(existing, &incoming) {
            debug!("fib: {} via {} ({}) preempted by existing lower-precedence source, skipping", prefix, next_hop, source);
            return Ok(());
        }
        debug!("fib: install {} via {} src={} metric={}", prefix, next_hop, source, metric);
        table.insert(prefix.to_string(), incoming);
        Ok(())
    }

    async fn remove(&self, prefix: &str) -> Result<(), FibError> {
        let mut table = self.table.lock().map_err(|_| FibError("fib table lock poisoned".to_string()))?;
        if table.remove(prefix).is_some() {
            debug!("fib: remove {}", prefix);
        } else {
            warn!("fib: remove requested for unknown prefix {}", prefix);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn install_is_idempotent_on_identical_params() {
        let fib = LoggingFibInstaller::new();
        let nh: IpAddr = "192.0.2.2".parse().unwrap();
        fib.install("10.0.0.0/8", nh, SourceTag::Bgp, 0).await.unwrap();
        fib.install("10.0.0.0/8", nh, SourceTag::Bgp, 0).await.unwrap();
        assert_eq!(fib.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn ospf_route_wins_over_bgp_at_equal_cost() {
        let fib = LoggingFibInstaller::new();
        let ospf_nh: IpAddr = "10.0.0.2".parse().unwrap();
        let bgp_nh: IpAddr = "192.0.2.2".parse().unwrap();
        fib.install("203.0.113.0/24", ospf_nh, SourceTag::Ospf, 10).await.unwrap();
        fib.install("203.0.113.0/24", bgp_nh, SourceTag::Bgp, 0).await.unwrap();
        let snapshot = fib.snapshot();
        assert_eq!(snapshot["203.0.113.0/24"].next_hop, ospf_nh);
    }

    #[tokio::test]
    async fn remove_clears_entry() {
        let fib = LoggingFibInstaller::new();
        fib.install("10.0.0.0/8", "192.0.2.2".parse().unwrap(), SourceTag::Static, 0).await.unwrap();
        fib.remove("10.0.0.0/8").await.unwrap();
        assert!(fib.snapshot().is_empty());
    }
}
