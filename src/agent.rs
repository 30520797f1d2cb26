//! The top-level multi-protocol coordinator (spec C10): wires `config::ServerConfig`
//! up to whichever of the OSPF/BGP engines are configured, sharing one
//! `FibInstaller`, and coordinates graceful shutdown across both (spec §4.10).

use std::sync::Arc;
use std::time::Duration;

use log::info;
use tokio::sync::oneshot;
use tokio::time::timeout;

use crate::bgp::advanced::rpki::RoaStore;
use crate::bgp::engine::BgpEngine;
use crate::config::ServerConfig;
use crate::fib::FibInstaller;
use crate::ospf::engine::OspfEngine;
use crate::transport::{RawIpTransport, TcpTransport};

/// Best-effort deadline for draining both engines on shutdown before the
/// process exits regardless (spec §4.10).
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Owns the 0/1 OSPF engine and 0/1 BGP engine a `ServerConfig` enables,
/// plus the single `FibInstaller` both share.
pub struct Agent {
    config: ServerConfig,
    fib: Arc<dyn FibInstaller>,
    roa: Option<RoaStore>,
}

impl Agent {
    pub fn new(config: ServerConfig, fib: Arc<dyn FibInstaller>, roa: Option<RoaStore>) -> Self {
        Agent { config, fib, roa }
    }

    /// Run every configured engine until `shutdown` resolves, then give each
    /// engine up to `SHUTDOWN_DEADLINE` to drain before returning.
    pub async fn run(self, tcp_transport: impl TcpTransport + 'static, raw_transport: impl RawIpTransport + 'static, shutdown: oneshot::Receiver<()>) {
        let mut handles = Vec::new();
        let mut shutdown_txs = Vec::new();

        if let Some(ospf_config) = &self.config.ospf {
            let router_id = match self.config.router_id {
                std::net::IpAddr::V4(v4) => v4,
                std::net::IpAddr::V6(_) => unreachable!("router id must be IPv4"),
            };
            let engine = OspfEngine::new(ospf_config, router_id, self.fib.clone());
            let (tx, rx) = oneshot::channel();
            shutdown_txs.push(tx);
            handles.push(tokio::spawn(async move {
                info!("ospf: engine starting");
                engine.run(raw_transport, rx).await;
                info!("ospf: engine stopped");
            }));
        }

        if let Some(bgp_config) = &self.config.bgp {
            let engine = BgpEngine::new(bgp_config, self.config.router_id, self.fib.clone(), self.roa);
            let (tx, rx) = oneshot::channel();
            shutdown_txs.push(tx);
            handles.push(tokio::spawn(async move {
                info!("bgp: engine starting");
                engine.run(tcp_transport, rx).await;
                info!("bgp: engine stopped");
            }));
        }

        let _ = shutdown.await;
        info!("agent: shutdown requested, draining engines");
        for tx in shutdown_txs {
            let _ = tx.send(());
        }

        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if timeout(SHUTDOWN_DEADLINE, drain).await.is_err() {
            info!("agent: shutdown deadline elapsed, exiting anyway");
        }
    }
}
