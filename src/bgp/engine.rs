//! The BGP engine (spec C6, §4.4-§4.6, §4.10's BGP half): owns every
//! configured peer's session, the single `DecisionProcess`, and the
//! collaborators (RPKI, route reflection, graceful restart, the FIB) that
//! turn a decision-process outcome into wire traffic and forwarding-table
//! updates.
//!
//! Sessions are polled round-robin in one task, not one task per peer: each
//! `BgpSession::run()` call already suspends on its own `tokio::select!` of
//! socket readiness and keepalive timer and returns promptly, so driving the
//! whole peer set from a single loop keeps every session's state (and the
//! one `DecisionProcess` it feeds) free of cross-task synchronization.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use ipnetwork::IpNetwork;
use log::{info, warn};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::interval;

use crate::bgp::advanced::graceful_restart::{GracefulRestartCapability, RestartState};
use crate::bgp::advanced::reflector::{self, ReflectorConfig};
use crate::bgp::advanced::rpki::RoaStore;
use crate::bgp::decision::{self, ChangedRoute, DecisionOutcome, DecisionProcess};
use crate::bgp::rib::{BgpRoute, PeerIdentity, RpkiState, SourceTag};
use crate::bgp::session::{BgpSession, BgpSessionConfig, SessionOutcome};
use crate::config::{BgpConfig, PeerConfig};
use crate::fib::{FibInstaller, SourceTag as FibSourceTag};
use crate::transport::TcpTransport;
use crate::wire::bgp::{Capability, NotificationMessage, UpdateMessage};
use crate::wire::bgp_attributes::{Afi, Prefix, Safi};

const BGP_PORT: u16 = 179;
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// The BGP half of the agent (spec C6): one `DecisionProcess`, every
/// peer's session, and the bookkeeping needed to fan a best-path change out
/// to peers that should see it.
pub struct BgpEngine {
    router_id: IpAddr,
    local_as: u32,
    connect_retry: u16,
    peer_configs: HashMap<IpAddr, Arc<PeerConfig>>,
    reflector: Option<ReflectorConfig>,
    roa: Option<RoaStore>,
    fib: Arc<dyn FibInstaller>,
    decision: DecisionProcess,
    sessions: HashMap<IpAddr, BgpSession>,
    graceful: HashMap<IpAddr, (Arc<PeerConfig>, RestartState)>,
    next_attempt: HashMap<IpAddr, Instant>,
}

impl BgpEngine {
    pub fn new(config: &BgpConfig, router_id: IpAddr, fib: Arc<dyn FibInstaller>, roa: Option<RoaStore>) -> Self {
        let local_router_id = match router_id {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(_) => unreachable!("router id must be IPv4"),
        };
        let reflector = config.route_reflector_cluster_id.map(|cluster| {
            let cluster_id = match cluster {
                IpAddr::V4(v4) => v4,
                IpAddr::V6(_) => unreachable!("cluster id must be IPv4"),
            };
            ReflectorConfig { local_router_id, cluster_id }
        });
        let mut decision = DecisionProcess::new(config.local_as, false, reflector.clone());
        originate_networks(&mut decision, &config.networks, config.local_as);

        BgpEngine {
            router_id,
            local_as: config.local_as,
            connect_retry: config.connect_retry_time,
            peer_configs: config.peers.iter().map(|p| (p.remote_ip, p.clone())).collect(),
            reflector,
            roa,
            fib,
            decision,
            sessions: HashMap::new(),
            graceful: HashMap::new(),
            next_attempt: HashMap::new(),
        }
    }

    /// Drive every configured peer until `shutdown` fires: on shutdown,
    /// every Established session is sent a Cease/administrative-shutdown
    /// NOTIFICATION before the engine returns (spec §4.10).
    pub async fn run(mut self, transport: impl TcpTransport, mut shutdown: oneshot::Receiver<()>) {
        let wants_listener = self.peer_configs.values().any(|p| p.enabled && p.passive);
        let listener = if wants_listener {
            match transport.listen(IpAddr::V4(Ipv4Addr::UNSPECIFIED), BGP_PORT).await {
                Ok(l) => Some(l),
                Err(e) => {
                    warn!("bgp: failed to bind listener on port {}: {}", BGP_PORT, e);
                    None
                }
            }
        } else {
            None
        };

        let mut tick = interval(POLL_INTERVAL);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.connect_due_peers(&transport).await;
                    self.poll_sessions().await;
                    self.expire_restarts().await;
                }
                accepted = transport.accept(listener.as_ref().unwrap()), if listener.is_some() => {
                    match accepted {
                        Ok((stream, addr)) => self.accept_session(stream, addr.ip()),
                        Err(e) => warn!("bgp: accept failed: {}", e),
                    }
                }
                _ = &mut shutdown => {
                    self.shutdown_all().await;
                    break;
                }
            }
        }
    }

    fn local_capabilities(&self, peer: &PeerConfig) -> Vec<Capability> {
        let mut caps = vec![
            Capability::Multiprotocol { afi: Afi::Ipv4, safi: Safi::Unicast },
            Capability::RouteRefresh,
            Capability::FourOctetAsn(peer.local_as),
        ];
        if peer.graceful_restart {
            caps.push(Capability::GracefulRestart {
                restart_time: 120,
                restarting: false,
                per_afi: vec![(Afi::Ipv4, Safi::Unicast, true)],
            });
        }
        if peer.flowspec {
            caps.push(Capability::Multiprotocol { afi: Afi::Ipv4, safi: Safi::Flowspec });
        }
        caps
    }

    fn session_config(&self, peer: &PeerConfig) -> BgpSessionConfig {
        BgpSessionConfig {
            local_as: peer.local_as,
            local_router_id: peer.local_router_id,
            peer_address: peer.remote_ip,
            peer_as: peer.remote_as,
            hold_time: peer.hold_timer,
            connect_retry_secs: self.connect_retry,
            passive: peer.passive,
            route_reflector_client: peer.route_reflector_client,
            enable_flap_damping: peer.flap_damping,
            enable_graceful_restart: peer.graceful_restart,
            enable_rpki: peer.rpki,
        }
    }

    /// Attempt to (re)connect every enabled, non-passive, not-yet-sessioned
    /// peer whose connect-retry cooldown has elapsed.
    async fn connect_due_peers(&mut self, transport: &impl TcpTransport) {
        let now = Instant::now();
        let due: Vec<Arc<PeerConfig>> = self
            .peer_configs
            .values()
            .filter(|p| p.enabled && !p.passive && !self.sessions.contains_key(&p.remote_ip))
            .filter(|p| self.next_attempt.get(&p.remote_ip).map(|at| now >= *at).unwrap_or(true))
            .cloned()
            .collect();

        for peer in due {
            match transport.connect(peer.local_router_id, peer.remote_ip, peer.dest_port).await {
                Ok(stream) => {
                    info!("bgp: connected to {}", peer.remote_ip);
                    self.next_attempt.remove(&peer.remote_ip);
                    self.install_session(&peer, stream);
                }
                Err(e) => {
                    warn!("bgp: connect to {} failed: {}", peer.remote_ip, e);
                    self.next_attempt.insert(peer.remote_ip, now + Duration::from_secs(self.connect_retry.into()));
                }
            }
        }
    }

    fn accept_session(&mut self, stream: TcpStream, remote_ip: IpAddr) {
        let Some(peer) = self.peer_configs.get(&remote_ip).cloned() else {
            warn!("bgp: rejecting connection from unconfigured peer {}", remote_ip);
            return;
        };
        if !peer.enabled || self.sessions.contains_key(&remote_ip) {
            return;
        }
        info!("bgp: accepted connection from {}", remote_ip);
        self.install_session(&peer, stream);
    }

    fn install_session(&mut self, peer: &Arc<PeerConfig>, stream: TcpStream) {
        let caps = self.local_capabilities(peer);
        let session = BgpSession::new(self.session_config(peer), stream, caps);
        self.sessions.insert(peer.remote_ip, session);
    }

    /// One round over every live session: drive its FSM/timers, translate
    /// any delivered UPDATE into decision-process changes, and handle
    /// termination (spec §5's per-session suspension points).
    async fn poll_sessions(&mut self) {
        let addrs: Vec<IpAddr> = self.sessions.keys().copied().collect();
        for addr in addrs {
            let outcome = {
                let Some(session) = self.sessions.get_mut(&addr) else { continue };
                session.run().await
            };
            match outcome {
                SessionOutcome::Continue => {}
                SessionOutcome::RouteUpdate(update) => self.handle_route_update(addr, update).await,
                SessionOutcome::Terminated(err) => {
                    warn!("bgp: session with {} terminated: {}", addr, err);
                    self.terminate_session(addr).await;
                }
            }
        }
    }

    async fn handle_route_update(&mut self, addr: IpAddr, update: UpdateMessage) {
        let Some(peer_config) = self.peer_configs.get(&addr).cloned() else { return };
        let peer = match self.sessions.get(&addr) {
            Some(session) => session.peer_identity(),
            None => return,
        };
        let flap_eligible = peer_config.flap_damping && peer_config.is_ebgp();
        let now = Utc::now();

        if let Some((_, restart)) = self.graceful.get_mut(&addr) {
            for prefix in update.nlri.iter().chain(update.withdrawn.iter()) {
                restart.refresh(Safi::Unicast, prefix);
            }
        }

        let mut outcomes = Vec::new();

        for prefix in &update.withdrawn {
            let change = ChangedRoute { peer, peer_as: peer_config.remote_as, prefix: *prefix, route: None, flap_eligible };
            if let Some(outcome) = self.decision.apply_change(change, now) {
                outcomes.push((*prefix, outcome));
            }
        }

        if !update.nlri.is_empty() {
            for prefix in &update.nlri {
                let mut route = BgpRoute::new(*prefix, update.attributes.clone(), peer, SourceTag::FromPeer, now);
                if peer_config.rpki {
                    if let Some(roa) = &self.roa {
                        if let Some(origin_asn) = route.origin_asn() {
                            let state = roa.validate(prefix, origin_asn);
                            route.rpki_state = Some(state);
                            if state == RpkiState::Invalid {
                                warn!("bgp: rejecting RPKI-invalid route {} from {}", prefix, addr);
                                continue;
                            }
                        }
                    }
                }
                let change = ChangedRoute { peer, peer_as: peer_config.remote_as, prefix: *prefix, route: Some(route), flap_eligible };
                if let Some(outcome) = self.decision.apply_change(change, now) {
                    outcomes.push((*prefix, outcome));
                }
            }
        }

        if let Some((afi, safi)) = update.end_of_rib_family() {
            if let Some((_, restart)) = self.graceful.get_mut(&addr) {
                let evicted = restart.end_of_rib(afi, safi);
                for prefix in evicted {
                    if let Some(outcome) = self.decision.apply_change(
                        ChangedRoute { peer, peer_as: peer_config.remote_as, prefix, route: None, flap_eligible },
                        now,
                    ) {
                        outcomes.push((prefix, outcome));
                    }
                }
                if self.graceful.get(&addr).map(|(_, r)| r.fully_recovered()).unwrap_or(false) {
                    self.graceful.remove(&addr);
                }
            }
        }

        for (prefix, outcome) in outcomes {
            self.sync_fib(prefix, &outcome).await;
            self.fan_out(prefix, outcome, &peer, &peer_config).await;
        }
    }

    async fn terminate_session(&mut self, addr: IpAddr) {
        let Some(mut session) = self.sessions.remove(&addr) else { return };
        let Some(peer_config) = self.peer_configs.get(&addr).cloned() else { return };
        let peer = session.peer_identity();
        let now = Utc::now();

        let restart_cap = session.capabilities.received.iter().find_map(|c| match c {
            Capability::GracefulRestart { restart_time, restarting, per_afi } => Some(GracefulRestartCapability {
                restart_time_secs: *restart_time,
                restarting: *restarting,
                preserved_families: per_afi.iter().map(|(afi, safi, _)| (*afi, *safi)).collect(),
            }),
            _ => None,
        });

        if peer_config.graceful_restart {
            if let Some(cap) = restart_cap {
                session.begin_graceful_restart(&cap);
                if let Some(state) = session.restart_state.take() {
                    info!("bgp: {} entering graceful restart, routes held stale", addr);
                    self.graceful.insert(addr, (peer_config, state));
                    self.next_attempt.remove(&addr);
                    return;
                }
            }
        }

        let outcomes = self.decision.remove_peer(peer.address, now);
        for (prefix, outcome) in outcomes {
            self.sync_fib(prefix, &outcome).await;
            self.fan_out(prefix, outcome, &peer, &peer_config).await;
        }
        self.next_attempt.insert(addr, Instant::now() + Duration::from_secs(self.connect_retry.into()));
    }

    /// Evict any graceful-restart-held peer whose restart timer has expired
    /// without an End-of-RIB (spec §4.6 (b)).
    async fn expire_restarts(&mut self) {
        let now = Utc::now();
        let addrs: Vec<IpAddr> = self.graceful.keys().copied().collect();
        for addr in addrs {
            let evicted = {
                let Some((_, state)) = self.graceful.get_mut(&addr) else { continue };
                state.expire_if_overdue(now)
            };
            let Some(prefixes) = evicted else { continue };
            let Some((peer_config, _)) = self.graceful.remove(&addr) else { continue };
            let peer = PeerIdentity { address: addr, router_id: addr };
            for prefix in prefixes {
                let change = ChangedRoute { peer, peer_as: peer_config.remote_as, prefix, route: None, flap_eligible: false };
                if let Some(outcome) = self.decision.apply_change(change, now) {
                    self.sync_fib(prefix, &outcome).await;
                    self.fan_out(prefix, outcome, &peer, &peer_config).await;
                }
            }
        }
    }

    async fn sync_fib(&self, prefix: Prefix, outcome: &DecisionOutcome) {
        let prefix_str = prefix.to_string();
        match outcome {
            DecisionOutcome::InstallBest(route) => {
                let next_hop = match route.attr(crate::wire::bgp_attributes::type_code::NEXT_HOP) {
                    Some(crate::wire::bgp_attributes::PathAttribute::NextHop(v4)) => IpAddr::V4(*v4),
                    _ => route.peer.address,
                };
                if self.fib.install(&prefix_str, next_hop, FibSourceTag::Bgp, route.med()).await.is_err() {
                    warn!("bgp: fib install failed for {}", prefix_str);
                }
            }
            DecisionOutcome::WithdrawBest => {
                let _ = self.fib.remove(&prefix_str).await;
            }
        }
    }

    /// Advertise (or withdraw) the prefix named by `outcome` to every other
    /// session, applying egress transforms and the reflector's fan-out
    /// rules per destination (spec §4.5-§4.6).
    async fn fan_out(&mut self, prefix: Prefix, outcome: DecisionOutcome, learned_from: &PeerIdentity, learned_from_cfg: &PeerConfig) {
        let destinations: Vec<IpAddr> = self.sessions.keys().copied().filter(|a| *a != learned_from.address).collect();

        for dest_addr in destinations {
            let Some(dest_cfg) = self.peer_configs.get(&dest_addr).cloned() else { continue };
            let Some(dest_peer) = self.sessions.get(&dest_addr).map(|s| s.peer_identity()) else { continue };

            // Decide what (if anything) goes out before taking a mutable
            // borrow of the destination session, since `may_advertise` needs
            // `&self` as a whole.
            let to_send: Option<Vec<BgpRoute>> = match &outcome {
                DecisionOutcome::InstallBest(route) => {
                    if !self.may_advertise(route, learned_from, learned_from_cfg, &dest_peer, &dest_cfg) {
                        None
                    } else {
                        let mut out_route = route.clone();
                        let ebgp_dest = decision::is_ebgp(dest_cfg.remote_as, self.local_as);
                        if !ebgp_dest {
                            if let Some(cfg) = &self.reflector {
                                out_route = reflector::stamp_for_reflection(out_route, cfg);
                            }
                        }
                        let local_router_id_v4 = match dest_cfg.local_router_id {
                            IpAddr::V4(v4) => v4,
                            IpAddr::V6(_) => unreachable!("router id must be IPv4"),
                        };
                        let out_route = decision::apply_egress_transforms(out_route, self.local_as, dest_cfg.remote_as, local_router_id_v4, false);
                        Some(vec![out_route])
                    }
                }
                DecisionOutcome::WithdrawBest => Some(Vec::new()),
            };

            let Some(routes) = to_send else { continue };
            let Some(session) = self.sessions.get_mut(&dest_addr) else { continue };
            let withdrawals = if matches!(outcome, DecisionOutcome::WithdrawBest) { vec![prefix] } else { Vec::new() };
            if let Err(e) = session.advertise(routes, withdrawals).await {
                warn!("bgp: advertise to {} failed: {}", dest_addr, e);
            }
        }
    }

    /// Should `route`, learned from `learned_from`, be sent on to `dest`?
    /// Composes the community/direction rules of spec §4.5 with the
    /// reflector client/non-client fan-out rule of spec §4.6.
    fn may_advertise(
        &self,
        route: &BgpRoute,
        learned_from: &PeerIdentity,
        learned_from_cfg: &PeerConfig,
        dest: &PeerIdentity,
        dest_cfg: &PeerConfig,
    ) -> bool {
        let local_router_id_v4 = match dest_cfg.local_router_id {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(_) => unreachable!("router id must be IPv4"),
        };
        if !decision::should_advertise_to(
            route,
            learned_from,
            dest,
            self.local_as,
            dest_cfg.remote_as,
            local_router_id_v4,
            self.reflector.as_ref(),
        ) {
            return false;
        }

        let ebgp_dest = decision::is_ebgp(dest_cfg.remote_as, self.local_as);
        if ebgp_dest {
            return true;
        }
        let Some(_cfg) = &self.reflector else { return true };
        let locally_sourced = matches!(route.source, SourceTag::LocalOrigination | SourceTag::Aggregate);
        if locally_sourced {
            return true;
        }
        let learned_via = reflector::learned_via(learned_from_cfg.route_reflector_client, self.local_as, learned_from_cfg.remote_as);
        reflector::fans_out_to(learned_via, dest_cfg.route_reflector_client)
    }

    /// Client/non-client tally of configured iBGP peers, for an
    /// observability hook (spec §10.5). `None` if this router isn't a
    /// route reflector.
    pub fn reflector_statistics(&self) -> Option<reflector::ReflectorStatistics> {
        self.reflector.as_ref()?;
        Some(reflector::tally_clients(self.peer_configs.values().filter(|p| !p.is_ebgp()).map(|p| p.route_reflector_client)))
    }

    /// Per-prefix flap-damping snapshot for an observability hook (spec
    /// §10.5).
    pub fn flap_statistics(&self) -> Vec<crate::bgp::advanced::FlapStatistics> {
        self.decision.flap.all_statistics(Utc::now())
    }

    /// Send Cease/administrative-shutdown to every Established session and
    /// drop the rest, best-effort (spec §4.10).
    async fn shutdown_all(&mut self) {
        for (addr, session) in self.sessions.iter_mut() {
            if crate::bgp::fsm::is_established(session.state) {
                let notif = NotificationMessage::cease_administrative_shutdown();
                if let Err(e) = session.send_notification(notif).await {
                    warn!("bgp: shutdown notification to {} failed: {}", addr, e);
                }
            }
        }
    }
}

fn originate_networks(decision: &mut DecisionProcess, networks: &[String], local_as: u32) {
    let now = Utc::now();
    let origin = PeerIdentity { address: IpAddr::V4(Ipv4Addr::UNSPECIFIED), router_id: IpAddr::V4(Ipv4Addr::UNSPECIFIED) };
    for network in networks {
        let Ok(net): Result<IpNetwork, _> = network.parse() else {
            warn!("bgp: skipping unparseable static network '{}'", network);
            continue;
        };
        let prefix = Prefix::new(net.ip(), net.prefix());
        let attrs = vec![
            crate::wire::bgp_attributes::PathAttribute::Origin(crate::wire::bgp_attributes::Origin::Igp),
            crate::wire::bgp_attributes::PathAttribute::AsPath(Default::default()),
        ];
        let route = BgpRoute::new(prefix, attrs, origin, SourceTag::LocalOrigination, now);
        let change = ChangedRoute { peer: origin, peer_as: local_as, prefix, route: Some(route), flap_eligible: false };
        decision.apply_change(change, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fib::LoggingFibInstaller;

    fn config() -> BgpConfig {
        BgpConfig {
            local_as: 65001,
            connect_retry_time: 30,
            route_reflector_cluster_id: None,
            networks: vec!["10.0.0.0/24".to_string()],
            peers: vec![],
        }
    }

    #[test]
    fn originates_configured_static_networks_into_loc_rib() {
        let engine = BgpEngine::new(&config(), IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), Arc::new(LoggingFibInstaller::new()), None);
        let prefix = Prefix::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 0)), 24);
        assert!(engine.decision.loc_rib.lookup(&prefix).is_some());
    }

    /// An End-of-RIB for one negotiated (AFI,SAFI) must evict only that
    /// family's still-stale routes, leaving another in-flight family's
    /// restart state untouched (spec §4.6).
    #[tokio::test]
    async fn end_of_rib_for_one_family_leaves_other_family_restart_state_intact() {
        use crate::bgp::advanced::graceful_restart::RestartState;
        use tokio::io::AsyncReadExt;
        use tokio::net::{TcpListener, TcpStream};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_stream, _) = listener.accept().await.unwrap();
        tokio::spawn(async move {
            let mut client = client;
            let mut buf = [0u8; 1024];
            while client.read(&mut buf).await.unwrap_or(0) > 0 {}
        });

        let peer_ip: IpAddr = "192.0.2.9".parse().unwrap();
        let peer_config = Arc::new(PeerConfig {
            remote_ip: peer_ip,
            remote_as: 65002,
            local_as: 65001,
            local_router_id: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
            enabled: true,
            passive: false,
            hold_timer: 90,
            dest_port: 179,
            route_reflector_client: false,
            flap_damping: false,
            rpki: false,
            graceful_restart: true,
            flowspec: false,
        });

        let mut engine =
            BgpEngine::new(&config(), IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), Arc::new(LoggingFibInstaller::new()), None);
        engine.peer_configs.insert(peer_ip, peer_config.clone());

        let session_config = engine.session_config(&peer_config);
        let caps = engine.local_capabilities(&peer_config);
        let session = BgpSession::new(session_config, server_stream, caps);
        engine.sessions.insert(peer_ip, session);

        let v4_prefix = Prefix::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 0)), 24);
        let v6_prefix = Prefix::new(IpAddr::V6("2001:db8::".parse().unwrap()), 64);
        let state = RestartState::begin(
            [(Afi::Ipv4, Safi::Unicast, v4_prefix), (Afi::Ipv6, Safi::Unicast, v6_prefix)],
            120,
            Utc::now(),
        );
        engine.graceful.insert(peer_ip, (peer_config, state));

        let eor_v6 = UpdateMessage {
            withdrawn: Vec::new(),
            nlri: Vec::new(),
            attributes: vec![crate::wire::bgp_attributes::PathAttribute::MpUnreachNlri {
                afi: Afi::Ipv6,
                safi: Safi::Unicast,
                withdrawn: Vec::new(),
            }],
        };
        engine.handle_route_update(peer_ip, eor_v6).await;

        let (_, state) = engine.graceful.get(&peer_ip).expect("ipv4 family still outstanding, restart state must remain");
        assert!(!state.is_stale(Safi::Unicast, &v6_prefix));
        assert!(state.is_stale(Safi::Unicast, &v4_prefix));
    }
}
