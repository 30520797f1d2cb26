//! The OSPF engine (spec C7/C8, §4.7-§4.9): ties the pure hello/adjacency/
//! flooding/area/spf modules to a `RawIpTransport`, driving one interface's
//! neighbors, LSDB, and routing table end to end.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::oneshot;
use tokio::time::interval;

use crate::config::OspfConfig;
use crate::fib::{FibInstaller, SourceTag};
use crate::ospf::adjacency::{self, DdOutcome};
use crate::ospf::area::Area;
use crate::ospf::flooding::{self, AckStyle, FloodDecision, RetransmissionQueue};
use crate::ospf::fsm::{Event, State};
use crate::ospf::hello::{self, ElectionCandidate};
use crate::ospf::neighbor::OspfNeighbor;
use crate::ospf::types::{OspfInterface, ALL_D_ROUTERS, ALL_SPF_ROUTERS, INITIAL_SEQUENCE_NUMBER};
use crate::transport::RawIpTransport;
use crate::wire::ospf::{
    DbDescriptionPacket, Lsa, LsaBody, LsaHeader, LsRequest, OspfPacket, OspfPacketBody, RouterLink, RouterLinkType,
    LSA_ROUTER,
};

const AGE_TICK: Duration = Duration::from_secs(1);

/// Per-neighbor bookkeeping the pure `OspfNeighbor` type doesn't itself
/// carry: whether our side and the peer's side have each sent their
/// final (M=0) Database Description.
#[derive(Debug, Default)]
struct DdProgress {
    local_done: bool,
    peer_done: bool,
}

/// One OSPFv2-speaking interface (spec C7): owns the interface's neighbor
/// table, its area's LSDB/routing-table, and retransmission state. Built
/// from a single `config::OspfConfig` since this core speaks to one area on
/// one interface (spec §6's configuration surface).
pub struct OspfEngine {
    router_id: Ipv4Addr,
    interface: OspfInterface,
    area: Area,
    neighbors: HashMap<Ipv4Addr, OspfNeighbor>,
    dd_progress: HashMap<Ipv4Addr, DdProgress>,
    retransmit: HashMap<Ipv4Addr, RetransmissionQueue>,
    next_sequence: i32,
    fib: Arc<dyn FibInstaller>,
    installed_prefixes: Vec<String>,
}

impl OspfEngine {
    pub fn new(config: &OspfConfig, router_id: Ipv4Addr, fib: Arc<dyn FibInstaller>) -> Self {
        let mut interface = OspfInterface::new(config.area_id, config.source_address, Ipv4Addr::new(255, 255, 255, 0), config.network_type);
        interface.hello_interval = config.hello_interval;
        interface.dead_interval = config.dead_interval;
        interface.router_priority = config.router_priority;

        OspfEngine {
            router_id,
            interface,
            area: Area::new(config.area_id),
            neighbors: HashMap::new(),
            dd_progress: HashMap::new(),
            retransmit: HashMap::new(),
            next_sequence: INITIAL_SEQUENCE_NUMBER,
            fib,
            installed_prefixes: Vec::new(),
        }
    }

    /// Drive this interface until `shutdown` fires, at which point a final
    /// Hello with an empty neighbor list is sent so peers tear the
    /// adjacency down promptly instead of waiting out the dead interval
    /// (spec §4.10's graceful-shutdown behavior).
    pub async fn run(mut self, mut transport: impl RawIpTransport, mut shutdown: oneshot::Receiver<()>) {
        if let Err(e) = transport.open(&self.interface_name(), self.interface.address).await {
            warn!("ospf: failed to open transport: {}", e);
            return;
        }
        let _ = transport.join_multicast(ALL_SPF_ROUTERS).await;
        if self.interface.network_type.elects_dr() {
            let _ = transport.join_multicast(ALL_D_ROUTERS).await;
        }

        let mut hello_tick = interval(Duration::from_secs(self.interface.hello_interval.into()));
        let mut age_tick = interval(AGE_TICK);

        loop {
            tokio::select! {
                _ = hello_tick.tick() => {
                    self.send_hello(&transport).await;
                    self.check_dead_neighbors();
                    self.run_election_if_applicable();
                }
                _ = age_tick.tick() => {
                    self.area.age_and_mark(AGE_TICK.as_secs() as u16);
                    self.run_spf_and_sync_fib().await;
                }
                received = transport.receive() => {
                    match received {
                        Ok((bytes, _src)) => self.handle_inbound(&bytes, &transport).await,
                        Err(e) => warn!("ospf: transport receive error: {}", e),
                    }
                }
                _ = &mut shutdown => {
                    self.send_empty_hello(&transport).await;
                    break;
                }
            }
        }
    }

    fn interface_name(&self) -> String {
        self.interface.address.to_string()
    }

    fn next_dd_sequence(&mut self) -> u32 {
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.next_sequence as u32
    }

    async fn send_hello(&self, transport: &impl RawIpTransport) {
        let neighbor_ids: Vec<Ipv4Addr> = self.neighbors.keys().copied().collect();
        let hello = hello::build_hello(&self.interface, &neighbor_ids);
        let packet = OspfPacket { router_id: self.router_id, area_id: self.interface.area_id, body: OspfPacketBody::Hello(hello) };
        let _ = transport.send(&packet.encode(), ALL_SPF_ROUTERS).await;
    }

    async fn send_empty_hello(&self, transport: &impl RawIpTransport) {
        let hello = hello::build_hello(&self.interface, &[]);
        let packet = OspfPacket { router_id: self.router_id, area_id: self.interface.area_id, body: OspfPacketBody::Hello(hello) };
        let _ = transport.send(&packet.encode(), ALL_SPF_ROUTERS).await;
    }

    fn check_dead_neighbors(&mut self) {
        let dead_interval = Duration::from_secs(self.interface.dead_interval.into());
        let mut dead = Vec::new();
        for (addr, neighbor) in self.neighbors.iter_mut() {
            if neighbor.check_inactivity(dead_interval) {
                dead.push(*addr);
            }
        }
        for addr in dead {
            info!("ospf: neighbor {} declared dead", addr);
            self.neighbors.remove(&addr);
            self.dd_progress.remove(&addr);
            self.retransmit.remove(&addr);
        }
    }

    fn run_election_if_applicable(&mut self) {
        if !self.interface.network_type.elects_dr() {
            return;
        }
        let mut candidates: Vec<ElectionCandidate> = self
            .neighbors
            .values()
            .filter(|n| n.state >= State::TwoWay)
            .map(|n| ElectionCandidate { router_id: n.router_id, priority: n.priority, declared_dr: n.declared_dr, declared_bdr: n.declared_bdr })
            .collect();
        candidates.push(ElectionCandidate {
            router_id: self.router_id,
            priority: self.interface.router_priority,
            declared_dr: self.interface.designated_router,
            declared_bdr: self.interface.backup_designated_router,
        });
        let result = hello::elect_dr_bdr(&candidates);
        self.interface.designated_router = result.designated_router;
        self.interface.backup_designated_router = result.backup_designated_router;
    }

    /// AdjOK? (spec §4.7): on broadcast/NBMA, only form full adjacency with a
    /// neighbor if we or they are DR/BDR; P2P/P2MP always do.
    fn should_form_adjacency(&self, neighbor_id: Ipv4Addr) -> bool {
        if self.interface.network_type.always_adjacent() {
            return true;
        }
        self.interface.is_dr(self.router_id)
            || self.interface.is_bdr(self.router_id)
            || self.interface.is_dr(neighbor_id)
            || self.interface.is_bdr(neighbor_id)
    }

    async fn handle_inbound(&mut self, bytes: &[u8], transport: &impl RawIpTransport) {
        let packet = match OspfPacket::decode(bytes) {
            Ok(p) => p,
            Err(e) => {
                debug!("ospf: dropping malformed packet: {}", e);
                return;
            }
        };
        if packet.area_id != self.interface.area_id {
            return;
        }
        match packet.body {
            OspfPacketBody::Hello(hello) => self.handle_hello(packet.router_id, hello, transport).await,
            OspfPacketBody::DbDescription(dd) => self.handle_dd(packet.router_id, dd, transport).await,
            OspfPacketBody::LsRequest(reqs) => self.handle_ls_request(packet.router_id, reqs, transport).await,
            OspfPacketBody::LsUpdate(lsas) => self.handle_ls_update(packet.router_id, lsas, transport).await,
            OspfPacketBody::LsAck(headers) => self.handle_ls_ack(packet.router_id, headers),
        }
    }

    async fn handle_hello(&mut self, router_id: Ipv4Addr, packet: crate::wire::ospf::HelloPacket, transport: &impl RawIpTransport) {
        if hello::validate_hello(&self.interface, &packet, self.interface.network_type.elects_dr()).is_err() {
            return;
        }
        let bidirectional = hello::is_bidirectional(&packet, self.router_id);
        let became_twoway = {
            let neighbor = self
                .neighbors
                .entry(router_id)
                .or_insert_with(|| OspfNeighbor::new(router_id, router_id, packet.router_priority));
            neighbor.priority = packet.router_priority;
            neighbor.declared_dr = packet.designated_router;
            neighbor.declared_bdr = packet.backup_designated_router;
            neighbor.handle_hello_received(bidirectional);
            neighbor.state == State::TwoWay
        };

        if bidirectional && became_twoway && self.should_form_adjacency(router_id) {
            let initial_sequence = self.next_dd_sequence();
            if let Some(neighbor) = self.neighbors.get_mut(&router_id) {
                neighbor.apply(Event::AdjOk);
                neighbor.start_database_exchange(self.router_id, initial_sequence);
            }
            self.dd_progress.insert(router_id, DdProgress::default());
            self.send_negotiation_dd(router_id, transport).await;
        }
    }

    async fn send_negotiation_dd(&mut self, router_id: Ipv4Addr, transport: &impl RawIpTransport) {
        let Some(neighbor) = self.neighbors.get(&router_id) else { return };
        let dd = DbDescriptionPacket {
            mtu: self.interface.mtu,
            options: 0x02,
            init: true,
            more: true,
            master: neighbor.is_master,
            sequence: neighbor.dd_sequence_number,
            lsa_headers: Vec::new(),
        };
        self.send_to(router_id, OspfPacketBody::DbDescription(dd), transport).await;
    }

    async fn handle_dd(&mut self, router_id: Ipv4Addr, dd: DbDescriptionPacket, transport: &impl RawIpTransport) {
        let Some(state) = self.neighbors.get(&router_id).map(|n| n.state) else { return };
        if state < State::ExStart {
            return;
        }

        if state == State::ExStart {
            let mut reached_exchange = false;
            if let Some(neighbor) = self.neighbors.get_mut(&router_id) {
                if dd.init && dd.more && dd.master {
                    // Peer declares itself master; accept only if they
                    // actually have the larger router id, matching our own
                    // master/slave call.
                    if router_id > self.router_id {
                        neighbor.is_master = false;
                        neighbor.dd_sequence_number = dd.sequence;
                        neighbor.apply(Event::NegotiationDone);
                    }
                } else if !dd.init && neighbor.is_master {
                    neighbor.apply(Event::NegotiationDone);
                }
                reached_exchange = neighbor.state == State::Exchange;
            }
            if reached_exchange {
                self.send_full_summary(router_id, transport).await;
            }
            return;
        }

        // Exchange: validate sequencing per role, collect the request list.
        let Some((is_master, dd_sequence_number)) = self.neighbors.get(&router_id).map(|n| (n.is_master, n.dd_sequence_number)) else { return };
        let outcome = if is_master {
            adjacency::master_validate(dd.sequence, dd_sequence_number)
        } else {
            adjacency::slave_validate(dd.sequence, dd_sequence_number)
        };
        let DdOutcome::Advance { next_sequence } = outcome else {
            if let Some(neighbor) = self.neighbors.get_mut(&router_id) {
                neighbor.apply(Event::SeqNumberMismatch);
            }
            return;
        };

        let requested = adjacency::build_request_list(&self.area.lsdb, &dd.lsa_headers);
        if let Some(neighbor) = self.neighbors.get_mut(&router_id) {
            neighbor.dd_sequence_number = next_sequence;
            neighbor.ls_request_list.extend(requested.iter().map(|h| h.key()));
        }

        let peer_done = !dd.more;
        self.dd_progress.entry(router_id).or_default().peer_done = peer_done;
        let local_done = self.dd_progress.get(&router_id).map(|p| p.local_done).unwrap_or(false);

        if !is_master && !local_done {
            self.send_full_summary(router_id, transport).await;
        }

        let both_done = self.dd_progress.get(&router_id).map(|p| p.local_done && p.peer_done).unwrap_or(false);
        if both_done {
            let mut became_full = false;
            let mut entered_loading = false;
            if let Some(neighbor) = self.neighbors.get_mut(&router_id) {
                neighbor.exchange_done();
                became_full = neighbor.state == State::Full;
                entered_loading = neighbor.state == State::Loading;
            }
            if entered_loading {
                self.request_missing_lsas(router_id, transport).await;
            }
            if became_full {
                self.reoriginate_router_lsa(transport).await;
            }
        }
    }

    async fn send_full_summary(&mut self, router_id: Ipv4Addr, transport: &impl RawIpTransport) {
        let Some(neighbor) = self.neighbors.get(&router_id) else { return };
        let sequence = if neighbor.is_master { adjacency::master_next_sequence(neighbor.dd_sequence_number) } else { neighbor.dd_sequence_number };
        let headers: Vec<LsaHeader> = self.area.lsdb.iter_headers().copied().collect();
        let dd = DbDescriptionPacket {
            mtu: self.interface.mtu,
            options: 0x02,
            init: false,
            more: false,
            master: neighbor.is_master,
            sequence,
            lsa_headers: headers,
        };
        if let Some(neighbor) = self.neighbors.get_mut(&router_id) {
            if neighbor.is_master {
                neighbor.dd_sequence_number = sequence;
            }
        }
        self.dd_progress.entry(router_id).or_default().local_done = true;
        self.send_to(router_id, OspfPacketBody::DbDescription(dd), transport).await;
    }

    async fn request_missing_lsas(&mut self, router_id: Ipv4Addr, transport: &impl RawIpTransport) {
        let Some(neighbor) = self.neighbors.get(&router_id) else { return };
        if neighbor.ls_request_list.is_empty() {
            return;
        }
        let reqs: Vec<LsRequest> = neighbor
            .ls_request_list
            .iter()
            .map(|k| LsRequest { lsa_type: k.lsa_type as u32, link_state_id: k.link_state_id, advertising_router: k.advertising_router })
            .collect();
        self.send_to(router_id, OspfPacketBody::LsRequest(reqs), transport).await;
    }

    async fn handle_ls_request(&mut self, router_id: Ipv4Addr, reqs: Vec<LsRequest>, transport: &impl RawIpTransport) {
        let mut lsas = Vec::new();
        for req in &reqs {
            let key = crate::wire::ospf::LsaKey { lsa_type: req.lsa_type as u8, link_state_id: req.link_state_id, advertising_router: req.advertising_router };
            if let Some(lsa) = self.area.lsdb.get(&key) {
                lsas.push(lsa.clone());
            }
        }
        if !lsas.is_empty() {
            self.send_to(router_id, OspfPacketBody::LsUpdate(lsas), transport).await;
        }
    }

    async fn handle_ls_update(&mut self, router_id: Ipv4Addr, lsas: Vec<Lsa>, transport: &impl RawIpTransport) {
        let from_dr = self.neighbors.get(&router_id).map(|n| self.interface.is_dr(n.router_id)).unwrap_or(false);
        let mut acks = Vec::new();
        let mut to_flood = Vec::new();

        for lsa in lsas {
            let key = lsa.header.key();
            let decision = flooding::receive_lsa(&mut self.area.lsdb, lsa.clone(), self.interface.network_type, from_dr);
            match decision {
                FloodDecision::InstallFloodAck { ack_style } => {
                    acks.push((lsa.header, ack_style));
                    to_flood.push(lsa);
                }
                FloodDecision::AckOnly { ack_style } => acks.push((lsa.header, ack_style)),
                FloodDecision::Ignore => {}
            }
            if let Some(neighbor) = self.neighbors.get_mut(&router_id) {
                neighbor.ls_request_list.retain(|k| k != &key);
            }
        }

        let mut became_full = false;
        if let Some(neighbor) = self.neighbors.get_mut(&router_id) {
            neighbor.loading_done_if_satisfied();
            became_full = neighbor.state == State::Full;
        }
        if became_full {
            self.reoriginate_router_lsa(transport).await;
        }

        if !to_flood.is_empty() {
            self.flood(to_flood, router_id, transport).await;
        }
        for (header, style) in acks {
            match style {
                AckStyle::Direct => self.send_to(router_id, OspfPacketBody::LsAck(vec![header]), transport).await,
                AckStyle::DelayedGroup => self.send_to(router_id, OspfPacketBody::LsAck(vec![header]), transport).await,
            }
        }
    }

    fn handle_ls_ack(&mut self, router_id: Ipv4Addr, headers: Vec<LsaHeader>) {
        if let Some(queue) = self.retransmit.get_mut(&router_id) {
            for header in headers {
                queue.ack(&header.key());
            }
        }
    }

    /// Flood `lsas` to every full/loading neighbor except the one we heard
    /// them from (spec §4.8).
    async fn flood(&mut self, lsas: Vec<Lsa>, except: Ipv4Addr, transport: &impl RawIpTransport) {
        let targets: Vec<Ipv4Addr> = self.neighbors.iter().filter(|(id, n)| **id != except && n.state >= State::Exchange).map(|(id, _)| *id).collect();
        for target in targets {
            self.send_to(target, OspfPacketBody::LsUpdate(lsas.clone()), transport).await;
        }
        let sender_is_dr = self.neighbors.get(&except).map(|n| self.interface.is_dr(n.router_id)).unwrap_or(self.interface.is_dr(self.router_id));
        let dest = flooding::flood_destination(self.interface.network_type, sender_is_dr);
        let packet = OspfPacket { router_id: self.router_id, area_id: self.interface.area_id, body: OspfPacketBody::LsUpdate(lsas) };
        let _ = transport.send(&packet.encode(), dest).await;
    }

    async fn send_to(&self, _router_id: Ipv4Addr, body: OspfPacketBody, transport: &impl RawIpTransport) {
        let packet = OspfPacket { router_id: self.router_id, area_id: self.interface.area_id, body };
        let _ = transport.send(&packet.encode(), ALL_SPF_ROUTERS).await;
    }

    /// Build this router's self-originated RouterLSA from the current set of
    /// full adjacencies (spec §4.9), install it, and flood it.
    async fn reoriginate_router_lsa(&mut self, transport: &impl RawIpTransport) {
        let mut links: Vec<RouterLink> = self
            .neighbors
            .values()
            .filter(|n| n.is_full())
            .map(|n| RouterLink { link_id: n.router_id, link_data: self.interface.address, link_type: RouterLinkType::PointToPoint, metric: 10 })
            .collect();
        links.push(RouterLink {
            link_id: self.interface.address,
            link_data: self.interface.mask,
            link_type: RouterLinkType::Stub,
            metric: 1,
        });

        self.next_sequence = self.next_sequence.wrapping_add(1);
        let header = LsaHeader {
            age: 0,
            options: 0x02,
            lsa_type: LSA_ROUTER,
            link_state_id: self.router_id,
            advertising_router: self.router_id,
            sequence: self.next_sequence,
            checksum: 0,
            length: 0,
        };
        let lsa = Lsa { header, body: LsaBody::Router { flags: 0, links } };
        self.area.install_lsa(lsa.clone());
        self.flood(vec![lsa], Ipv4Addr::UNSPECIFIED, transport).await;
    }

    async fn run_spf_and_sync_fib(&mut self) {
        let Some(routes) = self.area.run_spf_if_due(self.router_id) else { return };
        let mut new_prefixes = Vec::new();
        for route in routes {
            let Some(next_hop) = route.next_hop else { continue };
            let prefix = format!("{}/{}", route.destination, route.prefix_len);
            if self.fib.install(&prefix, std::net::IpAddr::V4(next_hop), SourceTag::Ospf, route.cost).await.is_ok() {
                new_prefixes.push(prefix);
            }
        }
        for stale in self.installed_prefixes.iter().filter(|p| !new_prefixes.contains(p)) {
            let _ = self.fib.remove(stale).await;
        }
        self.installed_prefixes = new_prefixes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OspfConfig;
    use crate::fib::LoggingFibInstaller;
    use crate::ospf::types::NetworkType;

    fn config() -> OspfConfig {
        OspfConfig {
            area_id: Ipv4Addr::UNSPECIFIED,
            interface: "eth0".to_string(),
            source_address: Ipv4Addr::new(10, 0, 0, 1),
            hello_interval: 10,
            dead_interval: 40,
            network_type: NetworkType::PointToPoint,
            router_priority: 1,
            peer_address: None,
        }
    }

    #[test]
    fn always_adjacent_on_point_to_point() {
        let engine = OspfEngine::new(&config(), Ipv4Addr::new(10, 0, 0, 1), Arc::new(LoggingFibInstaller::new()));
        assert!(engine.should_form_adjacency(Ipv4Addr::new(10, 0, 0, 2)));
    }
}
