//! BGP session runtime (spec C4, §4.4): owns one TCP connection, drives the
//! FSM, and keeps that peer's Adj-RIB-In/Adj-RIB-Out up to date.

use std::cmp;
use std::net::IpAddr;
use std::time;

use chrono::{DateTime, Duration, Utc};
use futures::{SinkExt, StreamExt};
use log::{debug, trace, warn};
use tokio::net::TcpStream;
use tokio::time::{interval, Interval};
use tokio_util::codec::Framed;

use crate::bgp::advanced::{FlapDampener, GracefulRestartCapability, RestartState};
use crate::bgp::fsm::{self, Effect, Event, State};
use crate::bgp::rib::{AdjRibIn, AdjRibOut, BgpRoute, PeerIdentity, SourceTag};
use crate::error::SessionError;
use crate::wire::bgp::{
    BgpMessage, Capability, MessageCodec, NotificationMessage, OpenMessage, RouteRefreshMessage,
    UpdateMessage,
};
use crate::wire::bgp_attributes::{Afi, PathAttribute, Prefix, Safi};

pub type MessageProtocol = Framed<TcpStream, MessageCodec>;

/// Immutable per-peer configuration, resolved from `config::BgpPeerConfig`
/// (spec §3's `BgpSessionConfig`).
#[derive(Debug, Clone)]
pub struct BgpSessionConfig {
    pub local_as: u32,
    pub local_router_id: IpAddr,
    pub peer_address: IpAddr,
    pub peer_as: u32,
    pub hold_time: u16,
    pub connect_retry_secs: u16,
    pub passive: bool,
    pub route_reflector_client: bool,
    pub enable_flap_damping: bool,
    pub enable_graceful_restart: bool,
    pub enable_rpki: bool,
}

impl BgpSessionConfig {
    pub fn is_ebgp(&self) -> bool {
        self.peer_as != self.local_as
    }
}

/// Negotiated capability set: intersection of locally offered and
/// peer-received capabilities, keyed by capability code (spec §4.4).
#[derive(Debug, Clone, Default)]
pub struct CapabilityContext {
    pub local: Vec<Capability>,
    pub received: Vec<Capability>,
    pub negotiated: Vec<Capability>,
}

/// A capability present on both sides but with mismatched parameters (e.g.
/// a different (AFI,SAFI) pair) does not count as negotiated for that pair.
fn negotiate(local: &[Capability], received: &[Capability]) -> Vec<Capability> {
    let mut negotiated = Vec::new();
    for cap in local {
        match cap {
            Capability::Multiprotocol { afi, safi } => {
                if received.iter().any(|c| matches!(c, Capability::Multiprotocol { afi: a, safi: s } if a == afi && s == safi)) {
                    negotiated.push(cap.clone());
                }
            }
            Capability::RouteRefresh => {
                if received.iter().any(|c| matches!(c, Capability::RouteRefresh)) {
                    negotiated.push(cap.clone());
                }
            }
            Capability::FourOctetAsn(_) => {
                if received.iter().any(|c| matches!(c, Capability::FourOctetAsn(_))) {
                    negotiated.push(cap.clone());
                }
            }
            Capability::GracefulRestart { .. } => {
                if received.iter().any(|c| matches!(c, Capability::GracefulRestart { .. })) {
                    negotiated.push(cap.clone());
                }
            }
            Capability::AddPath { afi, safi, .. } => {
                if received.iter().any(|c| matches!(c, Capability::AddPath { afi: a, safi: s, .. } if a == afi && s == safi)) {
                    negotiated.push(cap.clone());
                }
            }
            Capability::Unknown { .. } => {}
        }
    }
    negotiated
}

/// Drives the BGP FSM's timer-backed effects: connect-retry, hold and
/// keepalive timers, modeled on the teacher's `HoldTimer` but generalized to
/// the pure FSM's `Effect::Start*`/`Effect::Stop*` vocabulary.
#[derive(Debug)]
pub struct SessionTimers {
    hold_time: u16,
    last_sent: DateTime<Utc>,
    last_received: DateTime<Utc>,
    keepalive_tick: Interval,
}

impl SessionTimers {
    pub fn new(hold_time: u16) -> Self {
        SessionTimers {
            hold_time,
            last_sent: Utc::now(),
            last_received: Utc::now(),
            keepalive_tick: interval(time::Duration::from_millis(200)),
        }
    }

    pub fn received(&mut self) {
        self.last_received = Utc::now();
    }

    pub fn sent(&mut self) {
        self.last_sent = Utc::now();
    }

    pub fn set_hold_time(&mut self, hold_time: u16) {
        self.hold_time = hold_time;
    }

    /// HoldTime of 0 disables hold/keepalive entirely (spec §4.3).
    pub fn is_expired(&self) -> bool {
        self.hold_time != 0 && Utc::now() - self.last_received >= Duration::seconds(self.hold_time.into())
    }

    /// True once 1/3 of HoldTime has elapsed since the last sent message.
    pub async fn should_send_keepalive(&mut self) -> bool {
        self.keepalive_tick.tick().await;
        if self.hold_time == 0 {
            return false;
        }
        let keepalive_interval = Duration::seconds((self.hold_time / 3).into());
        Utc::now() - self.last_sent >= keepalive_interval
    }
}

/// One peer's session: FSM state, Adj-RIB-In/Out, timers, capability context.
pub struct BgpSession {
    pub config: BgpSessionConfig,
    pub state: State,
    pub connect_time: DateTime<Utc>,
    protocol: MessageProtocol,
    pub timers: SessionTimers,
    pub capabilities: CapabilityContext,
    pub adj_rib_in: AdjRibIn,
    pub adj_rib_out: AdjRibOut,
    pub peer_router_id: Option<IpAddr>,
    pub restart_state: Option<RestartState>,
    pub flap_dampener: FlapDampener,
}

/// What the caller (the agent's per-peer task owner) should do after one
/// `run()` iteration.
#[derive(Debug)]
pub enum SessionOutcome {
    Continue,
    RouteUpdate(UpdateMessage),
    Terminated(SessionError),
}

impl BgpSession {
    pub fn new(config: BgpSessionConfig, stream: TcpStream, local_capabilities: Vec<Capability>) -> Self {
        let hold_time = config.hold_time;
        BgpSession {
            state: State::Connect,
            connect_time: Utc::now(),
            protocol: Framed::new(stream, MessageCodec::new()),
            timers: SessionTimers::new(hold_time),
            capabilities: CapabilityContext { local: local_capabilities, received: Vec::new(), negotiated: Vec::new() },
            adj_rib_in: AdjRibIn::new(),
            adj_rib_out: AdjRibOut::new(),
            peer_router_id: None,
            restart_state: None,
            flap_dampener: FlapDampener::default(),
            config,
        }
    }

    fn router_id_u32(id: IpAddr) -> u32 {
        match id {
            IpAddr::V4(v4) => u32::from_be_bytes(v4.octets()),
            IpAddr::V6(_) => 0,
        }
    }

    pub fn create_open(&self) -> OpenMessage {
        let router_id = match self.config.local_router_id {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(_) => unreachable!("router id must be IPv4"),
        };
        let asn = if self.config.local_as < 65535 {
            self.config.local_as as u16
        } else {
            crate::wire::bgp::AS_TRANS
        };
        OpenMessage {
            version: 4,
            asn,
            hold_time: self.config.hold_time,
            router_id,
            capabilities: self.capabilities.local.clone(),
        }
    }

    async fn realize(&mut self, effects: &[Effect]) -> Result<(), SessionError> {
        for effect in effects {
            match effect {
                Effect::SendOpen => {
                    let open = self.create_open();
                    self.send(BgpMessage::Open(open)).await?;
                }
                Effect::SendKeepalive => {
                    self.send(BgpMessage::Keepalive).await?;
                }
                Effect::SendNotification(code, subcode) => {
                    self.send(BgpMessage::Notification(NotificationMessage::new(*code, *subcode))).await?;
                }
                Effect::StartHoldTimer(hold_time) => self.timers.set_hold_time(*hold_time),
                Effect::DropTcpConnection | Effect::ReleaseResources => {}
                _ => {}
            }
        }
        Ok(())
    }

    async fn send(&mut self, message: BgpMessage) -> Result<(), SessionError> {
        self.protocol.send(message).await.map_err(SessionError::from)?;
        self.timers.sent();
        Ok(())
    }

    /// Process a freshly decoded OPEN: validate peer ASN, derive negotiated
    /// HoldTime = min(local, peer), intersect capabilities (spec §4.4).
    fn open_received(&mut self, open: OpenMessage) -> Result<(), SessionError> {
        let received_asn = open
            .capabilities
            .iter()
            .find_map(|c| match c {
                Capability::FourOctetAsn(asn) => Some(*asn),
                _ => None,
            })
            .unwrap_or(u32::from(open.asn));
        if received_asn != self.config.peer_as {
            return Err(SessionError::OpenAsnMismatch(received_asn, self.config.peer_as));
        }
        self.peer_router_id = Some(IpAddr::V4(open.router_id));
        let negotiated_hold = cmp::min(open.hold_time, self.config.hold_time);
        self.timers.set_hold_time(negotiated_hold);
        self.capabilities.received = open.capabilities;
        self.capabilities.negotiated = negotiate(&self.capabilities.local, &self.capabilities.received);
        Ok(())
    }

    pub fn peer_identity(&self) -> PeerIdentity {
        PeerIdentity {
            address: self.config.peer_address,
            router_id: self.peer_router_id.unwrap_or(self.config.peer_address),
        }
    }

    /// Apply an UPDATE to Adj-RIB-In (spec §4.4's inbound contract): replace
    /// existing routes for re-announced prefixes, remove withdrawn ones.
    fn apply_update(&mut self, update: &UpdateMessage) {
        let peer = self.peer_identity();
        for prefix in &update.withdrawn {
            self.adj_rib_in.remove(prefix);
        }
        if !update.nlri.is_empty() {
            for prefix in &update.nlri {
                let route = BgpRoute::new(*prefix, update.attributes.clone(), peer, SourceTag::FromPeer, Utc::now());
                self.adj_rib_in.insert_or_replace(route);
            }
        }
    }

    /// One iteration: send queued messages, drive the FSM on the next
    /// inbound message or timer expiry (spec §5's per-session suspension
    /// points).
    pub async fn run(&mut self) -> SessionOutcome {
        if self.state == State::Connect {
            let t = fsm::transition(self.state, &Event::TcpConnectionConfirmed, self.config.hold_time);
            if let Some(t) = t {
                self.state = t.next;
                if let Err(e) = self.realize(&t.effects).await {
                    return SessionOutcome::Terminated(e);
                }
            }
        }

        tokio::select! {
            message = self.protocol.next() => {
                match message {
                    None => SessionOutcome::Terminated(SessionError::Transport("connection closed".into())),
                    Some(Err(e)) => {
                        let (code, subcode) = e.notification_code();
                        let _ = self.send(BgpMessage::Notification(NotificationMessage::new(code, subcode))).await;
                        SessionOutcome::Terminated(SessionError::Wire(e))
                    }
                    Some(Ok(msg)) => self.handle_message(msg).await,
                }
            }
            should_keepalive = self.timers.should_send_keepalive() => {
                if self.timers.is_expired() {
                    let t = fsm::transition(self.state, &Event::HoldTimerExpires, self.config.hold_time);
                    if let Some(t) = t {
                        self.state = t.next;
                        let _ = self.realize(&t.effects).await;
                    }
                    return SessionOutcome::Terminated(SessionError::HoldTimeExpired(self.config.hold_time));
                }
                if should_keepalive && fsm::is_established(self.state) {
                    if let Err(e) = self.send(BgpMessage::Keepalive).await {
                        return SessionOutcome::Terminated(e);
                    }
                }
                SessionOutcome::Continue
            }
        }
    }

    async fn handle_message(&mut self, msg: BgpMessage) -> SessionOutcome {
        self.timers.received();
        let event = match &msg {
            BgpMessage::Open(_) => Event::BgpOpen,
            BgpMessage::Keepalive => Event::KeepAliveMsg,
            BgpMessage::Update(_) => Event::UpdateMsg,
            BgpMessage::Notification(_) => Event::NotifMsg,
            BgpMessage::RouteRefresh(_) => return self.handle_route_refresh(),
        };
        let transition = match fsm::transition(self.state, &event, self.config.hold_time) {
            Some(t) => t,
            None => return SessionOutcome::Terminated(SessionError::FiniteStateMachine(0)),
        };
        self.state = transition.next;
        if let Err(e) = self.realize(&transition.effects).await {
            return SessionOutcome::Terminated(e);
        }

        match msg {
            BgpMessage::Open(open) => {
                if let Err(e) = self.open_received(open) {
                    return SessionOutcome::Terminated(e);
                }
                SessionOutcome::Continue
            }
            BgpMessage::Update(update) => {
                if fsm::is_established(self.state) {
                    self.apply_update(&update);
                }
                SessionOutcome::RouteUpdate(update)
            }
            BgpMessage::Notification(notif) => {
                warn!(
                    "{} sent NOTIFICATION code={} subcode={}",
                    self.config.peer_address, notif.error_code, notif.error_subcode
                );
                SessionOutcome::Terminated(SessionError::Other("peer sent NOTIFICATION".into()))
            }
            BgpMessage::Keepalive => {
                debug!("{} established at {}", self.config.peer_address, self.connect_time);
                SessionOutcome::Continue
            }
            BgpMessage::RouteRefresh(_) => unreachable!("handled above"),
        }
    }

    fn handle_route_refresh(&mut self) -> SessionOutcome {
        trace!("{} requested ROUTE-REFRESH", self.config.peer_address);
        SessionOutcome::Continue
    }

    pub fn send_route_refresh(&mut self, afi: Afi, safi: Safi) -> RouteRefreshMessage {
        RouteRefreshMessage { afi, safi }
    }

    /// Send this peer's outbound UPDATE(s) for a decision-process run (spec
    /// §4.4): withdrawals first, then routes grouped by identical attribute
    /// set into as few UPDATE messages as the 4096-byte cap allows. Grouping
    /// uses a generous prefix-count cap as a cheap proxy for the wire-size
    /// cap rather than encoding speculatively to measure it exactly.
    pub async fn advertise(&mut self, routes: Vec<BgpRoute>, withdrawals: Vec<Prefix>) -> Result<(), SessionError> {
        const MAX_NLRI_PER_MESSAGE: usize = 200;

        for prefix in &withdrawals {
            self.adj_rib_out.remove(prefix);
        }
        if !withdrawals.is_empty() {
            for chunk in withdrawals.chunks(MAX_NLRI_PER_MESSAGE) {
                let update = UpdateMessage { withdrawn: chunk.to_vec(), attributes: Vec::new(), nlri: Vec::new() };
                self.send(BgpMessage::Update(update)).await?;
            }
        }

        let mut groups: Vec<(Vec<PathAttribute>, Vec<Prefix>)> = Vec::new();
        for route in routes {
            self.adj_rib_out.install(route.clone());
            let mut attrs: Vec<PathAttribute> = route.attributes.into_values().collect();
            attrs.sort_by_key(|a| a.type_code());
            match groups.iter_mut().find(|(existing, _)| existing == &attrs) {
                Some((_, prefixes)) => prefixes.push(route.prefix),
                None => groups.push((attrs, vec![route.prefix])),
            }
        }
        for (attributes, prefixes) in groups {
            for chunk in prefixes.chunks(MAX_NLRI_PER_MESSAGE) {
                let update = UpdateMessage { withdrawn: Vec::new(), attributes: attributes.clone(), nlri: chunk.to_vec() };
                self.send(BgpMessage::Update(update)).await?;
            }
        }
        Ok(())
    }

    /// Send a NOTIFICATION directly, bypassing the FSM (used by the agent
    /// to send Cease/administrative-shutdown on graceful engine shutdown).
    pub async fn send_notification(&mut self, notification: NotificationMessage) -> Result<(), SessionError> {
        self.send(BgpMessage::Notification(notification)).await
    }

    /// Graceful-restart bookkeeping on session drop: mark routes stale
    /// instead of deleting them if the peer negotiated the capability
    /// (spec §4.6).
    pub fn begin_graceful_restart(&mut self, cap: &GracefulRestartCapability) {
        if !self.config.enable_graceful_restart {
            return;
        }
        let prefixes: Vec<_> = self.adj_rib_in.iter().map(|r| (r.prefix.afi(), Safi::Unicast, r.prefix)).collect();
        self.restart_state = Some(RestartState::begin(prefixes, cap.restart_time_secs, Utc::now()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_requires_matching_afi_safi() {
        let local = vec![Capability::Multiprotocol { afi: Afi::Ipv6, safi: Safi::Unicast }];
        let received = vec![Capability::Multiprotocol { afi: Afi::Ipv4, safi: Safi::Unicast }];
        assert!(negotiate(&local, &received).is_empty());
    }

    #[tokio::test]
    async fn advertise_installs_and_withdraws_in_adj_rib_out() {
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

        let config = BgpSessionConfig {
            local_as: 65001,
            local_router_id: "192.0.2.1".parse().unwrap(),
            peer_address: "192.0.2.2".parse().unwrap(),
            peer_as: 65002,
            hold_time: 90,
            connect_retry_secs: 30,
            passive: false,
            route_reflector_client: false,
            enable_flap_damping: false,
            enable_graceful_restart: false,
            enable_rpki: false,
        };
        let mut session = BgpSession::new(config, server_stream, Vec::new());

        let prefix = Prefix::new("10.0.0.0".parse().unwrap(), 8);
        let peer_id = PeerIdentity { address: "192.0.2.2".parse().unwrap(), router_id: "192.0.2.2".parse().unwrap() };
        let route = BgpRoute::new(
            prefix,
            vec![PathAttribute::Origin(crate::wire::bgp_attributes::Origin::Igp)],
            peer_id,
            SourceTag::FromPeer,
            Utc::now(),
        );

        session.advertise(vec![route], Vec::new()).await.unwrap();
        assert!(session.adj_rib_out.lookup(&prefix).is_some());

        session.advertise(Vec::new(), vec![prefix]).await.unwrap();
        assert!(session.adj_rib_out.lookup(&prefix).is_none());
    }

    #[test]
    fn negotiation_intersects_matching_capability() {
        let local = vec![Capability::RouteRefresh, Capability::FourOctetAsn(65001)];
        let received = vec![Capability::RouteRefresh];
        let negotiated = negotiate(&local, &received);
        assert_eq!(negotiated, vec![Capability::RouteRefresh]);
    }
}
