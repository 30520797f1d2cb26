//! Shared OSPFv2 constants and entity types (spec §2, §3), grounded in RFC 2328
//! §appendix and the ambient constants module of the reference implementation.

use std::net::Ipv4Addr;
use std::time::Instant;

pub const OSPF_VERSION: u8 = 2;
pub const IP_PROTO_OSPF: u8 = 89;

pub const ALL_SPF_ROUTERS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 5);
pub const ALL_D_ROUTERS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 6);

pub const DEFAULT_HELLO_INTERVAL: u16 = 10;
pub const DEFAULT_DEAD_INTERVAL: u32 = 40;
pub const DEFAULT_RETRANSMIT_INTERVAL: u16 = 5;
pub const DEFAULT_ROUTER_PRIORITY: u8 = 1;
pub const INFINITE_METRIC: u16 = 0xFFFF;

pub const INITIAL_SEQUENCE_NUMBER: i32 = -0x7FFF_FFFF - 1; // 0x80000001 as i32, the lollipop start

/// Network type controls hello/DR-election/adjacency-formation behavior
/// (spec §3, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkType {
    Broadcast,
    PointToPoint,
    PointToMultipoint,
    Nbma,
    VirtualLink,
}

impl NetworkType {
    /// Point-to-point and point-to-multipoint always form adjacency and never
    /// elect a DR/BDR; priority is meaningless there (spec §4.7).
    pub fn always_adjacent(self) -> bool {
        matches!(self, NetworkType::PointToPoint | NetworkType::PointToMultipoint)
    }

    pub fn elects_dr(self) -> bool {
        matches!(self, NetworkType::Broadcast | NetworkType::Nbma)
    }
}

/// One OSPF-speaking interface (spec §3's `OspfInterface`).
#[derive(Debug, Clone)]
pub struct OspfInterface {
    pub area_id: Ipv4Addr,
    pub address: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub mtu: u16,
    pub network_type: NetworkType,
    pub hello_interval: u16,
    pub dead_interval: u32,
    pub router_priority: u8,
    pub designated_router: Ipv4Addr,
    pub backup_designated_router: Ipv4Addr,
}

impl OspfInterface {
    pub fn new(area_id: Ipv4Addr, address: Ipv4Addr, mask: Ipv4Addr, network_type: NetworkType) -> Self {
        OspfInterface {
            area_id,
            address,
            mask,
            mtu: 1500,
            network_type,
            hello_interval: DEFAULT_HELLO_INTERVAL,
            dead_interval: DEFAULT_DEAD_INTERVAL,
            router_priority: if network_type.always_adjacent() { 0 } else { DEFAULT_ROUTER_PRIORITY },
            designated_router: Ipv4Addr::UNSPECIFIED,
            backup_designated_router: Ipv4Addr::UNSPECIFIED,
        }
    }

    pub fn is_dr(&self, router_id: Ipv4Addr) -> bool {
        self.designated_router == router_id
    }

    pub fn is_bdr(&self, router_id: Ipv4Addr) -> bool {
        self.backup_designated_router == router_id
    }
}

/// One routing-table entry produced by SPF (spec §3, §4.9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub destination: Ipv4Addr,
    pub prefix_len: u8,
    pub cost: u32,
    pub next_hop: Option<Ipv4Addr>,
}

/// A monotonic point used only for interval math (hello timers, dead-interval
/// checks, LSA aging); never serialized or compared across processes.
pub type Clock = Instant;
