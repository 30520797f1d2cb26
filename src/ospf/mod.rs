//! The OSPFv2 engine (spec §1-§2, §4.7-§4.9): wire formats live in
//! `crate::wire::ospf`; everything neighbor-, area-, and route-specific lives
//! here.

pub mod adjacency;
pub mod area;
pub mod engine;
pub mod flooding;
pub mod fsm;
pub mod hello;
pub mod lsdb;
pub mod neighbor;
pub mod spf;
pub mod types;

pub use area::Area;
pub use engine::OspfEngine;
pub use fsm::{Event, State};
pub use lsdb::Lsdb;
pub use neighbor::OspfNeighbor;
pub use types::{NetworkType, OspfInterface, RouteEntry};
