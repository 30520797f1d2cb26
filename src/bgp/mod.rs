//! The BGP-4 engine (spec §1-§4.6, §4.10's BGP half): wire codec types live
//! in `crate::wire`, everything peer- and route-specific lives here.

pub mod advanced;
pub mod decision;
pub mod engine;
pub mod fsm;
pub mod rib;
pub mod session;

pub use decision::{compare, select_best, ChangedRoute, DecisionOutcome, DecisionProcess};
pub use engine::BgpEngine;
pub use fsm::{Event, State};
pub use rib::{AdjRibIn, AdjRibOut, BgpRoute, LocRib, PeerIdentity, SourceTag};
pub use session::{BgpSession, BgpSessionConfig, SessionOutcome};
