//! Optional BGP behaviors layered on top of the core session/decision
//! process (spec §4.6): route reflection, flap damping, graceful restart,
//! RPKI origin validation, and FlowSpec.

pub mod flap;
pub mod flowspec;
pub mod graceful_restart;
pub mod reflector;
pub mod rpki;

pub use flap::{DampingConfig, FlapDampener, FlapStatistics};
pub use flowspec::{FlowspecAction, FlowspecMatch, FlowspecMatcher, FlowspecRule, PacketDescriptor};
pub use graceful_restart::{GracefulRestartCapability, RestartState};
pub use reflector::{LearnedVia, ReflectorConfig, ReflectorStatistics};
pub use rpki::{Roa, RoaStore};
