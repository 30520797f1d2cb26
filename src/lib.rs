//! A multi-protocol routing agent core: OSPFv2 (RFC 2328) and BGP-4
//! (RFC 4271) speakers sharing one forwarding-table installer.

pub mod agent;
pub mod bgp;
pub mod config;
pub mod error;
pub mod fib;
pub mod ospf;
pub mod transport;
pub mod wire;
