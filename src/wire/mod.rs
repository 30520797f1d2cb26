//! The wire codec (spec component C1): every BGP message / path-attribute and
//! every OSPF packet / LSA type, bit-exact per RFC 4271 and RFC 2328.

pub mod bgp;
pub mod bgp_attributes;
pub mod checksum;
pub mod ospf;

pub use bgp::{BgpMessage, MessageCodec as BgpMessageCodec, NotificationMessage, OpenMessage, UpdateMessage};
pub use bgp_attributes::{AsPath, AsPathSegment, Origin, PathAttribute};
