//! BGP path-attribute model (spec §3, §4.1) and the prefix/community/AS-path
//! value types attributes are built from.
//!
//! `PathAttribute` is a tagged variant, not a class hierarchy: each
//! standardized type gets its own variant carrying a typed value, and two
//! catch-all variants preserve unknown transitive/non-transitive attributes
//! opaquely (flags + raw bytes) so they pass through unmodified, per RFC 4271
//! §5's "unrecognized attributes" rule.

use std::convert::TryFrom;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};
use bytes::{BufMut, BytesMut};

use crate::error::WireError;

pub type Asn = u32;

/// AFI values this core understands (RFC 4760 §8 is the full registry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Afi {
    Ipv4,
    Ipv6,
    Unknown(u16),
}

impl From<u16> for Afi {
    fn from(v: u16) -> Self {
        match v {
            1 => Afi::Ipv4,
            2 => Afi::Ipv6,
            other => Afi::Unknown(other),
        }
    }
}

impl From<Afi> for u16 {
    fn from(a: Afi) -> u16 {
        match a {
            Afi::Ipv4 => 1,
            Afi::Ipv6 => 2,
            Afi::Unknown(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Safi {
    Unicast,
    Flowspec,
    Unknown(u8),
}

impl From<u8> for Safi {
    fn from(v: u8) -> Self {
        match v {
            1 => Safi::Unicast,
            133 => Safi::Flowspec,
            other => Safi::Unknown(other),
        }
    }
}

impl From<Safi> for u8 {
    fn from(s: Safi) -> u8 {
        match s {
            Safi::Unicast => 1,
            Safi::Flowspec => 133,
            Safi::Unknown(v) => v,
        }
    }
}

/// An IP network address plus a prefix length, IPv4 or IPv6 (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Prefix {
    pub addr: IpAddr,
    pub prefix_len: u8,
}

impl Prefix {
    pub fn new(addr: IpAddr, prefix_len: u8) -> Self {
        Prefix { addr, prefix_len }
    }

    pub fn afi(&self) -> Afi {
        match self.addr {
            IpAddr::V4(_) => Afi::Ipv4,
            IpAddr::V6(_) => Afi::Ipv6,
        }
    }

    fn significant_bytes(&self) -> usize {
        ((self.prefix_len as usize) + 7) / 8
    }

    /// Encode as the NLRI wire form: `(length-in-bits, significant bytes)`.
    pub fn encode_nlri(&self, buf: &mut BytesMut) {
        buf.put_u8(self.prefix_len);
        let nbytes = self.significant_bytes();
        match self.addr {
            IpAddr::V4(v4) => buf.put_slice(&v4.octets()[..nbytes]),
            IpAddr::V6(v6) => buf.put_slice(&v6.octets()[..nbytes]),
        }
    }

    /// Decode an NLRI-encoded prefix for the given address family.
    pub fn decode_nlri<R: std::io::Read>(reader: &mut R, afi: Afi) -> Result<Self, WireError> {
        let prefix_len = reader.read_u8()?;
        let max_len = match afi {
            Afi::Ipv4 => 32,
            Afi::Ipv6 => 128,
            Afi::Unknown(_) => {
                return Err(WireError::BadValue("NLRI for unknown AFI".into()))
            }
        };
        if prefix_len > max_len {
            return Err(WireError::BadValue(format!(
                "prefix length {} exceeds {}",
                prefix_len, max_len
            )));
        }
        let nbytes = ((prefix_len as usize) + 7) / 8;
        let mut raw = [0u8; 16];
        reader.read_exact(&mut raw[..nbytes])?;
        let addr = match afi {
            Afi::Ipv4 => IpAddr::V4(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3])),
            Afi::Ipv6 => {
                let mut full = [0u8; 16];
                full[..nbytes].copy_from_slice(&raw[..nbytes]);
                IpAddr::V6(Ipv6Addr::from(full))
            }
            Afi::Unknown(_) => unreachable!(),
        };
        Ok(Prefix { addr, prefix_len })
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

/// A 32-bit community. `A:B` encodes as `(A<<16)|B` (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Community(pub u32);

impl Community {
    pub const NO_EXPORT: Community = Community(0xFFFF_FF01);
    pub const NO_ADVERTISE: Community = Community(0xFFFF_FF02);
    pub const NO_EXPORT_SUBCONFED: Community = Community(0xFFFF_FF03);
    pub const NOPEER: Community = Community(0xFFFF_FF04);

    pub fn new(asn: u16, value: u16) -> Self {
        Community((u32::from(asn) << 16) | u32::from(value))
    }
}

impl fmt::Display for Community {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Community::NO_EXPORT => write!(f, "NO_EXPORT"),
            Community::NO_ADVERTISE => write!(f, "NO_ADVERTISE"),
            Community::NO_EXPORT_SUBCONFED => write!(f, "NO_EXPORT_SUBCONFED"),
            Community::NOPEER => write!(f, "NOPEER"),
            Community(v) => write!(f, "{}:{}", v >> 16, v & 0xFFFF),
        }
    }
}

impl TryFrom<&str> for Community {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_uppercase().as_str() {
            "NO_EXPORT" => return Ok(Community::NO_EXPORT),
            "NO_ADVERTISE" => return Ok(Community::NO_ADVERTISE),
            "NO_EXPORT_SUBCONFED" => return Ok(Community::NO_EXPORT_SUBCONFED),
            "NOPEER" => return Ok(Community::NOPEER),
            _ => {}
        }
        if let Some((a, b)) = value.split_once(':') {
            let a: u16 = a.parse().map_err(|_| format!("bad community '{}'", value))?;
            let b: u16 = b.parse().map_err(|_| format!("bad community '{}'", value))?;
            Ok(Community::new(a, b))
        } else {
            value
                .parse::<u32>()
                .map(Community)
                .map_err(|_| format!("bad community '{}'", value))
        }
    }
}

/// ORIGIN values, ordered per decision-process tie-break 3 (IGP < EGP < INCOMPLETE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Origin {
    Igp = 0,
    Egp = 1,
    Incomplete = 2,
}

impl TryFrom<u8> for Origin {
    type Error = WireError;

    fn try_from(v: u8) -> Result<Self, WireError> {
        match v {
            0 => Ok(Origin::Igp),
            1 => Ok(Origin::Egp),
            2 => Ok(Origin::Incomplete),
            other => Err(WireError::BadValue(format!("bad ORIGIN value {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsPathSegment {
    Set(Vec<Asn>),
    Sequence(Vec<Asn>),
}

/// An ordered list of AS_PATH segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AsPath {
    pub segments: Vec<AsPathSegment>,
}

impl AsPath {
    /// AS_PATH length per spec §4.1: each AS in an AS_SEQUENCE counts, an
    /// entire AS_SET segment counts as exactly 1.
    pub fn path_length(&self) -> usize {
        self.segments
            .iter()
            .map(|seg| match seg {
                AsPathSegment::Sequence(asns) => asns.len(),
                AsPathSegment::Set(_) => 1,
            })
            .sum()
    }

    /// The leftmost AS in the path (the neighbor AS used for MED grouping).
    pub fn neighbor_asn(&self) -> Option<Asn> {
        self.segments.iter().find_map(|seg| match seg {
            AsPathSegment::Sequence(asns) => asns.first().copied(),
            AsPathSegment::Set(asns) => asns.first().copied(),
        })
    }

    /// The rightmost AS in the path (the origin AS for RPKI validation).
    pub fn origin_asn(&self) -> Option<Asn> {
        self.segments.iter().rev().find_map(|seg| match seg {
            AsPathSegment::Sequence(asns) => asns.last().copied(),
            AsPathSegment::Set(asns) => asns.last().copied(),
        })
    }

    pub fn contains(&self, asn: Asn) -> bool {
        self.segments.iter().any(|seg| match seg {
            AsPathSegment::Sequence(asns) | AsPathSegment::Set(asns) => asns.contains(&asn),
        })
    }

    /// Prepend `asn` to the path: extend the leading AS_SEQUENCE, or start a
    /// fresh one if the path is empty or starts with an AS_SET.
    pub fn prepend(&self, asn: Asn) -> AsPath {
        let mut segments = self.segments.clone();
        match segments.first_mut() {
            Some(AsPathSegment::Sequence(asns)) => asns.insert(0, asn),
            _ => segments.insert(0, AsPathSegment::Sequence(vec![asn])),
        }
        AsPath { segments }
    }
}

bitflags::bitflags! {
    /// Path attribute flag bits (RFC 4271 §4.3).
    pub struct AttrFlags: u8 {
        const OPTIONAL = 0x80;
        const TRANSITIVE = 0x40;
        const PARTIAL = 0x20;
        const EXTENDED_LENGTH = 0x10;
    }
}

/// Standard path-attribute type codes (RFC 4271 §5, RFC 1997, RFC 4456, RFC 4760).
pub mod type_code {
    pub const ORIGIN: u8 = 1;
    pub const AS_PATH: u8 = 2;
    pub const NEXT_HOP: u8 = 3;
    pub const MED: u8 = 4;
    pub const LOCAL_PREF: u8 = 5;
    pub const ATOMIC_AGGREGATE: u8 = 6;
    pub const AGGREGATOR: u8 = 7;
    pub const COMMUNITIES: u8 = 8;
    pub const ORIGINATOR_ID: u8 = 9;
    pub const CLUSTER_LIST: u8 = 10;
    pub const MP_REACH_NLRI: u8 = 14;
    pub const MP_UNREACH_NLRI: u8 = 15;
}

/// One decoded path attribute. Each variant stores its own value; the wire
/// type code and flags are derived by `type_code()`/`default_flags()` on
/// encode and preserved verbatim for unknown attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum PathAttribute {
    Origin(Origin),
    AsPath(AsPath),
    NextHop(Ipv4Addr),
    Med(u32),
    LocalPref(u32),
    AtomicAggregate,
    Aggregator(Asn, Ipv4Addr),
    Communities(Vec<Community>),
    OriginatorId(Ipv4Addr),
    ClusterList(Vec<Ipv4Addr>),
    MpReachNlri {
        afi: Afi,
        safi: Safi,
        next_hops: Vec<IpAddr>,
        nlri: Vec<Prefix>,
    },
    MpUnreachNlri {
        afi: Afi,
        safi: Safi,
        withdrawn: Vec<Prefix>,
    },
    /// Unknown attribute, preserved opaquely with its original flags so
    /// transitive ones continue to propagate untouched (spec §3).
    Unknown { type_code: u8, flags: AttrFlags, value: Vec<u8> },
}

impl PathAttribute {
    pub fn type_code(&self) -> u8 {
        use type_code::*;
        match self {
            PathAttribute::Origin(_) => ORIGIN,
            PathAttribute::AsPath(_) => AS_PATH,
            PathAttribute::NextHop(_) => NEXT_HOP,
            PathAttribute::Med(_) => MED,
            PathAttribute::LocalPref(_) => LOCAL_PREF,
            PathAttribute::AtomicAggregate => ATOMIC_AGGREGATE,
            PathAttribute::Aggregator(..) => AGGREGATOR,
            PathAttribute::Communities(_) => COMMUNITIES,
            PathAttribute::OriginatorId(_) => ORIGINATOR_ID,
            PathAttribute::ClusterList(_) => CLUSTER_LIST,
            PathAttribute::MpReachNlri { .. } => MP_REACH_NLRI,
            PathAttribute::MpUnreachNlri { .. } => MP_UNREACH_NLRI,
            PathAttribute::Unknown { type_code, .. } => *type_code,
        }
    }

    fn default_flags(&self) -> AttrFlags {
        use PathAttribute::*;
        match self {
            Origin(_) | AsPath(_) | NextHop(_) => AttrFlags::TRANSITIVE,
            Med(_) => AttrFlags::OPTIONAL,
            LocalPref(_) => AttrFlags::empty(),
            AtomicAggregate => AttrFlags::TRANSITIVE,
            Aggregator(..) => AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE,
            Communities(_) => AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE,
            OriginatorId(_) | ClusterList(_) => AttrFlags::OPTIONAL,
            MpReachNlri { .. } | MpUnreachNlri { .. } => AttrFlags::OPTIONAL,
            Unknown { flags, .. } => *flags,
        }
    }

    fn encode_value(&self, buf: &mut BytesMut) {
        match self {
            PathAttribute::Origin(o) => buf.put_u8(*o as u8),
            PathAttribute::AsPath(path) => {
                for seg in &path.segments {
                    let (kind, asns): (u8, &[Asn]) = match seg {
                        AsPathSegment::Set(a) => (1, a),
                        AsPathSegment::Sequence(a) => (2, a),
                    };
                    buf.put_u8(kind);
                    buf.put_u8(asns.len() as u8);
                    for asn in asns {
                        buf.put_u32(*asn);
                    }
                }
            }
            PathAttribute::NextHop(addr) => buf.put_slice(&addr.octets()),
            PathAttribute::Med(v) | PathAttribute::LocalPref(v) => buf.put_u32(*v),
            PathAttribute::AtomicAggregate => {}
            PathAttribute::Aggregator(asn, id) => {
                buf.put_u32(*asn);
                buf.put_slice(&id.octets());
            }
            PathAttribute::Communities(list) => {
                for c in list {
                    buf.put_u32(c.0);
                }
            }
            PathAttribute::OriginatorId(id) => buf.put_slice(&id.octets()),
            PathAttribute::ClusterList(ids) => {
                for id in ids {
                    buf.put_slice(&id.octets());
                }
            }
            PathAttribute::MpReachNlri { afi, safi, next_hops, nlri } => {
                buf.put_u16(u16::from(*afi));
                buf.put_u8(u8::from(*safi));
                let nh_len: usize = next_hops
                    .iter()
                    .map(|nh| if nh.is_ipv4() { 4 } else { 16 })
                    .sum();
                buf.put_u8(nh_len as u8);
                for nh in next_hops {
                    match nh {
                        IpAddr::V4(v4) => buf.put_slice(&v4.octets()),
                        IpAddr::V6(v6) => buf.put_slice(&v6.octets()),
                    }
                }
                buf.put_u8(0); // SNPA count, always zero
                for p in nlri {
                    p.encode_nlri(buf);
                }
            }
            PathAttribute::MpUnreachNlri { afi, safi, withdrawn } => {
                buf.put_u16(u16::from(*afi));
                buf.put_u8(u8::from(*safi));
                for p in withdrawn {
                    p.encode_nlri(buf);
                }
            }
            PathAttribute::Unknown { value, .. } => buf.put_slice(value),
        }
    }

    /// Encode `(flags, type, length, value)`, setting Extended-Length
    /// exactly when the value exceeds 255 bytes (spec §4.1, tested at §8).
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut value = BytesMut::new();
        self.encode_value(&mut value);
        let mut flags = self.default_flags();
        if value.len() > 255 {
            flags |= AttrFlags::EXTENDED_LENGTH;
        }
        buf.put_u8(flags.bits());
        buf.put_u8(self.type_code());
        if flags.contains(AttrFlags::EXTENDED_LENGTH) {
            buf.put_u16(value.len() as u16);
        } else {
            buf.put_u8(value.len() as u8);
        }
        buf.put_slice(&value);
    }

    pub fn decode(buf: &mut &[u8]) -> Result<Self, WireError> {
        use std::io::Read;
        if buf.len() < 2 {
            return Err(WireError::Incomplete);
        }
        let flags = AttrFlags::from_bits_truncate(buf.read_u8()?);
        let code = buf.read_u8()?;
        let len = if flags.contains(AttrFlags::EXTENDED_LENGTH) {
            buf.read_u16::<NetworkEndian>()? as usize
        } else {
            buf.read_u8()? as usize
        };
        if buf.len() < len {
            return Err(WireError::Incomplete);
        }
        let (mut value, rest) = buf.split_at(len);
        *buf = rest;
        let attr = match code {
            type_code::ORIGIN => PathAttribute::Origin(Origin::try_from(value.read_u8()?)?),
            type_code::AS_PATH => {
                let mut segments = Vec::new();
                while !value.is_empty() {
                    let kind = value.read_u8()?;
                    let count = value.read_u8()? as usize;
                    let mut asns = Vec::with_capacity(count);
                    for _ in 0..count {
                        asns.push(value.read_u32::<NetworkEndian>()?);
                    }
                    segments.push(match kind {
                        1 => AsPathSegment::Set(asns),
                        2 => AsPathSegment::Sequence(asns),
                        other => return Err(WireError::BadValue(format!("bad AS_PATH segment type {}", other))),
                    });
                }
                PathAttribute::AsPath(AsPath { segments })
            }
            type_code::NEXT_HOP => {
                let mut octets = [0u8; 4];
                value.read_exact(&mut octets)?;
                PathAttribute::NextHop(Ipv4Addr::from(octets))
            }
            type_code::MED => PathAttribute::Med(value.read_u32::<NetworkEndian>()?),
            type_code::LOCAL_PREF => PathAttribute::LocalPref(value.read_u32::<NetworkEndian>()?),
            type_code::ATOMIC_AGGREGATE => PathAttribute::AtomicAggregate,
            type_code::AGGREGATOR => {
                let asn = value.read_u32::<NetworkEndian>()?;
                let mut octets = [0u8; 4];
                value.read_exact(&mut octets)?;
                PathAttribute::Aggregator(asn, Ipv4Addr::from(octets))
            }
            type_code::COMMUNITIES => {
                let mut list = Vec::with_capacity(value.len() / 4);
                while !value.is_empty() {
                    list.push(Community(value.read_u32::<NetworkEndian>()?));
                }
                PathAttribute::Communities(list)
            }
            type_code::ORIGINATOR_ID => {
                let mut octets = [0u8; 4];
                value.read_exact(&mut octets)?;
                PathAttribute::OriginatorId(Ipv4Addr::from(octets))
            }
            type_code::CLUSTER_LIST => {
                let mut ids = Vec::with_capacity(value.len() / 4);
                while !value.is_empty() {
                    let mut octets = [0u8; 4];
                    value.read_exact(&mut octets)?;
                    ids.push(Ipv4Addr::from(octets));
                }
                PathAttribute::ClusterList(ids)
            }
            type_code::MP_REACH_NLRI => {
                let afi = Afi::from(value.read_u16::<NetworkEndian>()?);
                let safi = Safi::from(value.read_u8()?);
                let nh_len = value.read_u8()? as usize;
                let mut next_hops = Vec::new();
                let mut remaining = nh_len;
                while remaining > 0 {
                    match afi {
                        Afi::Ipv4 => {
                            let mut octets = [0u8; 4];
                            value.read_exact(&mut octets)?;
                            next_hops.push(IpAddr::V4(Ipv4Addr::from(octets)));
                            remaining -= 4;
                        }
                        _ => {
                            let mut octets = [0u8; 16];
                            value.read_exact(&mut octets)?;
                            next_hops.push(IpAddr::V6(Ipv6Addr::from(octets)));
                            remaining -= 16;
                        }
                    }
                }
                let _snpa_count = value.read_u8()?; // always 0
                let mut nlri = Vec::new();
                while !value.is_empty() {
                    nlri.push(Prefix::decode_nlri(&mut value, afi)?);
                }
                PathAttribute::MpReachNlri { afi, safi, next_hops, nlri }
            }
            type_code::MP_UNREACH_NLRI => {
                let afi = Afi::from(value.read_u16::<NetworkEndian>()?);
                let safi = Safi::from(value.read_u8()?);
                let mut withdrawn = Vec::new();
                while !value.is_empty() {
                    withdrawn.push(Prefix::decode_nlri(&mut value, afi)?);
                }
                PathAttribute::MpUnreachNlri { afi, safi, withdrawn }
            }
            other => PathAttribute::Unknown {
                type_code: other,
                flags,
                value: value.to_vec(),
            },
        };
        Ok(attr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_path_length_counts_set_as_one() {
        let path = AsPath {
            segments: vec![
                AsPathSegment::Sequence(vec![100, 200]),
                AsPathSegment::Set(vec![300, 400, 500]),
            ],
        };
        assert_eq!(path.path_length(), 3);
    }

    #[test]
    fn prepend_extends_leading_sequence() {
        let path = AsPath { segments: vec![AsPathSegment::Sequence(vec![200])] };
        let prepended = path.prepend(100);
        assert_eq!(prepended.path_length(), 2);
        assert_eq!(prepended.segments[0], AsPathSegment::Sequence(vec![100, 200]));
    }

    #[test]
    fn community_dotted_roundtrip() {
        let c = Community::try_from("65000:100").unwrap();
        assert_eq!(c.to_string(), "65000:100");
        assert_eq!(Community::try_from("NO_EXPORT").unwrap(), Community::NO_EXPORT);
    }

    #[test]
    fn origin_roundtrip() {
        let mut buf = BytesMut::new();
        PathAttribute::Origin(Origin::Egp).encode(&mut buf);
        let mut slice = &buf[..];
        let decoded = PathAttribute::decode(&mut slice).unwrap();
        assert_eq!(decoded, PathAttribute::Origin(Origin::Egp));
    }

    #[test]
    fn extended_length_flag_set_iff_value_over_255() {
        let big_as_path = PathAttribute::AsPath(AsPath {
            segments: vec![AsPathSegment::Sequence((1..=100).collect())],
        });
        let mut buf = BytesMut::new();
        big_as_path.encode(&mut buf);
        let flags = AttrFlags::from_bits_truncate(buf[0]);
        assert!(flags.contains(AttrFlags::EXTENDED_LENGTH));

        let small = PathAttribute::Origin(Origin::Igp);
        let mut buf2 = BytesMut::new();
        small.encode(&mut buf2);
        let flags2 = AttrFlags::from_bits_truncate(buf2[0]);
        assert!(!flags2.contains(AttrFlags::EXTENDED_LENGTH));
    }

    #[test]
    fn mp_reach_roundtrip_ipv6() {
        let next_hop: IpAddr = "2001:db8::1".parse().unwrap();
        let prefix = Prefix::new("2001:db8:1::".parse().unwrap(), 48);
        let attr = PathAttribute::MpReachNlri {
            afi: Afi::Ipv6,
            safi: Safi::Unicast,
            next_hops: vec![next_hop],
            nlri: vec![prefix],
        };
        let mut buf = BytesMut::new();
        attr.encode(&mut buf);
        let mut slice = &buf[..];
        let decoded = PathAttribute::decode(&mut slice).unwrap();
        assert_eq!(decoded, attr);
    }
}
