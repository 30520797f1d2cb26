//! OSPFv2 wire formats (spec §4.1, RFC 2328 §A): the 24-byte packet envelope,
//! Hello/DD/LSR/LSU/LSAck bodies, and the 20-byte LSA header plus the four
//! LSA body shapes this core understands.

use std::io::Read;
use std::net::Ipv4Addr;

use byteorder::{NetworkEndian, ReadBytesExt};
use bytes::{BufMut, BytesMut};

use crate::error::WireError;
use crate::wire::checksum::{ip_checksum, lsa_fletcher_checksum};

pub const HEADER_LEN: usize = 24;
pub const LSA_HEADER_LEN: usize = 20;
pub const MAX_AGE: u16 = 3600;
pub const MAX_AGE_DIFF: u16 = 900;

pub const PKT_HELLO: u8 = 1;
pub const PKT_DB_DESCRIPTION: u8 = 2;
pub const PKT_LS_REQUEST: u8 = 3;
pub const PKT_LS_UPDATE: u8 = 4;
pub const PKT_LS_ACK: u8 = 5;

pub const LSA_ROUTER: u8 = 1;
pub const LSA_NETWORK: u8 = 2;
pub const LSA_SUMMARY: u8 = 3;
pub const LSA_SUMMARY_ASBR: u8 = 4;
pub const LSA_AS_EXTERNAL: u8 = 5;

/// Identifies one LSA instance's database key: (type, link-state id,
/// advertising router). Sequence numbers use RFC 2328's signed lollipop space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LsaKey {
    pub lsa_type: u8,
    pub link_state_id: Ipv4Addr,
    pub advertising_router: Ipv4Addr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LsaHeader {
    pub age: u16,
    pub options: u8,
    pub lsa_type: u8,
    pub link_state_id: Ipv4Addr,
    pub advertising_router: Ipv4Addr,
    pub sequence: i32,
    pub checksum: u16,
    pub length: u16,
}

impl LsaHeader {
    pub fn key(&self) -> LsaKey {
        LsaKey {
            lsa_type: self.lsa_type,
            link_state_id: self.link_state_id,
            advertising_router: self.advertising_router,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.age);
        buf.put_u8(self.options);
        buf.put_u8(self.lsa_type);
        buf.put_slice(&self.link_state_id.octets());
        buf.put_slice(&self.advertising_router.octets());
        buf.put_i32(self.sequence);
        buf.put_u16(self.checksum);
        buf.put_u16(self.length);
    }

    fn decode(mut data: &[u8]) -> Result<Self, WireError> {
        let age = data.read_u16::<NetworkEndian>()?;
        let options = data.read_u8()?;
        let lsa_type = data.read_u8()?;
        let mut lsid = [0u8; 4];
        data.read_exact(&mut lsid)?;
        let mut adv = [0u8; 4];
        data.read_exact(&mut adv)?;
        let sequence = data.read_i32::<NetworkEndian>()?;
        let checksum = data.read_u16::<NetworkEndian>()?;
        let length = data.read_u16::<NetworkEndian>()?;
        Ok(LsaHeader {
            age,
            options,
            lsa_type,
            link_state_id: Ipv4Addr::from(lsid),
            advertising_router: Ipv4Addr::from(adv),
            sequence,
            checksum,
            length,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterLinkType {
    PointToPoint,
    Transit,
    Stub,
    Virtual,
}

impl RouterLinkType {
    fn code(self) -> u8 {
        match self {
            RouterLinkType::PointToPoint => 1,
            RouterLinkType::Transit => 2,
            RouterLinkType::Stub => 3,
            RouterLinkType::Virtual => 4,
        }
    }

    fn from_code(code: u8) -> Result<Self, WireError> {
        match code {
            1 => Ok(RouterLinkType::PointToPoint),
            2 => Ok(RouterLinkType::Transit),
            3 => Ok(RouterLinkType::Stub),
            4 => Ok(RouterLinkType::Virtual),
            other => Err(WireError::BadValue(format!("bad router-link type {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterLink {
    pub link_id: Ipv4Addr,
    pub link_data: Ipv4Addr,
    pub link_type: RouterLinkType,
    pub metric: u16,
}

impl RouterLink {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.link_id.octets());
        buf.put_slice(&self.link_data.octets());
        buf.put_u8(self.link_type.code());
        buf.put_u8(0); // # TOS, always 0 in this core
        buf.put_u16(self.metric);
    }

    fn decode(data: &mut &[u8]) -> Result<Self, WireError> {
        let mut link_id = [0u8; 4];
        data.read_exact(&mut link_id)?;
        let mut link_data = [0u8; 4];
        data.read_exact(&mut link_data)?;
        let link_type = RouterLinkType::from_code(data.read_u8()?)?;
        let _tos_count = data.read_u8()?;
        let metric = data.read_u16::<NetworkEndian>()?;
        Ok(RouterLink { link_id: Ipv4Addr::from(link_id), link_data: Ipv4Addr::from(link_data), link_type, metric })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LsaBody {
    Router { flags: u8, links: Vec<RouterLink> },
    Network { mask: Ipv4Addr, attached_routers: Vec<Ipv4Addr> },
    Summary { mask: Ipv4Addr, metric: u32 },
    AsExternal { mask: Ipv4Addr, metric: u32, forwarding_address: Ipv4Addr, external_route_tag: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lsa {
    pub header: LsaHeader,
    pub body: LsaBody,
}

impl Lsa {
    fn encode_unaged(&self) -> BytesMut {
        let mut body_buf = BytesMut::new();
        match &self.body {
            LsaBody::Router { flags, links } => {
                body_buf.put_u8(0);
                body_buf.put_u8(*flags);
                body_buf.put_u16(links.len() as u16);
                for link in links {
                    link.encode(&mut body_buf);
                }
            }
            LsaBody::Network { mask, attached_routers } => {
                body_buf.put_slice(&mask.octets());
                for r in attached_routers {
                    body_buf.put_slice(&r.octets());
                }
            }
            LsaBody::Summary { mask, metric } => {
                body_buf.put_slice(&mask.octets());
                body_buf.put_u32(*metric & 0x00FF_FFFF);
            }
            LsaBody::AsExternal { mask, metric, forwarding_address, external_route_tag } => {
                body_buf.put_slice(&mask.octets());
                body_buf.put_u32(*metric & 0x00FF_FFFF);
                body_buf.put_slice(&forwarding_address.octets());
                body_buf.put_u32(*external_route_tag);
            }
        }
        let length = (LSA_HEADER_LEN + body_buf.len()) as u16;
        let mut header = self.header;
        header.length = length;
        let mut whole = BytesMut::new();
        header.encode(&mut whole);
        whole.put_slice(&body_buf);
        whole
    }

    /// Encode the LSA, computing its Fletcher-16 checksum over everything but
    /// the age field (RFC 2328 §12.1.4).
    pub fn encode(&self) -> BytesMut {
        let mut whole = self.encode_unaged();
        let checksum = lsa_fletcher_checksum(&whole[2..]);
        whole[16] = (checksum >> 8) as u8;
        whole[17] = (checksum & 0xFF) as u8;
        whole
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < LSA_HEADER_LEN {
            return Err(WireError::Incomplete);
        }
        let header = LsaHeader::decode(&data[..LSA_HEADER_LEN])?;
        let expected = lsa_fletcher_checksum(&data[2..header.length as usize]);
        if expected != header.checksum {
            return Err(WireError::LsaChecksumInvalid);
        }
        let mut body = &data[LSA_HEADER_LEN..header.length as usize];
        let lsa_body = match header.lsa_type {
            LSA_ROUTER => {
                let _zero = body.read_u8()?;
                let flags = body.read_u8()?;
                let count = body.read_u16::<NetworkEndian>()? as usize;
                let mut links = Vec::with_capacity(count);
                for _ in 0..count {
                    links.push(RouterLink::decode(&mut body)?);
                }
                LsaBody::Router { flags, links }
            }
            LSA_NETWORK => {
                let mut mask = [0u8; 4];
                body.read_exact(&mut mask)?;
                let mut attached_routers = Vec::new();
                while body.len() >= 4 {
                    let mut r = [0u8; 4];
                    body.read_exact(&mut r)?;
                    attached_routers.push(Ipv4Addr::from(r));
                }
                LsaBody::Network { mask: Ipv4Addr::from(mask), attached_routers }
            }
            LSA_SUMMARY | LSA_SUMMARY_ASBR => {
                let mut mask = [0u8; 4];
                body.read_exact(&mut mask)?;
                let metric = body.read_u32::<NetworkEndian>()? & 0x00FF_FFFF;
                LsaBody::Summary { mask: Ipv4Addr::from(mask), metric }
            }
            LSA_AS_EXTERNAL => {
                let mut mask = [0u8; 4];
                body.read_exact(&mut mask)?;
                let metric = body.read_u32::<NetworkEndian>()? & 0x00FF_FFFF;
                let mut fwd = [0u8; 4];
                body.read_exact(&mut fwd)?;
                let tag = body.read_u32::<NetworkEndian>()?;
                LsaBody::AsExternal {
                    mask: Ipv4Addr::from(mask),
                    metric,
                    forwarding_address: Ipv4Addr::from(fwd),
                    external_route_tag: tag,
                }
            }
            other => return Err(WireError::BadValue(format!("unknown LSA type {}", other))),
        };
        Ok(Lsa { header, body: lsa_body })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloPacket {
    pub network_mask: Ipv4Addr,
    pub hello_interval: u16,
    pub options: u8,
    pub router_priority: u8,
    pub router_dead_interval: u32,
    pub designated_router: Ipv4Addr,
    pub backup_designated_router: Ipv4Addr,
    pub neighbors: Vec<Ipv4Addr>,
}

impl HelloPacket {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.network_mask.octets());
        buf.put_u16(self.hello_interval);
        buf.put_u8(self.options);
        buf.put_u8(self.router_priority);
        buf.put_u32(self.router_dead_interval);
        buf.put_slice(&self.designated_router.octets());
        buf.put_slice(&self.backup_designated_router.octets());
        for n in &self.neighbors {
            buf.put_slice(&n.octets());
        }
    }

    fn decode(mut data: &[u8]) -> Result<Self, WireError> {
        let mut mask = [0u8; 4];
        data.read_exact(&mut mask)?;
        let hello_interval = data.read_u16::<NetworkEndian>()?;
        let options = data.read_u8()?;
        let router_priority = data.read_u8()?;
        let router_dead_interval = data.read_u32::<NetworkEndian>()?;
        let mut dr = [0u8; 4];
        data.read_exact(&mut dr)?;
        let mut bdr = [0u8; 4];
        data.read_exact(&mut bdr)?;
        let mut neighbors = Vec::new();
        while data.len() >= 4 {
            let mut n = [0u8; 4];
            data.read_exact(&mut n)?;
            neighbors.push(Ipv4Addr::from(n));
        }
        Ok(HelloPacket {
            network_mask: Ipv4Addr::from(mask),
            hello_interval,
            options,
            router_priority,
            router_dead_interval,
            designated_router: Ipv4Addr::from(dr),
            backup_designated_router: Ipv4Addr::from(bdr),
            neighbors,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbDescriptionPacket {
    pub mtu: u16,
    pub options: u8,
    /// I, M, MS bits packed as (init, more, master).
    pub init: bool,
    pub more: bool,
    pub master: bool,
    pub sequence: u32,
    pub lsa_headers: Vec<LsaHeader>,
}

impl DbDescriptionPacket {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.mtu);
        buf.put_u8(self.options);
        let mut flags = 0u8;
        if self.init {
            flags |= 0x4;
        }
        if self.more {
            flags |= 0x2;
        }
        if self.master {
            flags |= 0x1;
        }
        buf.put_u8(flags);
        buf.put_u32(self.sequence);
        for h in &self.lsa_headers {
            h.encode(buf);
        }
    }

    fn decode(mut data: &[u8]) -> Result<Self, WireError> {
        let mtu = data.read_u16::<NetworkEndian>()?;
        let options = data.read_u8()?;
        let flags = data.read_u8()?;
        let sequence = data.read_u32::<NetworkEndian>()?;
        let mut lsa_headers = Vec::new();
        while data.len() >= LSA_HEADER_LEN {
            let (head, rest) = data.split_at(LSA_HEADER_LEN);
            lsa_headers.push(LsaHeader::decode(head)?);
            data = rest;
        }
        Ok(DbDescriptionPacket {
            mtu,
            options,
            init: flags & 0x4 != 0,
            more: flags & 0x2 != 0,
            master: flags & 0x1 != 0,
            sequence,
            lsa_headers,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LsRequest {
    pub lsa_type: u32,
    pub link_state_id: Ipv4Addr,
    pub advertising_router: Ipv4Addr,
}

impl LsRequest {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.lsa_type);
        buf.put_slice(&self.link_state_id.octets());
        buf.put_slice(&self.advertising_router.octets());
    }

    fn decode(data: &mut &[u8]) -> Result<Self, WireError> {
        let lsa_type = data.read_u32::<NetworkEndian>()?;
        let mut lsid = [0u8; 4];
        data.read_exact(&mut lsid)?;
        let mut adv = [0u8; 4];
        data.read_exact(&mut adv)?;
        Ok(LsRequest { lsa_type, link_state_id: Ipv4Addr::from(lsid), advertising_router: Ipv4Addr::from(adv) })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OspfPacketBody {
    Hello(HelloPacket),
    DbDescription(DbDescriptionPacket),
    LsRequest(Vec<LsRequest>),
    LsUpdate(Vec<Lsa>),
    LsAck(Vec<LsaHeader>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OspfPacket {
    pub router_id: Ipv4Addr,
    pub area_id: Ipv4Addr,
    pub body: OspfPacketBody,
}

impl OspfPacket {
    fn packet_type(&self) -> u8 {
        match &self.body {
            OspfPacketBody::Hello(_) => PKT_HELLO,
            OspfPacketBody::DbDescription(_) => PKT_DB_DESCRIPTION,
            OspfPacketBody::LsRequest(_) => PKT_LS_REQUEST,
            OspfPacketBody::LsUpdate(_) => PKT_LS_UPDATE,
            OspfPacketBody::LsAck(_) => PKT_LS_ACK,
        }
    }

    /// Encode the full packet envelope + body, filling in the IP-style
    /// checksum with the 8-byte authentication region zeroed (spec §4.1).
    pub fn encode(&self) -> BytesMut {
        let mut body_buf = BytesMut::new();
        match &self.body {
            OspfPacketBody::Hello(h) => h.encode(&mut body_buf),
            OspfPacketBody::DbDescription(d) => d.encode(&mut body_buf),
            OspfPacketBody::LsRequest(reqs) => {
                for r in reqs {
                    r.encode(&mut body_buf);
                }
            }
            OspfPacketBody::LsUpdate(lsas) => {
                body_buf.put_u32(lsas.len() as u32);
                for lsa in lsas {
                    body_buf.put_slice(&lsa.encode());
                }
            }
            OspfPacketBody::LsAck(headers) => {
                for h in headers {
                    h.encode(&mut body_buf);
                }
            }
        }
        let length = (HEADER_LEN + body_buf.len()) as u16;
        let mut whole = BytesMut::with_capacity(length as usize);
        whole.put_u8(2); // version
        whole.put_u8(self.packet_type());
        whole.put_u16(length);
        whole.put_slice(&self.router_id.octets());
        whole.put_slice(&self.area_id.octets());
        whole.put_u16(0); // checksum placeholder
        whole.put_u16(0); // autype = 0 (null authentication)
        whole.put_u64(0); // authentication field, zeroed
        whole.put_slice(&body_buf);
        let checksum = ip_checksum(&whole);
        whole[12] = (checksum >> 8) as u8;
        whole[13] = (checksum & 0xFF) as u8;
        whole
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < HEADER_LEN {
            return Err(WireError::Incomplete);
        }
        if ip_checksum(data) != 0 {
            return Err(WireError::PacketChecksumInvalid);
        }
        let mut head = &data[..HEADER_LEN];
        let _version = head.read_u8()?;
        let packet_type = head.read_u8()?;
        let _length = head.read_u16::<NetworkEndian>()?;
        let mut rid = [0u8; 4];
        head.read_exact(&mut rid)?;
        let mut aid = [0u8; 4];
        head.read_exact(&mut aid)?;
        let body_data = &data[HEADER_LEN..];
        let body = match packet_type {
            PKT_HELLO => OspfPacketBody::Hello(HelloPacket::decode(body_data)?),
            PKT_DB_DESCRIPTION => OspfPacketBody::DbDescription(DbDescriptionPacket::decode(body_data)?),
            PKT_LS_REQUEST => {
                let mut reqs = Vec::new();
                let mut rest = body_data;
                while rest.len() >= 12 {
                    reqs.push(LsRequest::decode(&mut rest)?);
                }
                OspfPacketBody::LsRequest(reqs)
            }
            PKT_LS_UPDATE => {
                let mut rest = body_data;
                let count = rest.read_u32::<NetworkEndian>()? as usize;
                let mut lsas = Vec::with_capacity(count);
                for _ in 0..count {
                    if rest.len() < LSA_HEADER_LEN {
                        return Err(WireError::Incomplete);
                    }
                    let length = u16::from_be_bytes([rest[18], rest[19]]) as usize;
                    if rest.len() < length {
                        return Err(WireError::Incomplete);
                    }
                    let (lsa_bytes, remainder) = rest.split_at(length);
                    lsas.push(Lsa::decode(lsa_bytes)?);
                    rest = remainder;
                }
                OspfPacketBody::LsUpdate(lsas)
            }
            PKT_LS_ACK => {
                let mut headers = Vec::new();
                let mut rest = body_data;
                while rest.len() >= LSA_HEADER_LEN {
                    let (head, remainder) = rest.split_at(LSA_HEADER_LEN);
                    headers.push(LsaHeader::decode(head)?);
                    rest = remainder;
                }
                OspfPacketBody::LsAck(headers)
            }
            other => return Err(WireError::BadValue(format!("unknown OSPF packet type {}", other))),
        };
        Ok(OspfPacket { router_id: Ipv4Addr::from(rid), area_id: Ipv4Addr::from(aid), body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header(lsa_type: u8, seq: i32) -> LsaHeader {
        LsaHeader {
            age: 0,
            options: 0x02,
            lsa_type,
            link_state_id: Ipv4Addr::new(10, 0, 0, 1),
            advertising_router: Ipv4Addr::new(10, 0, 0, 1),
            sequence: seq,
            checksum: 0,
            length: 0,
        }
    }

    #[test]
    fn router_lsa_roundtrip_and_checksum() {
        let lsa = Lsa {
            header: sample_header(LSA_ROUTER, 0x8000_0001u32 as i32),
            body: LsaBody::Router {
                flags: 0,
                links: vec![RouterLink {
                    link_id: Ipv4Addr::new(10, 0, 0, 2),
                    link_data: Ipv4Addr::new(10, 0, 0, 1),
                    link_type: RouterLinkType::PointToPoint,
                    metric: 10,
                }],
            },
        };
        let encoded = lsa.encode();
        let decoded = Lsa::decode(&encoded).unwrap();
        assert_eq!(decoded, lsa);
    }

    #[test]
    fn bad_checksum_rejected() {
        let lsa = Lsa {
            header: sample_header(LSA_NETWORK, 1),
            body: LsaBody::Network { mask: Ipv4Addr::new(255, 255, 255, 0), attached_routers: vec![] },
        };
        let mut encoded = lsa.encode();
        encoded[19] ^= 0xFF;
        assert!(matches!(Lsa::decode(&encoded), Err(WireError::LsaChecksumInvalid)));
    }

    #[test]
    fn hello_packet_roundtrip() {
        let packet = OspfPacket {
            router_id: Ipv4Addr::new(10, 0, 0, 1),
            area_id: Ipv4Addr::new(0, 0, 0, 0),
            body: OspfPacketBody::Hello(HelloPacket {
                network_mask: Ipv4Addr::new(255, 255, 255, 252),
                hello_interval: 10,
                options: 0x02,
                router_priority: 1,
                router_dead_interval: 40,
                designated_router: Ipv4Addr::new(0, 0, 0, 0),
                backup_designated_router: Ipv4Addr::new(0, 0, 0, 0),
                neighbors: vec![Ipv4Addr::new(10, 0, 0, 2)],
            }),
        };
        let encoded = packet.encode();
        let decoded = OspfPacket::decode(&encoded).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn db_description_roundtrip() {
        let packet = OspfPacket {
            router_id: Ipv4Addr::new(10, 0, 0, 1),
            area_id: Ipv4Addr::new(0, 0, 0, 0),
            body: OspfPacketBody::DbDescription(DbDescriptionPacket {
                mtu: 1500,
                options: 0x02,
                init: true,
                more: true,
                master: true,
                sequence: 12345,
                lsa_headers: vec![sample_header(LSA_ROUTER, 1)],
            }),
        };
        let encoded = packet.encode();
        let decoded = OspfPacket::decode(&encoded).unwrap();
        assert_eq!(decoded, packet);
    }
}
