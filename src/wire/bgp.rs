//! BGP message framing (spec §4.1): the 19-byte header, OPEN capability
//! negotiation TLVs, UPDATE withdrawn/attribute/NLRI sections, NOTIFICATION,
//! KEEPALIVE and ROUTE-REFRESH bodies, and the `tokio_util` codec that frames
//! them off a byte stream.

use std::io::Read;
use std::net::Ipv4Addr;

use byteorder::{NetworkEndian, ReadBytesExt};
use bytes::{Buf, BufMut, BytesMut};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder, Framed};
use twoway::find_bytes;

use crate::error::WireError;
use crate::wire::bgp_attributes::{Afi, PathAttribute, Prefix, Safi};

pub const MARKER: [u8; 16] = [0xFF; 16];
pub const HEADER_LEN: usize = 19;
pub const MAX_MESSAGE_LEN: usize = 4096;

pub const MSG_OPEN: u8 = 1;
pub const MSG_UPDATE: u8 = 2;
pub const MSG_NOTIFICATION: u8 = 3;
pub const MSG_KEEPALIVE: u8 = 4;
pub const MSG_ROUTE_REFRESH: u8 = 5;

/// AS_TRANS: the placeholder 2-byte ASN used in OPEN when the real ASN needs
/// the four-octet-ASN capability to be represented (RFC 6793 §4).
pub const AS_TRANS: u16 = 23456;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    Multiprotocol { afi: Afi, safi: Safi },
    RouteRefresh,
    FourOctetAsn(u32),
    GracefulRestart { restart_time: u16, restarting: bool, per_afi: Vec<(Afi, Safi, bool)> },
    AddPath { afi: Afi, safi: Safi, send: bool, receive: bool },
    Unknown { code: u8, value: Vec<u8> },
}

impl Capability {
    fn code(&self) -> u8 {
        match self {
            Capability::Multiprotocol { .. } => 1,
            Capability::RouteRefresh => 2,
            Capability::GracefulRestart { .. } => 64,
            Capability::FourOctetAsn(_) => 65,
            Capability::AddPath { .. } => 69,
            Capability::Unknown { code, .. } => *code,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        let mut value = BytesMut::new();
        match self {
            Capability::Multiprotocol { afi, safi } => {
                value.put_u16(u16::from(*afi));
                value.put_u8(0);
                value.put_u8(u8::from(*safi));
            }
            Capability::RouteRefresh => {}
            Capability::FourOctetAsn(asn) => value.put_u32(*asn),
            Capability::GracefulRestart { restart_time, restarting, per_afi } => {
                let restart_bit: u16 = if *restarting { 0x8000 } else { 0 };
                value.put_u16(restart_bit | (restart_time & 0x0FFF));
                for (afi, safi, preserved) in per_afi {
                    value.put_u16(u16::from(*afi));
                    value.put_u8(u8::from(*safi));
                    value.put_u8(if *preserved { 0x80 } else { 0 });
                }
            }
            Capability::AddPath { afi, safi, send, receive } => {
                value.put_u16(u16::from(*afi));
                value.put_u8(u8::from(*safi));
                let mode = match (send, receive) {
                    (true, true) => 3,
                    (true, false) => 2,
                    (false, true) => 1,
                    (false, false) => 0,
                };
                value.put_u8(mode);
            }
            Capability::Unknown { value: v, .. } => value.put_slice(v),
        }
        buf.put_u8(self.code());
        buf.put_u8(value.len() as u8);
        buf.put_slice(&value);
    }

    fn decode(code: u8, mut value: &[u8]) -> Result<Self, WireError> {
        let cap = match code {
            1 => {
                let afi = Afi::from(value.read_u16::<NetworkEndian>()?);
                let _reserved = value.read_u8()?;
                let safi = Safi::from(value.read_u8()?);
                Capability::Multiprotocol { afi, safi }
            }
            2 => Capability::RouteRefresh,
            64 => {
                let word = value.read_u16::<NetworkEndian>()?;
                let restarting = word & 0x8000 != 0;
                let restart_time = word & 0x0FFF;
                let mut per_afi = Vec::new();
                while value.len() >= 4 {
                    let afi = Afi::from(value.read_u16::<NetworkEndian>()?);
                    let safi = Safi::from(value.read_u8()?);
                    let flags = value.read_u8()?;
                    per_afi.push((afi, safi, flags & 0x80 != 0));
                }
                Capability::GracefulRestart { restart_time, restarting, per_afi }
            }
            65 => Capability::FourOctetAsn(value.read_u32::<NetworkEndian>()?),
            69 => {
                let afi = Afi::from(value.read_u16::<NetworkEndian>()?);
                let safi = Safi::from(value.read_u8()?);
                let mode = value.read_u8()?;
                Capability::AddPath {
                    afi,
                    safi,
                    send: mode & 0x2 != 0,
                    receive: mode & 0x1 != 0,
                }
            }
            other => Capability::Unknown { code: other, value: value.to_vec() },
        };
        Ok(cap)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenMessage {
    pub version: u8,
    /// The 2-byte field as it appears on the wire (AS_TRANS when 4-byte ASN
    /// capability carries the real value).
    pub asn: u16,
    pub hold_time: u16,
    pub router_id: Ipv4Addr,
    pub capabilities: Vec<Capability>,
}

impl OpenMessage {
    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        buf.put_u16(self.asn);
        buf.put_u16(self.hold_time);
        buf.put_slice(&self.router_id.octets());
        let mut params = BytesMut::new();
        if !self.capabilities.is_empty() {
            let mut caps = BytesMut::new();
            for cap in &self.capabilities {
                cap.encode(&mut caps);
            }
            params.put_u8(2); // parameter type 2 = capability
            params.put_u8(caps.len() as u8);
            params.put_slice(&caps);
        }
        buf.put_u8(params.len() as u8);
        buf.put_slice(&params);
    }

    fn decode_body(mut data: &[u8]) -> Result<Self, WireError> {
        let version = data.read_u8()?;
        let asn = data.read_u16::<NetworkEndian>()?;
        let hold_time = data.read_u16::<NetworkEndian>()?;
        let mut router_id_bytes = [0u8; 4];
        data.read_exact(&mut router_id_bytes)?;
        let opt_params_len = data.read_u8()? as usize;
        if data.len() < opt_params_len {
            return Err(WireError::Incomplete);
        }
        let mut params = &data[..opt_params_len];
        let mut capabilities = Vec::new();
        while !params.is_empty() {
            let param_type = params.read_u8()?;
            let param_len = params.read_u8()? as usize;
            if params.len() < param_len {
                return Err(WireError::Incomplete);
            }
            let (mut body, rest) = params.split_at(param_len);
            params = rest;
            if param_type == 2 {
                while !body.is_empty() {
                    let code = body.read_u8()?;
                    let len = body.read_u8()? as usize;
                    if body.len() < len {
                        return Err(WireError::Incomplete);
                    }
                    let (value, rest) = body.split_at(len);
                    body = rest;
                    capabilities.push(Capability::decode(code, value)?);
                }
            }
        }
        Ok(OpenMessage {
            version,
            asn,
            hold_time,
            router_id: Ipv4Addr::from(router_id_bytes),
            capabilities,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateMessage {
    pub withdrawn: Vec<Prefix>,
    pub attributes: Vec<PathAttribute>,
    pub nlri: Vec<Prefix>,
}

impl UpdateMessage {
    /// The End-of-RIB marker for IPv4 unicast (spec §4.6): empty withdrawn,
    /// empty attributes, empty NLRI.
    pub fn end_of_rib() -> Self {
        UpdateMessage::default()
    }

    pub fn is_end_of_rib(&self) -> bool {
        self.end_of_rib_family().is_some()
    }

    /// If this UPDATE is an End-of-RIB marker, the `(afi, safi)` it names:
    /// `(Ipv4, Unicast)` for the plain-empty IPv4 form, or the attribute's
    /// own family for the `MP_UNREACH_NLRI` form (spec §4.6).
    pub fn end_of_rib_family(&self) -> Option<(Afi, Safi)> {
        if self.withdrawn.is_empty() && self.nlri.is_empty() && self.attributes.is_empty() {
            return Some((Afi::Ipv4, Safi::Unicast));
        }
        if self.withdrawn.is_empty() && self.nlri.is_empty() && self.attributes.len() == 1 {
            if let PathAttribute::MpUnreachNlri { afi, safi, ref withdrawn } = self.attributes[0] {
                if withdrawn.is_empty() {
                    return Some((afi, safi));
                }
            }
        }
        None
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        let mut withdrawn_buf = BytesMut::new();
        for p in &self.withdrawn {
            p.encode_nlri(&mut withdrawn_buf);
        }
        buf.put_u16(withdrawn_buf.len() as u16);
        buf.put_slice(&withdrawn_buf);

        let mut attr_buf = BytesMut::new();
        for a in &self.attributes {
            a.encode(&mut attr_buf);
        }
        buf.put_u16(attr_buf.len() as u16);
        buf.put_slice(&attr_buf);

        for p in &self.nlri {
            p.encode_nlri(buf);
        }
    }

    fn decode_body(mut data: &[u8]) -> Result<Self, WireError> {
        let withdrawn_len = data.read_u16::<NetworkEndian>()? as usize;
        if data.len() < withdrawn_len {
            return Err(WireError::Incomplete);
        }
        let (mut withdrawn_buf, rest) = data.split_at(withdrawn_len);
        data = rest;
        let mut withdrawn = Vec::new();
        while !withdrawn_buf.is_empty() {
            withdrawn.push(Prefix::decode_nlri(&mut withdrawn_buf, Afi::Ipv4)?);
        }

        let attr_len = data.read_u16::<NetworkEndian>()? as usize;
        if data.len() < attr_len {
            return Err(WireError::Incomplete);
        }
        let (mut attr_buf, rest) = data.split_at(attr_len);
        data = rest;
        let mut attributes = Vec::new();
        while !attr_buf.is_empty() {
            attributes.push(PathAttribute::decode(&mut attr_buf)?);
        }

        let mut nlri = Vec::new();
        while !data.is_empty() {
            nlri.push(Prefix::decode_nlri(&mut data, Afi::Ipv4)?);
        }
        Ok(UpdateMessage { withdrawn, attributes, nlri })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    pub error_code: u8,
    pub error_subcode: u8,
    pub data: Vec<u8>,
}

impl NotificationMessage {
    pub fn new(error_code: u8, error_subcode: u8) -> Self {
        NotificationMessage { error_code, error_subcode, data: Vec::new() }
    }

    /// Cease, administrative shutdown (RFC 4486), used by the agent on
    /// graceful shutdown of an Established session (spec §4.10).
    pub fn cease_administrative_shutdown() -> Self {
        NotificationMessage::new(6, 2)
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u8(self.error_code);
        buf.put_u8(self.error_subcode);
        buf.put_slice(&self.data);
    }

    fn decode_body(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < 2 {
            return Err(WireError::Incomplete);
        }
        Ok(NotificationMessage {
            error_code: data[0],
            error_subcode: data[1],
            data: data[2..].to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRefreshMessage {
    pub afi: Afi,
    pub safi: Safi,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BgpMessage {
    Open(OpenMessage),
    Update(UpdateMessage),
    Notification(NotificationMessage),
    Keepalive,
    RouteRefresh(RouteRefreshMessage),
}

impl BgpMessage {
    fn type_byte(&self) -> u8 {
        match self {
            BgpMessage::Open(_) => MSG_OPEN,
            BgpMessage::Update(_) => MSG_UPDATE,
            BgpMessage::Notification(_) => MSG_NOTIFICATION,
            BgpMessage::Keepalive => MSG_KEEPALIVE,
            BgpMessage::RouteRefresh(_) => MSG_ROUTE_REFRESH,
        }
    }

    pub fn encode(&self) -> Result<BytesMut, WireError> {
        let mut body = BytesMut::new();
        match self {
            BgpMessage::Open(open) => open.encode_body(&mut body),
            BgpMessage::Update(update) => update.encode_body(&mut body),
            BgpMessage::Notification(notif) => notif.encode_body(&mut body),
            BgpMessage::Keepalive => {}
            BgpMessage::RouteRefresh(rr) => {
                body.put_u16(u16::from(rr.afi));
                body.put_u8(0);
                body.put_u8(u8::from(rr.safi));
            }
        }
        let total_len = HEADER_LEN + body.len();
        if total_len > MAX_MESSAGE_LEN {
            return Err(WireError::BadLength { declared: total_len, min: HEADER_LEN, max: MAX_MESSAGE_LEN });
        }
        let mut out = BytesMut::with_capacity(total_len);
        out.put_slice(&MARKER);
        out.put_u16(total_len as u16);
        out.put_u8(self.type_byte());
        out.put_slice(&body);
        Ok(out)
    }

    pub fn decode(header: &[u8], body: &[u8]) -> Result<Self, WireError> {
        let msg_type = header[18];
        let msg = match msg_type {
            MSG_OPEN => BgpMessage::Open(OpenMessage::decode_body(body)?),
            MSG_UPDATE => BgpMessage::Update(UpdateMessage::decode_body(body)?),
            MSG_NOTIFICATION => BgpMessage::Notification(NotificationMessage::decode_body(body)?),
            MSG_KEEPALIVE => BgpMessage::Keepalive,
            MSG_ROUTE_REFRESH => {
                let mut data = body;
                let afi = Afi::from(data.read_u16::<NetworkEndian>()?);
                let _reserved = data.read_u8()?;
                let safi = Safi::from(data.read_u8()?);
                BgpMessage::RouteRefresh(RouteRefreshMessage { afi, safi })
            }
            other => return Err(WireError::BadValue(format!("unknown BGP message type {}", other))),
        };
        Ok(msg)
    }
}

pub type MessageProtocol = Framed<TcpStream, MessageCodec>;

/// Frames BGP messages off a byte stream by resyncing on the all-ones marker,
/// then reading the 2-byte length that follows it (spec §4.1).
#[derive(Debug, Default)]
pub struct MessageCodec;

impl MessageCodec {
    pub fn new() -> Self {
        MessageCodec
    }
}

impl Decoder for MessageCodec {
    type Item = BgpMessage;
    type Error = WireError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, WireError> {
        let start = match find_bytes(buf, &MARKER) {
            Some(start) => start,
            None => {
                // Keep only a marker-length tail in case it's split across reads.
                if buf.len() > MARKER.len() {
                    let drop_to = buf.len() - MARKER.len();
                    buf.advance(drop_to);
                }
                return Ok(None);
            }
        };
        if start > 0 {
            buf.advance(start);
        }
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let length = u16::from_be_bytes([buf[16], buf[17]]) as usize;
        if !(HEADER_LEN..=MAX_MESSAGE_LEN).contains(&length) {
            buf.advance(MARKER.len());
            return Err(WireError::BadLength { declared: length, min: HEADER_LEN, max: MAX_MESSAGE_LEN });
        }
        if buf.len() < length {
            return Ok(None);
        }
        let header = buf[..HEADER_LEN].to_vec();
        let body = buf[HEADER_LEN..length].to_vec();
        buf.advance(length);
        let message = BgpMessage::decode(&header, &body)?;
        Ok(Some(message))
    }
}

impl Encoder<BgpMessage> for MessageCodec {
    type Error = WireError;

    fn encode(&mut self, message: BgpMessage, buf: &mut BytesMut) -> Result<(), WireError> {
        let encoded = message.encode()?;
        buf.reserve(encoded.len());
        buf.put_slice(&encoded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::bgp_attributes::{AsPath, AsPathSegment, Origin};

    #[test]
    fn open_roundtrip_with_capabilities() {
        let open = OpenMessage {
            version: 4,
            asn: AS_TRANS,
            hold_time: 180,
            router_id: Ipv4Addr::new(192, 0, 2, 1),
            capabilities: vec![
                Capability::FourOctetAsn(65550),
                Capability::Multiprotocol { afi: Afi::Ipv6, safi: Safi::Unicast },
            ],
        };
        let msg = BgpMessage::Open(open.clone());
        let encoded = msg.encode().unwrap();
        let decoded = BgpMessage::decode(&encoded[..HEADER_LEN], &encoded[HEADER_LEN..]).unwrap();
        assert_eq!(decoded, BgpMessage::Open(open));
    }

    #[test]
    fn update_roundtrip() {
        let update = UpdateMessage {
            withdrawn: vec![],
            attributes: vec![
                PathAttribute::Origin(Origin::Igp),
                PathAttribute::AsPath(AsPath { segments: vec![AsPathSegment::Sequence(vec![65002])] }),
                PathAttribute::NextHop(Ipv4Addr::new(192, 0, 2, 2)),
            ],
            nlri: vec![Prefix::new("203.0.113.0".parse().unwrap(), 24)],
        };
        let msg = BgpMessage::Update(update.clone());
        let encoded = msg.encode().unwrap();
        let decoded = BgpMessage::decode(&encoded[..HEADER_LEN], &encoded[HEADER_LEN..]).unwrap();
        assert_eq!(decoded, BgpMessage::Update(update));
    }

    #[test]
    fn codec_frames_message_split_across_reads() {
        let mut codec = MessageCodec::new();
        let encoded = BgpMessage::Keepalive.encode().unwrap();
        let mut buf = BytesMut::new();
        buf.put_slice(&encoded[..10]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.put_slice(&encoded[10..]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, BgpMessage::Keepalive);
    }

    #[test]
    fn bad_length_rejected() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MARKER);
        buf.put_u16(10); // below HEADER_LEN
        buf.put_u8(MSG_KEEPALIVE);
        let mut codec = MessageCodec::new();
        assert!(matches!(codec.decode(&mut buf), Err(WireError::BadLength { .. })));
    }
}
