use std::fmt::{Debug, Display, Formatter};
use std::time::Duration;
use bytes::{Buf, BufMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The kind tag in the first byte of every packet.
#[derive(Copy, Clone, Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum PacketKind {
    NewSession = 0,
    Data = 1,
    EndSession = 2,
    SenderFull = 3,
}

/// The parameters a receiver requests from the sender. They are fixed once the first
///  `NewSession` request went out.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SessionParameters {
    pub bandwidth_mbps: u16,
    pub duration_secs: u16,
    pub payload_len: u16,
}

impl SessionParameters {
    /// type (u8) + duration (u16) + bandwidth (u16) + payload length (u16)
    pub const SERIALIZED_LEN: usize = size_of::<u8>() + 3 * size_of::<u16>();

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs.into())
    }

    /// Writes a complete `NewSession` packet, including the kind tag
    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(PacketKind::NewSession.into());
        buf.put_u16(self.duration_secs);
        buf.put_u16(self.bandwidth_mbps);
        buf.put_u16(self.payload_len);
    }
}

/// A decoded packet. `Data` carries only its length since the payload is opaque filler -
///  the length counts the whole datagram including the kind tag, which is what the sender's
///  payload length refers to.
#[derive(Clone, Eq, PartialEq)]
pub enum Packet {
    NewSession(SessionParameters),
    Data { len: usize },
    EndSession,
    SenderFull,
}

impl Debug for Packet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Packet::NewSession(p) => write!(f, "NEW_SESSION({}Mbit/s,{}s,{}b)", p.bandwidth_mbps, p.duration_secs, p.payload_len),
            Packet::Data { len } => write!(f, "DATA({})", len),
            Packet::EndSession => write!(f, "END_SESSION"),
            Packet::SenderFull => write!(f, "SENDER_FULL"),
        }
    }
}

impl Packet {
    pub const HEADER_LEN: usize = size_of::<u8>();

    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::NewSession(_) => PacketKind::NewSession,
            Packet::Data { .. } => PacketKind::Data,
            Packet::EndSession => PacketKind::EndSession,
            Packet::SenderFull => PacketKind::SenderFull,
        }
    }

    pub fn deser(datagram: &[u8]) -> Result<Packet, MalformedPacket> {
        let mut buf = datagram;
        let raw_kind = buf.try_get_u8()
            .map_err(|_| MalformedPacket::Truncated { kind: None, len: datagram.len() })?;
        let kind = PacketKind::try_from(raw_kind)
            .map_err(|_| MalformedPacket::UnknownKind(raw_kind))?;

        match kind {
            PacketKind::NewSession => {
                let truncated = |_| MalformedPacket::Truncated { kind: Some(kind), len: datagram.len() };
                let duration_secs = buf.try_get_u16().map_err(truncated)?;
                let bandwidth_mbps = buf.try_get_u16().map_err(truncated)?;
                let payload_len = buf.try_get_u16().map_err(truncated)?;
                Ok(Packet::NewSession(SessionParameters {
                    bandwidth_mbps,
                    duration_secs,
                    payload_len,
                }))
            }
            PacketKind::Data => Ok(Packet::Data { len: datagram.len() }),
            PacketKind::EndSession => Ok(Packet::EndSession),
            PacketKind::SenderFull => Ok(Packet::SenderFull),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MalformedPacket {
    /// The datagram ends before the header or the fixed part of the payload is complete
    Truncated { kind: Option<PacketKind>, len: usize },
    UnknownKind(u8),
}

impl Display for MalformedPacket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MalformedPacket::Truncated { kind: None, len } => write!(f, "truncated packet: {} bytes do not contain a header", len),
            MalformedPacket::Truncated { kind: Some(kind), len } => write!(f, "truncated {:?} packet: {} bytes", kind, len),
            MalformedPacket::UnknownKind(raw) => write!(f, "unknown packet kind {}", raw),
        }
    }
}

impl std::error::Error for MalformedPacket {}
