//! # Wisp Packet Codec
//!
//! Defines the binary packet format exchanged with clients. Each packet is
//! carried as exactly one WebSocket binary message:
//!
//! ```text
//! +--------+---------------+------------------+
//! | type   | stream id     | payload          |
//! | 1 byte | 4 bytes (LE)  | remaining bytes  |
//! +--------+---------------+------------------+
//! ```
//!
//! Anything shorter than the 5-byte header is malformed. The shape of the
//! payload (CONNECT target, CONTINUE credit, CLOSE reason) belongs to the
//! individual packet types and is validated by the dispatcher, not here.

use bytes::Bytes;
use thiserror::Error;

/// Size of the fixed packet header: type byte plus stream id.
pub const HEADER_LEN: usize = 5;

/// Errors produced while decoding inbound packets. The dispatcher treats
/// every variant the same way: drop the frame and log at debug.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("packet too short: {0} bytes")]
    Truncated(usize),

    #[error("unknown packet type 0x{0:02x}")]
    UnknownType(u8),

    #[error("connect payload too short: {0} bytes")]
    ShortConnect(usize),

    #[error("unknown stream kind 0x{0:02x}")]
    UnknownKind(u8),

    #[error("hostname is not valid utf-8")]
    InvalidHostname,
}

// ─── Packet Types ───────────────────────────────────────────────

/// The four Wisp packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Client asks the server to open a new stream (0x01).
    Connect,
    /// Opaque stream bytes, flowing in either direction (0x02).
    Data,
    /// Server advertises buffer credit to the client (0x03).
    Continue,
    /// Either side tears a stream down, with a reason byte (0x04).
    Close,
}

impl PacketType {
    fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Connect),
            0x02 => Some(Self::Data),
            0x03 => Some(Self::Continue),
            0x04 => Some(Self::Close),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Connect => 0x01,
            Self::Data => 0x02,
            Self::Continue => 0x03,
            Self::Close => 0x04,
        }
    }
}

/// Reason byte carried in a CLOSE packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Clean shutdown, including upstream EOF (0x02).
    Normal,
    /// Upstream I/O failure after the stream was established (0x03).
    NetworkError,
    /// The peer sent something the protocol does not allow (0x41).
    Invalid,
    /// The target could not be resolved or reached (0x42).
    Unreachable,
    /// The upstream connect timed out (0x43).
    Timeout,
    /// The target actively refused the connection (0x44).
    Refused,
}

impl CloseReason {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Normal => 0x02,
            Self::NetworkError => 0x03,
            Self::Invalid => 0x41,
            Self::Unreachable => 0x42,
            Self::Timeout => 0x43,
            Self::Refused => 0x44,
        }
    }
}

/// Transport kind requested by a CONNECT packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Tcp,
    Udp,
}

impl StreamKind {
    fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Tcp),
            0x02 => Some(Self::Udp),
            _ => None,
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

// ─── Packet ─────────────────────────────────────────────────────

/// One decoded Wisp packet. The payload is a zero-copy view into the
/// WebSocket message it was decoded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub packet_type: PacketType,
    pub stream_id: u32,
    pub payload: Bytes,
}

impl Packet {
    /// A DATA packet carrying upstream bytes to the client.
    pub fn data(stream_id: u32, payload: Bytes) -> Self {
        Self {
            packet_type: PacketType::Data,
            stream_id,
            payload,
        }
    }

    /// A CONTINUE packet advertising `slots` buffer slots.
    pub fn credit(stream_id: u32, slots: u32) -> Self {
        Self {
            packet_type: PacketType::Continue,
            stream_id,
            payload: Bytes::copy_from_slice(&slots.to_le_bytes()),
        }
    }

    /// A CLOSE packet carrying the given reason byte.
    pub fn close(stream_id: u32, reason: CloseReason) -> Self {
        Self {
            packet_type: PacketType::Close,
            stream_id,
            payload: Bytes::copy_from_slice(&[reason.as_u8()]),
        }
    }

    /// Decodes one WebSocket binary message into a packet.
    pub fn decode(data: Bytes) -> Result<Self, FrameError> {
        if data.len() < HEADER_LEN {
            return Err(FrameError::Truncated(data.len()));
        }
        let packet_type = PacketType::from_u8(data[0]).ok_or(FrameError::UnknownType(data[0]))?;
        let stream_id = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
        Ok(Self {
            packet_type,
            stream_id,
            payload: data.slice(HEADER_LEN..),
        })
    }

    /// Encodes the packet into one WebSocket binary message.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.push(self.packet_type.as_u8());
        buf.extend_from_slice(&self.stream_id.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }
}

// ─── CONNECT Payload ────────────────────────────────────────────

/// Parsed payload of a CONNECT packet: stream kind, destination port
/// (LE), and the remaining bytes as a UTF-8 hostname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub kind: StreamKind,
    pub port: u16,
    pub host: String,
}

impl ConnectRequest {
    pub fn parse(payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() < 4 {
            return Err(FrameError::ShortConnect(payload.len()));
        }
        let kind = StreamKind::from_u8(payload[0]).ok_or(FrameError::UnknownKind(payload[0]))?;
        let port = u16::from_le_bytes([payload[1], payload[2]]);
        let host = std::str::from_utf8(&payload[3..])
            .map_err(|_| FrameError::InvalidHostname)?
            .to_string();
        Ok(Self { kind, port, host })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(packet_type: PacketType, stream_id: u32, payload: &[u8]) {
        let packet = Packet {
            packet_type,
            stream_id,
            payload: Bytes::copy_from_slice(payload),
        };
        let decoded = Packet::decode(packet.encode().into()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn encode_decode_roundtrip() {
        for packet_type in [
            PacketType::Connect,
            PacketType::Data,
            PacketType::Continue,
            PacketType::Close,
        ] {
            for stream_id in [0u32, 1, 0x1234_5678, u32::MAX] {
                roundtrip(packet_type, stream_id, b"");
                roundtrip(packet_type, stream_id, b"hello");
            }
        }
    }

    #[test]
    fn decode_rejects_short_input() {
        for len in 0..HEADER_LEN {
            let err = Packet::decode(Bytes::from(vec![0x02; len])).unwrap_err();
            assert_eq!(err, FrameError::Truncated(len));
        }
        // Exactly five bytes is a valid packet with an empty payload.
        let packet = Packet::decode(Bytes::from_static(&[0x02, 1, 0, 0, 0])).unwrap();
        assert_eq!(packet.packet_type, PacketType::Data);
        assert_eq!(packet.stream_id, 1);
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let err = Packet::decode(Bytes::from_static(&[0x09, 0, 0, 0, 0, 0xff])).unwrap_err();
        assert_eq!(err, FrameError::UnknownType(0x09));
    }

    #[test]
    fn stream_id_is_little_endian() {
        let packet = Packet::decode(Bytes::from_static(&[0x02, 0x01, 0x02, 0x03, 0x04])).unwrap();
        assert_eq!(packet.stream_id, 0x0403_0201);
        assert_eq!(packet.encode()[1..5], [0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn parse_tcp_connect() {
        // id=1, TCP, port 80, host "localhost"
        let raw = [
            0x01, 0x01, 0x00, 0x00, 0x00, 0x01, 0x50, 0x00, b'l', b'o', b'c', b'a', b'l', b'h',
            b'o', b's', b't',
        ];
        let packet = Packet::decode(Bytes::copy_from_slice(&raw)).unwrap();
        assert_eq!(packet.packet_type, PacketType::Connect);
        assert_eq!(packet.stream_id, 1);
        let request = ConnectRequest::parse(&packet.payload).unwrap();
        assert_eq!(request.kind, StreamKind::Tcp);
        assert_eq!(request.port, 80);
        assert_eq!(request.host, "localhost");
    }

    #[test]
    fn parse_udp_connect() {
        let request = ConnectRequest::parse(&[0x02, 0x35, 0x00, b'a']).unwrap();
        assert_eq!(request.kind, StreamKind::Udp);
        assert_eq!(request.port, 53);
        assert_eq!(request.host, "a");
    }

    #[test]
    fn parse_connect_rejects_bad_payloads() {
        assert_eq!(
            ConnectRequest::parse(&[0x01, 0x50, 0x00]).unwrap_err(),
            FrameError::ShortConnect(3)
        );
        assert_eq!(
            ConnectRequest::parse(&[0x03, 0x50, 0x00, b'a']).unwrap_err(),
            FrameError::UnknownKind(0x03)
        );
        assert_eq!(
            ConnectRequest::parse(&[0x01, 0x50, 0x00, 0xff, 0xfe]).unwrap_err(),
            FrameError::InvalidHostname
        );
    }

    #[test]
    fn credit_packet_wire_format() {
        // CONTINUE for stream 1 advertising 32 slots.
        let bytes = Packet::credit(1, 32).encode();
        assert_eq!(bytes, [0x03, 0x01, 0x00, 0x00, 0x00, 0x20, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn close_packet_wire_format() {
        let bytes = Packet::close(1, CloseReason::Refused).encode();
        assert_eq!(bytes, [0x04, 0x01, 0x00, 0x00, 0x00, 0x44]);
    }
}
