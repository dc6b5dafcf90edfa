//! HTTP/2 binary framing primitives
//!
//! Only what a server needs to converse: the 9-octet frame header, the
//! frame-type vocabulary, flag bits, and the payload shapes of SETTINGS,
//! WINDOW_UPDATE and GOAWAY. Multi-byte integers are big-endian on the
//! wire. [[RFC9113, Section 4](https://datatracker.ietf.org/doc/html/rfc9113#section-4)]

use crate::errors::Http2Error;
use byteorder::{BigEndian, ByteOrder};

pub(crate) const FRAME_HEADER_LEN: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameType {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    // Extension frames must be ignored, not rejected.
    Unknown(u8),
}

impl FrameType {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0x0 => Self::Data,
            0x1 => Self::Headers,
            0x2 => Self::Priority,
            0x3 => Self::RstStream,
            0x4 => Self::Settings,
            0x5 => Self::PushPromise,
            0x6 => Self::Ping,
            0x7 => Self::GoAway,
            0x8 => Self::WindowUpdate,
            0x9 => Self::Continuation,
            other => Self::Unknown(other),
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            Self::Data => 0x0,
            Self::Headers => 0x1,
            Self::Priority => 0x2,
            Self::RstStream => 0x3,
            Self::Settings => 0x4,
            Self::PushPromise => 0x5,
            Self::Ping => 0x6,
            Self::GoAway => 0x7,
            Self::WindowUpdate => 0x8,
            Self::Continuation => 0x9,
            Self::Unknown(other) => other,
        }
    }
}

// Flag bits. ACK shares a bit position with END_STREAM; which one applies
// depends on the frame type.
pub(crate) mod flags {
    pub(crate) const ACK: u8 = 0x1;
    pub(crate) const END_STREAM: u8 = 0x1;
    pub(crate) const END_HEADERS: u8 = 0x4;
    pub(crate) const PADDED: u8 = 0x8;
    pub(crate) const PRIORITY: u8 = 0x20;
}

// SETTINGS identifiers this server reads or advertises.
pub(crate) mod settings {
    pub(crate) const MAX_CONCURRENT_STREAMS: u16 = 0x3;
    pub(crate) const MAX_FRAME_SIZE: u16 = 0x5;
}

// GOAWAY / RST_STREAM error codes.
pub(crate) mod error_code {
    pub(crate) const NO_ERROR: u32 = 0x0;
    pub(crate) const PROTOCOL_ERROR: u32 = 0x1;
    pub(crate) const INTERNAL_ERROR: u32 = 0x2;
}

/// The 9-octet header that precedes every frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    pub(crate) length: usize,
    pub(crate) frame_type: FrameType,
    pub(crate) flags: u8,
    pub(crate) stream_id: u32,
}

impl FrameHeader {
    pub(crate) fn parse(buf: &[u8; FRAME_HEADER_LEN]) -> Self {
        Self {
            length: BigEndian::read_u24(&buf[..3]) as usize,
            frame_type: FrameType::from_u8(buf[3]),
            flags: buf[4],
            // The high bit of the stream id is reserved and ignored.
            stream_id: BigEndian::read_u32(&buf[5..9]) & 0x7fff_ffff,
        }
    }

    pub(crate) fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut out = [0u8; FRAME_HEADER_LEN];
        BigEndian::write_u24(&mut out[..3], self.length as u32);
        out[3] = self.frame_type.as_u8();
        out[4] = self.flags;
        BigEndian::write_u32(&mut out[5..9], self.stream_id);
        out
    }

    #[inline(always)]
    pub(crate) fn has(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// Header and payload as one wire-ready buffer.
pub(crate) fn encode_frame(
    frame_type: FrameType,
    flags: u8,
    stream_id: u32,
    payload: &[u8],
) -> Vec<u8> {
    let header = FrameHeader {
        length: payload.len(),
        frame_type,
        flags,
        stream_id,
    };
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
    out
}

pub(crate) fn encode_settings(pairs: &[(u16, u32)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pairs.len() * 6);
    for &(id, value) in pairs {
        let mut entry = [0u8; 6];
        BigEndian::write_u16(&mut entry[..2], id);
        BigEndian::write_u32(&mut entry[2..], value);
        out.extend_from_slice(&entry);
    }
    out
}

pub(crate) fn parse_settings(payload: &[u8]) -> Result<Vec<(u16, u32)>, Http2Error> {
    if payload.len() % 6 != 0 {
        return Err(Http2Error::Protocol("SETTINGS length not a multiple of 6"));
    }
    Ok(payload
        .chunks_exact(6)
        .map(|entry| {
            (
                BigEndian::read_u16(&entry[..2]),
                BigEndian::read_u32(&entry[2..]),
            )
        })
        .collect())
}

pub(crate) fn encode_goaway(last_stream_id: u32, code: u32) -> Vec<u8> {
    let mut payload = [0u8; 8];
    BigEndian::write_u32(&mut payload[..4], last_stream_id);
    BigEndian::write_u32(&mut payload[4..], code);
    encode_frame(FrameType::GoAway, 0, 0, &payload)
}
