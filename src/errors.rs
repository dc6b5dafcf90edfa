//! Error taxonomy
//!
//! Registration-time errors ([`PathError`]) surface to the caller and are
//! fatal to startup. Everything else is per-connection: contained inside
//! that connection's task, logged, and never allowed to reach the accept
//! loop or another connection.

use crate::http::types::StatusCode;
use std::io;

/// Route path rejected during registration or lookup.
///
/// Raised before the server starts serving; a request-time lookup that
/// trips this is answered as not-found by the dispatcher instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("empty route path")]
    Empty,

    #[error("route path must begin with `/`")]
    NoLeadingSlash,

    /// Paths may not contain `;`, `,` or `.` anywhere - including dots
    /// inside a segment, so `/file.txt` is rejected as a route.
    #[error("route path contains forbidden character `{0}`")]
    Forbidden(char),
}

/// Protocol detection failure on a fresh connection.
#[derive(Debug, thiserror::Error)]
pub enum SniffError {
    /// The initial bytes match neither the HTTP/2 connection preface nor a
    /// plausible HTTP/1 request line. The connection is closed with zero
    /// response bytes written: no valid framing exists to carry one.
    #[error("initial bytes match neither the HTTP/2 preface nor an HTTP/1 request line")]
    UnknownProtocol,

    #[error("timed out waiting for initial bytes")]
    TimedOut,

    #[error("i/o error during protocol detection: {0}")]
    Io(#[from] io::Error),
}

/// Per-connection HTTP/1 failure.
#[derive(Debug, thiserror::Error)]
pub enum Http1Error {
    #[error("malformed request line")]
    BadRequestLine,

    #[error("unsupported HTTP version")]
    UnsupportedVersion,

    #[error("malformed header line")]
    BadHeader,

    #[error("too many headers")]
    TooManyHeaders,

    #[error("request head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },

    #[error("invalid content-length header")]
    InvalidContentLength,

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("request is not valid UTF-8")]
    NotUtf8,

    #[error("socket timed out")]
    TimedOut,

    #[error("peer closed the connection mid-request")]
    UnexpectedEof,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl Http1Error {
    // Status to report to the peer before closing, when the framing is
    // still intact enough to carry one. I/O-level failures get nothing.
    pub(crate) fn status(&self) -> Option<StatusCode> {
        match self {
            Self::BadRequestLine | Self::BadHeader | Self::InvalidContentLength | Self::NotUtf8 => {
                Some(StatusCode::BadRequest)
            }
            Self::UnsupportedVersion => Some(StatusCode::HttpVersionNotSupported),
            Self::TooManyHeaders | Self::HeadTooLarge { .. } => {
                Some(StatusCode::RequestHeaderFieldsTooLarge)
            }
            Self::BodyTooLarge { .. } => Some(StatusCode::PayloadTooLarge),
            Self::TimedOut => Some(StatusCode::RequestTimeout),
            Self::UnexpectedEof | Self::Io(_) => None,
        }
    }
}

/// Per-connection HTTP/2 failure. Fatal to the connection - both sibling
/// tasks wind down - but never to the listener.
#[derive(Debug, thiserror::Error)]
pub enum Http2Error {
    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("header block exceeds {limit} bytes")]
    HeaderBlockTooLarge { limit: usize },

    #[error("hpack decoding failed: {0}")]
    Hpack(#[from] loona_hpack::decoder::DecoderError),

    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    #[error("stream {0} is missing a required pseudo-header")]
    MissingPseudoHeader(u32),

    #[error("peer opened more than {limit} concurrent streams")]
    StreamsExceeded { limit: usize },

    #[error("stream body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("stream consumer is gone")]
    ConsumerGone,

    #[error("socket timed out")]
    TimedOut,

    #[error("peer closed the connection mid-frame")]
    UnexpectedEof,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

// One connection's failure, whichever phase it came from. The multiplexer
// logs these and closes; they never propagate to the accept loop.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ConnectionError {
    #[error(transparent)]
    Sniff(#[from] SniffError),

    #[error(transparent)]
    Http1(#[from] Http1Error),

    #[error(transparent)]
    Http2(#[from] Http2Error),
}
