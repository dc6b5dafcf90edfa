//! Server configuration limits and timeouts
//!
//! Defaults are intentionally conservative: every read and write on a
//! connection is bounded, request heads and bodies have size caps, and
//! keep-alive connections expire. Override individual fields with struct
//! update syntax:
//!
//! ```no_run
//! use janus_web::limits::ConnLimits;
//! use std::time::Duration;
//!
//! let limits = ConnLimits {
//!     socket_read_timeout: Duration::from_secs(5),
//!     max_requests_per_connection: 10_000,
//!     ..ConnLimits::default()
//! };
//! ```

use std::time::Duration;

/// Server-level concurrency and shutdown behavior.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Maximum number of concurrently served connections (default: `100`).
    ///
    /// Admission is a semaphore: when all permits are taken, freshly
    /// accepted sockets are closed immediately. No response is written to
    /// them - their protocol has not been sniffed yet, so no framing is
    /// known to carry one.
    pub max_connections: usize,

    /// How long graceful shutdown waits for in-flight connections
    /// (default: `10s`).
    ///
    /// After the shutdown signal the listener stops accepting; connection
    /// tasks still running when this grace period expires are aborted.
    pub shutdown_grace: Duration,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 100,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Per-connection socket and parsing limits, shared by both protocols.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Timeout for any single socket read (default: `10s`).
    ///
    /// Covers protocol sniffing, HTTP/1 request reads between keep-alive
    /// cycles, and HTTP/2 frame reads. An idle connection dies here.
    pub socket_read_timeout: Duration,

    /// Timeout for any single socket write (default: `10s`).
    pub socket_write_timeout: Duration,

    /// Total lifetime of one keep-alive connection (default: `10min`).
    ///
    /// Checked between HTTP/1 request/response cycles. HTTP/2 connections
    /// are not lifetime-bounded; they end when the peer goes away or
    /// errors.
    pub connection_lifetime: Duration,

    /// Requests served on one HTTP/1 connection before it is closed
    /// (default: `1000`).
    pub max_requests_per_connection: usize,

    /// Request line + headers size cap in bytes (default: `16 KiB`).
    pub max_head_size: usize,

    /// Header count cap per request (default: `64`).
    pub max_headers: usize,

    /// Body size cap in bytes, both protocols (default: `64 KiB`).
    pub max_body_size: usize,
}

impl Default for ConnLimits {
    fn default() -> Self {
        Self {
            socket_read_timeout: Duration::from_secs(10),
            socket_write_timeout: Duration::from_secs(10),
            connection_lifetime: Duration::from_secs(600),
            max_requests_per_connection: 1000,
            max_head_size: 16 * 1024,
            max_headers: 64,
            max_body_size: 64 * 1024,
        }
    }
}

/// HTTP/2 framing limits.
#[derive(Debug, Clone)]
pub struct H2Limits {
    /// Largest frame payload accepted, in bytes (default: `16384`).
    ///
    /// Advertised to the peer as `SETTINGS_MAX_FRAME_SIZE`; 16384 is the
    /// protocol minimum, so the default never has to be negotiated up.
    pub max_frame_size: usize,

    /// Cap on one stream's accumulated header block across HEADERS and
    /// CONTINUATION frames, in bytes (default: `16 KiB`).
    pub max_header_block_size: usize,

    /// Concurrent streams accepted per connection (default: `32`).
    ///
    /// Advertised as `SETTINGS_MAX_CONCURRENT_STREAMS`; exceeding it is a
    /// connection error.
    pub max_streams: usize,

    /// Capacity of the completed-stream channel between the frame-reader
    /// task and the stream-consumer task (default: `32`).
    ///
    /// When the consumer falls behind, the reader blocks here instead of
    /// buffering unboundedly.
    pub stream_channel_capacity: usize,
}

impl Default for H2Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16_384,
            max_header_block_size: 16 * 1024,
            max_streams: 32,
            stream_channel_capacity: 32,
        }
    }
}

// Bundle threaded from the builder down to each connection task.
#[derive(Debug, Clone, Default)]
pub(crate) struct AllLimits {
    pub(crate) server: ServerLimits,
    pub(crate) conn: ConnLimits,
    pub(crate) h2: H2Limits,
}
