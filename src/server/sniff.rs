//! Protocol detection on a fresh connection
//!
//! Classification necessarily consumes bytes from a stream that cannot be
//! rewound, so the sniffer returns whatever it read beyond the decision
//! point; the chosen protocol handler is seeded with that carry-over.

use crate::{errors::SniffError, http::types::Protocol, limits::ConnLimits};
use memchr::memchr;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

/// The fixed client connection preface that begins every HTTP/2 connection.
/// [[RFC9113, Section 3.4](https://datatracker.ietf.org/doc/html/rfc9113#section-3.4)]
pub(crate) const H2_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Reads the first bytes of `reader` and classifies the connection.
///
/// Returns the protocol tag and the consumed bytes the protocol handler
/// still needs: for HTTP/1 the full read-ahead including the request line,
/// for HTTP/2 whatever arrived after the preface. Fails with
/// [`SniffError::UnknownProtocol`] when the bytes match neither - including
/// a peer that hangs up before sending a full decision's worth.
pub(crate) async fn sniff<R>(
    reader: &mut R,
    limits: &ConnLimits,
) -> Result<(Protocol, Vec<u8>), SniffError>
where
    R: AsyncRead + Unpin,
{
    let mut buf: Vec<u8> = Vec::with_capacity(H2_PREFACE.len());

    loop {
        if let Some(verdict) = classify(&buf, limits.max_head_size)? {
            return Ok(verdict);
        }

        let n = timeout(limits.socket_read_timeout, reader.read_buf(&mut buf))
            .await
            .map_err(|_| SniffError::TimedOut)??;
        if n == 0 {
            return Err(SniffError::UnknownProtocol);
        }
    }
}

// One classification attempt over the bytes read so far. `Ok(None)` means
// undecidable yet - read more.
fn classify(buf: &[u8], max_line: usize) -> Result<Option<(Protocol, Vec<u8>)>, SniffError> {
    if buf.len() >= H2_PREFACE.len() && buf.starts_with(H2_PREFACE) {
        return Ok(Some((Protocol::Http2, buf[H2_PREFACE.len()..].to_vec())));
    }
    if H2_PREFACE.starts_with(buf) {
        // Proper prefix of the preface, covers the empty buffer.
        return Ok(None);
    }

    match memchr(b'\n', buf) {
        Some(i) => {
            let line = &buf[..i];
            match line.strip_suffix(b"\r") {
                Some(line) if is_plausible_request_line(line) => {
                    Ok(Some((Protocol::Http1, buf.to_vec())))
                }
                _ => Err(SniffError::UnknownProtocol),
            }
        }
        None if buf.len() > max_line => Err(SniffError::UnknownProtocol),
        None => Ok(None),
    }
}

// `METHOD SP TARGET SP HTTP/1.x` - three non-empty space-separated parts
// whose last is an HTTP/1 version token. Anything else is not worth
// handing to the HTTP/1 parser.
fn is_plausible_request_line(line: &[u8]) -> bool {
    let mut parts = line.split(|&b| b == b' ');
    let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v), None) => (m, t, v),
        _ => return false,
    };
    !method.is_empty() && !target.is_empty() && version.starts_with(b"HTTP/1.")
}

#[cfg(test)]
mod sniff_self {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn limits() -> ConnLimits {
        ConnLimits {
            socket_read_timeout: Duration::from_millis(200),
            ..ConnLimits::default()
        }
    }

    #[tokio::test]
    async fn recognizes_http2_preface() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(H2_PREFACE).await.unwrap();
        client.write_all(b"extra-frame-bytes").await.unwrap();
        drop(client);

        let (protocol, leftover) = sniff(&mut server, &limits()).await.unwrap();
        assert_eq!(protocol, Protocol::Http2);
        assert_eq!(leftover, b"extra-frame-bytes");
    }

    #[tokio::test]
    async fn recognizes_fragmented_preface() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let task = tokio::spawn(async move {
            for chunk in H2_PREFACE.chunks(5) {
                client.write_all(chunk).await.unwrap();
            }
            client
        });

        let (protocol, leftover) = sniff(&mut server, &limits()).await.unwrap();
        assert_eq!(protocol, Protocol::Http2);
        assert!(leftover.is_empty());
        task.await.unwrap();
    }

    #[tokio::test]
    async fn recognizes_http1_request_line() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let request = b"GET /200 HTTP/1.1\r\nhost: localhost\r\n\r\n";
        client.write_all(request).await.unwrap();
        drop(client);

        let (protocol, leftover) = sniff(&mut server, &limits()).await.unwrap();
        assert_eq!(protocol, Protocol::Http1);
        // The carry-over is everything consumed, headers included.
        assert_eq!(leftover, request);
    }

    #[tokio::test]
    async fn rejects_garbage() {
        #[rustfmt::skip]
        let cases: [&[u8]; 4] = [
            b"HELLO WORLD\r\n",
            b"GET /\r\n",                     // no version token
            b"PRI * HTTP/2.0\r\nnot-a-preface",
            b"\x16\x03\x01\x02\x00\n",        // TLS client hello-ish
        ];

        for bytes in cases {
            let (mut client, mut server) = tokio::io::duplex(1024);
            client.write_all(bytes).await.unwrap();
            drop(client);

            let err = sniff(&mut server, &limits()).await.unwrap_err();
            assert!(
                matches!(err, SniffError::UnknownProtocol),
                "bytes {bytes:?} gave {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn eof_before_decision_is_unknown() {
        let (client, mut server) = tokio::io::duplex(1024);
        drop(client);
        let err = sniff(&mut server, &limits()).await.unwrap_err();
        assert!(matches!(err, SniffError::UnknownProtocol));
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let (_client, mut server) = tokio::io::duplex(1024);
        let err = sniff(&mut server, &limits()).await.unwrap_err();
        assert!(matches!(err, SniffError::TimedOut));
    }
}
