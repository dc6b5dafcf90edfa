//! Per-connection orchestration
//!
//! One invocation per accepted socket: sniff the protocol, hand the
//! connection to the matching handler bound to the dispatcher, and close
//! the write side on every exit path. Failures stop at this boundary -
//! a connection can die loudly here without the accept loop noticing.

use crate::{
    errors::{ConnectionError, Http2Error, SniffError},
    h2::connection::Http2Connection,
    h2::frame::{encode_goaway, error_code},
    http::types::Protocol,
    limits::AllLimits,
    server::{dispatch::Dispatcher, h1::Http1Connection, sniff::sniff},
};
use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

pub(crate) async fn handle_connection<S>(stream: S, dispatcher: &Dispatcher, limits: &AllLimits)
where
    S: AsyncRead + AsyncWrite,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    match drive(&mut reader, &mut writer, dispatcher, limits).await {
        Ok(()) => trace!("connection finished"),
        Err(ConnectionError::Sniff(SniffError::UnknownProtocol)) => {
            // No valid framing exists to carry a response; just close.
            debug!("client spoke neither HTTP/1 nor HTTP/2, closing without a response");
        }
        Err(ConnectionError::Http2(err)) => {
            debug!(error = %err, "HTTP/2 connection failed");
            // Framing is known here, so announce the teardown. Best effort.
            let code = match err {
                Http2Error::Io(_) | Http2Error::TimedOut | Http2Error::ConsumerGone => {
                    error_code::INTERNAL_ERROR
                }
                _ => error_code::PROTOCOL_ERROR,
            };
            let _ = writer.write_all(&encode_goaway(0, code)).await;
        }
        Err(err) => debug!(error = %err, "connection failed"),
    }

    // Cleanup runs on every exit path. A peer that already reset or closed
    // is expected; anything else is logged and swallowed so one bad
    // connection can never take the listener down.
    if let Err(e) = writer.shutdown().await {
        match e.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::NotConnected => {
                debug!(error = %e, "peer already closed the connection")
            }
            _ => warn!(error = %e, "error closing connection"),
        }
    }
}

async fn drive<R, W>(
    reader: &mut R,
    writer: &mut W,
    dispatcher: &Dispatcher,
    limits: &AllLimits,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (protocol, carry_over) = sniff(reader, &limits.conn).await?;
    trace!(?protocol, carry_over = carry_over.len(), "classified");

    match protocol {
        Protocol::Http1 => {
            Http1Connection::new(reader, writer, carry_over, &limits.conn)
                .serve(dispatcher)
                .await?;
        }
        Protocol::Http2 => {
            Http2Connection::handshake(
                reader,
                writer,
                carry_over,
                dispatcher,
                &limits.conn,
                &limits.h2,
            )
            .await?
            .run()
            .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod mux_self {
    use super::*;
    use crate::{
        h2::frame::{encode_frame, flags, FrameHeader, FrameType, FRAME_HEADER_LEN},
        http::{response::HttpResponse, types::StatusCode},
        router::table::{handler, Router},
        server::sniff::H2_PREFACE,
    };
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn test_dispatcher() -> Dispatcher {
        let mut router = Router::new();
        router
            .get(
                "/200",
                handler(|_req, mut resp: HttpResponse| async move {
                    resp.status(StatusCode::Ok).body("2");
                    resp
                }),
            )
            .unwrap();
        Dispatcher::new(router.into_table())
    }

    fn spawn_mux() -> (DuplexStream, tokio::task::JoinHandle<()>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(async move {
            let dispatcher = test_dispatcher();
            let limits = AllLimits::default();
            handle_connection(server, &dispatcher, &limits).await;
        });
        (client, task)
    }

    #[tokio::test]
    async fn unknown_protocol_writes_zero_bytes() {
        let (mut client, task) = spawn_mux();
        client.write_all(b"\x16\x03\x01 tls-ish garbage\n").await.unwrap();
        client.shutdown().await.unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty(), "got unexpected bytes: {received:?}");
        task.await.unwrap();
    }

    #[tokio::test]
    async fn routes_http1_connections() {
        let (mut client, task) = spawn_mux();
        client
            .write_all(b"GET /200 HTTP/1.1\r\nconnection: close\r\n\r\n")
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        let text = String::from_utf8(received).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "{text}");
        assert!(text.ends_with("2"), "{text}");
        task.await.unwrap();
    }

    #[tokio::test]
    async fn routes_http2_connections() {
        // Preface, SETTINGS and the request all land in one write; the
        // sniffer's carry-over must reach the frame reader intact.
        let (mut client, task) = spawn_mux();

        let mut wire = H2_PREFACE.to_vec();
        wire.extend_from_slice(&encode_frame(FrameType::Settings, 0, 0, &[]));
        let mut enc = loona_hpack::Encoder::new();
        let mut block = Vec::new();
        enc.encode_into(
            [(b":method" as &[u8], b"GET" as &[u8]), (b":path", b"/200")],
            &mut block,
        )
        .unwrap();
        wire.extend_from_slice(&encode_frame(
            FrameType::Headers,
            flags::END_HEADERS | flags::END_STREAM,
            1,
            &block,
        ));
        client.write_all(&wire).await.unwrap();
        client.shutdown().await.unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();

        // Walk the frames the server sent and find the response DATA.
        let mut body = None;
        let mut rest = received.as_slice();
        while rest.len() >= FRAME_HEADER_LEN {
            let mut raw = [0u8; FRAME_HEADER_LEN];
            raw.copy_from_slice(&rest[..FRAME_HEADER_LEN]);
            let header = FrameHeader::parse(&raw);
            let payload = &rest[FRAME_HEADER_LEN..FRAME_HEADER_LEN + header.length];
            if header.frame_type == FrameType::Data && header.stream_id == 1 {
                body = Some(payload.to_vec());
            }
            rest = &rest[FRAME_HEADER_LEN + header.length..];
        }
        assert_eq!(body.as_deref(), Some(b"2" as &[u8]));
        task.await.unwrap();
    }
}
