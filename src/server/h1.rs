//! HTTP/1 connection handling
//!
//! One instance per connection, seeded with the bytes the sniffer consumed.
//! Cycles are strictly sequential: response N is fully written before
//! request N+1 is read off the socket; pipelined bytes wait in the buffer.
//!
//! The parser is strict where the protocol allows it: exactly-`CRLF` line
//! endings, `Content-Length`-delimited bodies only (no chunked requests),
//! UTF-8 request heads.

use crate::{
    errors::Http1Error,
    http::{
        request::{split_target, HttpRequest},
        response::HttpResponse,
        types::{StatusCode, Version},
    },
    limits::ConnLimits,
    server::dispatch::Dispatcher,
};
use memchr::memmem;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, trace};

pub(crate) struct Http1Connection<'a, R, W> {
    reader: &'a mut R,
    writer: &'a mut W,
    buf: Vec<u8>,
    created: Instant,
    request_count: usize,
    limits: &'a ConnLimits,
}

enum Cycle {
    Continue,
    Close,
}

impl<'a, R, W> Http1Connection<'a, R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub(crate) fn new(
        reader: &'a mut R,
        writer: &'a mut W,
        carry_over: Vec<u8>,
        limits: &'a ConnLimits,
    ) -> Self {
        Self {
            reader,
            writer,
            buf: carry_over,
            created: Instant::now(),
            request_count: 0,
            limits,
        }
    }

    /// Drives request/response cycles until the peer goes away, asks to
    /// close, a per-connection limit trips, or the request is malformed.
    /// Malformed requests get a best-effort error response before the
    /// error is returned to the multiplexer.
    pub(crate) async fn serve(mut self, dispatcher: &Dispatcher) -> Result<(), Http1Error> {
        loop {
            match self.run_cycle(dispatcher).await {
                Ok(Cycle::Continue) => {}
                Ok(Cycle::Close) => return Ok(()),
                Err(err) => {
                    if let Some(status) = err.status() {
                        debug!(error = %err, "malformed HTTP/1 request");
                        let _ = self.write_error(status).await;
                    }
                    return Err(err);
                }
            }
        }
    }

    async fn run_cycle(&mut self, dispatcher: &Dispatcher) -> Result<Cycle, Http1Error> {
        if self.is_expired() {
            return Ok(Cycle::Close);
        }

        // Accumulate the head. The buffer may already hold it, either from
        // the sniffer's carry-over or from a pipelining client.
        let head_end = loop {
            if let Some(i) = memmem::find(&self.buf, b"\r\n\r\n") {
                break i;
            }
            if self.buf.len() > self.limits.max_head_size {
                return Err(Http1Error::HeadTooLarge {
                    limit: self.limits.max_head_size,
                });
            }
            if self.fill().await? == 0 {
                return if self.buf.is_empty() {
                    // Clean close between requests.
                    Ok(Cycle::Close)
                } else {
                    Err(Http1Error::UnexpectedEof)
                };
            }
        };

        let head = parse_head(&self.buf[..head_end], self.limits)?;

        // Body: everything past the blank line, Content-Length bytes.
        self.buf.drain(..head_end + 4);
        while self.buf.len() < head.content_length {
            if self.fill().await? == 0 {
                return Err(Http1Error::UnexpectedEof);
            }
        }
        let body: Vec<u8> = self.buf.drain(..head.content_length).collect();

        let head_only = head.method == "HEAD";
        let (path, query) = split_target(&head.target);
        trace!(method = %head.method, %path, "request assembled");

        let request = HttpRequest::new(head.method, path, query, head.headers, body);
        let response = dispatcher.dispatch(request, HttpResponse::new()).await;

        self.request_count += 1;
        let keep_alive = head.keep_alive && !self.is_expired();

        let bytes = response.to_h1_bytes(head.version, keep_alive, head_only);
        self.write_all(&bytes).await?;

        Ok(if keep_alive { Cycle::Continue } else { Cycle::Close })
    }

    #[inline]
    fn is_expired(&self) -> bool {
        self.request_count >= self.limits.max_requests_per_connection
            || self.created.elapsed() > self.limits.connection_lifetime
    }

    async fn fill(&mut self) -> Result<usize, Http1Error> {
        let n = timeout(self.limits.socket_read_timeout, self.reader.read_buf(&mut self.buf))
            .await
            .map_err(|_| Http1Error::TimedOut)??;
        Ok(n)
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), Http1Error> {
        timeout(self.limits.socket_write_timeout, self.writer.write_all(bytes))
            .await
            .map_err(|_| Http1Error::TimedOut)??;
        Ok(())
    }

    async fn write_error(&mut self, status: StatusCode) -> Result<(), Http1Error> {
        let mut response = HttpResponse::new();
        response.status(status);
        let bytes = response.to_h1_bytes(Version::Http11, false, false);
        self.write_all(&bytes).await
    }
}

#[derive(Debug)]
struct ParsedHead {
    method: String,
    target: String,
    version: Version,
    keep_alive: bool,
    headers: Vec<(String, String)>,
    content_length: usize,
}

// Parses request line + header block (everything before the blank line).
fn parse_head(head: &[u8], limits: &ConnLimits) -> Result<ParsedHead, Http1Error> {
    let head = simdutf8::basic::from_utf8(head).map_err(|_| Http1Error::NotUtf8)?;

    let mut lines = head.split("\r\n");
    let request_line = lines.next().ok_or(Http1Error::BadRequestLine)?;

    let mut parts = request_line.split(' ');
    let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v), None) if !m.is_empty() && !t.is_empty() => (m, t, v),
        _ => return Err(Http1Error::BadRequestLine),
    };
    if !target.starts_with('/') {
        return Err(Http1Error::BadRequestLine);
    }
    let (version, mut keep_alive) = match Version::from_bytes(version.as_bytes()) {
        Some(v) => v,
        None if version.starts_with("HTTP/") => return Err(Http1Error::UnsupportedVersion),
        None => return Err(Http1Error::BadRequestLine),
    };

    let mut headers = Vec::new();
    let mut content_length = 0usize;
    for line in lines {
        if headers.len() >= limits.max_headers {
            return Err(Http1Error::TooManyHeaders);
        }
        let (name, value) = line.split_once(':').ok_or(Http1Error::BadHeader)?;
        if name.is_empty() || name.contains(' ') {
            return Err(Http1Error::BadHeader);
        }
        let value = value.trim();

        if name.eq_ignore_ascii_case("content-length") {
            content_length = value
                .parse()
                .map_err(|_| Http1Error::InvalidContentLength)?;
            if content_length > limits.max_body_size {
                return Err(Http1Error::BodyTooLarge {
                    limit: limits.max_body_size,
                });
            }
        } else if name.eq_ignore_ascii_case("connection") {
            if value.eq_ignore_ascii_case("close") {
                keep_alive = false;
            } else if value.eq_ignore_ascii_case("keep-alive") {
                keep_alive = true;
            }
        }
        headers.push((name.to_owned(), value.to_owned()));
    }

    Ok(ParsedHead {
        method: method.to_owned(),
        target: target.to_owned(),
        version,
        keep_alive,
        headers,
        content_length,
    })
}

#[cfg(test)]
mod h1_self {
    use super::*;
    use crate::router::table::{handler, Router};
    use pretty_assertions::assert_eq;
    use tokio::io::AsyncWriteExt;

    fn limits() -> ConnLimits {
        ConnLimits::default()
    }

    fn parse(head: &str) -> Result<ParsedHead, Http1Error> {
        parse_head(head.as_bytes(), &limits())
    }

    #[test]
    fn parse_request_line() {
        let head = parse("GET /200 HTTP/1.1\r\nhost: localhost").unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.target, "/200");
        assert_eq!(head.version, Version::Http11);
        assert!(head.keep_alive);
        assert_eq!(head.headers, vec![("host".to_owned(), "localhost".to_owned())]);
    }

    #[test]
    fn parse_rejects_malformed_lines() {
        #[rustfmt::skip]
        let cases = [
            ("GET /200",                     Http1Error::BadRequestLine),
            ("GET  /200 HTTP/1.1",           Http1Error::BadRequestLine),
            ("GET /200 HTTP/1.1 extra",      Http1Error::BadRequestLine),
            ("GET no-slash HTTP/1.1",        Http1Error::BadRequestLine),
            ("GET /200 FTP/1.0",             Http1Error::BadRequestLine),
            ("GET /200 HTTP/2.0",            Http1Error::UnsupportedVersion),
            ("GET /200 HTTP/1.1\r\nbroken",  Http1Error::BadHeader),
            ("GET /200 HTTP/1.1\r\n: empty", Http1Error::BadHeader),
        ];

        for (head, expected) in cases {
            let err = parse(head).unwrap_err();
            assert_eq!(
                std::mem::discriminant(&err),
                std::mem::discriminant(&expected),
                "head {head:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn parse_connection_and_length_headers() {
        let head = parse(
            "POST /x HTTP/1.1\r\ncontent-length: 5\r\nConnection: close",
        )
        .unwrap();
        assert_eq!(head.content_length, 5);
        assert!(!head.keep_alive);

        // HTTP/1.0 defaults to close unless keep-alive is asked for.
        let head = parse("GET /x HTTP/1.0\r\nConnection: Keep-Alive").unwrap();
        assert!(head.keep_alive);
        assert!(!parse("GET /x HTTP/1.0").unwrap().keep_alive);

        let err = parse("POST /x HTTP/1.1\r\ncontent-length: nope").unwrap_err();
        assert!(matches!(err, Http1Error::InvalidContentLength));

        let err = parse("POST /x HTTP/1.1\r\ncontent-length: 9999999").unwrap_err();
        assert!(matches!(err, Http1Error::BodyTooLarge { .. }));
    }

    #[test]
    fn parse_caps_header_count() {
        let mut head = String::from("GET / HTTP/1.1");
        for i in 0..=limits().max_headers {
            head.push_str(&format!("\r\nx-h{i}: v"));
        }
        let err = parse(&head).unwrap_err();
        assert!(matches!(err, Http1Error::TooManyHeaders));
    }

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
        router
            .post(
                "/echo",
                handler(|req: HttpRequest, mut resp: HttpResponse| async move {
                    resp.status(StatusCode::Ok).body(req.body().to_vec());
                    resp
                }),
            )
            .unwrap();
        Dispatcher::new(router.into_table())
    }

    async fn roundtrip(wire: &[u8]) -> String {
        let dispatcher = test_dispatcher();
        let limits = limits();
        let (mut client, server) = tokio::io::duplex(4096);
        let (mut read_half, mut write_half) = tokio::io::split(server);

        client.write_all(wire).await.unwrap();
        client.shutdown().await.unwrap();

        let conn = Http1Connection::new(&mut read_half, &mut write_half, Vec::new(), &limits);
        let _ = conn.serve(&dispatcher).await;
        drop(read_half);
        drop(write_half);

        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut client, &mut out)
            .await
            .unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn one_cycle_get() {
        let out = roundtrip(b"GET /200 HTTP/1.1\r\nhost: t\r\nconnection: close\r\n\r\n").await;
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"), "{out}");
        assert!(out.contains("connection: close\r\n"));
        assert!(out.ends_with("\r\n\r\n2"), "{out}");
    }

    #[tokio::test]
    async fn body_is_delivered_to_the_handler() {
        let out =
            roundtrip(b"POST /echo HTTP/1.1\r\ncontent-length: 5\r\n\r\nhello").await;
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"), "{out}");
        assert!(out.ends_with("\r\n\r\nhello"), "{out}");
    }

    #[tokio::test]
    async fn unregistered_path_is_404() {
        let out = roundtrip(b"GET /nope HTTP/1.1\r\n\r\n").await;
        assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"), "{out}");
    }

    #[tokio::test]
    async fn sequential_requests_on_one_connection() {
        let wire = b"GET /200 HTTP/1.1\r\n\r\nGET /200 HTTP/1.1\r\nconnection: close\r\n\r\n";
        let out = roundtrip(wire).await;
        let responses: Vec<_> = out.match_indices("HTTP/1.1 200 OK").collect();
        assert_eq!(responses.len(), 2, "{out}");
    }

    #[tokio::test]
    async fn head_omits_the_body() {
        let dispatcher = {
            let mut router = Router::new();
            router
                .head(
                    "/200",
                    handler(|_req, mut resp: HttpResponse| async move {
                        resp.body("should-not-be-sent");
                        resp
                    }),
                )
                .unwrap();
            Dispatcher::new(router.into_table())
        };
        let limits = limits();
        let (mut client, server) = tokio::io::duplex(4096);
        let (mut read_half, mut write_half) = tokio::io::split(server);
        client
            .write_all(b"HEAD /200 HTTP/1.1\r\nconnection: close\r\n\r\n")
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        let conn = Http1Connection::new(&mut read_half, &mut write_half, Vec::new(), &limits);
        conn.serve(&dispatcher).await.unwrap();
        drop(read_half);
        drop(write_half);

        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut client, &mut out)
            .await
            .unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("content-length: 18\r\n"), "{out}");
        assert!(out.ends_with("\r\n\r\n"), "{out}");
    }

    #[tokio::test]
    async fn malformed_request_gets_400() {
        let out = roundtrip(b"TOTAL GARBAGE\r\n\r\n").await;
        assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{out}");
    }

    #[tokio::test]
    async fn carry_over_seeds_the_first_request() {
        // The sniffer consumed the whole request; the connection must not
        // need any further socket reads to answer it.
        let dispatcher = test_dispatcher();
        let limits = limits();
        let (mut client, server) = tokio::io::duplex(4096);
        let (mut read_half, mut write_half) = tokio::io::split(server);
        client.shutdown().await.unwrap();

        let carry = b"GET /200 HTTP/1.1\r\nconnection: close\r\n\r\n".to_vec();
        let conn = Http1Connection::new(&mut read_half, &mut write_half, carry, &limits);
        conn.serve(&dispatcher).await.unwrap();
        drop(read_half);
        drop(write_half);

        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut client, &mut out)
            .await
            .unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("HTTP/1.1 200 OK"));
    }
}
