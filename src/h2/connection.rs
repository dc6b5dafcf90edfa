//! HTTP/2 connection handling: two cooperating tasks per connection
//!
//! The frame reader owns the read half and all per-stream accumulation
//! state; the stream consumer owns the write half, the dispatcher calls,
//! and response framing. Completed streams travel between them over a
//! bounded channel - a single-producer/single-consumer handoff, so neither
//! side ever locks. Control frames that demand an answer (SETTINGS, PING)
//! travel over the same channel to keep the write half single-owner.
//!
//! Either side failing ends the connection: the multiplexer awaits both
//! together and the surviving side is dropped mid-await.

use crate::{
    errors::Http2Error,
    h2::frame::{
        encode_frame, encode_goaway, encode_settings, error_code, flags, parse_settings,
        settings, FrameHeader, FrameType, FRAME_HEADER_LEN,
    },
    http::{request::split_target, request::HttpRequest, response::HttpResponse},
    limits::{ConnLimits, H2Limits},
    server::dispatch::Dispatcher,
};
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, trace};

// What the frame reader hands to the stream consumer.
enum H2Event {
    /// A stream whose frames are complete, ready for dispatch.
    Stream(StreamAssembly),
    /// Peer SETTINGS to apply and acknowledge.
    Settings(Vec<(u16, u32)>),
    /// PING payload to echo back with ACK.
    Ping([u8; 8]),
}

// A stream mid-accumulation, owned exclusively by the frame reader.
struct PendingStream {
    headers: Vec<(Vec<u8>, Vec<u8>)>,
    body: Vec<u8>,
}

// All frames of one stream, decoded and assembled.
struct StreamAssembly {
    id: u32,
    headers: Vec<(Vec<u8>, Vec<u8>)>,
    body: Vec<u8>,
}

impl StreamAssembly {
    // Pseudo-headers become method/path; the rest pass through. `:scheme`
    // and `:authority` are not needed for routing and are dropped.
    fn into_request(self) -> Result<HttpRequest, Http2Error> {
        let mut method = None;
        let mut target = None;
        let mut headers = Vec::with_capacity(self.headers.len());

        for (name, value) in self.headers {
            let value = String::from_utf8(value)
                .map_err(|_| Http2Error::Protocol("header value is not UTF-8"))?;
            match name.as_slice() {
                b":method" => method = Some(value),
                b":path" => target = Some(value),
                _ if name.starts_with(b":") => {}
                _ => {
                    let name = String::from_utf8(name)
                        .map_err(|_| Http2Error::Protocol("header name is not UTF-8"))?;
                    headers.push((name, value));
                }
            }
        }

        let method = method.ok_or(Http2Error::MissingPseudoHeader(self.id))?;
        let target = target.ok_or(Http2Error::MissingPseudoHeader(self.id))?;
        let (path, query) = split_target(&target);
        Ok(HttpRequest::new(method, path, query, headers, self.body))
    }
}

// An unterminated header block: HEADERS seen, END_HEADERS not yet.
// While one of these is open, only CONTINUATION frames for the same
// stream are legal on the connection.
struct OpenHeaderBlock {
    stream_id: u32,
    fragment: Vec<u8>,
    end_stream: bool,
}

/// One HTTP/2 connection, handshaken and ready to run its two tasks.
pub(crate) struct Http2Connection<'a, R, W> {
    reader: FrameReader<'a, R>,
    consumer: StreamConsumer<'a, W>,
}

impl<'a, R, W> Http2Connection<'a, R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Advertises this server's SETTINGS and wires the two task halves
    /// together. The connection preface has already been consumed by the
    /// sniffer; `carry_over` is whatever arrived after it.
    pub(crate) async fn handshake(
        reader: &'a mut R,
        writer: &'a mut W,
        carry_over: Vec<u8>,
        dispatcher: &'a Dispatcher,
        conn_limits: &'a ConnLimits,
        h2_limits: &'a H2Limits,
    ) -> Result<Http2Connection<'a, R, W>, Http2Error> {
        let payload = encode_settings(&[
            (settings::MAX_CONCURRENT_STREAMS, h2_limits.max_streams as u32),
            (settings::MAX_FRAME_SIZE, h2_limits.max_frame_size as u32),
        ]);
        let frame = encode_frame(FrameType::Settings, 0, 0, &payload);
        timeout(conn_limits.socket_write_timeout, writer.write_all(&frame))
            .await
            .map_err(|_| Http2Error::TimedOut)??;

        let (tx, rx) = mpsc::channel(h2_limits.stream_channel_capacity);

        Ok(Http2Connection {
            reader: FrameReader {
                reader,
                buf: carry_over,
                hpack_dec: loona_hpack::Decoder::new(),
                pending: HashMap::new(),
                open_block: None,
                tx,
                conn_limits,
                h2_limits,
            },
            consumer: StreamConsumer {
                writer,
                rx,
                hpack_enc: loona_hpack::Encoder::new(),
                dispatcher,
                conn_limits,
                peer_max_frame: 16_384,
                last_stream: 0,
            },
        })
    }

    /// Runs the frame-reader and stream-consumer to completion, awaited
    /// together. The first failure cancels the sibling and is returned;
    /// it is fatal to this connection only, never to the listener.
    pub(crate) async fn run(self) -> Result<(), Http2Error> {
        let Http2Connection {
            mut reader,
            mut consumer,
        } = self;
        let read_task = async move {
            let result = reader.read_frames().await;
            // Dropping the reader closes the event channel, which lets the
            // consumer drain its queue and finish.
            drop(reader);
            result
        };
        tokio::try_join!(read_task, consumer.consume_streams())?;
        Ok(())
    }
}

// Decodes incoming frames and accumulates per-stream state. Sole owner of
// the read half and of `pending`; nothing here is shared or locked.
struct FrameReader<'a, R> {
    reader: &'a mut R,
    buf: Vec<u8>,
    hpack_dec: loona_hpack::Decoder<'static>,
    pending: HashMap<u32, PendingStream>,
    open_block: Option<OpenHeaderBlock>,
    tx: mpsc::Sender<H2Event>,
    conn_limits: &'a ConnLimits,
    h2_limits: &'a H2Limits,
}

impl<R: AsyncRead + Unpin> FrameReader<'_, R> {
    async fn read_frames(&mut self) -> Result<(), Http2Error> {
        loop {
            if !self.fill(FRAME_HEADER_LEN).await? {
                return if self.buf.is_empty() {
                    Ok(())
                } else {
                    Err(Http2Error::UnexpectedEof)
                };
            }
            let mut raw = [0u8; FRAME_HEADER_LEN];
            raw.copy_from_slice(&self.buf[..FRAME_HEADER_LEN]);
            let header = FrameHeader::parse(&raw);

            if header.length > self.h2_limits.max_frame_size {
                return Err(Http2Error::FrameTooLarge {
                    size: header.length,
                    limit: self.h2_limits.max_frame_size,
                });
            }
            if !self.fill(FRAME_HEADER_LEN + header.length).await? {
                return Err(Http2Error::UnexpectedEof);
            }
            self.buf.drain(..FRAME_HEADER_LEN);
            let payload: Vec<u8> = self.buf.drain(..header.length).collect();

            // An open header block locks the connection to its CONTINUATIONs.
            if let Some(open) = &self.open_block {
                if header.frame_type != FrameType::Continuation
                    || header.stream_id != open.stream_id
                {
                    return Err(Http2Error::Protocol(
                        "expected CONTINUATION for the open header block",
                    ));
                }
            }

            trace!(
                frame_type = ?header.frame_type,
                stream = header.stream_id,
                len = header.length,
                "frame"
            );
            match header.frame_type {
                FrameType::Settings if header.has(flags::ACK) => {}
                FrameType::Settings => {
                    if header.stream_id != 0 {
                        return Err(Http2Error::Protocol("SETTINGS on a nonzero stream"));
                    }
                    let pairs = parse_settings(&payload)?;
                    self.send(H2Event::Settings(pairs)).await?;
                }
                FrameType::Ping => {
                    let data: [u8; 8] = payload
                        .as_slice()
                        .try_into()
                        .map_err(|_| Http2Error::Protocol("PING payload must be 8 bytes"))?;
                    if !header.has(flags::ACK) {
                        self.send(H2Event::Ping(data)).await?;
                    }
                }
                FrameType::Headers => self.on_headers(&header, payload).await?,
                FrameType::Continuation => self.on_continuation(&header, payload).await?,
                FrameType::Data => self.on_data(&header, payload).await?,
                FrameType::RstStream => {
                    self.pending.remove(&header.stream_id);
                }
                FrameType::WindowUpdate => {
                    if payload.len() != 4 {
                        return Err(Http2Error::Protocol("WINDOW_UPDATE payload must be 4 bytes"));
                    }
                    // Window accounting is not tracked; responses stay
                    // within the default initial window.
                }
                FrameType::PushPromise => {
                    return Err(Http2Error::Protocol("client sent PUSH_PROMISE"));
                }
                FrameType::GoAway => {
                    debug!("peer sent GOAWAY, finishing frame reader");
                    return Ok(());
                }
                FrameType::Priority | FrameType::Unknown(_) => {}
            }
        }
    }

    // Ensures `n` buffered bytes; false means EOF arrived first.
    async fn fill(&mut self, n: usize) -> Result<bool, Http2Error> {
        while self.buf.len() < n {
            let got = timeout(
                self.conn_limits.socket_read_timeout,
                self.reader.read_buf(&mut self.buf),
            )
            .await
            .map_err(|_| Http2Error::TimedOut)??;
            if got == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn send(&mut self, event: H2Event) -> Result<(), Http2Error> {
        self.tx.send(event).await.map_err(|_| Http2Error::ConsumerGone)
    }

    async fn on_headers(&mut self, header: &FrameHeader, payload: Vec<u8>) -> Result<(), Http2Error> {
        if header.stream_id == 0 {
            return Err(Http2Error::Protocol("HEADERS on stream 0"));
        }

        let mut fragment = payload;
        if header.has(flags::PADDED) {
            let pad = *fragment
                .first()
                .ok_or(Http2Error::Protocol("PADDED frame without pad length"))?
                as usize;
            fragment.remove(0);
            if pad > fragment.len() {
                return Err(Http2Error::Protocol("padding exceeds frame payload"));
            }
            fragment.truncate(fragment.len() - pad);
        }
        if header.has(flags::PRIORITY) {
            if fragment.len() < 5 {
                return Err(Http2Error::Protocol("HEADERS priority fields truncated"));
            }
            fragment.drain(..5);
        }

        let end_stream = header.has(flags::END_STREAM);
        if header.has(flags::END_HEADERS) {
            self.finish_header_block(header.stream_id, fragment, end_stream)
                .await
        } else {
            self.open_block = Some(OpenHeaderBlock {
                stream_id: header.stream_id,
                fragment,
                end_stream,
            });
            Ok(())
        }
    }

    async fn on_continuation(
        &mut self,
        header: &FrameHeader,
        payload: Vec<u8>,
    ) -> Result<(), Http2Error> {
        let Some(mut open) = self.open_block.take() else {
            return Err(Http2Error::Protocol("CONTINUATION without an open header block"));
        };
        open.fragment.extend_from_slice(&payload);
        if open.fragment.len() > self.h2_limits.max_header_block_size {
            return Err(Http2Error::HeaderBlockTooLarge {
                limit: self.h2_limits.max_header_block_size,
            });
        }

        if header.has(flags::END_HEADERS) {
            self.finish_header_block(open.stream_id, open.fragment, open.end_stream)
                .await
        } else {
            self.open_block = Some(open);
            Ok(())
        }
    }

    // A header block just terminated: HPACK-decode it and either complete
    // the stream or park it until its DATA arrives. Decoding must happen
    // here, in connection order, because the HPACK dynamic table is
    // connection-wide state.
    async fn finish_header_block(
        &mut self,
        stream_id: u32,
        fragment: Vec<u8>,
        end_stream: bool,
    ) -> Result<(), Http2Error> {
        if fragment.len() > self.h2_limits.max_header_block_size {
            return Err(Http2Error::HeaderBlockTooLarge {
                limit: self.h2_limits.max_header_block_size,
            });
        }
        let headers = self.hpack_dec.decode(&fragment)?;

        match self.pending.remove(&stream_id) {
            // A trailing header block on a stream that already has its
            // HEADERS. Trailer fields are not routed on and are dropped.
            Some(pending) => {
                if !end_stream {
                    return Err(Http2Error::Protocol("trailers without END_STREAM"));
                }
                self.complete(stream_id, pending.headers, pending.body).await
            }
            None if end_stream => self.complete(stream_id, headers, Vec::new()).await,
            None => {
                if self.pending.len() >= self.h2_limits.max_streams {
                    return Err(Http2Error::StreamsExceeded {
                        limit: self.h2_limits.max_streams,
                    });
                }
                self.pending.insert(
                    stream_id,
                    PendingStream {
                        headers,
                        body: Vec::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn on_data(&mut self, header: &FrameHeader, payload: Vec<u8>) -> Result<(), Http2Error> {
        if header.stream_id == 0 {
            return Err(Http2Error::Protocol("DATA on stream 0"));
        }

        let mut payload = payload;
        if header.has(flags::PADDED) {
            let pad = *payload
                .first()
                .ok_or(Http2Error::Protocol("PADDED frame without pad length"))?
                as usize;
            payload.remove(0);
            if pad > payload.len() {
                return Err(Http2Error::Protocol("padding exceeds frame payload"));
            }
            payload.truncate(payload.len() - pad);
        }

        match self.pending.get_mut(&header.stream_id) {
            Some(pending) => {
                pending.body.extend_from_slice(&payload);
                if pending.body.len() > self.conn_limits.max_body_size {
                    return Err(Http2Error::BodyTooLarge {
                        limit: self.conn_limits.max_body_size,
                    });
                }
                if header.has(flags::END_STREAM) {
                    if let Some(done) = self.pending.remove(&header.stream_id) {
                        self.complete(header.stream_id, done.headers, done.body).await?;
                    }
                }
                Ok(())
            }
            // Reset or already-completed stream; DATA arriving late is
            // dropped rather than killing the connection.
            None => {
                debug!(stream = header.stream_id, "DATA for unknown stream, ignoring");
                Ok(())
            }
        }
    }

    async fn complete(
        &mut self,
        id: u32,
        headers: Vec<(Vec<u8>, Vec<u8>)>,
        body: Vec<u8>,
    ) -> Result<(), Http2Error> {
        self.send(H2Event::Stream(StreamAssembly { id, headers, body })).await
    }
}

// Dispatches completed streams and writes responses in their framing.
// Sole owner of the write half; streams finish in dispatch order here,
// which may differ from their arrival order on the wire.
struct StreamConsumer<'a, W> {
    writer: &'a mut W,
    rx: mpsc::Receiver<H2Event>,
    hpack_enc: loona_hpack::Encoder<'static>,
    dispatcher: &'a Dispatcher,
    conn_limits: &'a ConnLimits,
    peer_max_frame: usize,
    last_stream: u32,
}

impl<W: AsyncWrite + Unpin> StreamConsumer<'_, W> {
    async fn consume_streams(&mut self) -> Result<(), Http2Error> {
        while let Some(event) = self.rx.recv().await {
            match event {
                H2Event::Settings(pairs) => {
                    for (id, value) in pairs {
                        if id == settings::MAX_FRAME_SIZE && (16_384..=16_777_215).contains(&value)
                        {
                            self.peer_max_frame = value as usize;
                        }
                    }
                    self.write_frame(FrameType::Settings, flags::ACK, 0, &[]).await?;
                }
                H2Event::Ping(data) => {
                    self.write_frame(FrameType::Ping, flags::ACK, 0, &data).await?;
                }
                H2Event::Stream(assembly) => self.respond(assembly).await?,
            }
        }

        // Reader side finished cleanly; tell the peer no further streams
        // will be processed. Best effort - it may already be gone.
        let goaway = encode_goaway(self.last_stream, error_code::NO_ERROR);
        if let Err(e) = self.write_all(&goaway).await {
            debug!(error = %e, "peer gone before GOAWAY");
        }
        Ok(())
    }

    async fn respond(&mut self, assembly: StreamAssembly) -> Result<(), Http2Error> {
        let stream_id = assembly.id;
        let request = assembly.into_request()?;
        let head_only = request.method() == "HEAD";
        trace!(stream = stream_id, method = request.method(), path = request.path(), "dispatching");

        let response = self.dispatcher.dispatch(request, HttpResponse::new()).await;
        self.last_stream = self.last_stream.max(stream_id);

        let mut fields: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(1 + response.headers().len());
        fields.push((
            b":status".to_vec(),
            response.status_code().as_h2_status().to_vec(),
        ));
        for (name, value) in response.headers() {
            // Uppercase field names are a protocol error in HTTP/2.
            fields.push((name.to_lowercase().into_bytes(), value.clone().into_bytes()));
        }
        let mut block = Vec::with_capacity(64);
        self.hpack_enc
            .encode_into(fields.iter().map(|(n, v)| (n.as_slice(), v.as_slice())), &mut block)?;

        let body = if head_only { &[] } else { response.body_bytes() };

        // HEADERS, split into CONTINUATIONs if the block exceeds the
        // peer's frame size.
        let mut chunks = block.chunks(self.peer_max_frame).peekable();
        let mut first = true;
        while let Some(chunk) = chunks.next() {
            let frame_type = if first { FrameType::Headers } else { FrameType::Continuation };
            let mut frame_flags = 0u8;
            if chunks.peek().is_none() {
                frame_flags |= flags::END_HEADERS;
            }
            if first && body.is_empty() {
                frame_flags |= flags::END_STREAM;
            }
            self.write_frame(frame_type, frame_flags, stream_id, chunk).await?;
            first = false;
        }

        if !body.is_empty() {
            let chunks = body.chunks(self.peer_max_frame);
            let last = chunks.len() - 1;
            for (i, chunk) in chunks.enumerate() {
                let frame_flags = if i == last { flags::END_STREAM } else { 0 };
                self.write_frame(FrameType::Data, frame_flags, stream_id, chunk).await?;
            }
        }
        Ok(())
    }

    async fn write_frame(
        &mut self,
        frame_type: FrameType,
        frame_flags: u8,
        stream_id: u32,
        payload: &[u8],
    ) -> Result<(), Http2Error> {
        let bytes = encode_frame(frame_type, frame_flags, stream_id, payload);
        self.write_all(&bytes).await
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), Http2Error> {
        timeout(self.conn_limits.socket_write_timeout, self.writer.write_all(bytes))
            .await
            .map_err(|_| Http2Error::TimedOut)??;
        Ok(())
    }
}
