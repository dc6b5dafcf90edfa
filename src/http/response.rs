//! Generic response representation, mutated in place by handlers

use crate::http::types::{StatusCode, Version};

/// An HTTP response under construction.
///
/// Created by the protocol handler for each logical request and threaded
/// through the dispatcher into the matched handler, which mutates it in
/// place and returns it. The dispatcher's not-found path only touches the
/// status. Serialization into HTTP/1 bytes or HTTP/2 frames happens after
/// dispatch, inside the protocol handler that owns the connection.
///
/// # Examples
///
/// ```
/// use janus_web::{HttpRequest, HttpResponse, StatusCode};
///
/// async fn greet(_req: HttpRequest, mut resp: HttpResponse) -> HttpResponse {
///     resp.status(StatusCode::Ok)
///         .header("content-type", "text/plain")
///         .body("hello");
///     resp
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpResponse {
    /// A fresh response: status 200, no headers, empty body.
    #[inline]
    pub fn new() -> Self {
        Self {
            status: StatusCode::Ok,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Sets the status code.
    #[inline]
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self
    }

    /// Appends a header. Names are sent as given over HTTP/1 and lowercased
    /// for HTTP/2, where uppercase field names are a protocol error.
    #[inline]
    pub fn header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replaces the body.
    #[inline]
    pub fn body(&mut self, data: impl Into<Vec<u8>>) -> &mut Self {
        self.body = data.into();
        self
    }

    /// Current status code.
    #[inline(always)]
    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    /// Headers appended so far, in order.
    #[inline(always)]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Current body bytes.
    #[inline(always)]
    pub fn body_bytes(&self) -> &[u8] {
        &self.body
    }

    // Serializes status line, headers, and body into HTTP/1 wire bytes.
    // `head_only` keeps the content-length but omits the body (HEAD).
    pub(crate) fn to_h1_bytes(&self, version: Version, keep_alive: bool, head_only: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.body.len());
        out.extend_from_slice(self.status.status_line(version));

        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }

        out.extend_from_slice(b"content-length: ");
        out.extend_from_slice(self.body.len().to_string().as_bytes());
        out.extend_from_slice(b"\r\nconnection: ");
        out.extend_from_slice(if keep_alive { b"keep-alive" as &[u8] } else { b"close" });
        out.extend_from_slice(b"\r\n\r\n");

        if !head_only {
            out.extend_from_slice(&self.body);
        }
        out
    }
}
