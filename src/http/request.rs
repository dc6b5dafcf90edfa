//! Generic request representation handed from a protocol handler to the dispatcher

/// A decoded HTTP request, independent of the wire protocol it arrived on.
///
/// Both protocol handlers produce this shape: the HTTP/1 parser from a
/// request line + header block + body, the HTTP/2 stream consumer from a
/// completed stream's pseudo-headers + header list + DATA payload. The
/// router treats everything except `method` and `path` as opaque payload.
///
/// The method is kept as the raw token from the wire (`"GET"`, `"PATCH"`,
/// ...). Tokens outside the five routable methods are legal here; the
/// dispatcher resolves them to not-found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    method: String,
    path: String,
    query: Option<String>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl HttpRequest {
    #[inline]
    pub(crate) fn new(
        method: String,
        path: String,
        query: Option<String>,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            method,
            path,
            query,
            headers,
            body,
        }
    }

    /// Raw method token from the wire, e.g. `"GET"`.
    #[inline(always)]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Path component of the request target, without the query string.
    ///
    /// # Examples
    ///
    /// For target `/api/users?sort=name` this is `/api/users`.
    #[inline(always)]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query string without the leading `?`, if the target carried one.
    #[inline(always)]
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// First value of the named header, compared case-insensitively.
    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All headers in arrival order.
    #[inline(always)]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Request body bytes; empty if the request carried none.
    #[inline(always)]
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Splits a request target into path and query at the first `?`.
#[inline]
pub(crate) fn split_target(target: &str) -> (String, Option<String>) {
    match target.split_once('?') {
        Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
        None => (target.to_owned(), None),
    }
}
