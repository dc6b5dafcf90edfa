//! Route registry: one trie per routable method
//!
//! Routes are registered on a [`Router`] before the server starts; the
//! built table is shared read-only by every connection task, so lookups
//! need no locking.

use crate::{
    errors::PathError,
    http::{request::HttpRequest, response::HttpResponse},
    http::types::{Method, SUPPORTED_METHODS},
    router::trie::PathTrie,
};
use futures_util::future::BoxFuture;
use std::{future::Future, sync::Arc};

/// A registered request handler.
///
/// Takes the decoded request and the response under construction, returns
/// the (possibly mutated) response. Build one from an `async fn` or
/// closure with [`handler`].
pub type Handler =
    Arc<dyn Fn(HttpRequest, HttpResponse) -> BoxFuture<'static, HttpResponse> + Send + Sync>;

/// Wraps an `async fn(HttpRequest, HttpResponse) -> HttpResponse` into a
/// [`Handler`].
///
/// # Examples
///
/// ```
/// use janus_web::{handler, HttpRequest, HttpResponse, StatusCode};
///
/// async fn ok(_req: HttpRequest, mut resp: HttpResponse) -> HttpResponse {
///     resp.status(StatusCode::Ok).body("fine");
///     resp
/// }
///
/// let h = handler(ok);
/// let h2 = handler(|_req, mut resp: HttpResponse| async move {
///     resp.body("from a closure");
///     resp
/// });
/// ```
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(HttpRequest, HttpResponse) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HttpResponse> + Send + 'static,
{
    Arc::new(move |req, resp| -> BoxFuture<'static, HttpResponse> { Box::pin(f(req, resp)) })
}

// The read-only table the dispatcher consults. Exactly one trie per
// supported method; requests with any other method token have no trie
// here and resolve as not-found.
#[derive(Default)]
pub(crate) struct RouteTable {
    tries: [PathTrie; SUPPORTED_METHODS.len()],
}

impl RouteTable {
    #[inline]
    pub(crate) fn find(&self, method: Method, path: &str) -> Result<Option<&Handler>, PathError> {
        self.tries[method.index()].find(path)
    }
}

/// Builder-style route registration.
///
/// All registration happens before [`Server::launch`](crate::Server::launch);
/// the finished router moves into the server and becomes immutable.
/// Registering the same (method, path) twice silently replaces the earlier
/// handler - last write wins.
///
/// # Examples
///
/// ```
/// use janus_web::{handler, HttpRequest, HttpResponse, Method, Router, StatusCode};
///
/// # fn main() -> Result<(), janus_web::errors::PathError> {
/// let mut router = Router::new();
/// router.get("/200", handler(|_req, mut resp: HttpResponse| async move {
///     resp.status(StatusCode::Ok).body("2");
///     resp
/// }))?;
/// router.any("/", handler(|_req, mut resp: HttpResponse| async move {
///     resp.body("3");
///     resp
/// }))?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct Router {
    table: RouteTable,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").finish_non_exhaustive()
    }
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` at `path` for each method in `methods`.
    ///
    /// Fails fast with a [`PathError`] if the path is empty, lacks the
    /// leading `/`, or contains `;`, `,` or `.` anywhere.
    pub fn route(
        &mut self,
        path: &str,
        methods: &[Method],
        handler: Handler,
    ) -> Result<&mut Self, PathError> {
        for method in methods {
            self.table.tries[method.index()].add(path, handler.clone())?;
        }
        Ok(self)
    }

    /// Registers `handler` at `path` for all five routable methods.
    pub fn any(&mut self, path: &str, handler: Handler) -> Result<&mut Self, PathError> {
        self.route(path, &SUPPORTED_METHODS, handler)
    }

    /// Registers a GET-only route.
    pub fn get(&mut self, path: &str, handler: Handler) -> Result<&mut Self, PathError> {
        self.route(path, &[Method::Get], handler)
    }

    /// Registers a POST-only route.
    pub fn post(&mut self, path: &str, handler: Handler) -> Result<&mut Self, PathError> {
        self.route(path, &[Method::Post], handler)
    }

    /// Registers a PUT-only route.
    pub fn put(&mut self, path: &str, handler: Handler) -> Result<&mut Self, PathError> {
        self.route(path, &[Method::Put], handler)
    }

    /// Registers a DELETE-only route.
    pub fn delete(&mut self, path: &str, handler: Handler) -> Result<&mut Self, PathError> {
        self.route(path, &[Method::Delete], handler)
    }

    /// Registers a HEAD-only route.
    pub fn head(&mut self, path: &str, handler: Handler) -> Result<&mut Self, PathError> {
        self.route(path, &[Method::Head], handler)
    }

    pub(crate) fn into_table(self) -> RouteTable {
        self.table
    }
}
