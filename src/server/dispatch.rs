//! Request dispatch: route lookup, handler invocation, failure containment

use crate::{
    http::{request::HttpRequest, response::HttpResponse, types::Method, types::StatusCode},
    router::table::RouteTable,
};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error};

// The single dispatch point both protocol handlers call once a logical
// request is assembled. Holds the immutable route table; shared across all
// connection tasks behind an Arc, no locking.
pub(crate) struct Dispatcher {
    table: RouteTable,
}

impl Dispatcher {
    pub(crate) fn new(table: RouteTable) -> Self {
        Self { table }
    }

    /// Resolves and invokes the handler for `request`.
    ///
    /// Anything that prevents a handler from being found - an unroutable
    /// method token, an unregistered path, or a request target the trie
    /// refuses to look up (forbidden characters) - yields the same
    /// not-found response; none of these are errors at request time.
    ///
    /// A panicking handler is caught here, logged, and answered with a
    /// plain 500. The connection keeps serving.
    pub(crate) async fn dispatch(
        &self,
        request: HttpRequest,
        mut response: HttpResponse,
    ) -> HttpResponse {
        let found = match Method::from_token(request.method()) {
            Some(method) => self
                .table
                .find(method, request.path())
                .ok()
                .flatten()
                .cloned(),
            None => None,
        };

        let Some(handler) = found else {
            debug!(method = request.method(), path = request.path(), "no route");
            response.status(StatusCode::NotFound);
            return response;
        };

        let method = request.method().to_owned();
        let path = request.path().to_owned();
        match AssertUnwindSafe(handler(request, response)).catch_unwind().await {
            Ok(response) => response,
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .copied()
                    .map(str::to_owned)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_owned());
                error!(%method, %path, %reason, "handler panicked");

                let mut response = HttpResponse::new();
                response.status(StatusCode::InternalServerError);
                response
            }
        }
    }
}

#[cfg(test)]
mod dispatch_self {
    use super::*;
    use crate::router::table::{handler, Router};

    fn request(method: &str, path: &str) -> HttpRequest {
        HttpRequest::new(method.into(), path.into(), None, Vec::new(), Vec::new())
    }

    fn dispatcher() -> Dispatcher {
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
            .any(
                "/",
                handler(|_req, mut resp: HttpResponse| async move {
                    resp.status(StatusCode::Ok).body("3");
                    resp
                }),
            )
            .unwrap();
        router
            .get(
                "/boom",
                handler(|_req, _resp: HttpResponse| async move {
                    panic!("exploded on purpose");
                }),
            )
            .unwrap();
        Dispatcher::new(router.into_table())
    }

    #[tokio::test]
    async fn registered_route_runs_its_handler() {
        let d = dispatcher();
        let resp = d.dispatch(request("GET", "/200"), HttpResponse::new()).await;
        assert_eq!(resp.status_code(), StatusCode::Ok);
        assert_eq!(resp.body_bytes(), b"2");
    }

    #[tokio::test]
    async fn wrong_method_is_not_found() {
        // /200 is GET-only; a POST to the same path has no route.
        let d = dispatcher();
        let resp = d.dispatch(request("POST", "/200"), HttpResponse::new()).await;
        assert_eq!(resp.status_code(), StatusCode::NotFound);
        assert!(resp.body_bytes().is_empty());
    }

    #[tokio::test]
    async fn any_route_matches_multiple_methods() {
        let d = dispatcher();
        for method in ["GET", "POST"] {
            let resp = d.dispatch(request(method, "/"), HttpResponse::new()).await;
            assert_eq!(resp.status_code(), StatusCode::Ok, "method {method}");
            assert_eq!(resp.body_bytes(), b"3", "method {method}");
        }
    }

    #[tokio::test]
    async fn unroutable_method_token_is_not_found() {
        let d = dispatcher();
        let resp = d.dispatch(request("PATCH", "/200"), HttpResponse::new()).await;
        assert_eq!(resp.status_code(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn forbidden_request_target_is_not_found() {
        // The trie refuses to look up dotted paths; at request time that
        // is indistinguishable from an unregistered route.
        let d = dispatcher();
        let resp = d
            .dispatch(request("GET", "/favicon.ico"), HttpResponse::new())
            .await;
        assert_eq!(resp.status_code(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn panicking_handler_becomes_500() {
        let d = dispatcher();
        let resp = d.dispatch(request("GET", "/boom"), HttpResponse::new()).await;
        assert_eq!(resp.status_code(), StatusCode::InternalServerError);

        // The dispatcher survives for the next request.
        let resp = d.dispatch(request("GET", "/200"), HttpResponse::new()).await;
        assert_eq!(resp.status_code(), StatusCode::Ok);
    }
}
