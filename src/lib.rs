//! janus_web - dual-protocol HTTP server with trie-based routing
//!
//! A from-scratch HTTP server for microservices that speaks HTTP/1.1 and
//! HTTP/2 on the same port. Each accepted TCP connection is classified by
//! its first bytes - the HTTP/2 connection preface or an HTTP/1 request
//! line - before any protocol-specific parsing happens, then served by the
//! matching protocol handler against one shared route table.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1 / HTTP/1.0**: strict-CRLF parsing, `Content-Length`
//!   bodies, keep-alive with per-connection limits
//! - **HTTP/2 (h2c)**: preface detection, SETTINGS/PING/GOAWAY handling,
//!   HPACK header compression, multiplexed streams served by two
//!   cooperating tasks per connection
//!
//! # Routing
//!
//! Routes are literal `/`-delimited paths registered per method in a path
//! trie; lookup cost is the segment count, not the route count. Paths may
//! not contain `;`, `,` or `.` - this router maps APIs, not file systems.
//! Registration finishes before the listener starts, so the table is
//! shared read-only with no locking.
//!
//! # Examples
//!
//! ```no_run
//! use janus_web::{handler, HttpResponse, Router, Server, Shutdown, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut router = Router::new();
//!     router.get("/200", handler(|_req, mut resp: HttpResponse| async move {
//!         resp.status(StatusCode::Ok).body("2");
//!         resp
//!     }))?;
//!     router.any("/", handler(|_req, mut resp: HttpResponse| async move {
//!         resp.status(StatusCode::Ok).body("3");
//!         resp
//!     }))?;
//!
//!     let shutdown = Shutdown::new();
//!     let trigger = shutdown.clone();
//!     tokio::spawn(async move {
//!         tokio::signal::ctrl_c().await.ok();
//!         trigger.trigger();
//!     });
//!
//!     Server::builder()
//!         .listener(Server::bind("127.0.0.1:8080".parse()?)?)
//!         .router(router)
//!         .shutdown(&shutdown)
//!         .build()
//!         .launch()
//!         .await;
//!     Ok(())
//! }
//! ```

pub(crate) mod http {
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod types;
}
pub(crate) mod router {
    pub(crate) mod table;
    pub(crate) mod trie;
}
pub(crate) mod h2 {
    pub(crate) mod connection;
    pub(crate) mod frame;
}
pub(crate) mod server {
    pub(crate) mod dispatch;
    pub(crate) mod h1;
    pub(crate) mod mux;
    pub(crate) mod server_impl;
    pub(crate) mod shutdown;
    pub(crate) mod sniff;
}
pub mod errors;
pub mod limits;

pub use crate::{
    http::{
        request::HttpRequest,
        response::HttpResponse,
        types::{Method, StatusCode},
    },
    router::table::{handler, Handler, Router},
    server::{
        server_impl::{Server, ServerBuilder},
        shutdown::Shutdown,
    },
};
