//! Server assembly: listener, accept loop, graceful shutdown

use crate::{
    limits::{AllLimits, ConnLimits, H2Limits, ServerLimits},
    router::table::Router,
    server::{dispatch::Dispatcher, mux::handle_connection, shutdown::Shutdown},
};
use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use std::{io, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    net::TcpListener,
    sync::{broadcast, Semaphore},
    task::JoinSet,
    time::timeout,
};
use tracing::{debug, error, info, warn};

/// A dual-protocol HTTP server.
///
/// Accepts TCP connections, classifies each as HTTP/1 or HTTP/2 by its
/// first bytes, and serves decoded requests through the route table built
/// at startup. One tokio task per connection; admission is bounded by
/// [`ServerLimits::max_connections`].
///
/// # Examples
///
/// ```no_run
/// use janus_web::{handler, HttpResponse, Router, Server, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut router = Router::new();
///     router.get("/200", handler(|_req, mut resp: HttpResponse| async move {
///         resp.status(StatusCode::Ok).body("2");
///         resp
///     }))?;
///
///     Server::builder()
///         .listener(Server::bind("127.0.0.1:8080".parse()?)?)
///         .router(router)
///         .build()
///         .launch()
///         .await;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    limits: AllLimits,
    shutdown_rx: Option<broadcast::Receiver<()>>,
}

impl Server {
    /// Creates a new builder for configuring the server instance.
    #[inline]
    pub fn builder() -> ServerBuilder {
        ServerBuilder {
            listener: None,
            router: None,
            server_limits: None,
            connection_limits: None,
            h2_limits: None,
            shutdown_rx: None,
        }
    }

    /// Binds a TCP listener with server-appropriate socket options
    /// (address reuse, no Nagle delay, a deep accept backlog).
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
        let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
        let socket = Socket::new(domain, Type::STREAM, Some(SockProtocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.set_tcp_nodelay(true)?;
        socket.bind(&addr.into())?;
        socket.listen(1024)?;
        socket.set_nonblocking(true)?;
        TcpListener::from_std(socket.into())
    }

    /// The address the listener is bound to. Useful with port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept loop until the shutdown signal fires (forever, if
    /// the builder was given no [`Shutdown`]).
    ///
    /// On shutdown the listener closes first, then in-flight connections
    /// get [`ServerLimits::shutdown_grace`] to finish before being
    /// aborted.
    pub async fn launch(self) {
        let Server {
            listener,
            dispatcher,
            limits,
            mut shutdown_rx,
        } = self;

        let semaphore = Arc::new(Semaphore::new(limits.server.max_connections));
        let mut tasks: JoinSet<()> = JoinSet::new();

        match listener.local_addr() {
            Ok(addr) => info!(%addr, "listening"),
            Err(_) => info!("listening"),
        }

        loop {
            let shutdown_signal = async {
                match shutdown_rx.as_mut() {
                    Some(rx) => {
                        let _ = rx.recv().await;
                    }
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = shutdown_signal => {
                    info!("shutdown signal received, draining connections");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        // No permit, no service: the socket just closes.
                        // Its protocol is unknown before sniffing, so no
                        // framing exists to carry a rejection response.
                        let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                            warn!(%peer, "connection limit reached, dropping connection");
                            continue;
                        };

                        let dispatcher = dispatcher.clone();
                        let limits = limits.clone();
                        tasks.spawn(async move {
                            debug!(%peer, "connection accepted");
                            let _ = stream.set_nodelay(true);
                            handle_connection(stream, &dispatcher, &limits).await;
                            debug!(%peer, "connection closed");
                            drop(permit);
                        });

                        // Reap whatever already finished.
                        while tasks.try_join_next().is_some() {}
                    }
                    Err(e) => error!(error = %e, "accept failed"),
                },
            }
        }

        // Stop accepting before the drain starts.
        drop(listener);
        drain(tasks, limits.server.shutdown_grace).await;
    }
}

async fn drain(mut tasks: JoinSet<()>, grace: Duration) {
    let all_done = async {
        while tasks.join_next().await.is_some() {}
    };
    if timeout(grace, all_done).await.is_err() {
        warn!(
            remaining = tasks.len(),
            "shutdown grace expired, aborting connections"
        );
        tasks.shutdown().await;
    }
    info!("all connections closed");
}

/// Builder for configuring and creating [`Server`] instances.
pub struct ServerBuilder {
    listener: Option<TcpListener>,
    router: Option<Router>,
    server_limits: Option<ServerLimits>,
    connection_limits: Option<ConnLimits>,
    h2_limits: Option<H2Limits>,
    shutdown_rx: Option<broadcast::Receiver<()>>,
}

impl ServerBuilder {
    /// Sets the TCP listener the server will accept connections from.
    ///
    /// **This is a required component.** See [`Server::bind`] for a
    /// listener with tuned socket options.
    #[inline]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Sets the route table. Registration is over once the server is
    /// built; the table is immutable while serving.
    ///
    /// **This is a required component.**
    #[inline]
    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    /// Overrides server-level limits (concurrency, shutdown grace).
    #[inline]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = Some(limits);
        self
    }

    /// Overrides per-connection limits (timeouts, sizes, keep-alive caps).
    #[inline]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.connection_limits = Some(limits);
        self
    }

    /// Overrides HTTP/2 framing limits.
    #[inline]
    pub fn h2_limits(mut self, limits: H2Limits) -> Self {
        self.h2_limits = Some(limits);
        self
    }

    /// Wires a [`Shutdown`] signal into the server. Without one the
    /// server runs until the process dies.
    #[inline]
    pub fn shutdown(mut self, shutdown: &Shutdown) -> Self {
        self.shutdown_rx = Some(shutdown.subscribe());
        self
    }

    /// Finalizes the builder and constructs a [`Server`] instance.
    ///
    /// # Panics
    ///
    /// Panics when the `listener` or `router` method was not called.
    #[inline]
    #[track_caller]
    pub fn build(self) -> Server {
        let listener = self
            .listener
            .expect("The `listener` method must be called to create");
        let router = self
            .router
            .expect("The `router` method must be called to create");

        Server {
            listener,
            dispatcher: Arc::new(Dispatcher::new(router.into_table())),
            limits: AllLimits {
                server: self.server_limits.unwrap_or_default(),
                conn: self.connection_limits.unwrap_or_default(),
                h2: self.h2_limits.unwrap_or_default(),
            },
            shutdown_rx: self.shutdown_rx,
        }
    }
}

#[cfg(test)]
mod server_self {
    use super::*;
    use crate::{
        http::{response::HttpResponse, types::StatusCode},
        router::table::handler,
    };
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn test_server() -> (SocketAddr, Shutdown, tokio::task::JoinHandle<()>) {
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

        let shutdown = Shutdown::new();
        let server = Server::builder()
            .listener(Server::bind("127.0.0.1:0".parse().unwrap()).unwrap())
            .router(router)
            .shutdown(&shutdown)
            .build();
        let addr = server.local_addr().unwrap();
        let task = tokio::spawn(server.launch());
        (addr, shutdown, task)
    }

    #[tokio::test]
    async fn serves_tcp_clients_and_shuts_down() {
        let (addr, shutdown, task) = test_server().await;

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /200 HTTP/1.1\r\nconnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "{text}");

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("launch must return after shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_with_no_connections_is_immediate() {
        let (_addr, shutdown, task) = test_server().await;
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("idle shutdown must not wait for the grace period")
            .unwrap();
    }

    #[test]
    #[should_panic(expected = "`router` method must be called")]
    fn build_without_router_panics() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = runtime.enter();
        let listener = Server::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let _ = Server::builder().listener(listener).build();
    }
}
