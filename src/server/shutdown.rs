//! Graceful-shutdown coordination

use tokio::sync::broadcast;

/// Broadcast-based shutdown signal for a running [`Server`](crate::Server).
///
/// Create one, hand it to the builder, keep it, and call
/// [`trigger`](Shutdown::trigger) when it is time to stop - typically from
/// a ctrl-c or SIGTERM task. The server then stops accepting, lets
/// in-flight connections drain within the configured grace period, and
/// aborts whatever remains.
///
/// # Examples
///
/// ```no_run
/// # async fn demo(server: janus_web::Server) {
/// use janus_web::Shutdown;
///
/// let shutdown = Shutdown::new();
/// let trigger = shutdown.clone();
/// tokio::spawn(async move {
///     tokio::signal::ctrl_c().await.ok();
///     trigger.trigger();
/// });
/// # }
/// ```
#[derive(Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Signal every subscribed server to begin draining.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
