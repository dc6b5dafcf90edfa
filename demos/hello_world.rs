//! Minimal server: one route, both protocols, ctrl-c shutdown.
//!
//! Try it with:
//! ```text
//! curl http://127.0.0.1:8080/hello
//! curl --http2-prior-knowledge http://127.0.0.1:8080/hello
//! ```

use janus_web::{handler, HttpResponse, Router, Server, Shutdown, StatusCode};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "janus_web=debug".into()),
        )
        .init();

    let mut router = Router::new();
    router.get(
        "/hello",
        handler(|_req, mut resp: HttpResponse| async move {
            resp.status(StatusCode::Ok)
                .header("content-type", "text/plain")
                .body("Hello, world!\n");
            resp
        }),
    )?;

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        trigger.trigger();
    });

    Server::builder()
        .listener(Server::bind("127.0.0.1:8080".parse()?)?)
        .router(router)
        .shutdown(&shutdown)
        .build()
        .launch()
        .await;
    Ok(())
}
