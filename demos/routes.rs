//! The classic three-route deployment: a GET+POST route, a catch-all root,
//! and a nested GET route, showing every registration form.

use janus_web::{handler, HttpRequest, HttpResponse, Method, Router, Server, Shutdown, StatusCode};

async fn path_200(_req: HttpRequest, mut resp: HttpResponse) -> HttpResponse {
    resp.status(StatusCode::Ok).body("2");
    resp
}

async fn path_default(_req: HttpRequest, mut resp: HttpResponse) -> HttpResponse {
    resp.status(StatusCode::Ok).body("3");
    resp
}

async fn path_200_test(_req: HttpRequest, mut resp: HttpResponse) -> HttpResponse {
    resp.status(StatusCode::Ok);
    resp
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    let mut router = Router::new();
    router.route("/200", &[Method::Get, Method::Post], handler(path_200))?;
    router.any("/", handler(path_default))?;
    router.get("/200/test", handler(path_200_test))?;

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        trigger.trigger();
    });

    Server::builder()
        .listener(Server::bind("0.0.0.0:8080".parse()?)?)
        .router(router)
        .shutdown(&shutdown)
        .build()
        .launch()
        .await;
    Ok(())
}
