use std::env;

use futures::future;
use tokio::net::lookup_host;
use tracing::log::*;

use plinius::client::{DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY};
use plinius::{Backend, MarkdownRenderer, Server};

const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let backend_url = env::args()
        .nth(1)
        .or_else(|| env::var("PLINIUS_BACKEND").ok())
        .unwrap_or_else(|| String::from(DEFAULT_BACKEND_URL));

    let backend = Backend::new(backend_url);

    if !backend
        .wait_until_reachable(DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY)
        .await
    {
        warn!(
            "backend at {} is not answering; starting anyway, queries will fail until it comes up",
            backend.base_url()
        );
    }

    let addr = lookup_host("localhost:0").await?.next().unwrap();
    let server = Server::bind(&addr, backend, MarkdownRenderer::new()).await?;

    println!("chat page at http://{}", server.addr());
    server.open_browser()?;

    let () = future::pending().await;

    Ok(())
}
