//! plinius is a local chat client for document question-answering backends.
//!
//! This crate provides a [`Server`] that puts a chat page in your browser for a remote
//! retrieval-backed QA service: upload PDF files, ask questions about them, and read the
//! backend's answers as formatted chat bubbles. The page itself is a thin display surface —
//! the conversation logic lives here. Queries typed into the page travel over a websocket,
//! are forwarded to the backend's `/chat` endpoint, and come back as HTML rendered by the
//! crate's own [`MarkdownRenderer`]; file drops are forwarded to the backend's ingestion
//! endpoint. Arbitrary renderers are supported through the [`Renderer`] trait.
//!
//! # Example
//!
//! ```no_run
//! use std::net::SocketAddr;
//! use plinius::{Backend, MarkdownRenderer, Server};
//!
//! # tokio_test::block_on(async {
//! let addr = "127.0.0.1:1337".parse::<SocketAddr>()?;
//! let backend = Backend::new("http://localhost:8000");
//! let server = Server::bind(&addr, backend, MarkdownRenderer::new()).await?;
//!
//! server.open_browser()?;
//!
//! server.send("**Welcome!** Upload a document to begin.").await?;
//! #   Ok::<_, Box<dyn std::error::Error + Send + Sync>>(())
//! # });
//! ```
//!
//! # Why the name?
//! Pliny the Elder (Gaius Plinius Secundus) wrote the *Naturalis Historia*, an attempt to fit
//! every answerable question between two covers. A program that answers questions out of a
//! pile of documents seemed well served by the family name.

#![warn(missing_debug_implementations)]
#![warn(missing_docs)]

use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, RwLock};

use axum::{
    extract::Extension,
    http::Uri,
    routing::{get, post},
    Router,
};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::sync::watch::{self, Sender};
use tower_http::trace::TraceLayer;
use tracing::log::*;

pub mod client;
pub mod render;
mod service;

pub use crate::client::{Backend, BackendError, UploadReceipt};
pub use crate::render::{MarkdownRenderer, Renderer};

/// Bubble shown when a chat request to the backend fails outright.
pub(crate) const REQUEST_FAILED_REPLY: &str =
    "Sorry, there was an error processing your request. Please try again.";

/// Bubble shown when the backend answers without any result text.
pub(crate) const EMPTY_RESULT_REPLY: &str = "Sorry, I could not process your request.";

/// Local chat server.
///
/// Listens for HTTP connections and serves a chat page for a remote document QA backend. The
/// page opens a websocket back to the server; each text frame from the page is a user query,
/// forwarded to the backend and answered with a rendered HTML bubble on the same connection.
/// Messages published through [`send`][Self::send] or [`ask`][Self::ask] go to every connected
/// page instead, and a message published while no page is connected is delivered to the next
/// page that connects.
///
/// The server is asynchronous, and assumes that a `tokio` runtime is in use.
pub struct Server<R> {
    addr: SocketAddr,
    config: Arc<RwLock<Config>>,
    ctx: Arc<ChatContext<R>>,
    tx: Sender<String>,
    _shutdown_tx: oneshot::Sender<()>,
}

impl<R> Server<R>
where
    R: Renderer + Send + Sync + 'static,
    R::Error: Error + Send + Sync + 'static,
{
    /// Binds the server to a specified address `addr`, conversing with the QA service behind
    /// `backend` and rendering its answers with `renderer`.
    ///
    /// Binding to port 0 will request a port assignment from the OS. Use [`addr()`][Self::addr]
    /// to determine what port was assigned.
    ///
    /// The server must be bound using a Tokio runtime.
    pub async fn bind(addr: &SocketAddr, backend: Backend, renderer: R) -> io::Result<Server<R>> {
        let (tx, rx) = watch::channel(String::new());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let config = Arc::default();
        let ctx = Arc::new(ChatContext { renderer, backend });

        let app = Router::new()
            .route("/", get(service::chat_handler::<R>))
            .route("/__/*path", get(service::serve_asset))
            .route("/upload", post(service::upload::<R>))
            .layer(Extension(Arc::clone(&config)))
            .layer(Extension(Arc::clone(&ctx)))
            .layer(Extension(rx))
            .layer(TraceLayer::new_for_http());

        let http_server = axum::Server::bind(addr).serve(app.into_make_service());

        let addr = http_server.local_addr();
        info!("listening on {:?}", addr);

        let http_server = http_server.with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });

        tokio::spawn(http_server);

        Ok(Server {
            addr,
            config,
            ctx,
            tx,
            _shutdown_tx: shutdown_tx,
        })
    }

    /// Returns the socket address that the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The backend this server forwards queries and uploads to.
    pub fn backend(&self) -> &Backend {
        self.ctx.backend()
    }

    /// Renders `markdown` and publishes it to every connected chat page as a bot bubble.
    pub async fn send(&self, markdown: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
        let html = self.ctx.render(markdown)?;

        self.tx.send_replace(html);

        Ok(())
    }

    /// Asks the backend `query` and publishes the rendered answer to every connected page.
    ///
    /// Backend failures are not surfaced as errors here; they become the same fallback bubbles
    /// a page-initiated query would produce.
    pub async fn ask(&self, query: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
        let html = self.ctx.answer(query).await?;

        self.tx.send_replace(html);

        Ok(())
    }

    /// Sets the greeting shown as the first bot bubble when a page loads.
    ///
    /// The greeting is markdown and goes through the same renderer as backend answers.
    pub fn set_greeting(&mut self, greeting: impl Into<String>) {
        self.config.write().unwrap().greeting = Some(greeting.into());
    }

    /// Set custom CSS links and files to be served with the chat page.
    ///
    /// Accepts URLs and absolute paths. URLs will be inserted as `<link>` tags. The contents of
    /// the paths will be read from disk and served in `<style>` tags.
    pub fn set_custom_css(&mut self, stylesheets: Vec<String>) -> io::Result<()> {
        let mut files = vec![];
        let mut links = vec![];

        for stylesheet in &stylesheets {
            // NB: Absolute paths on Windows will parse as URLs.
            match stylesheet.parse::<Uri>() {
                Ok(url)
                    if url.scheme_str() == Some("http") || url.scheme_str() == Some("https") =>
                {
                    links.push(url)
                }
                _ => files.push(Path::new(stylesheet.trim_start_matches("file://"))),
            }
        }

        let mut config = self.config.write().unwrap();

        config.custom_styles = files
            .into_iter()
            .map(fs::read_to_string)
            .collect::<Result<Vec<_>, _>>()?;
        config.css_links = links;

        Ok(())
    }

    /// Opens the user's default browser with the server's URL in the background.
    ///
    /// This function uses platform-specific utilities to determine the browser. The following
    /// platforms are supported:
    ///
    /// | Platform | Program    |
    /// | -------- | ---------- |
    /// | Linux    | `xdg-open` |
    /// | OS X     | `open -g`  |
    /// | Windows  | `explorer` |
    pub fn open_browser(&self) -> io::Result<()> {
        let command = if cfg!(target_os = "macos") {
            let mut command = Command::new("open");
            command.arg("-g");
            command
        } else if cfg!(target_os = "windows") {
            Command::new("explorer")
        } else {
            Command::new("xdg-open")
        };

        self.open_specific_browser(command)
    }

    /// Opens a browser with a specified command. The HTTP address of the server will be appended
    /// to the command as an argument.
    pub fn open_specific_browser(&self, mut command: Command) -> io::Result<()> {
        command.arg(&format!("http://{}", self.addr()));

        command.stdout(Stdio::null()).stderr(Stdio::null());

        info!("spawning browser: {:?}", command);
        command.spawn()?;
        Ok(())
    }
}

impl<R> fmt::Debug for Server<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Server")
            .field("addr", &self.addr)
            .field("config", &self.config)
            .field("ctx", &"(ChatContext)")
            .field("tx", &self.tx)
            .field("_shutdown_tx", &self._shutdown_tx)
            .finish()
    }
}

/// State shared between the [`Server`] handle and the HTTP handlers.
pub(crate) struct ChatContext<R> {
    renderer: R,
    backend: Backend,
}

impl<R> ChatContext<R>
where
    R: Renderer,
    R::Error: Error + Send + Sync + 'static,
{
    pub(crate) fn backend(&self) -> &Backend {
        &self.backend
    }

    pub(crate) fn render(&self, input: &str) -> Result<String, R::Error> {
        let mut html = String::with_capacity(self.renderer.size_hint(input));

        self.renderer.render(input, &mut html)?;

        Ok(html)
    }

    /// Asks the backend and renders its answer. Backend failures map to the canned fallback
    /// bubbles rather than errors; only the renderer can fail here.
    pub(crate) async fn answer(&self, query: &str) -> Result<String, R::Error> {
        let reply = match self.backend.chat(query).await {
            Ok(text) => text,
            Err(BackendError::MissingResult) => {
                warn!("backend reply carried no result text");
                String::from(EMPTY_RESULT_REPLY)
            }
            Err(err) => {
                warn!("chat request failed: {}", err);
                String::from(REQUEST_FAILED_REPLY)
            }
        };

        self.render(&reply)
    }
}

#[derive(Debug)]
pub(crate) struct Config {
    pub(crate) greeting: Option<String>,
    pub(crate) css_links: Vec<Uri>,
    pub(crate) custom_styles: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            greeting: Some(String::from(
                "Hello! Upload your PDF documents and ask me anything about them.",
            )),
            css_links: vec![],
            custom_styles: vec![],
        }
    }
}
