use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use axum::{
    extract::{
        self,
        ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade},
        Extension, Multipart,
    },
    http::{header, HeaderMap, StatusCode, Uri},
    response::{Html, IntoResponse},
    Json,
};
use futures_util::future;
use handlebars::Handlebars;
use include_dir::{include_dir, Dir};
use serde::Serialize;
use serde::Serializer;
use tokio::sync::watch::Receiver;
use tracing::log::*;

use crate::render::Renderer;
use crate::{ChatContext, Config};

const STATIC_FILES: Dir = include_dir!("$CARGO_MANIFEST_DIR/static");

/// Per-request cap, matching what the backend is comfortable ingesting at once.
const MAX_FILES_PER_UPLOAD: usize = 5;

pub(crate) async fn serve_asset(extract::Path(path): extract::Path<PathBuf>) -> impl IntoResponse {
    let path = path.strip_prefix("/").unwrap_or(&path);

    let file = match STATIC_FILES.get_file(&path) {
        Some(file) => file,
        None => return Err((StatusCode::NOT_FOUND, "file not found")),
    };

    let mime = mime_guess::from_path(&path);

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        mime.first_or_octet_stream().to_string().parse().unwrap(),
    );

    Ok((headers, file.contents()))
}

/// Serves the chat page, or upgrades to the conversation websocket when asked to.
pub(crate) async fn chat_handler<R>(
    ws: Option<WebSocketUpgrade>,
    Extension(config): Extension<Arc<RwLock<Config>>>,
    Extension(ctx): Extension<Arc<ChatContext<R>>>,
    Extension(html_rx): Extension<Receiver<String>>,
) -> impl IntoResponse
where
    R: Renderer + Send + Sync + 'static,
    R::Error: std::error::Error + Send + Sync + 'static,
{
    if let Some(ws) = ws {
        ws.on_upgrade(|socket| async move { handle_websocket(socket, html_rx, ctx).await })
    } else {
        let (greeting, css_links, custom_styles) = {
            let config = config.read().unwrap();

            (
                config.greeting.clone(),
                config.css_links.clone(),
                config.custom_styles.clone(),
            )
        };

        // The greeting is markdown and goes through the same pipeline as backend answers.
        let greeting = greeting.and_then(|markdown| match ctx.render(&markdown) {
            Ok(html) => Some(html),
            Err(err) => {
                warn!("failed to render greeting: {}", err);
                None
            }
        });

        let html = Handlebars::new()
            .render_template(
                include_str!("../templates/chat_view.html"),
                &TemplateData {
                    use_default_css: css_links.is_empty() && custom_styles.is_empty(),
                    remote_custom_css: &css_links,
                    local_custom_css: &custom_styles,
                    greeting,
                },
            )
            .unwrap();

        (StatusCode::OK, Html(html)).into_response()
    }
}

/// The conversation loop: text frames from the page are user queries, text frames to the page
/// are rendered bot bubbles. Broadcasts published through the server handle are forwarded to
/// every connection; answers to a query go back on the connection that asked.
async fn handle_websocket<R>(
    mut socket: WebSocket,
    mut html_rx: Receiver<String>,
    ctx: Arc<ChatContext<R>>,
) where
    R: Renderer + Send + Sync + 'static,
    R::Error: std::error::Error + Send + Sync + 'static,
{
    loop {
        tokio::select! {
            changed = html_rx.changed() => {
                // The sender half lives in the server handle; closure means shutdown.
                if changed.is_err() {
                    break;
                }

                let html = html_rx.borrow().clone();
                if socket.send(AxumMessage::Text(html)).await.is_err() {
                    return;
                }
            }
            message = socket.recv() => {
                let query = match message {
                    Some(Ok(AxumMessage::Text(query))) => query,
                    Some(Ok(AxumMessage::Close(_))) | Some(Err(_)) | None => return,
                    Some(Ok(_)) => continue,
                };

                if query.trim().is_empty() {
                    continue;
                }

                debug!("received query: {}", query);

                match ctx.answer(&query).await {
                    Ok(html) => {
                        if socket.send(AxumMessage::Text(html)).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => warn!("failed to render reply: {}", err),
                }
            }
        }
    }

    let _ = socket.send(AxumMessage::Close(None)).await;
}

#[derive(Debug, Serialize)]
pub(crate) struct UploadSummary {
    uploaded: usize,
    total: usize,
    message: String,
}

/// Accepts PDF uploads from the page and forwards them to the backend for ingestion.
pub(crate) async fn upload<R>(
    Extension(ctx): Extension<Arc<ChatContext<R>>>,
    mut multipart: Multipart,
) -> impl IntoResponse
where
    R: Renderer + Send + Sync + 'static,
    R::Error: std::error::Error + Send + Sync + 'static,
{
    let mut files = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return Err((StatusCode::BAD_REQUEST, err.to_string())),
        };

        let filename = field.file_name().unwrap_or_default().to_owned();

        let content_type = field.content_type().map(|mime| mime.to_string());
        let is_pdf = content_type.as_deref() == Some("application/pdf")
            || filename.to_lowercase().ends_with(".pdf");
        if !is_pdf {
            return Err((
                StatusCode::BAD_REQUEST,
                String::from("Please select PDF files only."),
            ));
        }

        let bytes = match field.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(err) => return Err((StatusCode::BAD_REQUEST, err.to_string())),
        };

        files.push((filename, bytes));
    }

    if files.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            String::from("Please select PDF files only."),
        ));
    }

    if files.len() > MAX_FILES_PER_UPLOAD {
        return Err((
            StatusCode::BAD_REQUEST,
            String::from("Maximum 5 files allowed at once."),
        ));
    }

    let uploads = files.into_iter().map(|(filename, bytes)| {
        let ctx = Arc::clone(&ctx);

        async move {
            match ctx.backend().upload(&filename, bytes).await {
                Ok(receipt) => {
                    info!("stored {}: {}", receipt.filename, receipt.confirmation);
                    true
                }
                Err(err) => {
                    warn!("upload of {} failed: {}", filename, err);
                    false
                }
            }
        }
    });

    let results = future::join_all(uploads).await;

    let total = results.len();
    let uploaded = results.into_iter().filter(|stored| *stored).count();

    let message = if uploaded == total {
        format!("Successfully uploaded and processed {} file(s)!", uploaded)
    } else {
        format!(
            "Uploaded {}/{} files. Some files failed to process.",
            uploaded, total
        )
    };

    Ok(Json(UploadSummary {
        uploaded,
        total,
        message,
    }))
}

#[derive(Debug, Serialize)]
struct TemplateData<'a> {
    use_default_css: bool,
    #[serde(serialize_with = "serialize_uris_as_strings")]
    remote_custom_css: &'a [Uri],
    local_custom_css: &'a [String],
    greeting: Option<String>,
}

fn serialize_uris_as_strings<S>(uris: &[Uri], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_seq(uris.iter().map(Uri::to_string))
}
