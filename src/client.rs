//! HTTP client for the remote question-answering backend.
//!
//! The backend exposes a small surface: `POST /chat` answers a JSON query about the uploaded
//! documents, `POST /uploadfile` ingests one PDF into its document store, and `HEAD /docs`
//! doubles as a liveness probe.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::log::*;

/// Number of reachability probes attempted before giving up.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;

/// Delay between reachability probes.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Errors returned by backend requests.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The request failed, or the backend answered with an error status.
    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered successfully but the reply carried no result text.
    #[error("backend reply carried no result text")]
    MissingResult,
}

/// Client for a document question-answering backend.
#[derive(Debug, Clone)]
pub struct Backend {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    query: &'a str,
}

/// The reply nests the answer two levels deep; both levels are optional on the wire.
#[derive(Debug, Deserialize)]
struct ChatReply {
    response: Option<ChatResult>,
}

#[derive(Debug, Deserialize)]
struct ChatResult {
    result: Option<String>,
}

/// The backend's acknowledgment of a stored document.
#[derive(Debug, Deserialize)]
pub struct UploadReceipt {
    /// Name the backend stored the file under.
    pub filename: String,

    /// Human-readable ingestion summary.
    #[serde(default)]
    pub confirmation: String,
}

impl Backend {
    /// Creates a client for the backend at `base_url`, e.g. `http://localhost:8000`.
    pub fn new(base_url: impl Into<String>) -> Backend {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }

        Backend {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    /// The base URL this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Asks the backend a question about the uploaded documents and returns its answer text.
    pub async fn chat(&self, query: &str) -> Result<String, BackendError> {
        let reply: ChatReply = self
            .client
            .post(format!("{}/chat", self.base_url))
            .json(&ChatRequest { query })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        reply
            .response
            .and_then(|result| result.result)
            .ok_or(BackendError::MissingResult)
    }

    /// Uploads one PDF for ingestion into the backend's document store.
    pub async fn upload(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadReceipt, BackendError> {
        let part = Part::bytes(bytes)
            .file_name(filename.to_owned())
            .mime_str("application/pdf")?;

        let receipt = self
            .client
            .post(format!("{}/uploadfile", self.base_url))
            .multipart(Form::new().part("file", part))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(receipt)
    }

    /// Probes the backend to see whether it is up.
    pub async fn is_reachable(&self) -> bool {
        let probe = self
            .client
            .head(format!("{}/docs", self.base_url))
            .send()
            .await;

        match probe {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Polls [`is_reachable`](Self::is_reachable) until the backend answers, waiting `delay`
    /// between probes. Returns `false` once `attempts` probes have failed.
    pub async fn wait_until_reachable(&self, attempts: u32, delay: Duration) -> bool {
        for attempt in 1..=attempts {
            if self.is_reachable().await {
                return true;
            }

            info!("backend not reachable (attempt {}/{})", attempt, attempts);

            if attempt < attempts {
                tokio::time::sleep(delay).await;
            }
        }

        false
    }
}
