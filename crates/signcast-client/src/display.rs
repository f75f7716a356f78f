//! Display-role behavior.
//!
//! A screen resolves each broadcast to content metadata (inline or via the
//! content API), decides how to present it, and acknowledges with
//! `broadcast_received` or `broadcast_error`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

use signcast_core::content::{ContentRef, Presentation};
use signcast_core::error::{Result, SigncastError};
use signcast_core::protocol::{timestamp, ContentId, Envelope};

use crate::handler::EnvelopeHandler;
use crate::session::ClientHandle;

/// Content lookup by id.
#[async_trait]
pub trait ContentDirectory: Send + Sync {
    async fn fetch(&self, id: &ContentId) -> Result<ContentRef>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ContentResponse {
    Wrapped { data: ContentRef },
    Bare(ContentRef),
}

/// `GET {base}/api/contents/{id}`.
pub struct HttpContentDirectory {
    http: reqwest::Client,
    base_url: String,
}

impl HttpContentDirectory {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SigncastError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ContentDirectory for HttpContentDirectory {
    async fn fetch(&self, id: &ContentId) -> Result<ContentRef> {
        let url = format!("{}/api/contents/{}", self.base_url, id);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| SigncastError::Upstream(format!("content lookup failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SigncastError::Upstream(format!(
                "content {id} lookup returned {status}"
            )));
        }
        let body = resp
            .json::<ContentResponse>()
            .await
            .map_err(|e| SigncastError::Upstream(format!("invalid content record: {e}")))?;
        Ok(match body {
            ContentResponse::Wrapped { data } => data,
            ContentResponse::Bare(c) => c,
        })
    }
}

/// What the screen should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEvent {
    Show {
        content: ContentRef,
        presentation: Presentation,
    },
    Text(String),
    Status(String),
}

pub struct DisplayHandler {
    directory: Option<Arc<dyn ContentDirectory>>,
    events: mpsc::Sender<DisplayEvent>,
}

impl DisplayHandler {
    pub fn new(
        directory: Option<Arc<dyn ContentDirectory>>,
        events: mpsc::Sender<DisplayEvent>,
    ) -> Self {
        Self { directory, events }
    }

    async fn resolve(&self, id: &ContentId, inline: Option<ContentRef>) -> Result<ContentRef> {
        if let Some(content) = inline {
            return Ok(content);
        }
        match &self.directory {
            Some(dir) => dir.fetch(id).await,
            None => Err(SigncastError::Upstream(
                "no inline content and no content API configured".into(),
            )),
        }
    }

    async fn show(&self, content: ContentRef) -> Result<()> {
        let presentation = content.presentation();
        match &presentation {
            Presentation::Empty => {
                return Err(SigncastError::BadRequest(format!(
                    "content {} has no file",
                    content.id
                )))
            }
            Presentation::Unsupported { content_type } => {
                return Err(SigncastError::BadRequest(format!(
                    "unsupported content type {content_type}"
                )))
            }
            Presentation::Video { .. } | Presentation::Image { .. } => {}
        }
        self.emit(DisplayEvent::Show {
            content,
            presentation,
        })
        .await;
        Ok(())
    }

    async fn emit(&self, ev: DisplayEvent) {
        if self.events.send(ev).await.is_err() {
            tracing::debug!("display event receiver dropped");
        }
    }
}

#[async_trait]
impl EnvelopeHandler for DisplayHandler {
    async fn handle(&self, env: Envelope, client: &ClientHandle) {
        match env {
            Envelope::BroadcastContent {
                content_id, content, ..
            } => {
                let outcome = match self.resolve(&content_id, content).await {
                    Ok(content) => self.show(content).await,
                    Err(e) => Err(e),
                };
                let reply = match outcome {
                    Ok(()) => {
                        tracing::info!(%content_id, "broadcast shown");
                        Envelope::BroadcastReceived {
                            content_id,
                            client_id: Some(client.client_id().clone()),
                            status: "success".to_string(),
                            timestamp: Some(timestamp()),
                        }
                    }
                    Err(e) => {
                        tracing::warn!(%content_id, error = %e, "broadcast failed");
                        Envelope::BroadcastError {
                            content_id,
                            client_id: Some(client.client_id().clone()),
                            error: e.to_string(),
                            timestamp: Some(timestamp()),
                        }
                    }
                };
                if let Err(e) = client.send(reply) {
                    tracing::warn!(error = %e, "acknowledgement not sent");
                }
            }
            Envelope::ContentUpdate { content, .. } => {
                if let Err(e) = self.show(content).await {
                    tracing::warn!(error = %e, "content update ignored");
                }
            }
            Envelope::StatusUpdate { status, .. } => self.emit(DisplayEvent::Status(status)).await,
            Envelope::TextMessage { message, .. } => self.emit(DisplayEvent::Text(message)).await,
            other => tracing::debug!(kind = other.kind(), "ignored by display"),
        }
    }
}
