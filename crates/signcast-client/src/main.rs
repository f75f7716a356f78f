//! signcast display binary.
//!
//! Runs one display-role client from `SIGNCAST_DISPLAY_CONFIG` (or
//! ./signcast-display.yaml) and logs what the screen would show.
//! SIGHUP retries from offline; Ctrl-C disconnects cleanly.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing_subscriber::{fmt, EnvFilter};

use signcast_client::config;
use signcast_client::display::{ContentDirectory, DisplayEvent, DisplayHandler, HttpContentDirectory};
use signcast_client::{ChannelClient, ConnectionStatus};
use signcast_core::content::Presentation;
use signcast_core::error::Result;

const DEFAULT_CONFIG: &str = "signcast-display.yaml";
const CONTENT_API_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::var("SIGNCAST_DISPLAY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG.to_string());
    let cfg = config::load_from_file(&path)?;

    let directory: Option<Arc<dyn ContentDirectory>> = match &cfg.content_api_base_url {
        Some(base) => Some(Arc::new(HttpContentDirectory::new(base, CONTENT_API_TIMEOUT)?)),
        None => None,
    };
    let (events_tx, mut events_rx) = mpsc::channel(32);
    let handler = Arc::new(DisplayHandler::new(directory, events_tx));

    tracing::info!(url = %cfg.url, client_id = %cfg.client_id, config = %path, "signcast-display starting");
    let (client, task) = ChannelClient::new(cfg, handler).spawn();

    let mut status = client.watch_status();
    let mut hup = hangup();
    loop {
        tokio::select! {
            Some(ev) = events_rx.recv() => match ev {
                DisplayEvent::Show { content, presentation } => match presentation {
                    Presentation::Video { url } => tracing::info!(content_id = %content.id, %url, "playing video"),
                    Presentation::Image { url } => tracing::info!(content_id = %content.id, %url, "showing image"),
                    other => tracing::warn!(content_id = %content.id, ?other, "nothing to render"),
                },
                DisplayEvent::Text(message) => tracing::info!(%message, "text message"),
                DisplayEvent::Status(s) => tracing::info!(status = %s, "status update"),
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                if current == ConnectionStatus::Offline {
                    tracing::warn!("offline; send SIGHUP to retry");
                }
                if current.is_terminal() {
                    break;
                }
            }
            () = wait_hangup(&mut hup) => {
                tracing::info!("manual retry requested");
                client.retry();
            }
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    tracing::error!(error = %e, "ctrl-c handler failed");
                }
                client.disconnect();
                break;
            }
        }
    }

    let final_status = client.stopped().await;
    let _ = task.await;
    tracing::info!(status = %final_status, "signcast-display stopped");
    Ok(())
}

#[cfg(unix)]
type Hangup = Option<tokio::signal::unix::Signal>;
#[cfg(not(unix))]
type Hangup = ();

#[cfg(unix)]
fn hangup() -> Hangup {
    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()).ok()
}

#[cfg(not(unix))]
fn hangup() -> Hangup {}

#[cfg(unix)]
async fn wait_hangup(sig: &mut Hangup) {
    match sig {
        Some(s) => {
            if s.recv().await.is_none() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(not(unix))]
async fn wait_hangup(_sig: &mut Hangup) {
    std::future::pending::<()>().await
}
