/// Cross-device image upload.
///
/// Desktop side: allocate an upload session on the backend, show a QR code
/// for `{mobile_base}/mobile/{session_id}`, then poll the session until the
/// phone has delivered an image. The poller is a spawned task owned by a
/// `PollHandle`; dropping the handle (or replacing the session) aborts it.
///
/// Phone side (`MobileUpload`): push exactly one file into a session, then
/// stop for good.
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::app::UiEvent;
use crate::client::Backend;
use crate::models::UploadReceipt;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

// ── Deep link + QR ────────────────────────────────────────────────────────────

pub fn deep_link(mobile_base: &str, session_id: &str) -> String {
    format!("{}/mobile/{}", mobile_base.trim_end_matches('/'), session_id)
}

/// Render `payload` as a block-character QR code for the terminal.
pub fn render_qr(payload: &str) -> Result<String> {
    let code = qrcode::QrCode::new(payload.as_bytes())?;
    Ok(code
        .render::<char>()
        .quiet_zone(false)
        .module_dimensions(2, 1)
        .build())
}

// ── Poller ────────────────────────────────────────────────────────────────────

/// Cancellable status poll for one session.
pub struct PollHandle {
    session_id: String,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Start polling `session_id` every `period` (first check one period
    /// from now). Emits a single `UiEvent::ImageReady` and exits once the
    /// backend reports an image.
    pub fn spawn(
        backend: Arc<dyn Backend>,
        session_id: String,
        period: Duration,
        events: UnboundedSender<UiEvent>,
    ) -> Self {
        let id = session_id.clone();
        let task = tokio::spawn(async move {
            poll_until_image(backend, id, period, events).await;
        });
        Self { session_id, task }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn poll_until_image(
    backend: Arc<dyn Backend>,
    session_id: String,
    period: Duration,
    events: UnboundedSender<UiEvent>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match backend.session_status(&session_id).await {
            Ok(status) => {
                if let Some(path) = status.image() {
                    info!(%session_id, image = path, "image received");
                    let _ = events.send(UiEvent::ImageReady {
                        session_id: session_id.clone(),
                        image_path: path.to_string(),
                    });
                    return;
                }
                debug!(%session_id, "no image yet");
            }
            // Transient: keep polling
            Err(e) => warn!(%session_id, "upload status poll failed: {e:#}"),
        }
        if events.is_closed() {
            return;
        }
    }
}

// ── Desktop handshake ─────────────────────────────────────────────────────────

struct LinkedSession {
    id: String,
    deep_link: String,
    /// None if the link could not be encoded; the link is still printable
    qr: Option<String>,
    image_received: bool,
}

pub struct UploadHandshake {
    backend: Arc<dyn Backend>,
    mobile_base: String,
    period: Duration,
    events: UnboundedSender<UiEvent>,
    session: Option<LinkedSession>,
    poller: Option<PollHandle>,
    show_qr: bool,
}

impl UploadHandshake {
    pub fn new(
        backend: Arc<dyn Backend>,
        mobile_base: String,
        period: Duration,
        events: UnboundedSender<UiEvent>,
    ) -> Self {
        Self {
            backend,
            mobile_base,
            period,
            events,
            session: None,
            poller: None,
            show_qr: false,
        }
    }

    /// Allocate a session and start polling it. Returns false (and leaves the
    /// upload feature switched off) if the backend could not create one.
    pub async fn start(&mut self) -> bool {
        self.stop_polling();
        self.session = None;
        self.show_qr = false;

        let status = match self.backend.create_session().await {
            Ok(s) => s,
            Err(e) => {
                warn!("could not create upload session, phone upload disabled: {e:#}");
                return false;
            }
        };

        let link = deep_link(&self.mobile_base, &status.session_id);
        let qr = match render_qr(&link) {
            Ok(q) => Some(q),
            Err(e) => {
                warn!("could not render QR for {link}: {e}");
                None
            }
        };
        info!(session_id = %status.session_id, %link, "upload session ready");

        self.poller = Some(PollHandle::spawn(
            Arc::clone(&self.backend),
            status.session_id.clone(),
            self.period,
            self.events.clone(),
        ));
        self.session = Some(LinkedSession {
            id: status.session_id,
            deep_link: link,
            qr,
            image_received: false,
        });
        true
    }

    /// Replace the current session with a fresh one. The old poller is
    /// cancelled before the new session exists.
    pub async fn restart(&mut self) -> bool {
        self.start().await
    }

    pub fn stop_polling(&mut self) {
        if let Some(p) = self.poller.take() {
            debug!(session_id = p.session_id(), "poller stopped");
            p.stop();
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(|p| !p.is_finished())
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    pub fn deep_link(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.deep_link.as_str())
    }

    pub fn qr(&self) -> Option<&str> {
        self.session.as_ref().and_then(|s| s.qr.as_deref())
    }

    pub fn qr_visible(&self) -> bool {
        self.show_qr && self.session.is_some()
    }

    /// Flip the QR overlay. Stays hidden when there is no session.
    pub fn toggle_qr(&mut self) -> bool {
        self.show_qr = self.session.is_some() && !self.show_qr;
        self.show_qr
    }

    pub fn image_received(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.image_received)
    }

    /// Apply an `ImageReady` event. Returns the image reference if it belongs
    /// to the current session; stale events from replaced sessions are ignored.
    pub fn on_image_ready(&mut self, session_id: &str, image_path: &str) -> Option<String> {
        let session = self.session.as_mut()?;
        if session.id != session_id {
            debug!(stale = session_id, current = %session.id, "ignoring image for old session");
            return None;
        }
        session.image_received = true;
        self.show_qr = false;
        self.stop_polling();
        Some(image_path.to_string())
    }
}

// ── Phone side ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum MobileState {
    Idle,
    Uploading,
    /// Terminal: the session has its image
    Done { file_path: Option<String> },
}

pub struct MobileUpload {
    session_id: String,
    state: MobileState,
}

impl MobileUpload {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            state: MobileState::Idle,
        }
    }

    pub fn state(&self) -> &MobileState {
        &self.state
    }

    /// Send `path` to the session. One file per session: once done, further
    /// sends are refused. A failure returns to `Idle` without retrying.
    pub async fn send(&mut self, backend: &dyn Backend, path: &Path) -> Result<UploadReceipt> {
        match self.state {
            MobileState::Done { .. } => bail!("This session already has its image"),
            MobileState::Uploading => bail!("Upload already in progress"),
            MobileState::Idle => {}
        }
        if self.session_id.trim().is_empty() {
            bail!("No upload session id");
        }

        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.jpg")
            .to_string();

        self.state = MobileState::Uploading;
        match backend.upload_image(&self.session_id, &file_name, bytes).await {
            Ok(receipt) => {
                info!(session_id = %self.session_id, file = %file_name, "upload done");
                self.state = MobileState::Done {
                    file_path: receipt.file_path.clone(),
                };
                Ok(receipt)
            }
            Err(e) => {
                self.state = MobileState::Idle;
                Err(e)
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
