/// Chat with the tutor: an append-only transcript for this run only.
///
/// Each send appends the learner's turn (with the phone image, if one is
/// pending) and then either the tutor's reply or an apology. The pending
/// image is consumed by the send whether or not it succeeds.
use anyhow::Result;
use chrono::{Local, NaiveDateTime};
use tracing::{debug, warn};

use crate::client::Backend;
use crate::models::{ChatReply, ChatRequest};

/// Shown in place of the tutor's turn when the backend call fails.
pub const APOLOGY: &str = "Sorry, something went wrong while contacting the tutor. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Tutor,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    pub image: Option<String>,
    /// Set on tutor turns that stand in for a failed call
    pub failed: bool,
    pub at: NaiveDateTime,
}

impl ChatTurn {
    fn user(content: &str, image: Option<String>) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
            image,
            failed: false,
            at: Local::now().naive_local(),
        }
    }

    fn tutor(content: &str, failed: bool) -> Self {
        Self {
            role: Role::Tutor,
            content: content.to_string(),
            image: None,
            failed,
            at: Local::now().naive_local(),
        }
    }
}

#[derive(Default)]
pub struct ChatSession {
    transcript: Vec<ChatTurn>,
    pending_image: Option<String>,
    loading: bool,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transcript(&self) -> &[ChatTurn] {
        &self.transcript
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn pending_image(&self) -> Option<&str> {
        self.pending_image.as_deref()
    }

    pub fn attach_image(&mut self, image: String) {
        self.pending_image = Some(image);
    }

    pub fn clear_image(&mut self) -> Option<String> {
        self.pending_image.take()
    }

    /// Most recent successful tutor reply, the source for "save as plan".
    pub fn last_reply(&self) -> Option<&ChatTurn> {
        self.transcript
            .iter()
            .rev()
            .find(|t| t.role == Role::Tutor && !t.failed)
    }

    /// Record the learner's turn and build the request, taking the pending
    /// image. `None` when there is nothing to send. Sets the loading flag
    /// until `finish` is called.
    pub fn begin(
        &mut self,
        text: &str,
        session_id: Option<&str>,
        mission_id: Option<i64>,
    ) -> Option<ChatRequest> {
        let text = text.trim();
        if text.is_empty() && self.pending_image.is_none() {
            return None;
        }

        let image = self.pending_image.take();
        self.transcript.push(ChatTurn::user(text, image.clone()));
        self.loading = true;

        Some(ChatRequest {
            message: text.to_string(),
            session_id: session_id.map(str::to_string),
            image_url: image,
            current_mission_id: mission_id,
        })
    }

    /// Append the tutor's reply, or an apology if the call failed.
    pub fn finish(&mut self, result: Result<ChatReply>) -> Option<ChatReply> {
        self.loading = false;
        match result {
            Ok(reply) => {
                self.transcript.push(ChatTurn::tutor(&reply.response, false));
                Some(reply)
            }
            Err(e) => {
                warn!("chat failed: {e:#}");
                self.transcript.push(ChatTurn::tutor(APOLOGY, true));
                None
            }
        }
    }

    /// Send `text` (plus any pending image) to the tutor.
    ///
    /// Returns `None` when there was nothing to send or the call failed; in
    /// the failure case an apology turn is appended instead of a reply.
    pub async fn send(
        &mut self,
        backend: &dyn Backend,
        text: &str,
        session_id: Option<&str>,
        mission_id: Option<i64>,
    ) -> Option<ChatReply> {
        let request = self.begin(text, session_id, mission_id)?;
        debug!(has_image = request.image_url.is_some(), mission_id, "sending chat");
        let result = backend.send_chat(&request).await;
        self.finish(result)
    }

    /// Whether the most recent tutor turn stands in for a failed call.
    pub fn last_failed(&self) -> bool {
        self.transcript
            .last()
            .is_some_and(|t| t.role == Role::Tutor && t.failed)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
