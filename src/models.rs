/// Wire and domain types shared by the backend client and the views.
///
/// Field names follow the backend's snake_case JSON. Everything here is owned
/// by the backend; the client only holds copies and replaces them wholesale
/// after each mutation.
use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ── Upload session ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionStatus {
    pub session_id: String,
    #[serde(default)]
    pub has_image: bool,
    #[serde(default)]
    pub image_path: Option<String>,
}

impl SessionStatus {
    /// The uploaded image reference, once the phone has delivered one.
    pub fn image(&self) -> Option<&str> {
        if !self.has_image {
            return None;
        }
        self.image_path.as_deref().filter(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReceipt {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub file_path: Option<String>,
}

// ── Chat ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Default)]
pub struct ChatRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_mission_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatReply {
    pub response: String,
    /// AI-assessed mastery of the active mission, 0–100
    #[serde(default)]
    pub understanding_score: Option<i64>,
    /// Short verdict for a progress report, recorded as the item's last result
    #[serde(default)]
    pub extracted_result: Option<String>,
}

// ── Plans ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanItem {
    pub id: i64,
    #[serde(default)]
    pub plan_id: i64,
    pub content: String,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub understanding_score: i64,
    #[serde(default)]
    pub last_result: Option<String>,
}

fn default_priority() -> u8 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(with = "timestamp")]
    pub created_at: NaiveDateTime,
    #[serde(default)]
    pub items: Vec<PlanItem>,
}

impl Plan {
    pub fn item(&self, item_id: i64) -> Option<&PlanItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn item_mut(&mut self, item_id: i64) -> Option<&mut PlanItem> {
        self.items.iter_mut().find(|i| i.id == item_id)
    }
}

/// Creation payload for `POST /plans/`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewPlan {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub items: Vec<NewPlanItem>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewPlanItem {
    pub content: String,
    pub priority: u8,
    pub is_completed: bool,
}

/// Body for `PUT /plans/{id}/items/{item_id}`. The backend only applies
/// `is_completed`, but validates the full item shape.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlanItemUpdate {
    pub content: String,
    pub priority: u8,
    pub is_completed: bool,
}

impl PlanItemUpdate {
    pub fn completion(item: &PlanItem, is_completed: bool) -> Self {
        Self {
            content: item.content.clone(),
            priority: item.priority,
            is_completed,
        }
    }
}

// ── Memos ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Memo {
    pub id: i64,
    pub content: String,
    #[serde(with = "timestamp")]
    pub created_at: NaiveDateTime,
}

// ── Settings ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LearningMode {
    #[default]
    Supportive,
    Exam,
}

impl LearningMode {
    /// Minimum understanding score before a mission may be completed.
    pub fn threshold(self) -> i64 {
        match self {
            LearningMode::Supportive => 60,
            LearningMode::Exam => 80,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LearningMode::Supportive => "supportive",
            LearningMode::Exam => "exam",
        }
    }
}

impl fmt::Display for LearningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LearningMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "supportive" => Ok(LearningMode::Supportive),
            "exam" => Ok(LearningMode::Exam),
            other => bail!("unknown learning mode '{other}' (expected supportive or exam)"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Settings {
    #[serde(default)]
    pub learning_mode: LearningMode,
}

// ── Timestamps ────────────────────────────────────────────────────────────────

/// The backend writes naive local timestamps (`2024-05-01T10:00:00.123456`).
/// Accept RFC 3339 as well and normalise it to naive UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{raw}'")))
    }

    pub fn parse(raw: &str) -> Option<NaiveDateTime> {
        let raw = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.naive_utc());
        }
        NaiveDateTime::parse_from_str(raw, FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
            .ok()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
