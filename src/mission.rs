/// Mission tracking: which plan item the learner should work on next, how
/// well they understand it, and whether they may mark it done.
///
/// The mission is never stored. It is re-derived from the backend's plan list
/// after every mutation: the first incomplete, non-placeholder item across
/// plans in backend order. The understanding score for an item only ever goes
/// up within one run of the program.
///
/// States:
///   NoMission ──select──▶ Active(score) ──complete──▶ Complete
///        ▲                                               │
///        └──────────────── recompute ◀───────────────────┘
use std::collections::HashMap;

use anyhow::{Result, bail};
use tracing::{debug, info};

use crate::client::Backend;
use crate::models::{LearningMode, Plan, PlanItemUpdate};

// ── Mission ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Mission {
    pub item_id: i64,
    pub plan_id: i64,
    /// Title of the plan the item belongs to
    pub title: String,
    pub content: String,
    pub understanding_score: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MissionState {
    NoMission,
    Active(Mission),
    /// The item was just completed; the next recompute moves on.
    Complete { item_id: i64 },
}

/// Placeholder rows ("--", single characters) are noise, not work.
pub fn is_actionable(content: &str) -> bool {
    let trimmed = content.trim();
    trimmed != "--" && trimmed.chars().count() > 1
}

/// First incomplete, actionable item across `plans` in the given order.
pub fn select_mission(plans: &[Plan]) -> Option<Mission> {
    plans.iter().find_map(|plan| {
        plan.items
            .iter()
            .find(|item| !item.is_completed && is_actionable(&item.content))
            .map(|item| Mission {
                item_id: item.id,
                plan_id: plan.id,
                title: plan.title.clone(),
                content: item.content.trim().to_string(),
                understanding_score: item.understanding_score.clamp(0, 100),
            })
    })
}

// ── Tracker ───────────────────────────────────────────────────────────────────

pub struct MissionTracker {
    mode: LearningMode,
    state: MissionState,
    /// Highest score seen per item during this run
    best_scores: HashMap<i64, i64>,
}

impl MissionTracker {
    pub fn new(mode: LearningMode) -> Self {
        Self {
            mode,
            state: MissionState::NoMission,
            best_scores: HashMap::new(),
        }
    }

    pub fn state(&self) -> &MissionState {
        &self.state
    }

    pub fn mode(&self) -> LearningMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: LearningMode) {
        self.mode = mode;
    }

    pub fn threshold(&self) -> i64 {
        self.mode.threshold()
    }

    pub fn active(&self) -> Option<&Mission> {
        match &self.state {
            MissionState::Active(m) => Some(m),
            _ => None,
        }
    }

    pub fn active_item_id(&self) -> Option<i64> {
        self.active().map(|m| m.item_id)
    }

    /// Re-derive the mission from a fresh plan list.
    pub fn recompute(&mut self, plans: &[Plan]) -> &MissionState {
        self.state = match select_mission(plans) {
            Some(mut mission) => {
                let best = self
                    .best_scores
                    .entry(mission.item_id)
                    .or_insert(mission.understanding_score);
                if mission.understanding_score > *best {
                    *best = mission.understanding_score;
                }
                mission.understanding_score = *best;
                debug!(item_id = mission.item_id, score = mission.understanding_score, "mission selected");
                MissionState::Active(mission)
            }
            None => MissionState::NoMission,
        };
        &self.state
    }

    /// Offer a score from a chat or report reply. Adopted only when it beats
    /// the held score for the active item. Returns whether it was adopted.
    pub fn observe_score(&mut self, item_id: i64, score: i64) -> bool {
        let score = score.clamp(0, 100);
        let MissionState::Active(mission) = &mut self.state else {
            return false;
        };
        if mission.item_id != item_id || score <= mission.understanding_score {
            return false;
        }
        mission.understanding_score = score;
        self.best_scores.insert(item_id, score);
        info!(item_id, score, "understanding score raised");
        true
    }

    /// Whether the gated "complete" action is available.
    pub fn can_complete(&self) -> bool {
        self.active()
            .is_some_and(|m| m.understanding_score >= self.threshold())
    }

    /// Points still missing before completion unlocks (0 when unlocked).
    pub fn points_to_go(&self) -> Option<i64> {
        self.active()
            .map(|m| (self.threshold() - m.understanding_score).max(0))
    }

    /// Gated completion: refuses below the threshold, otherwise marks the
    /// active item complete on the backend.
    pub async fn complete(&mut self, backend: &dyn Backend) -> Result<i64> {
        let Some(mission) = self.active().cloned() else {
            bail!("No active mission");
        };
        if !self.can_complete() {
            bail!(
                "Understanding {} is below the {} threshold of {}",
                mission.understanding_score,
                self.mode,
                self.threshold()
            );
        }
        let plan = backend.get_plan(mission.plan_id).await?;
        let Some(item) = plan.item(mission.item_id) else {
            bail!("Mission item {} no longer exists", mission.item_id);
        };
        backend
            .update_plan_item(
                mission.plan_id,
                mission.item_id,
                &PlanItemUpdate::completion(item, true),
            )
            .await?;
        info!(item_id = mission.item_id, "mission complete");
        self.state = MissionState::Complete {
            item_id: mission.item_id,
        };
        Ok(mission.item_id)
    }

    /// One-line summary with mode-dependent copy.
    pub fn status_line(&self) -> String {
        match &self.state {
            MissionState::NoMission => {
                "No mission: every plan item is done. Ask the tutor for a new plan.".to_string()
            }
            MissionState::Complete { .. } => "Mission complete!".to_string(),
            MissionState::Active(m) => {
                let gate = match (self.can_complete(), self.mode) {
                    (true, _) => "ready to complete (/complete)".to_string(),
                    (false, LearningMode::Supportive) => format!(
                        "{} more points and you're there, keep going",
                        self.points_to_go().unwrap_or(0)
                    ),
                    (false, LearningMode::Exam) => {
                        format!("exam bar is {}", self.threshold())
                    }
                };
                format!(
                    "Mission [{}] {}  ·  understanding {}/100  ·  {gate}",
                    m.title, m.content, m.understanding_score
                )
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
