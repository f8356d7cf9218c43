/// Plan and memo views over the backend's collections.
///
/// Views hold a local copy and replace it wholesale after every mutation.
/// The only optimistic write is the checklist toggle, which is reverted if
/// the backend rejects it.
use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::client::Backend;
use crate::models::{Memo, Plan, PlanItemUpdate};

// ── Progress ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn of(plan: &Plan) -> Self {
        Self {
            completed: plan.items.iter().filter(|i| i.is_completed).count(),
            total: plan.items.len(),
        }
    }

    pub fn overall(plans: &[Plan]) -> Self {
        plans.iter().map(Progress::of).fold(Self::default(), |acc, p| Self {
            completed: acc.completed + p.completed,
            total: acc.total + p.total,
        })
    }

    /// Percentage rounded to the nearest whole number; 0 for an empty plan.
    pub fn percent(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        ((self.completed as f64 / self.total as f64) * 100.0).round() as u32
    }

    pub fn is_done(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }
}

// ── Plan board (list + detail) ────────────────────────────────────────────────

#[derive(Default)]
pub struct PlanBoard {
    plans: Vec<Plan>,
}

impl PlanBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }

    pub fn plan(&self, plan_id: i64) -> Option<&Plan> {
        self.plans.iter().find(|p| p.id == plan_id)
    }

    pub async fn refresh(&mut self, backend: &dyn Backend) -> Result<&[Plan]> {
        self.plans = backend.list_plans().await.context("Failed to fetch plans")?;
        Ok(self.plans.as_slice())
    }

    /// Fetch one plan and replace (or add) the local copy.
    pub async fn open(&mut self, backend: &dyn Backend, plan_id: i64) -> Result<&Plan> {
        let plan = backend
            .get_plan(plan_id)
            .await
            .with_context(|| format!("Plan {plan_id} not found"))?;
        let idx = match self.plans.iter().position(|p| p.id == plan_id) {
            Some(i) => {
                self.plans[i] = plan;
                i
            }
            None => {
                self.plans.push(plan);
                self.plans.len() - 1
            }
        };
        Ok(&self.plans[idx])
    }

    /// Flip an item's completion immediately, then confirm with the backend.
    /// On failure the item is restored to its prior value and the error is
    /// returned. This path is not gated by the understanding score.
    pub async fn toggle_item(
        &mut self,
        backend: &dyn Backend,
        plan_id: i64,
        item_id: i64,
    ) -> Result<bool> {
        let Some(item) = self
            .plans
            .iter_mut()
            .find(|p| p.id == plan_id)
            .and_then(|p| p.item_mut(item_id))
        else {
            bail!("Item {item_id} not found in plan {plan_id}");
        };

        let previous = item.is_completed;
        item.is_completed = !previous;
        let update = PlanItemUpdate::completion(item, !previous);

        match backend.update_plan_item(plan_id, item_id, &update).await {
            Ok(_) => {
                info!(plan_id, item_id, completed = !previous, "item toggled");
                Ok(!previous)
            }
            Err(e) => {
                warn!(plan_id, item_id, "toggle rejected, reverting: {e:#}");
                if let Some(item) = self
                    .plans
                    .iter_mut()
                    .find(|p| p.id == plan_id)
                    .and_then(|p| p.item_mut(item_id))
                {
                    item.is_completed = previous;
                }
                Err(e.context("Failed to update item"))
            }
        }
    }

    /// Record a report verdict on the local copy of an item.
    pub fn record_result(&mut self, item_id: i64, result: &str) {
        for plan in &mut self.plans {
            if let Some(item) = plan.item_mut(item_id) {
                item.last_result = Some(result.to_string());
            }
        }
    }

    pub async fn delete(&mut self, backend: &dyn Backend, plan_id: i64) -> Result<()> {
        backend
            .delete_plan(plan_id)
            .await
            .with_context(|| format!("Failed to delete plan {plan_id}"))?;
        self.plans.retain(|p| p.id != plan_id);
        Ok(())
    }
}

// ── Memo pad ──────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoPad {
    memos: Vec<Memo>,
}

impl MemoPad {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memos(&self) -> &[Memo] {
        &self.memos
    }

    pub async fn refresh(&mut self, backend: &dyn Backend) -> Result<&[Memo]> {
        self.memos = backend.list_memos().await.context("Failed to fetch memos")?;
        Ok(self.memos.as_slice())
    }

    pub async fn add(&mut self, backend: &dyn Backend, content: &str) -> Result<Memo> {
        if content.trim().is_empty() {
            bail!("Memo is empty");
        }
        let memo = backend
            .create_memo(content)
            .await
            .context("Failed to save memo")?;
        // The memo exists on the backend now; keep the local list in step
        let refreshed = self.refresh(backend).await.map(|_| ());
        if let Err(e) = refreshed {
            warn!(memo_id = memo.id, "memo saved but list refresh failed: {e:#}");
            self.memos.insert(0, memo.clone());
        }
        Ok(memo)
    }

    pub async fn remove(&mut self, backend: &dyn Backend, memo_id: i64) -> Result<()> {
        backend
            .delete_memo(memo_id)
            .await
            .with_context(|| format!("Failed to delete memo {memo_id}"))?;
        let refreshed = self.refresh(backend).await.map(|_| ());
        if let Err(e) = refreshed {
            warn!(memo_id, "memo deleted but list refresh failed: {e:#}");
            self.memos.retain(|m| m.id != memo_id);
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
