/// "Save as plan": turn a tutor reply into a checklist.
///
/// Best-effort extraction from natural language, not a grammar. Bullet-ish
/// lines become items; anything else is ignored. When nothing looks like a
/// bullet the whole reply becomes one truncated item so the save never comes
/// back empty.
use anyhow::{Result, bail};
use tracing::info;

use crate::client::Backend;
use crate::models::{NewPlan, NewPlanItem, Plan};

/// Characters kept from the reply when no bullet lines are found.
const FALLBACK_CHARS: usize = 100;
/// Number of leading items that get priority 1.
const HIGH_PRIORITY_ITEMS: usize = 2;

/// Strip a leading `-`, `*` or `12.` marker. `None` if the line has none.
fn strip_bullet(line: &str) -> Option<&str> {
    if let Some(rest) = line.strip_prefix('-').or_else(|| line.strip_prefix('*')) {
        return Some(rest);
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        return line[digits..].strip_prefix('.');
    }
    None
}

/// The item text for one line of a reply, if the line is a list entry.
pub fn item_text(line: &str) -> Option<String> {
    let line = line.trim();
    if line.starts_with("---") {
        return None;
    }
    let rest = strip_bullet(line)?;
    let text = rest.replace("**", "").replace("__", "");
    let text = text.trim();
    if text.chars().count() > 1 {
        Some(text.to_string())
    } else {
        None
    }
}

/// Split a reply into prioritised checklist items.
pub fn parse_plan_items(content: &str) -> Vec<NewPlanItem> {
    let mut items: Vec<NewPlanItem> = content
        .lines()
        .filter_map(item_text)
        .enumerate()
        .map(|(i, text)| NewPlanItem {
            content: text,
            priority: if i < HIGH_PRIORITY_ITEMS { 1 } else { 2 },
            is_completed: false,
        })
        .collect();

    if items.is_empty() {
        let head: String = content.chars().take(FALLBACK_CHARS).collect();
        items.push(NewPlanItem {
            content: format!("{head}..."),
            priority: 1,
            is_completed: false,
        });
    }
    items
}

/// Whether `parse_plan_items` would have to fall back to the whole reply.
pub fn has_list_items(content: &str) -> bool {
    content.lines().any(|l| item_text(l).is_some())
}

/// Build the creation payload. An empty title aborts the save.
pub fn build_plan(title: &str, target: Option<&str>, content: &str) -> Result<NewPlan> {
    let title = title.trim();
    if title.is_empty() {
        bail!("Plan title is empty, nothing saved");
    }
    Ok(NewPlan {
        title: title.to_string(),
        target: target
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string),
        items: parse_plan_items(content),
    })
}

/// Extract and submit in one create call; the backend either stores the
/// whole plan or nothing.
pub async fn save_as_plan(
    backend: &dyn Backend,
    title: &str,
    target: Option<&str>,
    content: &str,
) -> Result<Plan> {
    let new_plan = build_plan(title, target, content)?;
    let plan = backend.create_plan(&new_plan).await?;
    info!(plan_id = plan.id, items = plan.items.len(), "plan saved");
    Ok(plan)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
