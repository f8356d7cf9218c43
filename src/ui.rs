/// Plain-stdout rendering shared by the interactive loop and one-shot flags.
use crate::chat::{ChatTurn, Role};
use crate::models::{Memo, Plan};
use crate::plans::Progress;

const BAR_WIDTH: usize = 20;

// ── Glyphs ────────────────────────────────────────────────────────────────────

pub fn check_glyph(done: bool) -> &'static str {
    if done { "☑" } else { "☐" }
}

pub fn role_glyph(role: Role) -> &'static str {
    match role {
        Role::User  => "❯",
        Role::Tutor => "◆",
    }
}

// ── Progress ──────────────────────────────────────────────────────────────────

pub fn progress_bar(progress: Progress) -> String {
    let filled = if progress.total == 0 {
        0
    } else {
        (progress.completed * BAR_WIDTH + progress.total / 2) / progress.total
    };
    format!(
        "{}{} {:>3}% ({}/{})",
        "█".repeat(filled),
        "░".repeat(BAR_WIDTH - filled),
        progress.percent(),
        progress.completed,
        progress.total
    )
}

/// Compact dashboard: overall progress plus the first two plans.
pub fn dashboard(plans: &[Plan]) -> String {
    let mut out = format!("  overall  {}\n", progress_bar(Progress::overall(plans)));
    for plan in plans.iter().take(2) {
        let title: String = plan.title.chars().take(24).collect();
        out.push_str(&format!("  {title:<24} {:>3}%\n", Progress::of(plan).percent()));
    }
    out
}

// ── Plans ─────────────────────────────────────────────────────────────────────

pub fn plan_list(plans: &[Plan]) -> String {
    if plans.is_empty() {
        return "  No plans yet. Ask the tutor for a study plan, then /save <title>.\n".to_string();
    }
    let mut out = String::new();
    for plan in plans {
        out.push_str(&format!(
            "  #{:<4} {}  ·  {}\n",
            plan.id,
            plan.title,
            plan.created_at.format("%Y-%m-%d")
        ));
        if let Some(target) = plan.target.as_deref().filter(|t| !t.is_empty()) {
            out.push_str(&format!("         target: {target}\n"));
        }
        out.push_str(&format!("         {}\n", progress_bar(Progress::of(plan))));
    }
    out
}

pub fn plan_detail(plan: &Plan) -> String {
    let mut out = format!("  #{} {}\n", plan.id, plan.title);
    if let Some(target) = plan.target.as_deref().filter(|t| !t.is_empty()) {
        out.push_str(&format!("  target: {target}\n"));
    }
    out.push_str(&format!("  {}\n\n", progress_bar(Progress::of(plan))));
    for item in &plan.items {
        let prio = if item.priority <= 1 { "!" } else { " " };
        out.push_str(&format!(
            "  {} {prio} [{}] {}  ({}/100)\n",
            check_glyph(item.is_completed),
            item.id,
            item.content,
            item.understanding_score
        ));
        if let Some(result) = &item.last_result {
            out.push_str(&format!("        ↳ {result}\n"));
        }
    }
    out
}

// ── Memos ─────────────────────────────────────────────────────────────────────

pub fn memo_list(memos: &[Memo]) -> String {
    if memos.is_empty() {
        return "  No memos.\n".to_string();
    }
    memos
        .iter()
        .map(|m| {
            format!(
                "  [{}] {}  ({})\n",
                m.id,
                m.content,
                m.created_at.format("%Y-%m-%d %H:%M")
            )
        })
        .collect()
}

// ── Chat ──────────────────────────────────────────────────────────────────────

pub fn thinking_line(with_image: bool) -> String {
    let what = if with_image { "looking at your photo…" } else { "thinking…" };
    format!("  {} {what}", role_glyph(Role::Tutor))
}

pub fn chat_turn(turn: &ChatTurn, timestamps: bool) -> String {
    let ts = if timestamps {
        format!("{} ", turn.at.format("%H:%M"))
    } else {
        String::new()
    };
    let image = if turn.image.is_some() { " 📷" } else { "" };
    let mut out = format!("  {ts}{}{image} ", role_glyph(turn.role));
    let mut lines = turn.content.lines();
    out.push_str(lines.next().unwrap_or(""));
    out.push('\n');
    for line in lines {
        out.push_str(&format!("    {line}\n"));
    }
    out
}
