/// Interactive study session.
///
/// Architecture:
///   main task:    drains one `UiEvent` channel and dispatches
///   stdin task:   tokio::spawn, forwards each input line as `UiEvent::Line`
///   upload task:  the handshake's poller, sends `UiEvent::ImageReady`
///
/// Every handler runs to completion before the next event is read, so backend
/// calls inside one command are sequential. Output is collected per event and
/// printed once the handler returns.
use std::io::Write as _;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, warn};

use crate::chat::ChatSession;
use crate::client::Backend;
use crate::config::ResolvedConfig;
use crate::extract;
use crate::mission::MissionTracker;
use crate::models::{ChatReply, LearningMode};
use crate::plans::{MemoPad, PlanBoard};
use crate::ui;
use crate::upload::UploadHandshake;

// ── UiEvent ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// A line typed by the learner
    Line(String),
    /// stdin reached EOF
    InputClosed,
    /// The phone finished uploading into `session_id`
    ImageReady { session_id: String, image_path: String },
}

// ── Commands ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Chat(String),
    Report(String),
    Mission,
    Complete,
    Plans,
    Plan(i64),
    Toggle { plan_id: i64, item_id: i64 },
    DeletePlan(i64),
    Save(Option<String>),
    Memos,
    Memo(String),
    DeleteMemo(i64),
    Mode(Option<LearningMode>),
    Qr,
    NewSession,
    ClearImage,
    Help,
    Quit,
    Invalid(String),
}

fn parse_id(raw: Option<&str>, what: &str) -> Result<i64, String> {
    let raw = raw.ok_or_else(|| format!("Missing {what} id"))?;
    raw.trim()
        .trim_start_matches('#')
        .parse()
        .map_err(|_| format!("'{raw}' is not a valid {what} id"))
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Chat(line.to_string());
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((n, a)) => (n, a.trim()),
        None => (rest, ""),
    };
    let arg_opt = (!arg.is_empty()).then(|| arg.to_string());

    let parsed = match name {
        "report" => match arg_opt {
            Some(text) => Ok(Command::Report(text)),
            None => Err("Usage: /report <what you did or learned>".to_string()),
        },
        "mission" => Ok(Command::Mission),
        "complete" | "done" => Ok(Command::Complete),
        "plans" => Ok(Command::Plans),
        "plan" => parse_id(arg_opt.as_deref(), "plan").map(Command::Plan),
        "toggle" => {
            let mut parts = arg.split_whitespace();
            parse_id(parts.next(), "plan").and_then(|plan_id| {
                parse_id(parts.next(), "item").map(|item_id| Command::Toggle { plan_id, item_id })
            })
        }
        "rmplan" => parse_id(arg_opt.as_deref(), "plan").map(Command::DeletePlan),
        "save" => Ok(Command::Save(arg_opt)),
        "memos" => Ok(Command::Memos),
        "memo" => Ok(Command::Memo(arg.to_string())),
        "rmmemo" => parse_id(arg_opt.as_deref(), "memo").map(Command::DeleteMemo),
        "mode" => match arg_opt {
            None => Ok(Command::Mode(None)),
            Some(m) => m
                .parse::<LearningMode>()
                .map(|m| Command::Mode(Some(m)))
                .map_err(|e| e.to_string()),
        },
        "qr" => Ok(Command::Qr),
        "newsession" => Ok(Command::NewSession),
        "clearimage" => Ok(Command::ClearImage),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" | "q" => Ok(Command::Quit),
        other => Err(format!("Unknown command /{other}. Type /help")),
    };
    parsed.unwrap_or_else(Command::Invalid)
}

const HELP: &str = "\
  Type a question to chat with the tutor.
  /report <text>        report progress on the current mission
  /mission              show the current mission and score
  /complete             complete the mission (needs enough understanding)
  /plans                list plans      /plan <id>        plan checklist
  /toggle <plan> <item> check/uncheck an item
  /rmplan <id>          delete a plan
  /save [title]         save the last tutor reply as a plan
  /memos                list memos      /memo <text>      add a memo
  /rmmemo <id>          delete a memo
  /mode [supportive|exam]
  /qr                   show/hide the phone upload QR code
  /newsession           new upload session (new QR)
  /clearimage           drop the pending phone image
  /quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

// ── App ───────────────────────────────────────────────────────────────────────

pub struct App {
    backend: Arc<dyn Backend>,
    config: ResolvedConfig,
    handshake: UploadHandshake,
    chat: ChatSession,
    tracker: MissionTracker,
    board: PlanBoard,
    memos: MemoPad,
    output: Vec<String>,
    /// Print progress lines as they happen instead of after the handler
    live: bool,
}

impl App {
    pub fn new(
        backend: Arc<dyn Backend>,
        config: ResolvedConfig,
        events: UnboundedSender<UiEvent>,
    ) -> Self {
        let handshake = UploadHandshake::new(
            Arc::clone(&backend),
            config.mobile_base.clone(),
            config.poll_interval,
            events,
        );
        Self {
            backend,
            config,
            handshake,
            chat: ChatSession::new(),
            tracker: MissionTracker::new(LearningMode::default()),
            board: PlanBoard::new(),
            memos: MemoPad::new(),
            output: Vec::new(),
            live: false,
        }
    }

    fn say(&mut self, text: impl Into<String>) {
        self.output.push(text.into());
    }

    /// Drain output collected since the last call.
    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    fn flush(&mut self) {
        let mut stdout = std::io::stdout().lock();
        for chunk in self.take_output() {
            let _ = write!(stdout, "{chunk}");
            if !chunk.ends_with('\n') {
                let _ = writeln!(stdout);
            }
        }
        let _ = stdout.flush();
    }

    pub fn tracker(&self) -> &MissionTracker {
        &self.tracker
    }

    pub fn chat(&self) -> &ChatSession {
        &self.chat
    }

    pub fn handshake(&self) -> &UploadHandshake {
        &self.handshake
    }

    /// Load settings and plans, derive the first mission, open an upload session.
    pub async fn init(&mut self) {
        match self.backend.get_settings().await {
            Ok(settings) => self.tracker.set_mode(settings.learning_mode),
            Err(e) => warn!("could not load settings, assuming supportive: {e:#}"),
        }
        self.refresh_mission().await;
        if self.handshake.start().await {
            self.say("  📷 Phone upload ready, /qr to show the code");
        }
        self.say(ui::dashboard(self.board.plans()));
        self.say(format!("  {}", self.tracker.status_line()));
    }

    /// Re-fetch plans and re-derive the mission from scratch.
    async fn refresh_mission(&mut self) {
        match self.board.refresh(self.backend.as_ref()).await {
            Ok(plans) => {
                self.tracker.recompute(plans);
            }
            Err(e) => self.say(format!("  ✗ {e:#}")),
        }
    }

    pub fn on_event(&mut self, event: UiEvent) {
        if let UiEvent::ImageReady { session_id, image_path } = event {
            if let Some(image) = self.handshake.on_image_ready(&session_id, &image_path) {
                self.chat.attach_image(image);
                self.say("  📷 Image received from your phone. It goes with your next message.");
            }
        }
    }

    pub async fn handle(&mut self, command: Command) -> Flow {
        debug!(?command, "command");
        match command {
            Command::Chat(text) => self.send_chat(&text, false).await,
            Command::Report(text) => self.send_chat(&text, true).await,
            Command::Mission => {
                let line = format!("  {}", self.tracker.status_line());
                self.say(line);
            }
            Command::Complete => self.complete_mission().await,
            Command::Plans => match self.board.refresh(self.backend.as_ref()).await {
                Ok(plans) => {
                    let text = ui::plan_list(plans);
                    self.say(text);
                }
                Err(e) => self.say(format!("  ✗ {e:#}")),
            },
            Command::Plan(id) => match self.board.open(self.backend.as_ref(), id).await {
                Ok(plan) => {
                    let text = ui::plan_detail(plan);
                    self.say(text);
                }
                Err(e) => self.say(format!("  ✗ {e:#}")),
            },
            Command::Toggle { plan_id, item_id } => self.toggle(plan_id, item_id).await,
            Command::DeletePlan(id) => {
                match self.board.delete(self.backend.as_ref(), id).await {
                    Ok(()) => self.say(format!("  ✓ Deleted plan #{id}")),
                    Err(e) => self.say(format!("  ✗ {e:#}")),
                }
                self.refresh_mission().await;
            }
            Command::Save(title) => self.save_plan(title).await,
            Command::Memos => match self.memos.refresh(self.backend.as_ref()).await {
                Ok(memos) => {
                    let text = ui::memo_list(memos);
                    self.say(text);
                }
                Err(e) => self.say(format!("  ✗ {e:#}")),
            },
            Command::Memo(text) => match self.memos.add(self.backend.as_ref(), &text).await {
                Ok(memo) => self.say(format!("  ✓ Memo [{}] saved", memo.id)),
                Err(e) => self.say(format!("  ✗ {e:#}")),
            },
            Command::DeleteMemo(id) => match self.memos.remove(self.backend.as_ref(), id).await {
                Ok(()) => self.say(format!("  ✓ Memo [{id}] deleted")),
                Err(e) => self.say(format!("  ✗ {e:#}")),
            },
            Command::Mode(mode) => self.set_mode(mode).await,
            Command::Qr => self.toggle_qr(),
            Command::NewSession => {
                if self.handshake.restart().await {
                    self.show_qr_block();
                } else {
                    self.say("  ✗ Phone upload unavailable right now");
                }
            }
            Command::ClearImage => match self.chat.clear_image() {
                Some(_) => self.say("  Pending image dropped"),
                None => self.say("  No pending image"),
            },
            Command::Help => self.say(HELP),
            Command::Quit => return Flow::Quit,
            Command::Invalid(msg) => self.say(format!("  {msg}")),
        }
        Flow::Continue
    }

    async fn send_chat(&mut self, text: &str, is_report: bool) {
        let mission_id = self.tracker.active_item_id();
        if is_report && mission_id.is_none() {
            self.say("  No active mission to report on");
            return;
        }

        let Some(request) = self
            .chat
            .begin(text, self.handshake.session_id(), mission_id)
        else {
            return;
        };
        if self.chat.is_loading() {
            self.say(ui::thinking_line(request.image_url.is_some()));
            if self.live {
                self.flush();
            }
        }
        let result = self.backend.send_chat(&request).await;
        let reply = self.chat.finish(result);
        if let Some(turn) = self.chat.transcript().last() {
            let line = ui::chat_turn(turn, self.config.timestamps);
            self.say(line);
        }
        if let (Some(reply), Some(item_id)) = (reply, mission_id) {
            self.apply_reply(item_id, reply).await;
        }
    }

    async fn apply_reply(&mut self, item_id: i64, reply: ChatReply) {
        if let Some(result) = reply.extracted_result.as_deref().filter(|r| !r.trim().is_empty()) {
            self.board.record_result(item_id, result);
            self.say(format!("  ↳ result: {result}"));
        }
        let Some(score) = reply.understanding_score else {
            return;
        };
        let previous = self.tracker.active().map(|m| m.understanding_score);
        if self.tracker.observe_score(item_id, score) {
            self.refresh_mission().await;
            let now = self
                .tracker
                .active()
                .filter(|m| m.item_id == item_id)
                .map(|m| m.understanding_score)
                .unwrap_or(score);
            self.say(format!(
                "  ▲ understanding {} → {now}",
                previous.unwrap_or(0)
            ));
            let line = format!("  {}", self.tracker.status_line());
            self.say(line);
        }
    }

    async fn complete_mission(&mut self) {
        let content = self.tracker.active().map(|m| m.content.clone());
        match self.tracker.complete(self.backend.as_ref()).await {
            Ok(_) => {
                self.say(format!("  ✓ Completed: {}", content.unwrap_or_default()));
                self.refresh_mission().await;
                let line = format!("  {}", self.tracker.status_line());
                self.say(line);
            }
            Err(e) => self.say(format!("  ✗ {e:#}")),
        }
    }

    async fn toggle(&mut self, plan_id: i64, item_id: i64) {
        if self.board.plan(plan_id).is_none() {
            if let Err(e) = self.board.open(self.backend.as_ref(), plan_id).await {
                self.say(format!("  ✗ {e:#}"));
                return;
            }
        }
        match self.board.toggle_item(self.backend.as_ref(), plan_id, item_id).await {
            Ok(done) => {
                let content = self
                    .board
                    .plan(plan_id)
                    .and_then(|p| p.item(item_id))
                    .map(|i| i.content.clone())
                    .unwrap_or_default();
                self.say(format!("  {} {content}", ui::check_glyph(done)));
                self.refresh_mission().await;
            }
            Err(e) => self.say(format!("  ✗ {e:#} (change reverted)")),
        }
    }

    async fn save_plan(&mut self, title: Option<String>) {
        let Some(content) = self.chat.last_reply().map(|t| t.content.clone()) else {
            self.say("  Nothing to save yet: ask the tutor for a plan first");
            return;
        };
        let title = title
            .or_else(|| self.config.default_plan_title.clone())
            .unwrap_or_default();
        if !extract::has_list_items(&content) {
            self.say("  No list found in the reply; saving it as a single item");
        }
        match extract::save_as_plan(self.backend.as_ref(), &title, None, &content).await {
            Ok(plan) => {
                self.say(format!(
                    "  ✓ Saved plan #{} \"{}\" with {} items",
                    plan.id,
                    plan.title,
                    plan.items.len()
                ));
                self.refresh_mission().await;
                let line = format!("  {}", self.tracker.status_line());
                self.say(line);
            }
            Err(e) => self.say(format!("  ✗ Failed to save plan: {e:#}")),
        }
    }

    async fn set_mode(&mut self, mode: Option<LearningMode>) {
        let Some(mode) = mode else {
            let line = format!(
                "  Mode: {} (complete at {}+)",
                self.tracker.mode(),
                self.tracker.threshold()
            );
            self.say(line);
            return;
        };
        match self.backend.update_settings(mode).await {
            Ok(settings) => {
                self.tracker.set_mode(settings.learning_mode);
                let line = format!(
                    "  ✓ Mode: {} (complete at {}+)\n  {}",
                    self.tracker.mode(),
                    self.tracker.threshold(),
                    self.tracker.status_line()
                );
                self.say(line);
            }
            Err(e) => self.say(format!("  ✗ Failed to update mode: {e:#}")),
        }
    }

    fn toggle_qr(&mut self) {
        if self.handshake.session_id().is_none() {
            self.say("  Phone upload unavailable (no upload session)");
            return;
        }
        if self.handshake.toggle_qr() {
            self.show_qr_block();
        } else {
            self.say("  QR hidden");
        }
    }

    fn show_qr_block(&mut self) {
        let Some(link) = self.handshake.deep_link().map(str::to_string) else {
            return;
        };
        let mut block = String::from("  Scan with your phone:\n");
        if let Some(qr) = self.handshake.qr() {
            block.push_str(qr);
            block.push('\n');
        }
        block.push_str(&format!("  {link}\n"));
        self.say(block);
    }
}

// ── Event loop ────────────────────────────────────────────────────────────────

fn spawn_stdin_reader(tx: UnboundedSender<UiEvent>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(UiEvent::Line(line)).is_err() {
                        return;
                    }
                }
                Ok(None) | Err(_) => {
                    let _ = tx.send(UiEvent::InputClosed);
                    return;
                }
            }
        }
    });
}

fn prompt() {
    print!("› ");
    let _ = std::io::stdout().flush();
}

pub async fn run(backend: Arc<dyn Backend>, config: ResolvedConfig) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<UiEvent>();

    println!();
    println!("  ▲ studydesk  {}  ·  {}", config.profile_name, config.endpoint);
    println!();

    let mut app = App::new(backend, config, tx.clone());
    app.live = true;
    app.init().await;
    app.flush();

    spawn_stdin_reader(tx);
    prompt();

    while let Some(event) = rx.recv().await {
        let flow = match event {
            UiEvent::Line(line) if line.trim().is_empty() => Flow::Continue,
            UiEvent::Line(line) => app.handle(parse_command(&line)).await,
            UiEvent::InputClosed => Flow::Quit,
            other => {
                println!();
                app.on_event(other);
                Flow::Continue
            }
        };
        app.flush();
        if flow == Flow::Quit {
            break;
        }
        prompt();
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
