mod app;
mod chat;
mod client;
mod config;
mod extract;
mod mission;
mod models;
mod plans;
mod ui;
mod upload;

#[cfg(test)]
mod testing;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::{CommandFactory, Parser};
use config::{ConfigFile, ResolvedConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::client::{Backend, Client};
use crate::models::LearningMode;

#[derive(Parser, Debug)]
#[command(
    name = "studydesk",
    about = "Terminal study desk for an AI tutor backend: chat, phone photo upload, missions and plans",
    long_about = None,
)]
struct Args {
    /// Message to send to the tutor once (omit to start an interactive session)
    message: Option<String>,

    /// Profile to use from config file
    #[arg(short, long, env = "STUDYDESK_PROFILE")]
    profile: Option<String>,

    /// Override backend URL (including the /api prefix)
    #[arg(long, env = "STUDYDESK_ENDPOINT")]
    endpoint: Option<String>,

    /// Override the origin encoded in the phone QR code
    #[arg(long, env = "STUDYDESK_MOBILE_BASE")]
    mobile_base: Option<String>,

    /// List study plans with progress and exit
    #[arg(long)]
    plans: bool,

    /// Show one plan's checklist and exit
    #[arg(long, value_name = "ID")]
    plan: Option<i64>,

    /// List memos and exit
    #[arg(long)]
    memos: bool,

    /// Show the learning mode, or set it (supportive, exam), and exit
    #[arg(long, value_name = "MODE", num_args = 0..=1)]
    mode: Option<Option<String>>,

    /// Upload FILE into the phone session SESSION_ID and exit
    #[arg(long, num_args = 2, value_names = ["SESSION_ID", "FILE"])]
    upload: Option<Vec<String>>,

    /// Debug logging to stderr (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,

    /// Write a default config file to ~/.config/studydesk/config.toml and exit
    #[arg(long)]
    init: bool,

    /// List available profiles and exit
    #[arg(long)]
    profiles: bool,

    /// Generate shell completions and print to stdout (bash, zsh, fish, elvish)
    #[arg(long, value_name = "SHELL")]
    completions: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    // ── --init ────────────────────────────────────────────────────────────────
    if args.init {
        let path = ConfigFile::write_default_if_missing()?;
        println!("Config written to: {}", path.display());
        println!("Set mobile_base to an address your phone can reach, then run: studydesk");
        return Ok(());
    }

    // ── --completions ─────────────────────────────────────────────────────────
    if let Some(shell_name) = &args.completions {
        return generate_completions(shell_name);
    }

    let file = ConfigFile::load()?;

    // ── --profiles ────────────────────────────────────────────────────────────
    if args.profiles {
        print_profiles(&file);
        return Ok(());
    }

    let resolved = ResolvedConfig::resolve(
        &file,
        args.profile.as_deref(),
        args.endpoint.as_deref(),
        args.mobile_base.as_deref(),
    );
    let backend: Arc<dyn Backend> = Arc::new(Client::new(resolved.endpoint.clone()));

    // ── One-shot commands (plain stdout) ──────────────────────────────────────
    if let Some(upload) = &args.upload {
        if let [session_id, file] = upload.as_slice() {
            return run_upload(backend.as_ref(), session_id, Path::new(file)).await;
        }
    }
    if args.plans {
        return print_plans(backend.as_ref()).await;
    }
    if let Some(plan_id) = args.plan {
        return print_plan(backend.as_ref(), plan_id).await;
    }
    if args.memos {
        return print_memos(backend.as_ref()).await;
    }
    if let Some(mode) = &args.mode {
        return run_mode(backend.as_ref(), mode.as_deref()).await;
    }
    if let Some(message) = args.message {
        let mut stdout = std::io::stdout();
        return run_single_shot(backend.as_ref(), &message, resolved.timestamps, &mut stdout).await;
    }

    // ── Interactive session ───────────────────────────────────────────────────
    app::run(backend, resolved).await
}

fn init_logging(verbose: bool) {
    let default = if verbose { "studydesk=debug" } else { "studydesk=warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// ── Single-shot commands ──────────────────────────────────────────────────────

async fn run_single_shot(
    backend: &dyn Backend,
    message: &str,
    timestamps: bool,
    out: &mut impl Write,
) -> Result<()> {
    let mut chat = chat::ChatSession::new();
    if chat.send(backend, message, None, None).await.is_none() && chat.transcript().is_empty() {
        bail!("Message is empty");
    }
    if let Some(turn) = chat.transcript().last() {
        write!(out, "{}", ui::chat_turn(turn, timestamps))?;
    }
    if chat.last_failed() {
        bail!("Tutor request failed");
    }
    Ok(())
}

async fn print_plans(backend: &dyn Backend) -> Result<()> {
    let plans = backend.list_plans().await?;
    println!();
    print!("{}", ui::dashboard(&plans));
    println!();
    print!("{}", ui::plan_list(&plans));
    Ok(())
}

async fn print_plan(backend: &dyn Backend, plan_id: i64) -> Result<()> {
    let plan = backend.get_plan(plan_id).await?;
    print!("{}", ui::plan_detail(&plan));
    Ok(())
}

async fn print_memos(backend: &dyn Backend) -> Result<()> {
    let memos = backend.list_memos().await?;
    print!("{}", ui::memo_list(&memos));
    Ok(())
}

async fn run_mode(backend: &dyn Backend, mode: Option<&str>) -> Result<()> {
    let settings = match mode {
        Some(raw) => backend.update_settings(raw.parse::<LearningMode>()?).await?,
        None => backend.get_settings().await?,
    };
    println!(
        "  Mode: {} (complete at {}+)",
        settings.learning_mode,
        settings.learning_mode.threshold()
    );
    Ok(())
}

async fn run_upload(backend: &dyn Backend, session_id: &str, file: &Path) -> Result<()> {
    let mut upload = upload::MobileUpload::new(session_id);
    let receipt = upload.send(backend, file).await?;
    println!(
        "  ✓ Uploaded {}  ·  the desktop will pick it up shortly",
        receipt.file_path.as_deref().unwrap_or("image")
    );
    Ok(())
}

// ── Profiles ──────────────────────────────────────────────────────────────────

fn print_profiles(file: &ConfigFile) {
    let mut entries: Vec<(&String, &config::Profile)> = file.profiles.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    println!();
    println!("  Profiles");
    if entries.is_empty() {
        println!("  (none, run `studydesk --init`)");
    }
    for (name, p) in &entries {
        let marker = if **name == file.default_profile { " ←" } else { "" };
        println!("  {name}{marker}");
        println!("    endpoint  {}", p.endpoint);
        println!("    mobile    {}", p.mobile_base);
        println!("    poll      {}ms", p.poll_interval_ms);
        println!();
    }
}

// ── Shell completions ─────────────────────────────────────────────────────────

fn generate_completions(shell_name: &str) -> Result<()> {
    use clap_complete::{Shell, generate};

    let shell: Shell = match shell_name.to_lowercase().as_str() {
        "bash"    => Shell::Bash,
        "zsh"     => Shell::Zsh,
        "fish"    => Shell::Fish,
        "elvish"  => Shell::Elvish,
        _ => {
            eprintln!("Unknown shell: {shell_name}");
            eprintln!("Supported: bash, zsh, fish, elvish");
            std::process::exit(1);
        }
    };

    let mut cmd = Args::command();
    generate(shell, &mut cmd, "studydesk", &mut std::io::stdout());
    Ok(())
}
