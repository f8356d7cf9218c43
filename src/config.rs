use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ── Profile ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Backend base URL, including the `/api` prefix
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Origin the phone opens; the QR code points at `{mobile_base}/mobile/{session}`.
    /// Must be reachable from the phone, so usually a LAN address rather than localhost.
    #[serde(default = "default_mobile_base")]
    pub mobile_base: String,
    /// How often to ask the backend whether the phone has uploaded yet
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Title offered when saving a reply as a plan without naming it
    #[serde(default)]
    pub default_plan_title: Option<String>,
    /// Prefix chat lines with HH:MM
    #[serde(default)]
    pub timestamps: bool,
}

fn default_endpoint() -> String {
    "http://localhost:8000/api".to_string()
}

fn default_mobile_base() -> String {
    "http://localhost:9000".to_string()
}

fn default_poll_interval_ms() -> u64 {
    crate::upload::DEFAULT_POLL_INTERVAL.as_millis() as u64
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            mobile_base: default_mobile_base(),
            poll_interval_ms: default_poll_interval_ms(),
            default_plan_title: None,
            timestamps: false,
        }
    }
}

// ── Config file ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Which profile to use when none is specified
    #[serde(default = "default_profile_name")]
    pub default_profile: String,

    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

fn default_profile_name() -> String {
    "default".to_string()
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            default_profile: default_profile_name(),
            profiles: HashMap::new(),
        }
    }
}

impl ConfigFile {
    /// Load from disk, or return a default config if the file doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file at {}", path.display()))
    }

    /// Write a starter config file to disk (only if it doesn't exist).
    pub fn write_default_if_missing() -> Result<PathBuf> {
        let path = config_path();
        if path.exists() {
            return Ok(path);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, DEFAULT_CONFIG_TOML)?;
        Ok(path)
    }

    /// Resolve the active profile given an optional override name.
    pub fn resolve_profile(&self, name: Option<&str>) -> Option<&Profile> {
        let key = name.unwrap_or(&self.default_profile);
        self.profiles.get(key)
    }
}

// ── Resolved runtime config (after merging file + CLI overrides) ──────────────

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub endpoint: String,
    pub mobile_base: String,
    pub poll_interval: Duration,
    pub default_plan_title: Option<String>,
    pub timestamps: bool,
    /// Profile name that was resolved (for display)
    pub profile_name: String,
}

impl ResolvedConfig {
    /// Merge config file profile with CLI overrides.
    /// Priority: CLI args > env vars (handled by clap) > config file profile > built-in defaults
    pub fn resolve(
        file: &ConfigFile,
        profile_override: Option<&str>,
        endpoint_override: Option<&str>,
        mobile_base_override: Option<&str>,
    ) -> Self {
        let profile_name = profile_override
            .unwrap_or(&file.default_profile)
            .to_string();

        let base = file
            .resolve_profile(profile_override)
            .cloned()
            .unwrap_or_default();

        Self {
            endpoint: endpoint_override
                .map(str::to_string)
                .unwrap_or(base.endpoint),
            mobile_base: mobile_base_override
                .map(str::to_string)
                .unwrap_or(base.mobile_base),
            // A zero interval would spin; clamp to something sane
            poll_interval: Duration::from_millis(base.poll_interval_ms.max(250)),
            default_plan_title: base.default_plan_title,
            timestamps: base.timestamps,
            profile_name,
        }
    }
}

// ── Paths ─────────────────────────────────────────────────────────────────────

pub fn config_path() -> PathBuf {
    dirs_config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("studydesk")
        .join("config.toml")
}

fn dirs_config_dir() -> Option<PathBuf> {
    // XDG_CONFIG_HOME or ~/.config on Linux/macOS, %APPDATA% on Windows
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| std::env::var("APPDATA").ok().map(PathBuf::from))
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        })
}

// ── Default config template written on first run ──────────────────────────────

const DEFAULT_CONFIG_TOML: &str = r#"# studydesk configuration
# Run `studydesk --init` to regenerate this file.

default_profile = "home"

# ── Backend on this machine ──────────────────────────────────────────────────
[profiles.home]
endpoint         = "http://localhost:8000/api"
# The phone must be able to reach this address: use the desktop's LAN IP.
mobile_base      = "http://192.168.0.10:9000"
poll_interval_ms = 2000
# default_plan_title = "New study plan"
# timestamps = true

# ── Hosted backend ───────────────────────────────────────────────────────────
# [profiles.school]
# endpoint    = "https://tutor.example.edu/api"
# mobile_base = "https://tutor.example.edu"
"#;
