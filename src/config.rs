use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::IngestError;
use crate::session::SessionSource;

const CONFIG_SCHEMA_VERSION: u32 = 1;
const DEFAULT_POLL_MILLIS: u64 = 1000;
const CLAUDE_REF_PREFIX: &str = "claude:";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IngestConfig {
    pub schema_version: u32,
    pub codex_home: Option<String>,
    pub claude_home: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION,
            codex_home: None,
            claude_home: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub poll_interval: Duration,
}

/// Directories the two CLIs write their transcripts under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRoots {
    pub codex_home: PathBuf,
    pub claude_home: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRef {
    pub path: PathBuf,
    pub source: SessionSource,
}

impl IngestConfig {
    pub fn load_or_init() -> Result<Self> {
        Self::load_or_init_at(&config_path())
    }

    pub fn load_or_init_at(cfg_path: &Path) -> Result<Self> {
        if cfg_path.exists() {
            let raw = fs::read_to_string(cfg_path)
                .with_context(|| format!("failed to read {}", cfg_path.display()))?;
            let mut parsed: IngestConfig = serde_json::from_str(&raw)
                .with_context(|| format!("invalid JSON in {}", cfg_path.display()))?;
            if parsed.normalize_and_migrate() {
                parsed.save_to(cfg_path)?;
            }
            Ok(parsed)
        } else {
            let cfg = IngestConfig::default();
            cfg.save_to(cfg_path)?;
            Ok(cfg)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create config directory {}", parent.display())
            })?;
        }

        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Roots after applying `CODEX_HOME` and `CLAUDE_CONFIG_DIR`.
    pub fn roots(&self) -> SessionRoots {
        SessionRoots {
            codex_home: resolve_home(
                env::var("CODEX_HOME").ok(),
                self.codex_home.as_deref(),
                ".codex",
            ),
            claude_home: resolve_home(
                env::var("CLAUDE_CONFIG_DIR").ok(),
                self.claude_home.as_deref(),
                ".claude",
            ),
        }
    }

    fn normalize_and_migrate(&mut self) -> bool {
        let mut changed = false;

        if self.schema_version < CONFIG_SCHEMA_VERSION {
            self.schema_version = CONFIG_SCHEMA_VERSION;
            changed = true;
        }
        for item in [&mut self.codex_home, &mut self.claude_home] {
            if normalize_optional_string(item) {
                changed = true;
            }
        }

        changed
    }
}

impl SessionRoots {
    pub fn codex_sessions(&self) -> PathBuf {
        self.codex_home.join("sessions")
    }

    pub fn claude_projects(&self) -> PathBuf {
        self.claude_home.join("projects")
    }

    /// Maps `claude:<rel>` into the Claude projects tree and anything else
    /// into the Codex sessions tree.
    ///
    /// `rel` must stay inside its root: absolute paths and `..` are rejected.
    /// `.jsonl` is appended when the reference lacks it.
    pub fn resolve(&self, reference: &str) -> crate::error::Result<SessionRef> {
        let (rel, source, root) = match reference.strip_prefix(CLAUDE_REF_PREFIX) {
            Some(rest) => (rest, SessionSource::ClaudeCode, self.claude_projects()),
            None => (reference, SessionSource::Codex, self.codex_sessions()),
        };
        let rel = rel.trim();
        let invalid = || IngestError::InvalidReference(reference.to_string());
        if rel.is_empty() {
            return Err(invalid());
        }

        let rel_path = Path::new(rel);
        let mut has_name = false;
        for component in rel_path.components() {
            match component {
                Component::Normal(_) => has_name = true,
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(invalid());
                }
            }
        }
        if !has_name {
            return Err(invalid());
        }

        let mut path = root.join(rel_path);
        if path.extension().and_then(|ext| ext.to_str()) != Some("jsonl") {
            let mut name = OsString::from(path.as_os_str());
            name.push(".jsonl");
            path = PathBuf::from(name);
        }
        Ok(SessionRef { path, source })
    }
}

pub fn runtime_settings() -> RuntimeSettings {
    RuntimeSettings {
        poll_interval: Duration::from_millis(env_u64(
            "AGENT_TRANSCRIPT_POLL_MS",
            DEFAULT_POLL_MILLIS,
        )),
    }
}

pub fn config_path() -> PathBuf {
    if let Ok(custom) = env::var("AGENT_TRANSCRIPT_CONFIG") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }

    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agent-transcript")
        .join("config.json")
}

fn resolve_home(from_env: Option<String>, configured: Option<&str>, default_dir: &str) -> PathBuf {
    let from_env = from_env
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    if let Some(custom) = from_env {
        return PathBuf::from(custom);
    }
    if let Some(configured) = configured.map(str::trim).filter(|v| !v.is_empty()) {
        return PathBuf::from(configured);
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(default_dir)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn normalize_optional_string(value: &mut Option<String>) -> bool {
    if let Some(item) = value.as_mut() {
        let trimmed = item.trim().to_string();
        if trimmed.is_empty() {
            *value = None;
            return true;
        }
        if *item != trimmed {
            *item = trimmed;
            return true;
        }
    }
    false
}
