//! Loop configuration stored under `.patchloop/config.toml`, plus the
//! credentials read from the environment at startup.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::commands::{CommandGuard, DEFAULT_ALLOWED_PREFIXES};

/// Patchloop configuration (TOML).
///
/// Missing fields fall back to the defaults below, so an empty file is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoopConfig {
    pub model: ModelConfig,
    #[serde(rename = "loop")]
    pub iteration: IterationConfig,
    pub commands: CommandsConfig,
    pub pull_request: PullRequestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Chat-completions endpoint (OpenAI-compatible).
    pub endpoint: String,
    pub name: String,
    pub temperature: f32,
    /// Number of choices requested (`n`); only the first is used.
    pub samples: u32,
    pub request_timeout_secs: u64,
    /// Blocking pause before every model call, to stay under rate limits.
    pub request_delay_ms: u64,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            name: "gpt-4o".to_string(),
            temperature: 0.2,
            samples: 1,
            request_timeout_secs: 300,
            request_delay_ms: 0,
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

/// What to do when a patch does not apply.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PatchFailurePolicy {
    /// Leave the tree untouched and show the failure to the model next iteration.
    #[default]
    Continue,
    /// Fail the run.
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IterationConfig {
    /// Iteration ceiling; the loop never runs more than this many times.
    pub max_iterations: u32,
    /// Maximum bytes for a rendered prompt before sections are dropped.
    pub prompt_budget_bytes: usize,
    pub readme_path: String,
    pub on_patch_failure: PatchFailurePolicy,
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            prompt_budget_bytes: 60_000,
            readme_path: "README.md".to_string(),
            on_patch_failure: PatchFailurePolicy::Continue,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommandsConfig {
    pub allowed_prefixes: Vec<String>,
    pub timeout_secs: u64,
    /// Truncate each command's captured output beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            allowed_prefixes: DEFAULT_ALLOWED_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            timeout_secs: 120,
            output_limit_bytes: 20_000,
        }
    }
}

impl CommandsConfig {
    pub fn guard(&self) -> CommandGuard {
        CommandGuard::new(self.allowed_prefixes.iter().cloned())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PullRequestConfig {
    /// Push the branch and open a pull request after committing.
    pub enabled: bool,
    /// Base branch; defaults to the branch checked out when the run started.
    pub base: Option<String>,
    /// Repository owner/name; parsed from the `origin` remote when unset.
    pub owner: Option<String>,
    pub repo: Option<String>,
    pub api_url: String,
    /// Environment variable holding the API token.
    pub token_env: String,
}

impl Default for PullRequestConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base: None,
            owner: None,
            repo: None,
            api_url: "https://api.github.com".to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.endpoint.trim().is_empty() {
            return Err(anyhow!("model.endpoint must not be empty"));
        }
        if self.model.name.trim().is_empty() {
            return Err(anyhow!("model.name must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(anyhow!("model.temperature must be within 0.0..=2.0"));
        }
        if self.model.samples == 0 {
            return Err(anyhow!("model.samples must be > 0"));
        }
        if self.model.request_timeout_secs == 0 {
            return Err(anyhow!("model.request_timeout_secs must be > 0"));
        }
        if self.iteration.max_iterations == 0 {
            return Err(anyhow!("loop.max_iterations must be > 0"));
        }
        if self.iteration.prompt_budget_bytes == 0 {
            return Err(anyhow!("loop.prompt_budget_bytes must be > 0"));
        }
        if self.iteration.readme_path.trim().is_empty() {
            return Err(anyhow!("loop.readme_path must not be empty"));
        }
        if self.commands.timeout_secs == 0 {
            return Err(anyhow!("commands.timeout_secs must be > 0"));
        }
        if self.commands.output_limit_bytes == 0 {
            return Err(anyhow!("commands.output_limit_bytes must be > 0"));
        }
        if self
            .commands
            .allowed_prefixes
            .iter()
            .any(|p| p.trim().is_empty())
        {
            return Err(anyhow!("commands.allowed_prefixes must not contain blanks"));
        }
        if self.pull_request.enabled && self.pull_request.api_url.trim().is_empty() {
            return Err(anyhow!("pull_request.api_url must not be empty"));
        }
        Ok(())
    }
}

/// Secrets read from the environment once at startup.
#[derive(Clone, Default)]
pub struct Credentials {
    pub api_key: String,
    pub github_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field(
                "github_token",
                &self.github_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl Credentials {
    /// Resolve credentials through `lookup` (normally `std::env::var`).
    ///
    /// The model API key is always required. The code-host token is required
    /// only when pull requests are enabled.
    pub fn resolve<F>(config: &LoopConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let api_key = non_blank(&config.model.api_key_env).ok_or_else(|| {
            anyhow!(
                "missing model API key (set {})",
                config.model.api_key_env
            )
        })?;
        let github_token = non_blank(&config.pull_request.token_env);
        if config.pull_request.enabled && github_token.is_none() {
            return Err(anyhow!(
                "pull requests are enabled but {} is not set",
                config.pull_request.token_env
            ));
        }
        Ok(Self {
            api_key,
            github_token,
        })
    }

    pub fn from_env(config: &LoopConfig) -> Result<Self> {
        Self::resolve(config, |name| std::env::var(name).ok())
    }
}

/// Configuration and credentials, built once and passed to every collaborator.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config: LoopConfig,
    pub credentials: Credentials,
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `LoopConfig::default()`.
pub fn load_config(path: &Path) -> Result<LoopConfig> {
    if !path.exists() {
        let cfg = LoopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: LoopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &LoopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
