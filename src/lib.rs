pub mod compose;
pub mod context;
pub mod deliver;
pub mod error;
pub mod git;
pub mod logging;
pub mod summarize;

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use compose::{Composer, Digest};
use context::{Invocation, Outcome};
use deliver::DiscordClient;
use error::{NotifyError, Result};
use summarize::Summarizer;

pub const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/responses";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4.1-mini";
pub const DEFAULT_MAX_BULLETS: usize = 5;
pub const DEFAULT_MAX_CONTENT_CHARS: usize = 1900;
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct NotifyConfig {
    pub style: StyleConfig,
    pub openai: OpenAiConfig,
    pub discord: DiscordConfig,
}

/// Which voice the digest is written in
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StyleVariant {
    /// Terse release ledger: hash-first bullets, literal headers
    #[default]
    Ledger,
    /// Pirate narrator persona: emoji-first bullets, dated headers
    Narrator,
}

/// Which URLs a success digest may carry
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LinkPolicy {
    /// No commit or compare links, so the chat platform renders no previews
    #[default]
    NoPreview,
    /// Compare (or commit) link exactly once, plus the run link
    Rich,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StyleConfig {
    pub variant: StyleVariant,
    pub link_policy: LinkPolicy,
    pub max_bullets: usize,
    pub run_link_on_success: bool,
    pub persona_file: Option<PathBuf>,
    /// Persona text read from `persona_file`
    #[serde(skip)]
    pub persona: Option<String>,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            variant: StyleVariant::default(),
            link_policy: LinkPolicy::default(),
            max_bullets: DEFAULT_MAX_BULLETS,
            run_link_on_success: false,
            persona_file: None,
            persona: None,
        }
    }
}

impl StyleConfig {
    /// Reads the persona text from `persona_file`, if one is set.
    /// An unreadable file leaves the persona empty; it only flavors enrichment.
    pub fn load_persona(&mut self) {
        let Some(path) = &self.persona_file else {
            return;
        };
        match fs::read_to_string(path) {
            Ok(text) if !text.trim().is_empty() => self.persona = Some(text),
            Ok(_) => warn!("Persona file {:?} is empty, ignoring", path),
            Err(e) => warn!("Could not read persona file {:?}: {}", path, e),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OpenAiConfig {
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_OPENAI_ENDPOINT.to_string(),
            model: DEFAULT_OPENAI_MODEL.to_string(),
            timeout_secs: 30,
            temperature: 0.35,
            max_output_tokens: 300,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DiscordConfig {
    pub timeout_secs: u64,
    pub max_content_chars: usize,
    pub user_agent: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
            user_agent: BROWSER_USER_AGENT.to_string(),
        }
    }
}

/// Load and parse the configuration file
pub fn load_config(path: &Path) -> Result<NotifyConfig> {
    let config_str = fs::read_to_string(path).map_err(|e| {
        NotifyError::ConfigError(format!("Failed to read config file '{}': {}", path.display(), e))
    })?;

    let config: NotifyConfig = toml::from_str(&config_str)?;
    info!("Using config at {:?}", path);
    Ok(config)
}

/// Like [`load_config`], but a file that does not exist yields the defaults.
pub fn load_config_or_default(path: &Path) -> Result<NotifyConfig> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(NotifyConfig::default())
    }
}

/// Runs one notification: summarize (success only), compose, deliver.
/// Returns the digest that was posted.
pub async fn notify(invocation: &Invocation, config: &NotifyConfig) -> Result<Digest> {
    let ctx = &invocation.context;
    let client = DiscordClient::new(&config.discord)?;

    let summary = match ctx.outcome {
        Outcome::Success => {
            let summarizer = Summarizer::new(&config.openai, invocation.openai_api_key.clone());
            Some(summarizer.summarize(ctx, &config.style).await)
        }
        Outcome::Failure => {
            info!("Deploy failed, skipping commit summary");
            None
        }
    };

    let digest = Composer::new(&config.style).compose(ctx, summary.as_ref());
    client.post(&invocation.webhook_url, &digest).await?;
    Ok(digest)
}
