//! Commit summarizer
//!
//! Turns the commit list into display bullets. With an API key configured it
//! asks a text-generation endpoint to group the commits into features and
//! fixes; without one, or when that call fails in any way, it falls back to
//! one bullet per commit. The caller always gets a [`Summary`].

use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::context::{CommitRecord, DeployContext};
use crate::{OpenAiConfig, StyleConfig, StyleVariant};

const EMPTY_DEPLOY_BULLET: &str =
    "🔧 Primarily internal maintenance and deployment plumbing updates.";

const SYSTEM_PROMPT: &str = "You are a deploy narrator. Return JSON only. \
    No markdown code fences. Keep bullets factual and concise.";

/// Why enrichment was not available. Never leaves this module.
#[derive(Debug, thiserror::Error)]
pub enum SummarizeError {
    #[error("no API key configured")]
    Disabled,

    #[error("HTTP client unavailable")]
    ClientUnavailable,

    #[error("request failed: {0}")]
    Transport(String),

    #[error("endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unusable reply: {0}")]
    Malformed(String),
}

/// Bullet lines plus the count of items that did not fit
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BulletList {
    pub items: Vec<String>,
    pub omitted: usize,
}

impl BulletList {
    /// Keeps the first `max` items and counts the rest.
    pub fn capped(mut items: Vec<String>, max: usize) -> Self {
        let omitted = items.len().saturating_sub(max);
        items.truncate(max);
        Self { items, omitted }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.omitted == 0
    }
}

/// Commits grouped by the text-generation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrichment {
    pub headline: Option<String>,
    pub features: BulletList,
    pub fixes: BulletList,
    pub punchline: Option<String>,
}

/// Summarizer output: enriched when the call succeeded, raw otherwise
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Summary {
    Enriched(Enrichment),
    Raw(BulletList),
}

/// Picks an emoji for a commit subject by keyword.
pub fn emoji_for(subject: &str) -> &'static str {
    let s = subject.to_lowercase();
    let has = |keys: &[&str]| keys.iter().any(|k| s.contains(k));

    if has(&["security", "harden", "auth", "permission", "secret"]) {
        "🛡️"
    } else if has(&["fix", "bug", "error", "fail", "regression"]) {
        "🔧"
    } else if has(&["perf", "speed", "latency", "optimiz", "cache"]) {
        "⚡"
    } else if has(&["worker", "queue", "cron", "job"]) {
        "🧵"
    } else if has(&["ui", "dashboard", "frontend", "website"]) {
        "🎛️"
    } else if has(&["api", "endpoint", "server"]) {
        "🌐"
    } else if has(&["deploy", "docker", "compose", "workflow", "ci"]) {
        "🚢"
    } else {
        "⚓"
    }
}

/// One bullet per commit, in commit order, capped at `max`.
pub fn raw_bullets(commits: &[CommitRecord], variant: StyleVariant, max: usize) -> BulletList {
    let items: Vec<String> = match variant {
        StyleVariant::Ledger => commits
            .iter()
            .map(|c| format!("{} {}", c.short_sha, c.subject))
            .collect(),
        StyleVariant::Narrator if commits.is_empty() => vec![EMPTY_DEPLOY_BULLET.to_string()],
        StyleVariant::Narrator => commits
            .iter()
            .map(|c| format!("{} {}", emoji_for(&c.subject), c.subject))
            .collect(),
    };
    BulletList::capped(items, max)
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct EnrichmentReply {
    headline: Option<String>,
    features: Vec<String>,
    fixes: Vec<String>,
    punchline: Option<String>,
}

fn clean_line(line: Option<String>) -> Option<String> {
    line.map(|l| l.trim().to_string()).filter(|l| !l.is_empty())
}

fn clean_list(lines: Vec<String>) -> Vec<String> {
    lines
        .into_iter()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

impl EnrichmentReply {
    fn into_enrichment(self, max: usize) -> Result<Enrichment, SummarizeError> {
        let features = clean_list(self.features);
        let fixes = clean_list(self.fixes);
        if features.is_empty() && fixes.is_empty() {
            return Err(SummarizeError::Malformed(
                "reply has no features or fixes".to_string(),
            ));
        }
        Ok(Enrichment {
            headline: clean_line(self.headline),
            features: BulletList::capped(features, max),
            fixes: BulletList::capped(fixes, max),
            punchline: clean_line(self.punchline),
        })
    }
}

/// Parses the model text as a JSON object, or failing that the first
/// `{ ... }` span inside it (models like to wrap JSON in prose or fences).
fn parse_reply(text: &str) -> Option<EnrichmentReply> {
    let text = text.trim();
    if let Ok(reply) = serde_json::from_str(text) {
        return Some(reply);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Pulls the generated text out of a responses-API reply.
fn output_text(reply: &Value) -> Option<String> {
    if let Some(text) = reply.get("output_text").and_then(Value::as_str) {
        if !text.trim().is_empty() {
            return Some(text.to_string());
        }
    }

    let text: String = reply
        .get("output")?
        .as_array()?
        .iter()
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    (!text.trim().is_empty()).then_some(text)
}

fn request_body(config: &OpenAiConfig, ctx: &DeployContext, style: &StyleConfig) -> Value {
    let commits: Vec<Value> = ctx
        .commits
        .iter()
        .map(|c| json!({ "short_sha": c.short_sha, "subject": c.subject }))
        .collect();

    let prompt = json!({
        "repo": ctx.repository,
        "repo_name": ctx.display_name(),
        "branch": ctx.branch,
        "actor": ctx.actor,
        "date_tag": ctx.date_tag,
        "commits": commits,
        "requirements": {
            "features": "user-visible additions, one line each",
            "fixes": "fixes and improvements, one line each",
            "bullets": format!("at most {} per list, emoji-first", style.max_bullets),
            "links": "do not include any URLs",
        },
        "soul": style.persona.as_deref().unwrap_or_default(),
        "output_schema": {
            "headline": "string",
            "features": ["string"],
            "fixes": ["string"],
            "punchline": "string",
        },
    });

    json!({
        "model": config.model,
        "temperature": config.temperature,
        "max_output_tokens": config.max_output_tokens,
        "input": [
            { "role": "system", "content": SYSTEM_PROMPT },
            { "role": "user", "content": prompt.to_string() },
        ],
    })
}

pub struct Summarizer {
    client: Option<reqwest::Client>,
    api_key: Option<String>,
    config: OpenAiConfig,
}

impl Summarizer {
    pub fn new(config: &OpenAiConfig, api_key: Option<String>) -> Self {
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("deploy-notify/", env!("CARGO_PKG_VERSION")))
            .build()
        {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("Could not build summarization client: {}", e);
                None
            }
        };
        Self {
            client,
            api_key,
            config: config.clone(),
        }
    }

    /// Summarizes the deploy's commits. Never fails: any enrichment error
    /// degrades to raw bullets.
    pub async fn summarize(&self, ctx: &DeployContext, style: &StyleConfig) -> Summary {
        if ctx.commits.is_empty() {
            debug!("No commits to summarize");
            return Summary::Raw(raw_bullets(&ctx.commits, style.variant, style.max_bullets));
        }

        match self.enrich(ctx, style).await {
            Ok(enrichment) => {
                info!(
                    "Commit summary enriched: {} features, {} fixes",
                    enrichment.features.items.len(),
                    enrichment.fixes.items.len()
                );
                Summary::Enriched(enrichment)
            }
            Err(SummarizeError::Disabled) => {
                debug!("No API key configured, using raw commit bullets");
                Summary::Raw(raw_bullets(&ctx.commits, style.variant, style.max_bullets))
            }
            Err(e) => {
                warn!("Commit summarization failed, using raw commit bullets: {}", e);
                Summary::Raw(raw_bullets(&ctx.commits, style.variant, style.max_bullets))
            }
        }
    }

    async fn enrich(
        &self,
        ctx: &DeployContext,
        style: &StyleConfig,
    ) -> Result<Enrichment, SummarizeError> {
        let Some(api_key) = &self.api_key else {
            return Err(SummarizeError::Disabled);
        };
        let Some(client) = &self.client else {
            return Err(SummarizeError::ClientUnavailable);
        };

        let response = client
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .header(ACCEPT, "application/json")
            .json(&request_body(&self.config, ctx, style))
            .send()
            .await
            .map_err(|e| SummarizeError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SummarizeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: Value = response
            .json()
            .await
            .map_err(|e| SummarizeError::Malformed(e.to_string()))?;
        let text = output_text(&reply)
            .ok_or_else(|| SummarizeError::Malformed("reply has no output text".to_string()))?;
        let parsed = parse_reply(&text)
            .ok_or_else(|| SummarizeError::Malformed("output is not a JSON object".to_string()))?;
        parsed.into_enrichment(style.max_bullets)
    }
}
