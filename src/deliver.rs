//! Webhook delivery: one POST per invocation, no retry.

use reqwest::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::DiscordConfig;
use crate::compose::Digest;
use crate::error::{NotifyError, Result};

/// Body accepted by the chat webhook
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct WebhookPayload {
    pub content: String,
}

impl WebhookPayload {
    /// Renders the digest within `max_chars` characters. Trailing bullets are
    /// folded into the `+K` note first; the text is only cut when that is not
    /// enough.
    pub fn from_digest(digest: &Digest, max_chars: usize) -> Self {
        let mut digest = digest.clone();
        let before = digest.bullet_count();
        let fits = digest.fit_to(max_chars);
        if digest.bullet_count() < before {
            info!(
                "Folded {} bullets to stay under {} characters",
                before - digest.bullet_count(),
                max_chars
            );
        }

        let mut content = digest.render();
        if !fits {
            if let Some((idx, _)) = content.char_indices().nth(max_chars) {
                warn!(
                    "Digest is longer than {} characters with no bullets left, truncating",
                    max_chars
                );
                content.truncate(idx);
            }
        }
        Self { content }
    }
}

/// Host part of the webhook URL, safe to log (the path carries the token).
fn webhook_host(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "<invalid url>".to_string())
}

pub struct DiscordClient {
    client: reqwest::Client,
    user_agent: String,
    max_content_chars: usize,
}

impl DiscordClient {
    pub fn new(config: &DiscordConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| NotifyError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
            max_content_chars: config.max_content_chars,
        })
    }

    /// Posts the digest once. Any 2xx is success; anything else is a delivery error.
    pub async fn post(&self, webhook_url: &str, digest: &Digest) -> Result<()> {
        let host = webhook_host(webhook_url);
        let payload = WebhookPayload::from_digest(digest, self.max_content_chars);

        info!("Posting {:?} digest to {}", digest.outcome, host);
        let response = self
            .client
            .post(webhook_url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, &self.user_agent)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                let e = e.without_url();
                error!("Webhook request to {} failed: {}", host, e);
                NotifyError::Transport(e.to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            info!("Webhook response: {}", status);
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        error!("Webhook response: {}; body={}", status, body);
        Err(NotifyError::Delivery {
            status: status.as_u16(),
            body,
        })
    }
}
