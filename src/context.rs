//! Deploy context: the facts of one CI run, validated once at process start.

use chrono::{Datelike, Utc};
use tracing::debug;

use crate::error::{NotifyError, Result};

const ZERO_SHA: &str = "0000000000000000000000000000000000000000";
const DEFAULT_SERVER_URL: &str = "https://github.com";
const SHORT_SHA_LEN: usize = 7;

/// Result of the deploy job, supplied by the caller and never inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    /// Maps a CI job status (`success`, `failure`, `cancelled`, ...) to an outcome.
    /// Anything other than `success` is a failure.
    pub fn from_job_status(status: &str) -> Self {
        if status.trim().eq_ignore_ascii_case("success") {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}

/// One commit contributing to a deploy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub short_sha: String,
    pub subject: String,
}

impl CommitRecord {
    pub fn new(short_sha: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            short_sha: short_sha.into(),
            subject: subject.into(),
        }
    }
}

/// Aggregate change volume, as reported by `git diff --shortstat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeStats {
    pub files_changed: u64,
    pub insertions: u64,
    pub deletions: u64,
}

impl ChangeStats {
    /// Parses git's shortstat line, e.g.
    /// `3 files changed, 10 insertions(+), 2 deletions(-)`.
    /// Returns `None` unless at least the files clause is present.
    pub fn parse_shortstat(text: &str) -> Option<Self> {
        let mut files_changed = None;
        let mut insertions = 0;
        let mut deletions = 0;

        for clause in text.trim().split(',') {
            let mut words = clause.split_whitespace();
            let count: u64 = match words.next().and_then(|n| n.parse().ok()) {
                Some(n) => n,
                None => continue,
            };
            match words.next() {
                Some(w) if w.starts_with("file") => files_changed = Some(count),
                Some(w) if w.starts_with("insertion") => insertions = count,
                Some(w) if w.starts_with("deletion") => deletions = count,
                _ => {}
            }
        }

        files_changed.map(|files_changed| Self {
            files_changed,
            insertions,
            deletions,
        })
    }
}

/// Immutable snapshot of one CI run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployContext {
    pub repository: String,
    pub branch: String,
    pub actor: String,
    pub run_id: String,
    pub run_url: String,
    pub commit_sha: String,
    pub outcome: Outcome,
    pub commits: Vec<CommitRecord>,
    pub stats: Option<ChangeStats>,
    pub failed_stage: Option<String>,
    pub compare_url: String,
    /// UTC date of the invocation, `YYYY.M.DD`
    pub date_tag: String,
}

impl DeployContext {
    pub fn short_sha(&self) -> &str {
        match self.commit_sha.char_indices().nth(SHORT_SHA_LEN) {
            Some((idx, _)) => &self.commit_sha[..idx],
            None => &self.commit_sha,
        }
    }

    /// Human name for the repository: `acme/deploy-notify` becomes `Deploy Notify`.
    pub fn display_name(&self) -> String {
        let short = self
            .repository
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("repo");
        let words: Vec<String> = short
            .split(['-', '_'])
            .filter(|p| !p.is_empty())
            .map(capitalize)
            .collect();
        if words.is_empty() {
            short.to_string()
        } else {
            words.join(" ")
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Raw named inputs, exactly as the CI platform hands them over
#[derive(Debug, Clone, Default)]
pub struct ContextInputs {
    pub webhook_url: Option<String>,
    pub openai_api_key: Option<String>,
    pub repository: Option<String>,
    pub branch: Option<String>,
    pub actor: Option<String>,
    pub run_id: Option<String>,
    pub run_url: Option<String>,
    pub server_url: Option<String>,
    pub commit_sha: Option<String>,
    pub before_sha: Option<String>,
    pub job_status: Option<String>,
    pub commit_log: Option<String>,
    pub diff_stat: Option<String>,
    pub failed_stage: Option<String>,
    pub date_tag: Option<String>,
}

/// Everything one invocation needs after validation
#[derive(Debug, Clone)]
pub struct Invocation {
    pub context: DeployContext,
    pub webhook_url: String,
    pub openai_api_key: Option<String>,
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(field: &'static str, value: Option<String>) -> Result<String> {
    present(value).ok_or(NotifyError::MissingContext { field })
}

/// Returns the previous SHA unless it is absent or the all-zero "new branch" marker.
pub fn known_before_sha(before: Option<&str>) -> Option<&str> {
    before
        .map(str::trim)
        .filter(|sha| !sha.is_empty() && *sha != ZERO_SHA)
}

/// Validates the raw inputs and builds the deploy context.
/// Performs no network access and no formatting.
pub fn collect(inputs: ContextInputs) -> Result<Invocation> {
    let webhook_url = required("discord-webhook-url", inputs.webhook_url)?;
    let repository = required("repository", inputs.repository)?;
    let branch = required("branch", inputs.branch)?;
    let actor = required("actor", inputs.actor)?;
    let run_id = required("run-id", inputs.run_id)?;
    let commit_sha = required("commit-sha", inputs.commit_sha)?;
    let outcome = Outcome::from_job_status(&required("job-status", inputs.job_status)?);

    let server_url = present(inputs.server_url);
    let run_url = match present(inputs.run_url) {
        Some(url) => url,
        None => {
            let server = server_url.as_deref().ok_or(NotifyError::MissingContext {
                field: "run-url",
            })?;
            format!(
                "{}/{}/actions/runs/{}",
                server.trim_end_matches('/'),
                repository,
                run_id
            )
        }
    };

    let server = server_url.as_deref().unwrap_or(DEFAULT_SERVER_URL);
    let compare_url = match known_before_sha(inputs.before_sha.as_deref()) {
        Some(before) => format!(
            "{}/{}/compare/{}...{}",
            server.trim_end_matches('/'),
            repository,
            before,
            commit_sha
        ),
        None => format!(
            "{}/{}/commit/{}",
            server.trim_end_matches('/'),
            repository,
            commit_sha
        ),
    };

    let commits = present(inputs.commit_log)
        .map(|log| parse_commit_log(&log))
        .unwrap_or_default();
    let stats = present(inputs.diff_stat).and_then(|s| ChangeStats::parse_shortstat(&s));

    let date_tag = present(inputs.date_tag).unwrap_or_else(|| {
        let now = Utc::now();
        format!("{}.{}.{:02}", now.year(), now.month(), now.day())
    });

    debug!(
        "Collected context for {} on {} ({} commits, outcome {:?})",
        repository,
        branch,
        commits.len(),
        outcome
    );

    Ok(Invocation {
        context: DeployContext {
            repository,
            branch,
            actor,
            run_id,
            run_url,
            commit_sha,
            outcome,
            commits,
            stats,
            failed_stage: present(inputs.failed_stage),
            compare_url,
            date_tag,
        },
        webhook_url,
        openai_api_key: present(inputs.openai_api_key),
    })
}

fn is_short_sha(token: &str) -> bool {
    (4..=40).contains(&token.len()) && token.chars().all(|c| c.is_ascii_hexdigit())
}

/// Parses a commit log with one `<hash> <subject>` entry per line.
/// Blank and malformed lines are dropped; order is preserved.
pub fn parse_commit_log(raw: &str) -> Vec<CommitRecord> {
    raw.lines()
        .filter_map(|line| {
            let (hash, subject) = line.trim().split_once(char::is_whitespace)?;
            let subject = subject.trim();
            if !is_short_sha(hash) || subject.is_empty() {
                debug!("Skipping malformed commit line: {:?}", line);
                return None;
            }
            Some(CommitRecord::new(hash, subject))
        })
        .collect()
}
