//! Commit discovery from the local checkout, used when the caller supplies
//! no commit log. Every failure here is logged and yields nothing.

use std::path::Path;
use tokio::process::Command;
use tracing::{info, warn};

use crate::context::known_before_sha;

/// Runs git with `args` in the current directory and returns trimmed stdout.
async fn run_git(args: &[&str]) -> Result<String, String> {
    info!("Running: git {}", args.join(" "));
    let output = Command::new("git")
        .args(args)
        .output()
        .await
        .map_err(|e| format!("git {} failed to start: {}", args[0], e))?;

    if !output.status.success() {
        return Err(format!(
            "git {} failed: {}",
            args[0],
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Revision range for this push: `before..after`, `after`, or `HEAD`.
pub fn revision_range(before: Option<&str>, after: Option<&str>) -> String {
    let after = after.map(str::trim).filter(|s| !s.is_empty());
    match (known_before_sha(before), after) {
        (Some(before), Some(after)) => format!("{}..{}", before, after),
        (_, Some(after)) => after.to_string(),
        _ => "HEAD".to_string(),
    }
}

/// Reads the previous SHA (`before`) from the push event JSON file.
pub fn read_event_before_sha(event_path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(event_path)
        .map_err(|e| warn!("Could not read event file {:?}: {}", event_path, e))
        .ok()?;
    let payload: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| warn!("Could not parse event file {:?}: {}", event_path, e))
        .ok()?;
    payload
        .get("before")
        .and_then(|b| b.as_str())
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
}

/// Commit log in `<short sha> <subject>` lines, newest first, merges excluded.
pub async fn commit_log(before: Option<&str>, after: Option<&str>, max_commits: usize) -> Option<String> {
    let range = revision_range(before, after);
    let max = format!("--max-count={}", max_commits);
    match run_git(&["log", "--no-merges", &max, "--pretty=format:%h %s", &range]).await {
        Ok(log) => Some(log),
        Err(e) => {
            warn!("{}", e);
            None
        }
    }
}

/// `git diff --shortstat` between the previous and current SHA, when both are known.
pub async fn shortstat(before: Option<&str>, after: Option<&str>) -> Option<String> {
    let before = known_before_sha(before)?;
    let after = after.map(str::trim).filter(|s| !s.is_empty())?;
    match run_git(&["diff", "--shortstat", before, after]).await {
        Ok(stat) if !stat.is_empty() => Some(stat),
        Ok(_) => None,
        Err(e) => {
            warn!("{}", e);
            None
        }
    }
}
