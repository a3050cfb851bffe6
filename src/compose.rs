//! Message composer
//!
//! Builds the digest for one run. The outcome alone selects the success or
//! failure layout; style only changes wording. A failure digest never carries
//! summary bullets, whatever the caller passes in.

use crate::context::{DeployContext, Outcome};
use crate::summarize::{BulletList, Enrichment, Summary, raw_bullets};
use crate::{LinkPolicy, StyleConfig, StyleVariant};

const LEDGER_BULLET: &str = "•";
const NARRATOR_STATUS: &str = "✅ Status: Deployment confirmed by the CI crew.";
const LEDGER_WITHHELD: &str = "No feature list included: the deploy did not land.";
const NARRATOR_WITHHELD: &str =
    "🛑 Status: Build/deploy failed. Feature rollup withheld until a successful landing.";

/// Titled group of bullet lines, plus a count of items left out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    pub bullets: Vec<String>,
    pub omitted: usize,
    /// Noun for the trailing `+K ...` note, e.g. `more commits`
    pub omitted_label: String,
}

impl Section {
    fn render(&self) -> String {
        let mut lines = Vec::with_capacity(self.bullets.len() + 2);
        if !self.title.is_empty() {
            lines.push(self.title.clone());
        }
        lines.extend(self.bullets.iter().cloned());
        if self.omitted > 0 {
            lines.push(format!("+{} {}", self.omitted, self.omitted_label));
        }
        lines.join("\n")
    }
}

/// The composed chat message for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    pub outcome: Outcome,
    pub header: String,
    /// Lines between the header and the sections (failure facts, ship line)
    pub intro: Vec<String>,
    pub sections: Vec<Section>,
    pub stats_line: Option<String>,
    /// Lines after the stats (status, punchline, withheld notice)
    pub closing: Vec<String>,
    /// URLs this digest links to, already formatted for display
    pub links: Vec<String>,
}

impl Digest {
    pub fn bullet_count(&self) -> usize {
        self.sections.iter().map(|s| s.bullets.len()).sum()
    }

    /// Renders the digest as chat text. Empty optional parts leave no blank lines.
    /// On failure the run link closes the facts block; on success links close
    /// the message.
    pub fn render(&self) -> String {
        let mut blocks: Vec<String> = vec![self.header.clone()];

        let mut opening: Vec<String> = self.intro.clone();
        if self.outcome == Outcome::Failure {
            opening.extend(self.links.iter().cloned());
        }
        if !opening.is_empty() {
            blocks.push(opening.join("\n"));
        }
        blocks.extend(self.sections.iter().map(Section::render));

        let mut tail: Vec<String> = Vec::new();
        tail.extend(self.stats_line.iter().cloned());
        tail.extend(self.closing.iter().cloned());
        if !tail.is_empty() {
            blocks.push(tail.join("\n"));
        }
        if self.outcome == Outcome::Success && !self.links.is_empty() {
            blocks.push(self.links.join("\n"));
        }

        blocks.join("\n\n")
    }

    /// Folds trailing bullets into their section's `+K` note until the rendered
    /// text is at most `max_chars` characters. Returns whether it fits.
    pub fn fit_to(&mut self, max_chars: usize) -> bool {
        while self.render().chars().count() > max_chars {
            let Some(section) = self.sections.iter_mut().rev().find(|s| !s.bullets.is_empty())
            else {
                return false;
            };
            section.bullets.pop();
            section.omitted += 1;
        }
        true
    }
}

fn has_url(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("http://") || lower.contains("https://")
}

/// Removes every whitespace-separated token carrying a URL.
/// Lines without URLs pass through untouched; a line left empty is dropped.
fn strip_urls(line: &str) -> Option<String> {
    if !has_url(line) {
        return Some(line.to_string());
    }
    let kept: Vec<&str> = line.split_whitespace().filter(|t| !has_url(t)).collect();
    let stripped = kept.join(" ");
    (!stripped.trim().is_empty()).then_some(stripped)
}

fn strip_list(list: &BulletList) -> BulletList {
    BulletList {
        items: list.items.iter().filter_map(|l| strip_urls(l)).collect(),
        omitted: list.omitted,
    }
}

pub struct Composer<'a> {
    style: &'a StyleConfig,
}

impl<'a> Composer<'a> {
    pub fn new(style: &'a StyleConfig) -> Self {
        Self { style }
    }

    /// Composes the digest. Cannot fail; missing optional data is omitted.
    pub fn compose(&self, ctx: &DeployContext, summary: Option<&Summary>) -> Digest {
        match ctx.outcome {
            Outcome::Success => {
                let summary = self.link_safe(ctx, summary);
                self.success(ctx, summary.as_ref())
            }
            Outcome::Failure => self.failure(ctx),
        }
    }

    /// Under NoPreview, strips URLs from summary text (model output and commit
    /// subjects alike). An enrichment left with no bullets degrades to raw bullets.
    fn link_safe(&self, ctx: &DeployContext, summary: Option<&Summary>) -> Option<Summary> {
        let summary = summary?;
        if self.style.link_policy == LinkPolicy::Rich {
            return Some(summary.clone());
        }
        let safe = match summary {
            Summary::Raw(bullets) => Summary::Raw(strip_list(bullets)),
            Summary::Enriched(enrichment) => {
                let features = strip_list(&enrichment.features);
                let fixes = strip_list(&enrichment.fixes);
                if features.items.is_empty() && fixes.items.is_empty() {
                    let raw = raw_bullets(&ctx.commits, self.style.variant, self.style.max_bullets);
                    Summary::Raw(strip_list(&raw))
                } else {
                    Summary::Enriched(Enrichment {
                        headline: enrichment.headline.as_deref().and_then(strip_urls),
                        features,
                        fixes,
                        punchline: enrichment.punchline.as_deref().and_then(strip_urls),
                    })
                }
            }
        };
        Some(safe)
    }

    fn success(&self, ctx: &DeployContext, summary: Option<&Summary>) -> Digest {
        let narrator = self.style.variant == StyleVariant::Narrator;

        let header = match (self.style.variant, summary) {
            (StyleVariant::Narrator, Some(Summary::Enriched(Enrichment {
                headline: Some(headline),
                ..
            }))) => headline.clone(),
            (StyleVariant::Narrator, _) => format!("🪝 CaptainHook {}", ctx.date_tag),
            (StyleVariant::Ledger, _) => format!("{} — update", ctx.repository),
        };

        let intro = if narrator {
            vec![format!(
                "⚓ {} shipped to `{}`",
                ctx.display_name(),
                ctx.branch
            )]
        } else {
            vec![format!(
                "Deployed `{}` at `{}` by {}",
                ctx.branch,
                ctx.short_sha(),
                ctx.actor
            )]
        };

        let sections = match summary {
            Some(Summary::Enriched(enrichment)) => {
                let (features, fixes) = if narrator {
                    ("✨ Features", "🔧 Fixes & Improvements")
                } else {
                    ("Features", "Fixes & Improvements")
                };
                [
                    self.section(features, &enrichment.features, "more changes"),
                    self.section(fixes, &enrichment.fixes, "more changes"),
                ]
                .into_iter()
                .flatten()
                .collect()
            }
            Some(Summary::Raw(bullets)) => {
                let title = if narrator { "" } else { "Commits" };
                self.section(title, bullets, "more commits")
                    .into_iter()
                    .collect()
            }
            None => Vec::new(),
        };

        let stats_line = ctx.stats.map(|s| {
            format!(
                "📊 {} file{} changed, +{} / -{}",
                s.files_changed,
                if s.files_changed == 1 { "" } else { "s" },
                s.insertions,
                s.deletions
            )
        });

        let mut closing = Vec::new();
        if narrator {
            closing.push(NARRATOR_STATUS.to_string());
            if let Some(Summary::Enriched(Enrichment {
                punchline: Some(punchline),
                ..
            })) = summary
            {
                closing.push(punchline.clone());
            }
        }

        let links = match self.style.link_policy {
            LinkPolicy::Rich => vec![ctx.run_url.clone(), ctx.compare_url.clone()],
            LinkPolicy::NoPreview if self.style.run_link_on_success => {
                vec![self.run_link(ctx)]
            }
            LinkPolicy::NoPreview => Vec::new(),
        };

        Digest {
            outcome: Outcome::Success,
            header,
            intro,
            sections,
            stats_line,
            closing,
            links,
        }
    }

    // Built from the context alone: no summary reaches this path.
    fn failure(&self, ctx: &DeployContext) -> Digest {
        let (header, intro, withheld) = match self.style.variant {
            StyleVariant::Ledger => {
                let mut intro = vec![
                    format!("Branch: `{}`", ctx.branch),
                    format!("Actor: `{}`", ctx.actor),
                ];
                if let Some(stage) = &ctx.failed_stage {
                    intro.push(format!("Failed stage: `{}`", stage));
                }
                (
                    format!("{} — deploy failed", ctx.repository),
                    intro,
                    LEDGER_WITHHELD,
                )
            }
            StyleVariant::Narrator => {
                let mut intro = vec![
                    format!(
                        "❌ {} failed to deploy on `{}`.",
                        ctx.display_name(),
                        ctx.branch
                    ),
                    format!("🧭 Actor: `{}`", ctx.actor),
                ];
                if let Some(stage) = &ctx.failed_stage {
                    intro.push(format!("🧱 Stage: `{}`", stage));
                }
                (
                    format!("☠️ CaptainHook Alert {} ({} failed)", ctx.date_tag, ctx.repository),
                    intro,
                    NARRATOR_WITHHELD,
                )
            }
        };

        Digest {
            outcome: Outcome::Failure,
            header,
            intro,
            sections: Vec::new(),
            stats_line: None,
            closing: vec![withheld.to_string()],
            links: vec![self.run_link(ctx)],
        }
    }

    fn section(&self, title: &str, bullets: &BulletList, more: &str) -> Option<Section> {
        if bullets.is_empty() {
            return None;
        }
        let lines: Vec<String> = bullets
            .items
            .iter()
            .map(|b| match self.style.variant {
                StyleVariant::Ledger => format!("{} {}", LEDGER_BULLET, b),
                StyleVariant::Narrator => b.clone(),
            })
            .collect();
        Some(Section {
            title: title.to_string(),
            bullets: lines,
            omitted: bullets.omitted,
            omitted_label: more.to_string(),
        })
    }

    /// Run link; wrapped in `<...>` under NoPreview so no embed is rendered.
    fn run_link(&self, ctx: &DeployContext) -> String {
        match self.style.link_policy {
            LinkPolicy::NoPreview => format!("<{}>", ctx.run_url),
            LinkPolicy::Rich => ctx.run_url.clone(),
        }
    }
}
