use clap::Parser;
use deploy_notify::context::{self, ChangeStats, ContextInputs, Invocation};
use deploy_notify::error::NotifyError;
use deploy_notify::{NotifyConfig, git, load_config_or_default, logging, notify};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};

const DEFAULT_CONFIG_PATH: &str = "deploy_notify.toml";
const DEFAULT_MAX_COMMITS: usize = 8;

/// Posts a deploy digest for the current CI run to a chat webhook.
#[derive(Debug, Parser)]
#[command(name = "deploy-notify", version)]
struct Cli {
    /// Chat webhook URL (required)
    #[arg(long, env = "CH_DISCORD_WEBHOOK_URL", hide_env_values = true)]
    discord_webhook_url: Option<String>,

    /// API key for commit summarization; raw commit bullets without it
    #[arg(long, env = "CH_OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Model used for commit summarization
    #[arg(long, env = "CH_OPENAI_MODEL")]
    openai_model: Option<String>,

    /// Status of the deploy job (`success`, `failure`, `cancelled`)
    #[arg(long, env = "CH_JOB_STATUS")]
    job_status: Option<String>,

    /// Commit log, one `<sha> <subject>` per line; read from git when absent
    #[arg(long, env = "CH_COMMIT_LOG")]
    commit_log: Option<String>,

    /// `git diff --shortstat` output; computed from git when absent
    #[arg(long, env = "CH_DIFF_STAT")]
    diff_stat: Option<String>,

    /// Pipeline stage that failed, if known
    #[arg(long, env = "CH_FAILED_STAGE")]
    failed_stage: Option<String>,

    /// Persona/style text handed to the summarizer
    #[arg(long, env = "CH_STYLE_FILE")]
    style_file: Option<PathBuf>,

    /// Number of commits read from git
    #[arg(long, env = "CH_MAX_COMMITS", default_value_t = DEFAULT_MAX_COMMITS)]
    max_commits: usize,

    /// TOML configuration file
    #[arg(long, env = "CH_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[arg(long, env = "GITHUB_REPOSITORY")]
    repository: Option<String>,

    #[arg(long, env = "GITHUB_REF_NAME")]
    branch: Option<String>,

    #[arg(long, env = "GITHUB_ACTOR")]
    actor: Option<String>,

    #[arg(long, env = "GITHUB_RUN_ID")]
    run_id: Option<String>,

    /// Link to the CI run; derived from the server URL when absent
    #[arg(long, env = "CH_RUN_URL")]
    run_url: Option<String>,

    #[arg(long, env = "GITHUB_SERVER_URL")]
    server_url: Option<String>,

    #[arg(long, env = "GITHUB_SHA")]
    commit_sha: Option<String>,

    /// Push event payload, read for the previous SHA
    #[arg(long, env = "GITHUB_EVENT_PATH")]
    event_path: Option<PathBuf>,
}

impl Cli {
    fn into_inputs(self, before_sha: Option<String>) -> ContextInputs {
        ContextInputs {
            webhook_url: self.discord_webhook_url,
            openai_api_key: self.openai_api_key,
            repository: self.repository,
            branch: self.branch,
            actor: self.actor,
            run_id: self.run_id,
            run_url: self.run_url,
            server_url: self.server_url,
            commit_sha: self.commit_sha,
            before_sha,
            job_status: self.job_status,
            commit_log: self.commit_log,
            diff_stat: self.diff_stat,
            failed_stage: self.failed_stage,
            date_tag: None,
        }
    }
}

fn load_settings(
    config_path: &Path,
    openai_model: Option<String>,
    style_file: Option<PathBuf>,
) -> Result<NotifyConfig, NotifyError> {
    let mut config = load_config_or_default(config_path)?;
    if let Some(model) = openai_model {
        config.openai.model = model;
    }
    if let Some(style_file) = style_file {
        config.style.persona_file = Some(style_file);
    }
    config.style.load_persona();
    Ok(config)
}

/// Validates the inputs, then loads configuration and fills in commits and
/// stats from git. Missing inputs are reported before any file is read.
async fn prepare(cli: Cli) -> Result<(Invocation, NotifyConfig), NotifyError> {
    let config_path = cli.config.clone();
    let openai_model = cli.openai_model.clone();
    let style_file = cli.style_file.clone();
    let max_commits = cli.max_commits;
    let discover_commits = cli.commit_log.is_none();
    let discover_stats = cli.diff_stat.is_none();

    let before_sha = cli
        .event_path
        .as_deref()
        .and_then(git::read_event_before_sha);

    let mut invocation = context::collect(cli.into_inputs(before_sha.clone()))?;
    let config = load_settings(&config_path, openai_model, style_file)?;

    let ctx = &mut invocation.context;
    let after = Some(ctx.commit_sha.clone());
    if discover_commits {
        let log = git::commit_log(before_sha.as_deref(), after.as_deref(), max_commits).await;
        if let Some(log) = log {
            ctx.commits = context::parse_commit_log(&log);
        }
    }
    if discover_stats {
        let stat = git::shortstat(before_sha.as_deref(), after.as_deref()).await;
        ctx.stats = stat.and_then(|s| ChangeStats::parse_shortstat(&s));
    }

    Ok((invocation, config))
}

async fn run(cli: Cli) -> Result<(), NotifyError> {
    let (invocation, config) = prepare(cli).await?;

    let digest = notify(&invocation, &config).await?;
    info!(
        "Delivered {:?} digest for {} ({} bullets)",
        digest.outcome,
        invocation.context.repository,
        digest.bullet_count()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    logging::setup_logging();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
