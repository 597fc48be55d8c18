use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use court_agents::agents::Collaborators;
use court_agents::config::{CliOverrides, CourtConfig};
use court_agents::sink::{FileSink, ResultSink};
use court_agents::telemetry::{append_telemetry, TrialTelemetry};

#[derive(Parser, Debug)]
#[command(author, version, about = "Put a historical topic on trial", long_about = None)]
struct Args {
    /// Topic to put on trial (words are joined with spaces)
    #[arg(required = true, num_args = 1..)]
    topic: Vec<String>,

    /// TOML config file, overlaid on the environment defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum research rounds (overrides COURT_MAX_ROUNDS)
    #[arg(long)]
    max_rounds: Option<u32>,

    /// Per-request research timeout in seconds, 0 for none (overrides COURT_RESEARCH_TIMEOUT_SECS)
    #[arg(long)]
    research_timeout: Option<u64>,

    /// Run the two research requests one after the other
    #[arg(long, default_value_t = false)]
    sequential: bool,

    /// Directory for verdicts and telemetry (overrides COURT_OUTPUT_DIR)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Do not write the verdict or telemetry
    #[arg(long, default_value_t = false)]
    no_save: bool,

    /// Use deterministic scripted collaborators instead of the LLM and Wikipedia
    #[arg(long, default_value_t = false)]
    offline: bool,
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            max_rounds: self.max_rounds,
            research_timeout_secs: self.research_timeout,
            sequential: self.sequential,
            output_dir: self.output_dir.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let topic = args.topic.join(" ");
    let mut config = CourtConfig::load(args.config.as_deref())?;
    config.apply_overrides(&args.overrides())?;

    info!(
        topic = %topic,
        llm = %config.llm.url,
        model = %config.llm.model,
        judge = %config.llm.judge_model(),
        max_rounds = config.trial.max_rounds,
        dispatch = ?config.trial.dispatch,
        offline = args.offline,
        "Court starting"
    );

    let runner = Collaborators::build(&config, args.offline)
        .await?
        .into_runner(config.trial.clone())?;
    let result = runner.run(&topic).await.context("Trial failed")?;
    info!(summary = %result.summary_line(), "Trial complete");

    println!("{}", result.summary_line());
    println!();
    println!("{}", result.verdict.verdict_text);

    if !args.no_save {
        let sink = FileSink::new(&config.output_dir);
        let paths = sink
            .persist(&result)
            .await
            .context("Failed to save verdict")?;
        for path in &paths {
            info!(path = %path.display(), "Wrote");
        }
        append_telemetry(
            &TrialTelemetry::from_result(&result, config.trial.dispatch),
            &config.telemetry_path(),
        );
    }

    Ok(())
}
