use crate::infra::{build_orchestrator, parse_date, SimulatedConnector};
use crate::server;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use referral_orchestrator::config::AppConfig;
use referral_orchestrator::error::AppError;
use referral_orchestrator::telemetry;
use referral_orchestrator::workflows::referral::{
    OrchestratorSettings, PassStage, ReferralIntake, ReferralSource, StageSummary,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "Referral Lifecycle Orchestrator",
    about = "Drive food-benefit referrals through their lifecycle passes",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Run lifecycle passes once against a freshly seeded store and print the summaries
    Run(RunArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct RunArgs {
    /// Pass to run (requested, accepted, in-progress, completed). Runs all four in order when omitted.
    #[arg(long)]
    pub(crate) stage: Option<PassStage>,
    /// Restrict the pass to one referral source
    #[arg(long)]
    pub(crate) source: Option<ReferralSource>,
    /// Report what would happen without writing or calling the executor
    #[arg(long)]
    pub(crate) dry_run: bool,
    /// CSV export of new referrals imported before the passes run
    #[arg(long)]
    pub(crate) intake_csv: Option<PathBuf>,
    /// Source assigned to CSV rows without a `source` column
    #[arg(long)]
    pub(crate) default_source: Option<ReferralSource>,
    /// Date recorded on actions (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = parse_date)]
    pub(crate) as_of: Option<NaiveDate>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Run(args) => run_passes(args),
    }
}

fn run_passes(args: RunArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let orchestrator = build_orchestrator(&config.pipeline, Arc::new(SimulatedConnector))?;
    let settings = OrchestratorSettings {
        as_of: args.as_of,
        ..orchestrator.settings().clone()
    };
    let orchestrator = orchestrator.with_settings(settings);

    if let Some(path) = args.intake_csv.as_deref() {
        let mut intake = ReferralIntake::new();
        if let Some(source) = args.default_source {
            intake = intake.with_default_source(source);
        }
        let report = intake.import_path(orchestrator.repository().as_ref(), path)?;
        info!(rows = report.rows, path = %path.display(), "intake seeded the store");
    }

    let stages = match args.stage {
        Some(stage) => vec![stage],
        None => PassStage::ALL.to_vec(),
    };

    let mut summaries: Vec<StageSummary> = Vec::with_capacity(stages.len());
    for stage in stages {
        summaries.push(orchestrator.run_stage(stage, args.source, args.dry_run)?);
    }

    let rendered = serde_json::to_string_pretty(&summaries).map_err(std::io::Error::other)?;
    println!("{rendered}");
    Ok(())
}
