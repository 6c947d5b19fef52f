// src/main.rs
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use workload_core::{
    export::publish,
    pipeline::{run, CleaningOptions, MissingValues, PipelineInputs},
    server, AppConfig, ArtifactStore, PipelineConfig, SourceFile,
};

#[derive(Parser, Debug)]
#[command(
    name = "workload",
    about = "Timesheet normalization, utilization and budget reports",
    version
)]
struct Cli {
    /// Pipeline configuration file (JSON). Overrides WORKLOAD_PIPELINE_CONFIG.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Artifact directory. Overrides WORKLOAD_ARTIFACT_DIR.
    #[arg(long, global = true)]
    artifact_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline, write the workbook and persist the fact table
    Process {
        /// Timesheet export (.csv or spreadsheet)
        #[arg(long)]
        timesheet: PathBuf,
        /// Employee roster
        #[arg(long)]
        roster: Option<PathBuf>,
        /// Budget register
        #[arg(long)]
        budget: Option<PathBuf>,
        /// Output workbook
        #[arg(long, short, default_value = "workload_summary.xlsx")]
        output: PathBuf,
        /// Collapse repeated whitespace in client and description text
        #[arg(long)]
        trim_text: bool,
        /// Drop duplicate time entries
        #[arg(long)]
        drop_duplicates: bool,
        /// Missing values: keep, fill-unknown, fill-zero or drop-rows
        #[arg(long, value_parser = parse_missing_values, default_value = "keep")]
        missing_values: MissingValues,
    },
    /// Print the team summary of the persisted fact table
    Summary,
    /// Serve the persisted fact table over HTTP(S)
    Serve {
        /// Bind address. Overrides WORKLOAD_BIND_ADDR.
        #[arg(long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut app_config = AppConfig::from_env().context("Failed to read WORKLOAD_* environment")?;
    if let Some(path) = cli.config {
        app_config.pipeline_config = Some(path);
    }
    if let Some(dir) = cli.artifact_dir {
        app_config.artifact_dir = dir;
    }

    match cli.command {
        Command::Process {
            timesheet,
            roster,
            budget,
            output,
            trim_text,
            drop_duplicates,
            missing_values,
        } => {
            let pipeline_config = PipelineConfig::load_or_default(app_config.pipeline_config.as_deref())
                .context("Failed to load pipeline configuration")?;
            let inputs = PipelineInputs {
                timesheet: open_source(&timesheet)?,
                roster: roster.as_deref().map(open_source).transpose()?,
                budget: budget.as_deref().map(open_source).transpose()?,
            };
            let options = CleaningOptions {
                trim_text,
                drop_duplicates,
                missing_values,
            };

            let result = run(&inputs, &pipeline_config, options).context("Pipeline run failed")?;
            for failure in &result.report.aborted_sources {
                warn!("Input '{}' was skipped: {}", failure.source_name, failure.message);
            }
            for (kind, count) in result.report.counts() {
                info!("{}: {}", kind.label(), count);
            }

            let store = ArtifactStore::new(app_config.artifact_dir.clone());
            publish(&result, &store, &output)
                .with_context(|| format!("Failed to publish fact table and workbook {:?}", output))?;
            info!("Done: {} fact rows", result.facts.len());
        }
        Command::Summary => {
            let store = ArtifactStore::new(app_config.artifact_dir.clone());
            let Some(artifact) = store.load().context("Failed to read artifact")? else {
                bail!(
                    "No processed data in {:?}; run `workload process` first",
                    app_config.artifact_dir
                );
            };
            print_team_summary(&artifact.result)?;
        }
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                app_config.bind_addr = bind;
            }
            server::serve(&app_config).await.context("Report server failed")?;
        }
    }

    Ok(())
}

fn parse_missing_values(raw: &str) -> Result<MissingValues, String> {
    match raw {
        "keep" => Ok(MissingValues::Keep),
        "fill-unknown" => Ok(MissingValues::FillUnknown),
        "fill-zero" => Ok(MissingValues::FillZero),
        "drop-rows" => Ok(MissingValues::DropRows),
        other => Err(format!(
            "unknown treatment '{}'; expected keep, fill-unknown, fill-zero or drop-rows",
            other
        )),
    }
}

fn open_source(path: &Path) -> Result<SourceFile> {
    SourceFile::open(path).with_context(|| format!("Failed to open input {:?}", path))
}

fn print_team_summary(result: &workload_core::PipelineResult) -> Result<()> {
    let teams = result.team_report().context("Team summary unavailable")?;
    println!(
        "{:<32} {:>10} {:>16} {:>16} {:>16} {:>10}",
        "Team", "Util %", "Achieved", "Target", "Remaining", "Achieved %"
    );
    for team in teams {
        println!(
            "{:<32} {:>10.1} {:>16} {:>16} {:>16} {:>10.1}{}",
            team.team_name,
            team.utilization.utilization_pct,
            team.target_achieved.round_dp(2),
            team.team_target.round_dp(2),
            team.remaining_for_display().round_dp(2),
            team.target_achieved_pct,
            if team.meets_utilization_target { "" } else { "  below target" },
        );
    }
    Ok(())
}
