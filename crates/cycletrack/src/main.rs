use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cycletrack_core::analysis::Analyzer;
use cycletrack_core::config::ValidationConfig;
use cycletrack_core::loader::UnifiedLoader;
use cycletrack_core::validation::{QualityValidator, ValidationReport};
use cycletrack_parser::model::CyclerFormat;

#[derive(Parser, Debug)]
#[command(author, version, about = "Battery cycler data inspection and validation CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Cheap marker-level summary of a data directory (no data parse)
    Inspect(InspectArgs),
    /// Load, standardize and quality-validate a data directory
    Validate(RunArgs),
    /// Load, validate and compute per-cycle performance metrics
    Analyze(RunArgs),
}

#[derive(Args, Debug)]
struct InspectArgs {
    /// Data directory to inspect
    path: PathBuf,

    /// Emit machine-readable JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Data directory to load
    path: PathBuf,

    /// Skip auto-detection and use this format (toyo1, toyo2, pne)
    #[arg(long)]
    format: Option<String>,

    /// TOML file overriding validation thresholds
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit machine-readable JSON instead of text
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Inspect(args) => inspect(args),
        Command::Validate(args) => validate(args),
        Command::Analyze(args) => analyze(args),
    }
}

fn inspect(args: InspectArgs) -> Result<()> {
    let summary = UnifiedLoader::peek(&args.path)
        .with_context(|| format!("failed to inspect {}", args.path.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    match summary.format {
        Some(format) => println!(
            "format: {format} (confidence {:.0}%)",
            summary.confidence * 100.0
        ),
        None => println!("format: unknown"),
    }
    for channel in &summary.channels {
        let extra = if channel.has_capacity_log {
            ", capacity log"
        } else if channel.has_index_files {
            ", index files"
        } else {
            ""
        };
        println!(
            "  channel {}: {} data files{extra}",
            channel.name, channel.data_files
        );
    }
    Ok(())
}

fn validate(args: RunArgs) -> Result<()> {
    let (config, hint) = run_options(&args)?;
    let datasets = UnifiedLoader::load_all_with_hint(&args.path, hint)
        .with_context(|| format!("failed to load {}", args.path.display()))?;

    let validator = QualityValidator::new(config);
    let mut all_valid = true;

    for dataset in &datasets {
        let report = validator.validate(dataset)?;
        all_valid &= report.is_valid;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_validation(&dataset.context().channel_id, &report);
        }
    }

    if !all_valid {
        std::process::exit(1);
    }
    Ok(())
}

fn analyze(args: RunArgs) -> Result<()> {
    let (config, hint) = run_options(&args)?;
    let datasets = UnifiedLoader::load_all_with_hint(&args.path, hint)
        .with_context(|| format!("failed to load {}", args.path.display()))?;

    let validator = QualityValidator::new(config.clone());
    let analyzer = Analyzer::new(config);

    for dataset in &datasets {
        let validation = validator.validate(dataset)?;
        let analysis = analyzer.analyze(dataset, &validation)?;

        if args.json {
            println!("{}", serde_json::to_string_pretty(&analysis)?);
            continue;
        }

        print_validation(&dataset.context().channel_id, &validation);
        for stats in &analysis.column_stats {
            println!(
                "  {}: mean={:.4} std={:.4} min={:.4} max={:.4} (n={})",
                stats.column, stats.mean, stats.std, stats.min, stats.max, stats.count
            );
        }
        for cycle in &analysis.cycle_metrics {
            let efficiency = cycle
                .coulombic_efficiency_pct
                .map(|v| format!("{v:.2}%"))
                .unwrap_or_else(|| "n/a".to_string());
            let retention = cycle
                .capacity_retention_pct
                .map(|v| format!("{v:.2}%"))
                .unwrap_or_else(|| "n/a".to_string());
            println!(
                "  cycle {}: {} points, efficiency {efficiency}, retention {retention}",
                cycle.cycle, cycle.data_points
            );
        }
    }
    Ok(())
}

fn run_options(args: &RunArgs) -> Result<(ValidationConfig, Option<CyclerFormat>)> {
    let config = match &args.config {
        Some(path) => ValidationConfig::from_toml_file(path)
            .with_context(|| format!("failed to read config {}", path.display()))?,
        None => ValidationConfig::default(),
    };

    let hint = args
        .format
        .as_deref()
        .map(|value| {
            CyclerFormat::try_from(value).map_err(|err| anyhow::anyhow!("--format: {err}"))
        })
        .transpose()?;

    if let Some(hint) = hint {
        info!(format = hint.as_str(), "format hint supplied");
    }
    Ok((config, hint))
}

fn print_validation(channel: &str, report: &ValidationReport) {
    let status = if report.is_valid { "VALID" } else { "INVALID" };
    println!(
        "channel {channel}: {status}, quality score {:.1}, {} issue(s)",
        report.quality_score,
        report.issues.len()
    );
    for issue in &report.issues {
        let rows = issue
            .rows
            .map(|(first, last)| format!(" [rows {first}-{last}]"))
            .unwrap_or_default();
        println!("  {:?}/{:?}: {}{rows}", issue.severity, issue.category, issue.description);
    }
    for recommendation in &report.recommendations {
        println!("  recommendation: {recommendation}");
    }
}
