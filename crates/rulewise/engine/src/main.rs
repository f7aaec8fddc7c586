//! Rulewise CLI - run the pattern intelligence engine over a record file
//!
//! Subcommands:
//! - `detect` prints the detection report for a JSON array of records
//! - `rules` prints the adaptive rules synthesized from those patterns
//! - `insights` prints the insights of a freshly built engine

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use rulewise_engine::{
    telemetry, Collaborators, DetectionOptions, EngineConfig, PatternIntelligenceEngine,
};
use rulewise_types::{PatternType, RuleContext};

/// Rulewise CLI
#[derive(Parser)]
#[command(name = "rulewise")]
#[command(about = "Rulewise - adaptive pattern intelligence and rule optimization", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "RULEWISE_CONFIG")]
    config: Option<String>,

    /// Log level
    #[arg(long, env = "RULEWISE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "RULEWISE_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect patterns in a JSON array of records
    Detect {
        /// Records file
        #[arg(short, long)]
        input: PathBuf,

        /// Pattern types to run (default: all)
        #[arg(short, long, value_delimiter = ',')]
        types: Vec<String>,
    },

    /// Synthesize adaptive rules from the patterns in a record file
    Rules {
        /// Records file
        #[arg(short, long)]
        input: PathBuf,

        /// Rule targeted by patterns that do not name one
        #[arg(short, long, default_value = "default")]
        rule: String,

        /// Drop rule fragments below this confidence
        #[arg(long, default_value_t = 0.0)]
        min_confidence: f64,
    },

    /// Print engine insights
    Insights,
}

fn read_records(path: &PathBuf) -> Result<Vec<Value>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let parsed: Value =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    match parsed {
        Value::Array(records) => Ok(records),
        _ => bail!("{} must contain a JSON array of records", path.display()),
    }
}

fn parse_types(names: &[String]) -> Result<Vec<PatternType>> {
    names
        .iter()
        .map(|name| {
            PatternType::parse(name).with_context(|| format!("unknown pattern type: {}", name))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = EngineConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;
    telemetry::init_tracing(&config.logging);

    let engine = PatternIntelligenceEngine::new(config, Collaborators::in_memory())?;

    let output = match cli.command {
        Commands::Detect { input, types } => {
            let records = read_records(&input)?;
            let types = parse_types(&types)?;
            let report = engine
                .detect_patterns(records, &types, DetectionOptions::default())
                .await?;
            serde_json::to_string_pretty(&report)?
        }
        Commands::Rules {
            input,
            rule,
            min_confidence,
        } => {
            let records = read_records(&input)?;
            let report = engine
                .detect_patterns(records, &[], DetectionOptions::default())
                .await?;
            let mut context = RuleContext::new(rule);
            context.min_confidence = min_confidence;
            let rules = engine.generate_adaptive_rules(&report.patterns, &context);
            serde_json::to_string_pretty(&rules)?
        }
        Commands::Insights => serde_json::to_string_pretty(&engine.get_pattern_insights()?)?,
    };

    println!("{}", output);
    Ok(())
}
