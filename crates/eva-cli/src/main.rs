//! Command-line interface for EVA decision validation.
//!
//! `eva validate` runs one decision through the full pipeline against a
//! local corpus, `eva batch` a file of decisions, `eva audit` fetches a
//! sealed record and `eva verify` walks the whole chain.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use eva_core::DecisionRecord;
use eva_runtime::{
    CorpusStore, MemoryCorpusStore, RuntimeConfig, SessionRunner, SledCorpusStore,
};

#[derive(Debug, Parser)]
#[command(name = "eva", about = "Decision-governance validation", version)]
struct Cli {
    /// Corpus location; omitted runs against an empty in-memory corpus
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Threshold profile preset (standard, medical, financial, research)
    #[arg(long, global = true, default_value = "standard")]
    profile: String,

    /// Emit raw JSON instead of the readable summary
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate a single decision document (JSON or YAML)
    Validate { file: PathBuf },

    /// Validate a JSON file holding an array of decisions
    Batch { file: PathBuf },

    /// Fetch a sealed audit record by reference
    Audit { reference: String },

    /// Verify hash integrity and linkage of the whole audit chain
    Verify,
}

fn open_runner(cli: &Cli) -> anyhow::Result<SessionRunner> {
    let store: Arc<dyn CorpusStore> = match &cli.store {
        Some(path) => Arc::new(
            SledCorpusStore::open(path)
                .with_context(|| format!("opening corpus at {}", path.display()))?,
        ),
        None => Arc::new(MemoryCorpusStore::new()),
    };
    let config = RuntimeConfig {
        profile: cli.profile.clone(),
        ..Default::default()
    };
    SessionRunner::new(config, store).context("initializing runner")
}

fn load_decision(path: &PathBuf) -> anyhow::Result<DecisionRecord> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let decision = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => DecisionRecord::from_yaml(&contents)?,
        _ => DecisionRecord::from_json(&contents)?,
    };
    Ok(decision)
}

fn print_output(output: &eva_core::ValidationOutput, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(output)?);
        return Ok(());
    }

    println!(
        "{}  confidence {:.2}  audit {}",
        output.status,
        output.validation_confidence,
        output.audit_reference.as_deref().unwrap_or("<none>")
    );
    if let Some(details) = &output.escalation_details {
        println!("  verdict: {}  level: {}", details.verdict, details.level);
        for trigger in &details.triggers {
            println!("  - {}", trigger);
        }
        if details.requires_human_review {
            println!("  human review required");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let runner = open_runner(&cli)?;

    match &cli.command {
        Command::Validate { file } => {
            let decision = load_decision(file)?;
            let output = runner.validate(decision).await;
            print_output(&output, cli.json)?;
            if !output.released() {
                std::process::exit(2);
            }
        }
        Command::Batch { file } => {
            let contents = std::fs::read_to_string(file)
                .with_context(|| format!("reading {}", file.display()))?;
            let values: Vec<serde_json::Value> =
                serde_json::from_str(&contents).context("batch file must be a JSON array")?;
            let mut decisions = Vec::with_capacity(values.len());
            for (index, value) in values.iter().enumerate() {
                decisions.push(
                    DecisionRecord::from_json(&value.to_string())
                        .with_context(|| format!("decision at index {}", index))?,
                );
            }

            let outputs = runner.validate_batch(decisions).await?;
            let mut blocked = 0usize;
            for output in &outputs {
                print_output(output, cli.json)?;
                if !output.released() {
                    blocked += 1;
                }
            }
            if !cli.json {
                println!("{} of {} released", outputs.len() - blocked, outputs.len());
            }
        }
        Command::Audit { reference } => {
            match runner.audit_record(reference).await? {
                Some(record) if cli.json => {
                    println!("{}", serde_json::to_string_pretty(&record)?)
                }
                Some(record) => println!("{}", record.summary()),
                None => bail!("no audit record {}", reference),
            }
        }
        Command::Verify => {
            let records = runner.verify_chain().await?;
            println!("chain intact: {} record(s)", records);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_validate_with_profile() {
        let cli = Cli::parse_from(["eva", "--profile", "medical", "validate", "decision.json"]);
        assert_eq!(cli.profile, "medical");
        assert!(matches!(cli.command, Command::Validate { .. }));
    }
}
