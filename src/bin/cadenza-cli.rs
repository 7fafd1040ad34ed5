//! Cadenza CLI - run, classify, and interpret music production requests

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use cadenza::config::{CadenzaConfig, load_config, write_config};
use cadenza::interpreter::{ArrangerDomain, DawDomain, Domain, DrummerDomain, Interpreter, Snapshot};
use cadenza::orchestrator::Orchestrator;
use cadenza::provider::{ContentProvider, OpenAiProvider, ScriptedProvider};
use cadenza::{Action, Capability};
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "cadenza")]
#[command(about = "Turn music production requests into ordered DAW actions", long_about = None)]
struct Cli {
    /// Configuration file (JSON); defaults plus environment when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a request end to end
    Run {
        /// The request text
        request: String,

        /// Session snapshot (JSON)
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Print actions as soon as they are emitted
        #[arg(long)]
        stream: bool,

        /// Replay canned provider outputs from a JSON table instead of calling the API
        #[arg(long)]
        replay: Option<PathBuf>,
    },

    /// Show which generators a request would use
    Classify {
        /// The request text
        request: String,

        /// Replay canned provider outputs for the fallback call
        #[arg(long)]
        replay: Option<PathBuf>,
    },

    /// Interpret a DSL file offline
    Interpret {
        /// DSL domain
        #[arg(long, value_enum, default_value = "daw")]
        domain: DomainArg,

        /// Session snapshot (JSON)
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// DSL source file
        file: PathBuf,
    },

    /// Summarize the keyword table
    Keywords,

    /// Write a configuration file with defaults
    InitConfig {
        /// Destination path
        path: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DomainArg {
    Daw,
    Arranger,
    Drummer,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => CadenzaConfig::from_env()?,
    };

    match cli.command {
        Commands::Run {
            request,
            snapshot,
            stream,
            replay,
        } => {
            let snapshot = read_snapshot(snapshot.as_deref())?;
            let provider = provider(&config, replay.as_deref())?;
            let orchestrator = Orchestrator::new(&config, provider)?;

            let result = if stream || config.streaming {
                orchestrator
                    .generate_actions_stream(&request, &snapshot, |action: &Action| {
                        match serde_json::to_string(action) {
                            Ok(line) => println!("{line}"),
                            Err(err) => eprintln!("unprintable action: {err}"),
                        }
                    })
                    .await
            } else {
                orchestrator.generate_actions(&request, &snapshot).await
            };

            let result = match result {
                Ok(result) => result,
                Err(err) if err.is_user_facing() => {
                    println!("{err}");
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            };
            if !(stream || config.streaming) {
                println!("{}", serde_json::to_string_pretty(&result.actions)?);
            }
            for failure in &result.failures {
                eprintln!("warning: {failure}");
            }
            for capability in &result.unattached {
                eprintln!("warning: {capability} content had no track to attach to");
            }
        }

        Commands::Classify { request, replay } => {
            let provider = provider(&config, replay.as_deref())?;
            let orchestrator = Orchestrator::new(&config, provider)?;
            let detection = orchestrator.classifier().detect(&request);
            println!("keywords: {}", names(&detection.capabilities));
            println!("hints:    {}", names(&detection.hints));
            if detection.fallback {
                match orchestrator.classify(&request).await {
                    Ok(classification) => {
                        let selected: Vec<Capability> = classification.capabilities.into_iter().collect();
                        println!("selected: {} ({:?})", names(&selected), classification.tier);
                    }
                    Err(err) => println!("{err}"),
                }
            } else {
                println!("selected: {} (Keywords)", names(&detection.capabilities));
            }
        }

        Commands::Interpret {
            domain,
            snapshot,
            file,
        } => {
            let snapshot = read_snapshot(snapshot.as_deref())?;
            let source = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            match domain {
                DomainArg::Daw => interpret(DawDomain, &source, &snapshot)?,
                DomainArg::Arranger => interpret(ArrangerDomain, &source, &snapshot)?,
                DomainArg::Drummer => interpret(DrummerDomain, &source, &snapshot)?,
            }
        }

        Commands::Keywords => {
            let table = config.keyword_table()?;
            for (capability, set) in &table.capabilities {
                println!(
                    "{:<10} {} keywords, {} hints",
                    capability.name(),
                    set.keywords.len(),
                    set.hints.len()
                );
            }
            match &config.keywords_path {
                Some(path) => println!("source: {}", path.display()),
                None => println!("source: embedded"),
            }
        }

        Commands::InitConfig { path } => {
            write_config(&path, &config)?;
            println!("Wrote configuration to {}", path.display());
        }
    }

    Ok(())
}

fn provider(config: &CadenzaConfig, replay: Option<&Path>) -> Result<Arc<dyn ContentProvider>> {
    match replay {
        Some(path) => {
            let table = fs::read_to_string(path)
                .with_context(|| format!("Failed to read replay table {}", path.display()))?;
            Ok(Arc::new(ScriptedProvider::from_json(&table)?))
        }
        None => Ok(Arc::new(OpenAiProvider::new(config.provider.clone())?)),
    }
}

fn read_snapshot(path: Option<&Path>) -> Result<Snapshot> {
    let Some(path) = path else {
        return Ok(Snapshot::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    Snapshot::from_json(&text).context("Failed to parse snapshot")
}

fn interpret<D: Domain>(domain: D, source: &str, snapshot: &Snapshot) -> Result<()> {
    let interpreter = Interpreter::new(domain);
    let interpretation = interpreter.interpret(source, snapshot)?;
    println!("{}", serde_json::to_string_pretty(&interpretation.actions)?);
    for notice in &interpretation.notices {
        eprintln!("notice: {}", serde_json::to_string(notice)?);
    }
    let payload = interpreter.domain().payload(&interpretation.actions)?;
    if !payload.is_empty() {
        println!("{} notes:", payload.len());
        for note in &payload {
            println!(
                "  pitch {:>3}  vel {:>3}  start {:>7.3}  dur {:.3}",
                note.pitch, note.velocity, note.start, note.duration
            );
        }
    }
    Ok(())
}

fn names(capabilities: &[Capability]) -> String {
    if capabilities.is_empty() {
        return "-".to_string();
    }
    capabilities
        .iter()
        .map(|capability| capability.name())
        .collect::<Vec<_>>()
        .join(", ")
}
