//! `pzp`: drive configured Pieces from the command line.
//!
//! ```bash
//! pzp kinds
//! pzp --config lab.toml list
//! pzp --debug get laser:power
//! pzp set stage:pos 12.5
//! pzp action dmd White
//! pzp action dmd "Run Sequence" --args '{"loop": true}'
//! pzp format "scan_{laser:wavelength}nm"
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pzp_core::Puzzle;
use pzp_hardware::{build_puzzle, logging, registry, PuzzleConfig};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pzp")]
#[command(about = "Laboratory hardware Pieces, headless", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./pzp.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run without touching hardware
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the Piece kinds that can be configured
    Kinds,

    /// List configured Pieces with their parameters and actions
    List,

    /// Read a parameter from hardware
    Get {
        /// `piece:param`
        address: String,
    },

    /// Write a parameter
    Set {
        /// `piece:param`
        address: String,
        /// JSON value; bare words are taken as strings
        value: String,
    },

    /// Run an action
    Action {
        /// Piece name
        piece: String,
        /// Action name
        action: String,
        /// JSON object of keyword arguments
        #[arg(long)]
        args: Option<String>,
    },

    /// Expand `{piece:param}` placeholders with cached values
    Format {
        /// Template
        template: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = PuzzleConfig::load(cli.config.as_deref())?;
    config.debug |= cli.debug;
    config.validate()?;
    logging::init_from_config(&config)?;

    let registry = registry();
    if let Commands::Kinds = cli.command {
        for (kind, name) in registry.kinds() {
            println!("{kind:<28} {name}");
        }
        return Ok(());
    }

    let mut puzzle = build_puzzle(&config, &registry).await?;
    let outcome = run(&puzzle, cli.command).await;
    if let Err(e) = puzzle.close().await {
        tracing::warn!(error = %e, "closing pieces failed");
    }
    outcome
}

async fn run(puzzle: &Puzzle, command: Commands) -> Result<()> {
    match command {
        Commands::Kinds => Ok(()),
        Commands::List => {
            list(puzzle);
            Ok(())
        }
        Commands::Get { address } => {
            let value = puzzle.param(&address)?.get_json().await?;
            println!("{value}");
            Ok(())
        }
        Commands::Set { address, value } => {
            let stored = puzzle.param(&address)?.set_json(parse_value(&value)).await?;
            println!("{stored}");
            Ok(())
        }
        Commands::Action {
            piece,
            action,
            args,
        } => {
            let args = match args {
                Some(args) => serde_json::from_str(&args).context("--args must be JSON")?,
                None => Value::Null,
            };
            let result = puzzle.run_action(&piece, &action, args).await?;
            if !result.is_null() {
                println!("{result}");
            }
            Ok(())
        }
        Commands::Format { template } => {
            println!("{}", puzzle.format(&template));
            Ok(())
        }
    }
}

fn list(puzzle: &Puzzle) {
    for (name, piece) in puzzle.pieces() {
        println!("{name} ({})", piece.kind());
        for (param, handle) in piece.params().iter() {
            let meta = handle.metadata();
            let mut flags = Vec::new();
            if meta.read_only {
                flags.push("read-only");
            }
            if !meta.visible {
                flags.push("hidden");
            }
            let flags = if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            };
            println!("  {param} = {}{flags}", handle.display());
        }
        for action in piece.actions().iter() {
            let hidden = if action.is_visible() { "" } else { " [hidden]" };
            println!("  > {}{hidden}", action.name());
        }
    }
}

/// JSON if it parses, otherwise the raw text as a string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
