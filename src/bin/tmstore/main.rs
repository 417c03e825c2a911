//! tmstore CLI tool
//!
//! Command-line maintenance for topic map stores.
//!
//! ## Commands
//!
//! - `init <locator>`: Create an empty topic map
//! - `list`: List the topic maps in the store
//! - `stats <locator>`: Count the constructs of a topic map
//! - `check <locator>`: Verify identity and referential invariants
//! - `merge <target> <source>`: Merge one topic map into another
//! - `remove <locator>`: Delete a topic map and everything in it

use clap::{Parser, Subcommand};
use std::{collections::BTreeMap, path::PathBuf, process::ExitCode};
use topicstore::{
    config::{ConfigProvider, StoreConfig, TomlConfigProvider},
    properties::Locator,
    system::TopicMapSystem,
    TopicStoreError,
};

#[derive(Parser)]
#[command(name = "tmstore")]
#[command(author, version, about = "Maintenance tool for topic map stores", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty topic map
    Init {
        /// Base locator of the new topic map
        locator: String,
    },

    /// List the topic maps in the store
    List,

    /// Count the constructs of a topic map by kind
    Stats {
        locator: String,
    },

    /// Verify the invariants of a topic map, exiting non-zero on violations
    Check {
        locator: String,
    },

    /// Merge the source topic map into the target
    Merge {
        target: String,
        source: String,
    },

    /// Delete a topic map and every construct in it
    Remove {
        locator: String,
    },
}

fn load_config(path: Option<PathBuf>) -> Result<StoreConfig, TopicStoreError> {
    match path {
        Some(path) => TomlConfigProvider::new(path).load(),
        None => Ok(StoreConfig::default()),
    }
}

fn run(cli: Cli) -> Result<ExitCode, TopicStoreError> {
    let system = TopicMapSystem::from_config(load_config(cli.config)?)?;

    match cli.command {
        Commands::Init { locator } => {
            let tm = system.create_topic_map(&Locator::parse(&locator)?)?;
            println!("Created {} ({})", tm.locator(), tm.id());
        }

        Commands::List => {
            for locator in system.locators()? {
                println!("{locator}");
            }
        }

        Commands::Stats { locator } => {
            let mut tm = system.open_topic_map(&Locator::parse(&locator)?)?;
            let mut counts: BTreeMap<String, usize> = BTreeMap::new();
            for construct in tm.constructs()? {
                *counts.entry(construct.kind().to_string()).or_default() += 1;
            }
            println!("\n=== {} ===", tm.locator());
            for (kind, count) in counts {
                println!("{kind}: {count}");
            }
        }

        Commands::Check { locator } => {
            let mut tm = system.open_topic_map(&Locator::parse(&locator)?)?;
            let violations = tm.built_in_test()?;
            if violations.is_empty() {
                println!("{}: ok", tm.locator());
                return Ok(ExitCode::SUCCESS);
            }
            for violation in &violations {
                println!("{violation}");
            }
            println!("{}: {} violation(s)", tm.locator(), violations.len());
            return Ok(ExitCode::FAILURE);
        }

        Commands::Merge { target, source } => {
            let mut target = system.open_topic_map(&Locator::parse(&target)?)?;
            let mut source = system.open_topic_map(&Locator::parse(&source)?)?;
            target.merge_in(&mut source)?;
            println!("Merged {} into {}", source.locator(), target.locator());
        }

        Commands::Remove { locator } => {
            let locator = Locator::parse(&locator)?;
            system.remove_topic_map(&locator)?;
            println!("Removed {locator}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
