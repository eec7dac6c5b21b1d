//! nsot CLI tool
//!
//! Loads an inventory seed (see `nsot_core::seed`) into memory and inspects it.
//!
//! ## Commands
//!
//! - `check <seed>`: Apply the seed and validate every attribute dependency
//! - `query <seed> <resource-type> <query>`: Evaluate a set query
//! - `show <seed> <resource-id>`: Print a resource with its merged attributes
//! - `sync <seed> <db>` (feature `service`): Mirror the seeded inventory into SQLite

use clap::{Parser, Subcommand};
use nsot_core::{
    config::{ConfigProvider, NsotConfig, TomlConfigProvider},
    inventory::Inventory,
    properties::{ResourceId, ResourceType},
    resource::AttributeBearer,
    seed::Seed,
    NsotError,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nsot")]
#[command(author, version, about = "Check and query Network Source of Truth inventory seeds", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a seed file and validate the attribute dependency graph
    Check {
        /// Path to the TOML seed
        seed: PathBuf,
    },

    /// Evaluate a set query such as `owner=neteng -role=core +vendor_regex=^jun`
    Query {
        seed: PathBuf,

        /// Device, Network, Interface, Circuit, AutonomousSystem or Protocol
        resource_type: String,

        query: String,

        /// Restrict to the named site
        #[arg(long)]
        site: Option<String>,

        /// Fail unless exactly one resource matches
        #[arg(long)]
        unique: bool,

        /// Let inheritable attributes match descendants (Network and Interface only)
        #[arg(long)]
        inherit: bool,
    },

    /// Show one resource with its explicit and inherited attributes
    Show {
        seed: PathBuf,

        resource_id: u64,
    },

    /// Apply a seed and write its attributes and values to a SQLite database
    #[cfg(feature = "service")]
    Sync {
        seed: PathBuf,

        /// Database file (created if missing)
        #[arg(default_value = nsot_core::db::NSOT_DB)]
        db: PathBuf,
    },
}

fn load_config(path: Option<PathBuf>) -> Result<NsotConfig, NsotError> {
    match path {
        Some(path) => TomlConfigProvider::new(path).get_config(),
        None => Ok(NsotConfig::default()),
    }
}

fn load(config: &NsotConfig, seed: &PathBuf) -> Result<Inventory, NsotError> {
    let mut inventory = Inventory::new(config.clone())?;
    Seed::from_path(seed)?.apply(&mut inventory)?;
    Ok(inventory)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(cli.config)?;

    let default_filter = config.log_filter.clone().unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    match cli.command {
        Commands::Check { seed } => {
            let inventory = load(&config, &seed)?;
            let mut failures = 0;
            for attr in inventory.schema().iter() {
                if let Err(e) = inventory.validate_dependencies(attr.id) {
                    eprintln!("{} {}: {}", attr.resource_type, attr.name, e);
                    failures += 1;
                }
            }
            println!(
                "{} sites, {} attributes, {} values",
                inventory.sites().count(),
                inventory.schema().len(),
                inventory.values().len()
            );
            if failures > 0 {
                eprintln!("{failures} attributes failed dependency validation");
                std::process::exit(1);
            }
        }
        Commands::Query {
            seed,
            resource_type,
            query,
            site,
            unique,
            inherit,
        } => {
            let inventory = load(&config, &seed)?;
            let resource_type = ResourceType::try_from(resource_type.as_str())?;
            let site_id = match site {
                Some(name) => Some(
                    inventory
                        .site_by_name(&name)
                        .map(|s| s.id)
                        .ok_or_else(|| NsotError::NotFound(format!("Site {name:?}")))?,
                ),
                None => None,
            };
            let found = if inherit {
                inventory.filter_by_attributes(resource_type, &query, site_id)?
            } else {
                inventory.set_query(resource_type, &query, site_id, unique)?
            };
            for resource in found {
                println!("{}\t{}", resource.id().0, resource.label());
            }
        }
        Commands::Show { seed, resource_id } => {
            let inventory = load(&config, &seed)?;
            let id = ResourceId(resource_id);
            let resource = inventory
                .get(id)
                .ok_or_else(|| NsotError::NotFound(format!("Resource {id}")))?;
            let mut dict = resource.to_dict();
            if let Some(obj) = dict.as_object_mut() {
                obj.insert(
                    "merged_attributes".to_string(),
                    serde_json::to_value(inventory.merged_attributes(id)?)?,
                );
            }
            println!("{}", serde_json::to_string_pretty(&dict)?);
        }
        #[cfg(feature = "service")]
        Commands::Sync { seed, db } => {
            use nsot_core::db::{db_init, DbConnection, Transaction};

            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
            let mut inventory = Inventory::new(config.clone())?.with_event_sender(tx);
            Seed::from_path(&seed)?.apply(&mut inventory)?;
            drop(inventory);

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(async move {
                let pool = db_init(db).await?;
                let mut transaction = Transaction::new();
                while let Ok(event) = rx.try_recv() {
                    transaction.add_event(&event);
                }
                let staged = transaction.staged;
                transaction.execute(&pool).await?;
                let values = DbConnection(pool).count_values(None).await?;
                println!("synced {staged} events, {values} values stored");
                Ok::<(), NsotError>(())
            })?;
        }
    }
    Ok(())
}
