//! shardmesh catalog inspection tool
//!
//! Validates catalog documents and shows how requests would be routed and
//! planned against them.
//!
//! Usage:
//!   shardmesh --catalog catalog.json validate
//!   shardmesh --catalog catalog.json routes --dataset Default --key alice
//!   shardmesh --catalog catalog.json plan --dataset Default --command search --body query.json

use clap::{Parser, Subcommand};
use serde_json::Value;
use shardmesh::catalog::{self, CatalogHandle};
use shardmesh::config::RouterConfig;
use shardmesh::planner::{DistributedCommandPlanner, DistributedSearchPlanner, Message, StepOptions};
use shardmesh::routing::{ReplicaPolicy, RoutingRequest};
use shardmesh::telemetry::Telemetry;
use shardmesh::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::signal;
use tracing::info;

/// shardmesh catalog tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Catalog document
    #[arg(long, env = "SHARDMESH_CATALOG_PATH")]
    catalog: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the catalog and report every problem found
    Validate,

    /// Print the destinations of a broadcast or scatter request
    Routes {
        #[arg(long)]
        dataset: String,

        /// Scatter by this key; broadcast when omitted
        #[arg(long)]
        key: Option<String>,

        /// Replica policy (top, random, all)
        #[arg(long)]
        replica: Option<ReplicaPolicy>,

        /// Live node; repeat for several
        #[arg(long = "live-node")]
        live_nodes: Vec<String>,
    },

    /// Print the partitions a farm (version 1) or node (version 2) serves
    Partitions {
        #[arg(long)]
        name: String,
    },

    /// Print every node named by the catalog
    Nodes,

    /// Print the distributed plan of a command
    Plan {
        #[arg(long)]
        dataset: String,

        #[arg(long, default_value = "search")]
        command: String,

        /// JSON file holding the message body
        #[arg(long)]
        body: Option<PathBuf>,
    },

    /// Keep reloading the catalog until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let _telemetry = match Telemetry::init_for_component("shardmesh", &args.log_level) {
        Ok(telemetry) => telemetry,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::Validation(errors)) => {
            eprintln!("✗ {} problem(s) found", errors.len());
            for error in errors.errors() {
                eprintln!("  {}: {}", error.field, error.message());
            }
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("{}", e.to_error_body());
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> shardmesh::Result<()> {
    let mut config = RouterConfig::from_env()?;
    if let Some(path) = args.catalog {
        config.catalog_path = path;
    }

    match args.command {
        Command::Validate => {
            let catalog = catalog::load(&config.catalog_path)?;
            println!(
                "✓ {} is valid (version {}, {} dataset(s), effective {})",
                config.catalog_path.display(),
                catalog.version(),
                catalog.dataset_names().len(),
                catalog.effective_date()
            );
        }
        Command::Routes {
            dataset,
            key,
            replica,
            live_nodes,
        } => {
            let handle = config.load_catalog()?;
            let router = config.router(&handle);
            let replica = replica.unwrap_or_else(|| router.default_replica());
            let mut request = match key {
                Some(key) => RoutingRequest::scatter(key, replica),
                None => RoutingRequest::broadcast(replica),
            };
            if !live_nodes.is_empty() {
                request = request.with_live_nodes(live_nodes);
            }
            for address in router.route(&dataset, &request)? {
                println!("{}", address);
            }
        }
        Command::Partitions { name } => {
            let catalog = catalog::load(&config.catalog_path)?;
            let partitions = catalog.get_partitions(&name);
            println!("{}", serde_json::to_string_pretty(&partitions)?);
        }
        Command::Nodes => {
            let catalog = catalog::load(&config.catalog_path)?;
            for node in catalog.all_nodes() {
                println!("{}", node);
            }
        }
        Command::Plan {
            dataset,
            command,
            body,
        } => {
            let body: Value = match body {
                Some(path) => serde_json::from_slice(&tokio::fs::read(&path).await?)?,
                None => Value::Object(Default::default()),
            };
            let handle = config.load_catalog()?;
            let router = config.router(&handle);
            let message = Message::new(command.clone(), dataset, body);

            let plan = if command == "search" {
                DistributedSearchPlanner::new(&router, message).plan()?
            } else {
                let mut planner = DistributedCommandPlanner::new(&router, message);
                planner.broadcast(StepOptions::default());
                planner.plan()?
            };
            println!("{}", serde_json::to_string_pretty(&plan.to_value()?)?);
        }
        Command::Watch => watch(config).await?,
    }
    Ok(())
}

async fn watch(mut config: RouterConfig) -> shardmesh::Result<()> {
    let handle: CatalogHandle = config.load_catalog()?;
    if config.reload_interval.is_none() {
        config.reload_interval = RouterConfig::default().reload_interval;
    }
    let Some(watcher) = config.watcher(handle.clone()) else {
        return Ok(());
    };
    let shutdown = watcher.shutdown_token();
    let task = tokio::spawn(watcher.run());

    info!(path = %config.catalog_path.display(), "Watching catalog, press Ctrl-C to stop");
    signal::ctrl_c().await?;
    shutdown.cancel();
    let _ = task.await;

    let catalog = handle.load();
    println!(
        "Stopped; current catalog effective {} with {} node(s)",
        catalog.effective_date(),
        catalog.all_nodes().len()
    );
    Ok(())
}
