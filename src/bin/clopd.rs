//! `clopd`: command-line surface over the engine. Grounded on
//! `dodogabrie-space_media_optimizer`'s `clap::Parser` CLI shape, adapted to
//! the engine's own request/ticket model instead of a standalone batch run.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use clop_core::error::ClopResult;
use clop_core::format;
use clop_core::request::{Metadata, Request, Status};
use clop_core::Engine;

#[derive(Parser)]
#[command(name = "clopd")]
#[command(about = "Headless concurrent media optimisation engine")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Application name used to locate the settings directory.
    #[arg(long, global = true, default_value = "clop")]
    app_name: String,
}

#[derive(Subcommand)]
enum Command {
    /// Optimise one or more files and print a JSON result per file.
    Optimise {
        /// Files to optimise.
        paths: Vec<PathBuf>,

        /// Delete the source file after a successful optimisation.
        #[arg(long)]
        delete_source: bool,
    },
    /// Run the directory watcher and automation endpoints until interrupted.
    Watch,
}

#[tokio::main]
async fn main() {
    clop_core::init_tracing();
    let args = Args::parse();

    let result = match args.command {
        Command::Optimise { paths, delete_source } => run_optimise(&args.app_name, paths, delete_source).await,
        Command::Watch => run_watch(&args.app_name).await,
    };

    if let Err(e) = result {
        error!(error = %e, "clopd exited with an error");
        std::process::exit(1);
    }
}

async fn run_optimise(app_name: &str, paths: Vec<PathBuf>, delete_source: bool) -> ClopResult<()> {
    if paths.is_empty() {
        eprintln!("no paths given; nothing to optimise");
        std::process::exit(2);
    }

    let engine = Engine::open(app_name).await?;
    let mut any_failed = false;

    for path in paths {
        let outcome = optimise_one(&engine, &path, delete_source).await;
        match outcome {
            Ok(result) => {
                if !matches!(result.status, Status::Succeeded) {
                    any_failed = true;
                }
                println!("{}", result.to_json());
            }
            Err(e) => {
                any_failed = true;
                println!(
                    "{}",
                    json!({ "path": path.display().to_string(), "status": "Failed", "message": e.to_string() })
                );
            }
        }
    }

    engine.shutdown();
    if any_failed {
        std::process::exit(1);
    }
    Ok(())
}

struct CliOutcome {
    status: Status,
    json: serde_json::Value,
}

impl CliOutcome {
    fn to_json(&self) -> serde_json::Value {
        self.json.clone()
    }
}

async fn optimise_one(engine: &Engine, path: &PathBuf, delete_source: bool) -> ClopResult<CliOutcome> {
    let file_path = clop_core::path::FilePath::from_path(path)?;
    let extension = file_path.extension().unwrap_or_default();
    let item_type = format::classify_extension(&extension)
        .ok_or_else(|| clop_core::error::ClopError::UnsupportedType(path.clone()))?;

    let mut metadata = Metadata::new();
    metadata.set("deleteOriginal", delete_source);

    let request_id = engine.coordinator.next_request_id();
    let request = Request {
        request_id,
        item_type,
        source_path: file_path,
        metadata,
    };

    let ticket = engine.coordinator.enqueue(request, CancellationToken::new());
    let outcome = ticket.wait().await;

    Ok(CliOutcome {
        status: outcome.status,
        json: serde_json::to_value(&outcome).unwrap_or_else(|_| json!({ "status": "Failed" })),
    })
}

async fn run_watch(app_name: &str) -> ClopResult<()> {
    let engine = Engine::open(app_name).await?;
    info!("watcher and automation endpoints running; press Ctrl+C to stop");

    tokio::select! {
        _ = engine.serve_automation() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt, shutting down");
        }
    }

    engine.shutdown();
    Ok(())
}
