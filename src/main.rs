use std::env;
use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;

use dwitter_graph::config::Config;
use dwitter_graph::media::{HttpBlobStore, MediaReleaser};
use dwitter_graph::relations::RelationMutator;
use dwitter_graph::store::Store;

const USAGE: &str = "usage: dwitter-graph <repair-counters|release-media|stats>";

fn main() -> ExitCode {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let command = match env::args().nth(1) {
        Some(command) => command,
        None => {
            eprintln!("{}", USAGE);
            return ExitCode::FAILURE;
        }
    };

    match run(&command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{} failed: {}", command, e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: &str) -> Result<(), Box<dyn Error>> {
    let config = Config::from_env()?;
    log::info!("Database: {}", config.database_path);

    let store = Arc::new(Store::new(&config.database_path)?);

    match command {
        "repair-counters" => {
            let report = RelationMutator::new(store).repair_counters()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        "release-media" => {
            let blobs = HttpBlobStore::from_config(config.blob()?)?;
            let releaser = MediaReleaser::new(store, Arc::new(blobs));
            let result = releaser.release_pending()?;
            if !result.is_complete() {
                log::warn!("{} media releases still pending", result.pending.len());
            }
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        "stats" => {
            println!("{}", serde_json::to_string_pretty(&store.stats()?)?);
        }
        other => return Err(format!("unknown command {:?}; {}", other, USAGE).into()),
    }

    Ok(())
}
