//! hzzd: four-lepton pipeline daemon.
//!
//! One binary, one role per process:
//!
//!   hzzd broker    serve the queue broker over HTTP
//!   hzzd produce   chunk every dataset and publish tasks
//!   hzzd work      consume tasks until told to stop
//!   hzzd collect   aggregate results, broadcast shutdown, export
//!   hzzd local     all of the above in one process over an in-memory broker
//!   hzzd init      write the default config file

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use hzz_core::config::PipelineConfig;

mod role;

fn usage() {
    eprintln!("hzzd: four-lepton scatter/gather pipeline");
    eprintln!();
    eprintln!("Usage: hzzd <role>");
    eprintln!();
    eprintln!("  broker     Serve the queue broker (HTTP API + SQLite journal)");
    eprintln!("  produce    Publish chunk tasks, counts and the run start time");
    eprintln!("  work       Process tasks until a shutdown message arrives");
    eprintln!("  collect    Aggregate results, stop the workers, export the histogram");
    eprintln!("  local      Run every role in this process");
    eprintln!("  init       Write the default config if none exists");
    eprintln!();
    eprintln!("Config: {}", PipelineConfig::file_path().display());
}

fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "info" } else { "warn" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(role) = args.first().map(String::as_str) else {
        usage();
        std::process::exit(2);
    };

    let loaded = PipelineConfig::load();
    init_tracing(loaded.as_ref().is_ok_and(|c| c.logging.debug));
    let config = loaded.context("failed to load config")?;

    match role {
        "broker" => role::broker::run(&config).await,
        "produce" => role::produce::run(&config).await,
        "work" => role::work::run(&config).await,
        "collect" => role::collect::run(&config).await,
        "local" => role::local::run(&config).await,
        "init" => {
            let path = PipelineConfig::write_default_if_missing()
                .context("failed to write default config")?;
            println!("{}", path.display());
            Ok(())
        }
        "help" | "--help" | "-h" => {
            usage();
            Ok(())
        }
        other => {
            eprintln!("unknown role: {other}");
            usage();
            std::process::exit(2);
        }
    }
}
