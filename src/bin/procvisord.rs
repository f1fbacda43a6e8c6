//! The supervisor daemon.
//!
//! Loads the configuration, sets up logging, and runs the supervisor in
//! the foreground until SIGTERM/SIGINT. Exits non-zero on configuration
//! rejection, a busy pidfile, or a shutdown that overran its grace
//! period.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use procvisor::{config, LogSubscriber, Subscribe, Supervisor};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "procvisord", version, about = "Unix process supervisor daemon")]
struct Args {
    /// Configuration file path.
    #[arg(short = 'c', long = "configuration", default_value = "procvisor.conf")]
    configuration: PathBuf,

    /// Log level override (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "loglevel")]
    loglevel: Option<String>,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.to_ascii_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let cfg = match config::load(&args.configuration) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("procvisord: {err}");
            std::process::exit(1);
        }
    };

    let level = args.loglevel.clone().unwrap_or_else(|| cfg.loglevel.clone());
    init_logging(&level);

    let subscribers: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogSubscriber)];
    let supervisor = Supervisor::new(cfg, &args.configuration, subscribers);

    if let Err(err) = supervisor.run().await {
        error!("{err}");
        std::process::exit(1);
    }
}
