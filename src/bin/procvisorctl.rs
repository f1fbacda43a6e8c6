//! The control client.
//!
//! Talks to a running `procvisord` over its Unix socket. Exit code is 0
//! when the daemon answers `status: ok`, 1 on any error (including an
//! unreachable socket).

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use procvisor::Controller;
use serde_json::Value;

#[derive(Parser, Debug)]
#[command(name = "procvisorctl", version, about = "procvisor control client")]
struct Args {
    /// Path to the daemon's Unix socket.
    #[arg(short = 's', long = "socket", default_value = "/tmp/procvisor.sock")]
    socket: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show process status.
    Status,
    /// Start a process.
    Start { name: String },
    /// Stop a process.
    Stop { name: String },
    /// Restart a process.
    Restart {
        name: String,
        /// Use SIGKILL instead of a graceful stop.
        #[arg(long)]
        force: bool,
    },
    /// Start a process group.
    Startgroup { name: String },
    /// Stop a process group.
    Stopgroup { name: String },
    /// Reload the configuration (add/remove programs).
    Reload,
}

fn format_uptime(seconds: Option<u64>) -> String {
    match seconds {
        None => "-".to_string(),
        Some(total) => {
            let hours = total / 3600;
            let minutes = (total % 3600) / 60;
            let secs = total % 60;
            if hours > 0 {
                format!("{hours}:{minutes:02}:{secs:02}")
            } else {
                format!("{minutes}:{secs:02}")
            }
        }
    }
}

fn print_status(response: &Value) {
    let processes = response["processes"].as_array().cloned().unwrap_or_default();
    println!("{:<20} {:<10} {:<10} {:<12} {:<8}", "NAME", "STATE", "PID", "UPTIME", "HEALTH");
    println!("{}", "-".repeat(62));
    for proc in processes {
        let pid = proc["pid"]
            .as_u64()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        let health = match proc["health"].as_str() {
            Some("ok") => "OK",
            Some("fail") => "FAIL",
            _ => "-",
        };
        println!(
            "{:<20} {:<10} {:<10} {:<12} {:<8}",
            proc["name"].as_str().unwrap_or("?"),
            proc["state"].as_str().unwrap_or("?"),
            pid,
            format_uptime(proc["uptime_seconds"].as_u64()),
            health,
        );
    }
}

fn print_reload(response: &Value) {
    let list = |key: &str| -> Vec<String> {
        response[key]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };
    let (added, removed, changed) = (list("added"), list("removed"), list("changed"));
    if added.is_empty() && removed.is_empty() && changed.is_empty() {
        println!("No changes detected");
        return;
    }
    if !added.is_empty() {
        println!("Added: {}", added.join(", "));
    }
    if !removed.is_empty() {
        println!("Removed: {}", removed.join(", "));
    }
    if !changed.is_empty() {
        println!("Changed (restart to apply): {}", changed.join(", "));
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let client = Controller::new(&args.socket);

    let result = match &args.command {
        Command::Status => client.status().await,
        Command::Start { name } => client.start(name).await,
        Command::Stop { name } => client.stop(name).await,
        Command::Restart { name, force } => client.restart(name, *force).await,
        Command::Startgroup { name } => client.start_group(name).await,
        Command::Stopgroup { name } => client.stop_group(name).await,
        Command::Reload => client.reload().await,
    };

    let response = match result {
        Ok(response) => response,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            eprintln!("procvisor is not running (socket not found)");
            std::process::exit(1);
        }
        Err(err) => {
            eprintln!("error talking to procvisor: {err}");
            std::process::exit(1);
        }
    };

    let ok = response["status"].as_str() == Some("ok");
    if ok {
        match &args.command {
            Command::Status => print_status(&response),
            Command::Reload => print_reload(&response),
            _ => println!("{}", response["message"].as_str().unwrap_or("ok")),
        }
    } else {
        eprintln!(
            "error: {}",
            response["message"].as_str().unwrap_or("unknown error")
        );
    }

    std::process::exit(if ok { 0 } else { 1 });
}
