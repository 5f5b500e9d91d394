//! hzz-ctl: command-line interface for the hzz broker daemon.

mod cmd;

use anyhow::{Context, Result};

use cmd::{control, queues};

const DEFAULT_BROKER: &str = "http://127.0.0.1:9100";

fn print_usage() {
    println!("Usage: hzz-ctl [--broker <url>] <command>");
    println!();
    println!("Commands:");
    println!("  status                 Broker health and per-queue depths");
    println!("  dlq                    List dead-letter queues holding messages");
    println!("  replay <queue>         Move dead letters back onto <queue>");
    println!("  purge <queue>          Drop every ready message on <queue>");
    println!("  shutdown-workers <n>   Publish <n> shutdown messages");
    println!("  broker stop            Stop the broker daemon");
    println!();
    println!("Options:");
    println!("  --broker <url>   Broker URL (default: $HZZ_BROKER__URL or {DEFAULT_BROKER})");
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut broker =
        std::env::var("HZZ_BROKER__URL").unwrap_or_else(|_| DEFAULT_BROKER.to_string());
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--broker" {
            i += 1;
            broker = args.get(i).context("--broker requires a value")?.clone();
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }
    let broker = broker.as_str();

    match remaining.as_slice() {
        ["status"] | [] => queues::cmd_status(broker).await,
        ["dlq"] => queues::cmd_dlq(broker).await,
        ["replay", queue] => queues::cmd_replay(broker, queue).await,
        ["purge", queue] => queues::cmd_purge(broker, queue).await,
        ["shutdown-workers", n] => {
            let n: usize = n.parse().context("worker count must be a number")?;
            control::cmd_shutdown_workers(broker, n).await
        }
        ["broker", "stop"] => control::cmd_broker_stop(broker).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
