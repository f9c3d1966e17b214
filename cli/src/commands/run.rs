use anyhow::Result;
use clap::Args;
use colored::Colorize;
use config::{AddressingMode, MongodConfig, ReplicationMode};
use lifecycle::MongodManager;

#[derive(Args)]
pub struct RunArgs {
    #[arg(long, help = "Listen on a Unix domain socket instead of TCP (implies --standalone)")]
    pub socket: bool,

    #[arg(long, help = "Run a standalone server instead of a single-node replica set")]
    pub standalone: bool,

    #[arg(long, help = "Output as JSON")]
    pub json: bool
}

pub async fn run(mut config: MongodConfig, args: RunArgs) -> Result<()> {
    if args.socket {
        config.addressing = AddressingMode::Socket;
    }
    if args.standalone || args.socket {
        config.replication = ReplicationMode::Standalone;
    }

    let manager = MongodManager::new(config)?;
    let running = manager.provision().await?;

    if args.json {
        let output = serde_json::json!({
            "connection_string": running.connection_string(),
            "endpoint": running.endpoint().to_string(),
            "replica_set": running.client().replica_set(),
            "pid": running.instance().pid(),
            "workspace": running.instance().workspace_path().display().to_string()
        });
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("{}", "mongod ready".bold().green());
        println!("  {} {}", "Connection:".bold(), running.connection_string());
        println!("  {} {}", "Endpoint:".bold(), running.endpoint());
        if let Some(pid) = running.instance().pid() {
            println!("  {} {}", "PID:".bold(), pid);
        }
        println!(
            "  {} {}",
            "Workspace:".bold(),
            running.instance().workspace_path().display()
        );
        println!();
        println!("{}", "Press Ctrl-C to stop".dimmed());
    }

    let signal = tokio::signal::ctrl_c().await;
    if let Err(e) = &signal {
        tracing::warn!("Failed to listen for Ctrl-C: {}", e);
    }

    let report = manager.release(running).await;
    if !args.json {
        if report.is_clean() {
            println!("{}", "mongod stopped".bold());
        } else {
            println!("{} {:?}", "mongod stopped with cleanup errors:".yellow(), report);
        }
    }

    signal.map_err(Into::into)
}
