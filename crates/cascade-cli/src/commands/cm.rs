//! `cascade cm` - run CM on member systems.

use std::sync::Arc;

use anyhow::{bail, Result};
use cascade_coordinator::Coordinator;
use cascade_roll::{Roller, SERVICE_NAME};
use clap::{Args, Subcommand};
use colored::Colorize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Args)]
pub struct CmArgs {
    #[command(subcommand)]
    pub action: CmAction,
}

#[derive(Subcommand)]
pub enum CmAction {
    /// Ordered synchronous run across all nodes, or a role-filtered subset
    Roll {
        /// Filter targets by role
        #[arg(long, short = 'r')]
        role: Option<String>,

        /// Confirm rolling every node when no role filter is given
        #[arg(long)]
        force: bool,
    },

    /// Run CM on a single remote node
    Single {
        /// Target node name
        node: String,
    },

    /// Run CM on the local node only
    Local,
}

pub async fn execute(coordinator: Arc<dyn Coordinator>, args: CmArgs) -> Result<()> {
    match args.action {
        CmAction::Roll { role, force } => {
            let role = role.unwrap_or_default();
            if role.is_empty() && !force {
                bail!("rolling every node requires --force");
            }
            run_roll(coordinator, &role, None).await
        }
        CmAction::Single { node } => {
            let Some(record) = coordinator.catalog_node(&node).await? else {
                bail!("node not found");
            };
            if !record.services.contains_key(SERVICE_NAME) {
                bail!("node not managed by cascade");
            }
            run_roll(coordinator, "", Some(node)).await
        }
        CmAction::Local => {
            let config = coordinator.agent_self().await?;
            let services = coordinator.agent_services().await?;
            if !services.values().any(|s| s.service == SERVICE_NAME) {
                bail!("node not managed by cascade");
            }
            run_roll(coordinator, "", Some(config.node_name)).await
        }
    }
}

/// Construct the roller (acquiring the lock), wire up the signal and
/// renderer tasks, and run the roll to completion or teardown.
async fn run_roll(
    coordinator: Arc<dyn Coordinator>,
    role: &str,
    host: Option<String>,
) -> Result<()> {
    let (mut roller, progress) = Roller::new(coordinator, role).await?;
    if let Some(host) = host {
        roller.nodes = vec![host];
    }
    let roller = Arc::new(roller);

    // Interrupt path: tear down, then exit 0. Only this task reacts to the
    // signal; destroy() idempotency makes the race with the main task safe.
    let teardown = roller.clone();
    let signal_task: JoinHandle<()> = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            if let Err(err) = teardown.destroy().await {
                eprintln!("err: {err}");
            }
            std::process::exit(0);
        }
    });

    let renderer = spawn_renderer(progress);

    println!("Rolling ({}) nodes..", roller.nodes.len());

    let outcome = roller.roll().await;
    let released = roller.destroy().await;

    // Drop every sender so the renderer drains the tail before we report.
    signal_task.abort();
    drop(roller);
    let _ = renderer.await;

    outcome?;
    released?;
    Ok(())
}

/// Render progress messages: known tokens as bullets, anything else as a
/// per-node header.
fn spawn_renderer(mut progress: mpsc::Receiver<String>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = progress.recv().await {
            match msg.as_str() {
                "meta" | "start" | "success" | "fail" => println!("  - {msg}"),
                host => println!("{}:", host.bold()),
            }
        }
    })
}
