//! `cascade node` - catalog queries over cascade-managed nodes.

use std::sync::Arc;

use anyhow::Result;
use cascade_coordinator::Coordinator;
use cascade_roll::SERVICE_NAME;
use clap::{Args, Subcommand};

#[derive(Args)]
pub struct NodeArgs {
    #[command(subcommand)]
    pub action: NodeAction,
}

#[derive(Subcommand)]
pub enum NodeAction {
    /// List nodes registered under cascade with their roles
    List {
        /// Filter by role
        #[arg(long, short = 'r')]
        role: Option<String>,
    },
}

pub async fn execute(coordinator: Arc<dyn Coordinator>, args: NodeArgs) -> Result<()> {
    match args.action {
        NodeAction::List { role } => {
            let nodes = coordinator
                .service_nodes(SERVICE_NAME, role.as_deref().unwrap_or(""))
                .await?;
            for node in nodes {
                println!("{} {}:", node.node, node.address);
                for tag in &node.service_tags {
                    println!("  - {tag}");
                }
            }
            Ok(())
        }
    }
}
