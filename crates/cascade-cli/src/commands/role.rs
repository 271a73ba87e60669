//! `cascade role` - roles of the local node.

use std::sync::Arc;

use anyhow::Result;
use cascade_coordinator::{Coordinator, ServiceRegistration};
use cascade_roll::SERVICE_NAME;
use clap::{Args, Subcommand};

#[derive(Args)]
pub struct RoleArgs {
    #[command(subcommand)]
    pub action: RoleAction,
}

#[derive(Subcommand)]
pub enum RoleAction {
    /// List the local node's roles
    List,

    /// Replace the local node's roles
    Set {
        #[arg(required = true)]
        roles: Vec<String>,
    },
}

pub async fn execute(coordinator: Arc<dyn Coordinator>, args: RoleArgs) -> Result<()> {
    match args.action {
        RoleAction::List => list(coordinator.as_ref()).await,
        RoleAction::Set { roles } => {
            let registration = ServiceRegistration {
                name: SERVICE_NAME.to_string(),
                tags: roles,
            };
            coordinator.register_service(&registration).await?;
            list(coordinator.as_ref()).await
        }
    }
}

async fn list(coordinator: &dyn Coordinator) -> Result<()> {
    let services = coordinator.agent_services().await?;
    let config = coordinator.agent_self().await?;

    for service in services.values() {
        if service.service == SERVICE_NAME {
            println!("{} {}:", config.node_name, config.advertise_addr);
            for tag in &service.tags {
                println!("  - {tag}");
            }
        }
    }
    Ok(())
}
