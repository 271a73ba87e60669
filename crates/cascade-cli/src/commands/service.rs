//! `cascade service` - catalog and local service queries.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use cascade_coordinator::Coordinator;
use cascade_roll::SERVICE_NAME;
use clap::{Args, Subcommand};

#[derive(Args)]
pub struct ServiceArgs {
    #[command(subcommand)]
    pub action: ServiceAction,
}

#[derive(Subcommand)]
pub enum ServiceAction {
    /// List registered services
    List,

    /// List services on the current node
    Local,

    /// List nodes providing a service
    Find {
        /// Service name
        service: String,

        /// Filter by service tag
        #[arg(long, short = 't')]
        tag: Option<String>,
    },
}

pub async fn execute(coordinator: Arc<dyn Coordinator>, args: ServiceArgs) -> Result<()> {
    match args.action {
        ServiceAction::List => {
            // BTreeMap iteration is already name-sorted.
            for service in coordinator.catalog_services().await?.keys() {
                println!("  - {service}");
            }
            Ok(())
        }
        ServiceAction::Local => {
            let services = coordinator.agent_services().await?;

            let mut names: Vec<&str> = services
                .values()
                .map(|s| s.service.as_str())
                .filter(|name| *name != SERVICE_NAME)
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            names.sort_unstable();

            for name in names {
                println!("{name}:");
                for instance in services.values().filter(|s| s.service == name) {
                    println!("  - port: {}", instance.port);
                    println!("    tags: {}", instance.tags.join(", "));
                }
            }
            Ok(())
        }
        ServiceAction::Find { service, tag } => {
            let nodes = coordinator
                .service_nodes(&service, tag.as_deref().unwrap_or(""))
                .await?;
            println!("{service}:");
            for node in nodes {
                println!("  - host: {}", node.node);
                println!("    address: {}", node.address);
                println!("    port: {}", node.service_port);
                println!("    tags: {}", node.service_tags.join(", "));
            }
            Ok(())
        }
    }
}
