//! cascade - ordered configuration-management runs across a fleet.
//!
//! Talks to the local coordinator agent; rolling runs are driven by the
//! `cascade-roll` engine, everything else is thin catalog/agent plumbing.

use std::sync::Arc;

use anyhow::Result;
use cascade_cli::commands;
use cascade_cli::error::ExitCode;
use cascade_coordinator::{ConsulCoordinator, Coordinator};
use clap::Parser;

#[derive(Parser)]
#[command(name = "cascade")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Ordered, single-flight CM runs across coordinator-managed nodes", long_about = None)]
struct Cli {
    /// Coordinator HTTP address
    #[arg(
        long,
        env = "CASCADE_HTTP_ADDR",
        default_value = "http://127.0.0.1:8500"
    )]
    http_addr: String,

    /// Verbose mode - show debug logging
    #[arg(long, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Config management operations
    ///
    /// Runs CM on member systems, one node at a time, under the roll lock.
    Cm(commands::cm::CmArgs),

    /// Node operations
    Node(commands::node::NodeArgs),

    /// Role operations (current node only)
    Role(commands::role::RoleArgs),

    /// Service operations
    Service(commands::service::ServiceArgs),
}

#[tokio::main]
async fn main() {
    std::process::exit(match run().await {
        Ok(()) => ExitCode::Success.as_i32(),
        Err(e) => {
            eprintln!("err: {e:#}");
            ExitCode::Error.as_i32()
        }
    });
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", if cli.verbose { "debug" } else { "info" });
    }
    env_logger::init();
    log::debug!("coordinator address: {}", cli.http_addr);

    let coordinator: Arc<dyn Coordinator> = Arc::new(ConsulCoordinator::new(cli.http_addr)?);

    match cli.command {
        Commands::Cm(args) => commands::cm::execute(coordinator, args).await,
        Commands::Node(args) => commands::node::execute(coordinator, args).await,
        Commands::Role(args) => commands::role::execute(coordinator, args).await,
        Commands::Service(args) => commands::service::execute(coordinator, args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the argument tree is valid and help text renders.
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_http_addr() {
        std::env::remove_var("CASCADE_HTTP_ADDR");

        let cli = Cli::parse_from(["cascade", "cm", "roll", "--force"]);
        assert_eq!(cli.http_addr, "http://127.0.0.1:8500");
        assert!(!cli.verbose);
    }

    #[test]
    fn test_all_commands_present() {
        let cm = Cli::parse_from(["cascade", "cm", "roll", "--role", "web"]);
        assert!(matches!(cm.command, Commands::Cm(_)));

        let single = Cli::parse_from(["cascade", "cm", "single", "web1"]);
        assert!(matches!(single.command, Commands::Cm(_)));

        let node = Cli::parse_from(["cascade", "node", "list"]);
        assert!(matches!(node.command, Commands::Node(_)));

        let role = Cli::parse_from(["cascade", "role", "set", "db", "web"]);
        assert!(matches!(role.command, Commands::Role(_)));

        let service = Cli::parse_from(["cascade", "service", "find", "postgres"]);
        assert!(matches!(service.command, Commands::Service(_)));
    }
}
