use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "drydock")]
#[command(about = "Container update detection and dependency-aware upgrades")]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, env = "DRYDOCK_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Which container host to talk to
#[derive(Args, Debug, Clone)]
pub struct Target {
    /// Gateway name from the configuration file
    #[arg(short, long, env = "DRYDOCK_GATEWAY")]
    pub gateway: String,

    /// Endpoint ID managed by the gateway
    #[arg(short, long, env = "DRYDOCK_ENDPOINT")]
    pub endpoint: u64,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List containers with newer images available
    Check {
        #[command(flatten)]
        target: Target,

        /// Show every container, not just those with updates
        #[arg(short, long)]
        all: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Replace containers with freshly pulled images
    Upgrade {
        #[command(flatten)]
        target: Target,

        /// Containers to upgrade (name, ID or short ID)
        #[arg(required = true)]
        containers: Vec<String>,

        /// Image reference to switch to (single container only)
        #[arg(short, long)]
        image: Option<String>,

        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Show which containers share another container's network
    Deps {
        #[command(flatten)]
        target: Target,

        /// Print JSON instead of a tree
        #[arg(long)]
        json: bool,
    },

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_upgrade() {
        let cli = Cli::try_parse_from([
            "drydock", "upgrade", "-g", "prod", "-e", "2", "tunnel", "--image", "acme/tunnel:2",
        ])
        .unwrap();
        match cli.command {
            Commands::Upgrade {
                target,
                containers,
                image,
                ..
            } => {
                assert_eq!(target.gateway, "prod");
                assert_eq!(target.endpoint, 2);
                assert_eq!(containers, vec!["tunnel".to_string()]);
                assert_eq!(image.as_deref(), Some("acme/tunnel:2"));
            }
            _ => panic!("expected upgrade"),
        }
    }
}
