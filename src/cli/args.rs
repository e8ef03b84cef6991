//! CLI argument definitions using clap
//!
//! Commands:
//! - cellgate start --config <path> [--port <p>] [--control-plane-url <url>]
//! - cellgate check --config <path>
//!
//! Every flag has an environment fallback so container deployments can run
//! the bare binary: CONFIG_PATH, PORT, CONTROL_PLANE_URL.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Cellgate - cell-routing ingress data plane
#[derive(Parser, Debug)]
#[command(name = "cellgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the data plane
    Start {
        /// Path to the bootstrap configuration document
        #[arg(long, env = "CONFIG_PATH", default_value = "./cellgate.json")]
        config: PathBuf,

        /// Inbound listen port
        #[arg(long, env = "PORT", default_value_t = 8080)]
        port: u16,

        /// Control plane push endpoint; when set, config updates arrive
        /// over the push channel instead of file watching
        #[arg(long, env = "CONTROL_PLANE_URL")]
        control_plane_url: Option<String>,
    },

    /// Validate a configuration document and exit
    Check {
        /// Path to the configuration document
        #[arg(long, env = "CONFIG_PATH", default_value = "./cellgate.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
