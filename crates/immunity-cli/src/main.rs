mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{build::BuildSubcommand, region::RegionSubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "immunity",
    about = "Rolling deploy pipeline: move commits region by region through deploy, test and monitoring",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .immunity/)
    #[arg(long, global = true, env = "IMMUNITY_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter .immunity/config.yaml and create the database
    Init {
        /// Application name for the starter regions (default: directory name)
        #[arg(long)]
        application: Option<String>,
    },

    /// Run the HTTP API and the commit poller
    Serve {
        /// Port to listen on (default: server.port from config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Inspect and edit deploy regions
    Region {
        #[command(subcommand)]
        subcommand: RegionSubcommand,
    },

    /// Inspect, create and drive builds
    Build {
        #[command(subcommand)]
        subcommand: BuildSubcommand,
    },

    /// Show the status ledger of a region, newest first
    History {
        region: String,
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Poll tracked repositories once and register new commits
    Poll {
        /// Only poll this repository
        #[arg(long)]
        repo: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init { application } => cmd::init::run(&root, application.as_deref(), cli.json),
        Commands::Serve { port } => cmd::serve::run(&root, port),
        Commands::Region { subcommand } => cmd::region::run(&root, subcommand, cli.json),
        Commands::Build { subcommand } => cmd::build::run(&root, subcommand, cli.json),
        Commands::History { region, limit } => cmd::history::run(&root, &region, limit, cli.json),
        Commands::Poll { repo } => cmd::poll::run(&root, repo.as_deref(), cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
