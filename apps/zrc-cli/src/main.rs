//! # zrc-cli
//!
//! Command-line front end for ZRC.
//!
//! - `zrc demo [topic|service|action|all]` — walk through every pattern on an
//!   in-process bus
//! - `zrc keys` — print the key layout for the configured namespace

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use zrc_node::NodeConfig;

/// ZRC — topics, services and actions over a key-expression bus.
#[derive(Parser)]
#[command(name = "zrc", version, about)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base namespace for every key (overrides the config file).
    #[arg(long)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the usage walkthrough on an in-process bus.
    Demo {
        /// Which pattern to demonstrate.
        #[arg(value_enum, default_value_t = commands::demo::DemoTarget::All)]
        which: commands::demo::DemoTarget,
        /// Cancel the action goal after its first feedback.
        #[arg(long)]
        cancel: bool,
        /// Delay between action feedback steps, in milliseconds.
        #[arg(long, default_value = "200")]
        step_ms: u64,
    },
    /// Print the resolved key layout.
    Keys {
        #[arg(long, default_value = "chatter")]
        topic: String,
        #[arg(long, default_value = "greet")]
        service: String,
        #[arg(long, default_value = "move_to_position")]
        action: String,
    },
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so demo output on stdout stays readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("zrc_node=info".parse()?)
                .add_directive("zrc_cli=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    if let Some(namespace) = cli.namespace {
        config = config.with_namespace(namespace);
    }
    tracing::debug!(%config, "configuration loaded");

    match cli.command {
        Commands::Demo {
            which,
            cancel,
            step_ms,
        } => commands::demo::execute(&config, which, cancel, step_ms),
        Commands::Keys {
            topic,
            service,
            action,
        } => commands::keys::execute(&config, &topic, &service, &action),
    }
}
