//! Keyward CLI - runs the identity service and the edge gateway.

mod commands;
mod ui;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "keyward")]
#[command(about = "Keyward - authentication and token lifecycle services")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Identity service
    Identity {
        #[command(subcommand)]
        command: IdentityCommands,
    },

    /// Edge gateway
    Gateway {
        #[command(subcommand)]
        command: GatewayCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum IdentityCommands {
    /// Run the identity service
    Run {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address
        #[arg(long)]
        bind: Option<String>,
    },
}

#[derive(Subcommand)]
enum GatewayCommands {
    /// Run the edge gateway
    Run {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address
        #[arg(long)]
        bind: Option<String>,

        /// Identity service base URL
        #[arg(long)]
        identity_url: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration (secrets redacted)
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate the effective configuration
    Validate,
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer().with_target(false))
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    match cli.command {
        Commands::Identity { command } => match command {
            IdentityCommands::Run { port, bind } => {
                commands::identity::run(commands::identity::RunArgs { port, bind }).await?;
            }
        },
        Commands::Gateway { command } => match command {
            GatewayCommands::Run {
                port,
                bind,
                identity_url,
            } => {
                commands::gateway::run(commands::gateway::RunArgs {
                    port,
                    bind,
                    identity_url,
                })
                .await?;
            }
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show { json } => commands::config::show(json)?,
            ConfigCommands::Validate => commands::config::validate()?,
        },
    }

    Ok(())
}
