//! CLI interface for call-agent

use anyhow::{Result, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "call-agent")]
#[command(about = "Phone-call voice agent with live, interruptible conversations", long_about = None)]
#[command(version)]
struct Cli {
    /// Use this configuration file instead of the default location
    #[arg(short, long, global = true, env = "CALL_AGENT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the media stream server
    Serve {
        /// Port to listen on (defaults to the configured port)
        #[arg(short, long, env = "CALL_AGENT_PORT")]
        port: Option<u16>,
        /// Host to bind to (defaults to the configured host)
        #[arg(long, env = "CALL_AGENT_HOST")]
        host: Option<String>,
        /// Public host name the provider reaches us at
        #[arg(long, env = "CALL_AGENT_PUBLIC_HOST")]
        public_host: Option<String>,
    },
    /// Manage configuration and API keys
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Write a default configuration file
    Init,
    /// Print the default configuration as TOML
    Defaults,
    /// Store a provider API key in the system keyring
    SetKey {
        /// One of: completion, synthesis, transcription
        provider: String,
        key: String,
    },
    /// Remove a stored provider API key
    DeleteKey { provider: String },
}

pub async fn run() -> Result<()> {
    run_with(Cli::parse()).await
}

async fn run_with(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve { port, host, public_host } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(public_host) = public_host {
                config.server.public_host = public_host;
            }
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            println!("Starting call server on {}:{}", host, port);
            crate::server::start(config, &host, port).await?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                let config = load_config(cli.config.as_deref())?;
                crate::config::show_config(&config)?;
            }
            ConfigCommands::Init => {
                crate::config::reset_config()?;
            }
            ConfigCommands::Defaults => {
                print!("{}", crate::config::default_config_toml());
            }
            ConfigCommands::SetKey { provider, key } => {
                crate::security::keyring::set_provider_key(&provider, &key)?;
                println!("{} API key stored.", provider);
            }
            ConfigCommands::DeleteKey { provider } => {
                crate::security::keyring::delete_provider_key(&provider)?;
                println!("{} API key removed.", provider);
            }
        },
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Config::load(),
    }
}
