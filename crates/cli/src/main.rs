//! healerctl - operator CLI for the healer control plane
//!
//! Reads node status, component health, anomalies, healing actions and
//! containment state from the status API, and issues manual overrides.

mod client;
mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::{containment, healing, status, suppression};

#[derive(Parser)]
#[command(name = "healerctl")]
#[command(author, version, about = "CLI for the Healer self-healing control plane", long_about = None)]
pub struct Cli {
    /// API endpoint URL (falls back to ~/.config/healerctl/config.json, then http://localhost:8080)
    #[arg(long, env = "HEALER_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the node status report
    Status,

    /// List component health
    Components,

    /// List anomaly reports
    Anomalies {
        /// Include resolved anomalies
        #[arg(long)]
        all: bool,
    },

    /// List recent healing actions
    Actions {
        /// Maximum number of actions to show
        #[arg(long, short, default_value_t = 50)]
        limit: usize,
    },

    /// List scheduled control-plane tasks
    Tasks,

    /// Show global component states and suppression reasons
    Suppression,

    /// Show containment protocols and isolated workloads
    Containment,

    /// Force a component into a global state (healthy, failed, suppressed)
    Override {
        /// Component ID
        component: String,

        /// Target state
        state: String,
    },

    /// Manage the healerctl configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Store the default API URL
    SetApiUrl {
        url: String,
    },

    /// Print the effective API URL
    Show,
}

fn config_command(command: ConfigCommands, api_url: &str) -> Result<()> {
    match command {
        ConfigCommands::SetApiUrl { url } => {
            url::Url::parse(&url).with_context(|| format!("Invalid API URL {}", url))?;
            let path = config::Config::config_path()?;
            config::Config { api_url: Some(url) }.save_to(&path)?;
            output::print_success(&format!("Saved API URL to {}", path.display()));
        }
        ConfigCommands::Show => println!("{}", api_url),
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let file_config = config::Config::load()?;
    let api_url = config::resolve_api_url(cli.api_url, &file_config);
    let format = cli.format;
    let connect = || client::ApiClient::new(&api_url);

    match cli.command {
        Commands::Status => status::show_status(&connect()?, format).await,
        Commands::Components => status::show_components(&connect()?, format).await,
        Commands::Anomalies { all } => healing::list_anomalies(&connect()?, all, format).await,
        Commands::Actions { limit } => healing::list_actions(&connect()?, limit, format).await,
        Commands::Tasks => status::show_tasks(&connect()?, format).await,
        Commands::Suppression => suppression::show_suppression(&connect()?, format).await,
        Commands::Containment => containment::show_containment(&connect()?, format).await,
        Commands::Override { component, state } => {
            healing::override_state(&connect()?, &component, &state, format).await
        }
        Commands::Config(config_cmd) => config_command(config_cmd, &api_url),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
