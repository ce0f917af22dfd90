use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "ecosphere")]
#[command(version, about = "EcoSphere backend: carbon tracking, challenges, climate news")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = ecosphere::config::CONFIG_FILE)]
    pub config: PathBuf,

    /// Database path. Overrides ecosphere.toml and ECOSPHERE_DB.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP and WebSocket server
    Serve {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
        /// Do not start the periodic job scheduler
        #[arg(long)]
        no_scheduler: bool,
        /// Listen on all interfaces and allow any CORS origin
        #[arg(long)]
        dev: bool,
    },
    /// Create the database and its schema
    InitDb,
    /// Load demo users, challenges, articles and climate data
    Seed,
    /// Manage users
    Users {
        #[command(subcommand)]
        command: UsersCommands,
    },
    /// Manage API tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
    /// Run one maintenance job now
    RunJob {
        /// Job name, e.g. weekly_summary or climate_alerts
        name: String,
    },
}

#[derive(Subcommand, Clone)]
pub enum UsersCommands {
    /// Create a user
    Add {
        username: String,
        #[arg(long)]
        email: String,
        /// INDIVIDUAL, NGO or ADMIN
        #[arg(long, default_value = "INDIVIDUAL")]
        role: String,
        #[arg(long, default_value = "")]
        location: String,
    },
    /// List active users
    List,
}

#[derive(Subcommand, Clone)]
pub enum TokenCommands {
    /// Mint a bearer token for a user. The token is printed once.
    Issue { username: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let config = cmd::load_config(&cli)?;
    ecosphere::logging::init_logging(&config.logging)?;

    match &cli.command {
        Commands::Serve {
            port,
            no_scheduler,
            dev,
        } => cmd::cmd_serve(config, *port, *no_scheduler, *dev).await?,
        Commands::InitDb => cmd::cmd_init_db(&config)?,
        Commands::Seed => cmd::cmd_seed(&config)?,
        Commands::Users { command } => cmd::cmd_users(&config, command.clone())?,
        Commands::Token { command } => cmd::cmd_token(&config, command.clone())?,
        Commands::RunJob { name } => cmd::cmd_run_job(&config, name).await?,
    }

    Ok(())
}
