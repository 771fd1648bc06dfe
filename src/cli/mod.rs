pub mod commands;
pub mod utils;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "attendctl")]
#[command(about = "Operations CLI for the Attendance API database and server")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Apply the embedded schema migrations")]
    Migrate,

    #[command(about = "Create the default accounts on an empty database")]
    Seed,

    #[command(about = "Close expired sessions once and mark their absentees")]
    Sweep,

    #[command(about = "Hash a password the way the server stores it")]
    HashPassword {
        #[arg(help = "Plain-text password")]
        password: String,
    },

    #[command(about = "Mint a JWT for an existing user")]
    Token {
        #[arg(help = "Roll number, staff id or email")]
        username: String,
    },

    #[command(about = "Check a running server's /health endpoint")]
    Health {
        #[arg(long, default_value = "http://localhost:5000", help = "Server base URL")]
        url: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::Migrate => commands::db::migrate(output_format).await,
        Commands::Seed => commands::db::seed(output_format).await,
        Commands::Sweep => commands::db::sweep(output_format).await,
        Commands::HashPassword { password } => commands::account::hash_password(&password, output_format),
        Commands::Token { username } => commands::account::token(&username, output_format).await,
        Commands::Health { url } => commands::health::check(&url, output_format).await,
    }
}
