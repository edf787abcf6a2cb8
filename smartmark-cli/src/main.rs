//! Smartmark CLI - personal bookmarks in your terminal

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{add, list, login, logout, logs, remove, status, watch};

/// Smartmark - personal bookmarks in your terminal
#[derive(Parser)]
#[command(name = "smk", version, about, long_about = None)]
struct Cli {
    /// Show debug diagnostics on stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in
    Login {
        /// OAuth provider (Supabase backend)
        #[arg(long, default_value = smartmark_core::config::DEFAULT_OAUTH_PROVIDER)]
        provider: String,
        /// Where the provider sends the browser after sign-in
        #[arg(long)]
        redirect_to: Option<String>,
        /// Finish sign-in with the URL the browser was redirected to
        #[arg(long)]
        callback: Option<String>,
        /// Email to sign in with (local backend; saved to settings)
        #[arg(long)]
        email: Option<String>,
    },

    /// Sign out
    Logout,

    /// Show who is signed in and how many bookmarks they have
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List bookmarks, newest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Save a bookmark
    Add {
        /// Bookmark title
        title: String,
        /// Bookmark URL
        url: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a bookmark
    Remove {
        /// Bookmark ID
        id: String,
        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },

    /// Follow bookmark changes live
    Watch,

    /// View and manage application logs
    Logs {
        #[command(subcommand)]
        command: logs::LogsCommands,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("SMARTMARK_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Login { provider, redirect_to, callback, email } => {
            login::run(&provider, redirect_to, callback, email).await
        }
        Commands::Logout => logout::run().await,
        Commands::Status { json } => status::run(json).await,
        Commands::List { json } => list::run(json).await,
        Commands::Add { title, url, json } => add::run(&title, &url, json).await,
        Commands::Remove { id, force } => remove::run(&id, force).await,
        Commands::Watch => watch::run().await,
        Commands::Logs { command } => logs::run(command),
    }
}
