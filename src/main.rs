//! workmail-ews-trigger: new-mail polling trigger for AWS WorkMail over EWS
//!
//! Polls a mailbox folder through Exchange Web Services and reports messages
//! that arrived since the previous poll. The first poll of a folder records a
//! baseline and reports nothing. Exposed as MCP tools over stdio, or as a
//! one-shot `poll` command for cron-style hosts.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading, CLI and stdio serving
//! - [`config`]: Environment-driven configuration for accounts and settings
//! - [`errors`]: Application error model with MCP error mapping
//! - [`mailbox`]: Mailbox capability trait and message summaries
//! - [`ews`]: EWS SOAP transport implementing the mailbox capability
//! - [`retry`]: Retry with backoff around any mailbox client
//! - [`detector`]: Pure new-mail change detection over tracked ids
//! - [`state`]: Tracking state persistence (JSON files)
//! - [`poller`]: One poll cycle: list, detect, download, persist
//! - [`server`]: MCP tool handlers with validation
//! - [`models`]: Input/output DTOs and schema-bearing types

mod config;
mod detector;
mod errors;
mod ews;
mod mailbox;
mod models;
mod poller;
mod retry;
mod server;
mod state;

use clap::{Args, Parser, Subcommand, ValueEnum};
use config::ServerConfig;
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::models::PollMessagesInput;
use crate::poller::PollMode;
use crate::state::FileStateStore;

#[derive(Debug, Parser)]
#[command(name = "workmail-ews-trigger", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve MCP tools over stdio (default)
    Serve,
    /// Run one poll cycle and print the result as JSON
    Poll(PollArgs),
}

/// Poll mode as accepted on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    /// Newest messages, tracking state untouched
    Manual,
    /// Change detection against stored state
    Scheduled,
}

impl From<ModeArg> for PollMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Manual => Self::Manual,
            ModeArg::Scheduled => Self::Scheduled,
        }
    }
}

#[derive(Debug, Args)]
struct PollArgs {
    /// Configured account identifier
    #[arg(long, default_value = "default")]
    account: String,
    /// Folder id or distinguished folder name
    #[arg(long, default_value = "inbox")]
    folder: String,
    /// Poll mode
    #[arg(long, value_enum, default_value_t = ModeArg::Scheduled)]
    mode: ModeArg,
    /// Maximum messages to emit (1..100)
    #[arg(long, default_value_t = 10)]
    max_items: usize,
    /// Download file attachments of emitted messages
    #[arg(long)]
    download_attachments: bool,
}

/// Application entry point
///
/// Initializes tracing from environment, loads config, and either serves the
/// MCP server over stdio or runs a single poll.
///
/// # Environment Variables
///
/// See [`ServerConfig::load_from_env`] for full configuration options.
///
/// # Example
///
/// ```no_run
/// WORKMAIL_EWS_DEFAULT_URL=https://mobile.mail.us-east-1.awsapps.com/EWS/Exchange.asmx \
/// WORKMAIL_EWS_DEFAULT_USER=user@example.awsapps.com \
/// WORKMAIL_EWS_DEFAULT_PASS=secret \
/// cargo run -- poll --mode manual
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load_from_env()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let service = server::WorkmailEwsServer::new(config)
                .serve(stdio())
                .await?;
            service.waiting().await?;
        }
        Command::Poll(args) => {
            let store = FileStateStore::new(config.state_dir.clone());
            debug!(state_dir = %store.dir().display(), "using file state store");
            let result = server::poll_once(
                &config,
                &store,
                PollMessagesInput {
                    account_id: args.account,
                    folder: args.folder,
                    mode: args.mode.into(),
                    max_items: args.max_items,
                    download_attachments: args.download_attachments,
                },
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }
    Ok(())
}
