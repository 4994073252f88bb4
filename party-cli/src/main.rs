//! Party — command-line client for the party daemon.
//!
//! # Usage
//!
//! ```text
//! party daemon start|stop|status
//! party session connect <name> --backend <backend> [--id <uuid>]
//! party session switch <name> <backend>
//! party session disconnect <name>
//! party create|leave|disband|summon|list|notices <user>
//! party invite|join|kick|promote <user> <target>
//! party accept|decline <user> <inviter>
//! party public <user> on|off
//! party backend watch <backend> [--count <n>]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    backend::BackendCommand, daemon::DaemonCommand, party::PartyCommand,
    session::SessionCommand,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "party",
    version,
    about = "Drive the party daemon: sessions, party verbs and backend sync",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run or control the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Open, move and close user sessions.
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },

    /// Act as a backend and print the sync traffic it receives.
    Backend {
        #[command(subcommand)]
        command: BackendCommand,
    },

    #[command(flatten)]
    Party(PartyCommand),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Daemon { command } => commands::daemon::run(command),
        Commands::Session { command } => commands::session::run(command),
        Commands::Backend { command } => commands::backend::run(command),
        Commands::Party(command) => commands::party::run(command),
    }
}
