//! `party session` — the host events a proxy would raise for its users.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use party_core::UserId;
use party_daemon::{request, DaemonRequest};

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    /// A user comes online on a backend.
    Connect(ConnectArgs),

    /// A connected user moves to another backend.
    Switch {
        /// Session name.
        name: String,
        /// Backend the user moved to.
        backend: String,
    },

    /// A user goes offline. Leaders disband their party.
    Disconnect {
        /// Session name.
        name: String,
    },
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Display name, unique among connected users (case-insensitive).
    pub name: String,

    /// Backend the user lands on.
    #[arg(long, short = 'b')]
    pub backend: String,

    /// Reuse a fixed user id instead of drawing a fresh one.
    #[arg(long)]
    pub id: Option<UserId>,
}

pub fn run(command: SessionCommand) -> Result<()> {
    let home = super::home_dir()?;

    match command {
        SessionCommand::Connect(args) => {
            let data = request(
                &home,
                &DaemonRequest::Connect {
                    user: args.name.clone(),
                    backend: args.backend.clone(),
                    id: args.id,
                },
            )
            .with_context(|| format!("failed to connect {}", args.name))?;
            println!(
                "{} connected to {} as {}",
                args.name, args.backend, data["id"].as_str().unwrap_or("?")
            );
        }
        SessionCommand::Switch { name, backend } => {
            let data = request(
                &home,
                &DaemonRequest::Switch {
                    user: name.clone(),
                    backend: backend.clone(),
                },
            )
            .with_context(|| format!("failed to switch {name}"))?;
            let resynced = data["resynced"].as_bool().unwrap_or(false);
            println!(
                "{name} switched to {backend}{}",
                if resynced { " (party re-synced)" } else { "" }
            );
        }
        SessionCommand::Disconnect { name } => {
            let data = request(&home, &DaemonRequest::Disconnect { user: name.clone() })
                .with_context(|| format!("failed to disconnect {name}"))?;
            match data["removal"].as_str() {
                Some("disbanded") => println!("{name} disconnected; their party was disbanded"),
                Some("removed") => println!("{name} disconnected and left their party"),
                _ => println!("{name} disconnected"),
            }
        }
    }

    Ok(())
}
