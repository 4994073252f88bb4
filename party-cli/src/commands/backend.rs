//! `party backend watch` — attach as a backend and print what arrives.

use std::io::Read;

use anyhow::{Context, Result};
use bytes::BytesMut;
use clap::Subcommand;

use party_core::{RosterMirror, SyncMessage};
use party_daemon::{attach_blocking, DaemonConfig};

#[derive(Subcommand, Debug)]
pub enum BackendCommand {
    /// Attach under BACKEND and print every sync message received.
    Watch {
        backend: String,

        /// Exit after this many messages.
        #[arg(long)]
        count: Option<usize>,
    },
}

pub fn run(command: BackendCommand) -> Result<()> {
    let home = super::home_dir()?;
    match command {
        BackendCommand::Watch { backend, count } => watch(&home, &backend, count),
    }
}

fn watch(home: &std::path::Path, backend: &str, count: Option<usize>) -> Result<()> {
    let config = DaemonConfig::load(home).context("failed to read daemon config")?;
    let socket = config.backend_socket_path(home);
    let mut stream = attach_blocking(&socket, backend)
        .with_context(|| format!("failed to attach as backend {backend}"))?;

    let mut mirror = RosterMirror::new();
    let mut buf = BytesMut::new();
    let mut chunk = [0u8; 4096];
    let mut seen = 0usize;

    loop {
        while let Some(message) = SyncMessage::decode_frame(&mut buf).context("bad sync frame")? {
            println!("{}", render(&message));
            mirror.apply(message);
            seen += 1;
            if count.is_some_and(|limit| seen >= limit) {
                return Ok(());
            }
        }

        let read = stream
            .read(&mut chunk)
            .with_context(|| format!("read {}", socket.display()))?;
        if read == 0 {
            println!("daemon closed the connection ({} parties known)", mirror.len());
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..read]);
    }
}

fn render(message: &SyncMessage) -> String {
    match message {
        SyncMessage::Roster(roster) => format!(
            "sync party={} leader={} members={}",
            roster.party,
            roster.leader,
            roster.headcount()
        ),
        SyncMessage::Disband(party) => format!("disband party={party}"),
    }
}
