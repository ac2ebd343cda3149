// SPDX-License-Identifier: MIT

//! `fabric`: the local admin client for a running node daemon. Talks to
//! the admin Unix socket over the same `NodeRequest`/`NodeResponse`
//! framing the daemon's scheduler-facing port speaks (spec §2
//! supplement).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use fabric_core::AuthToken;
use fabric_wire::{framing, NodeRequest, NodeResponse};
use tokio::net::UnixStream;

#[derive(Parser)]
#[command(name = "fabric", version = concat!(env!("CARGO_PKG_VERSION"), "+", env!("BUILD_GIT_HASH")))]
struct Cli {
    /// Override the state directory (defaults to the same resolution the
    /// daemon uses: FABRIC_STATE_DIR, XDG_STATE_HOME/fabric, ~/.local/state/fabric).
    #[arg(long)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report reserved slots for the active reservation.
    Status,
    /// Gracefully close the active client without stopping the node.
    Close,
    /// Gracefully close the active client, then stop the node.
    Quit,
    /// Force-terminate everything and stop the node immediately.
    Terminate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let state_dir = match cli.state_dir {
        Some(dir) => dir,
        None => resolve_state_dir()?,
    };

    let socket_path = state_dir.join("fabricd.sock");
    let auth = read_node_auth(&state_dir.join("node_auth"))?;

    let req = match cli.command {
        Command::Status => NodeRequest::Status { auth },
        Command::Close => NodeRequest::Close { auth },
        Command::Quit => NodeRequest::Quit { auth },
        Command::Terminate => NodeRequest::Terminate { auth },
    };

    let resp = send(&socket_path, &req).await?;
    match resp {
        NodeResponse::Status { servers, .. } => println!("reserved slots: {servers:?}"),
        NodeResponse::Ok => println!("ok"),
        NodeResponse::Error { message } => bail!("node rejected request: {message}"),
        other => bail!("unexpected response: {other:?}"),
    }
    Ok(())
}

async fn send(socket_path: &std::path::Path, req: &NodeRequest) -> anyhow::Result<NodeResponse> {
    let mut stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("connecting to {}", socket_path.display()))?;
    let timeout = Duration::from_secs(10);
    framing::write_message(&mut stream, req, timeout).await?;
    Ok(framing::read_message(&mut stream, timeout).await?)
}

fn read_node_auth(path: &std::path::Path) -> anyhow::Result<AuthToken> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {} (is fabricd running?)", path.display()))?;
    AuthToken::from_hex(raw.trim()).context("malformed node_auth file")
}

fn resolve_state_dir() -> anyhow::Result<PathBuf> {
    if let Ok(dir) = std::env::var("FABRIC_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("fabric"));
    }
    let home = dirs::home_dir().context("could not determine a home directory")?;
    Ok(home.join(".local/state/fabric"))
}
