//! Command-line surface of the `ncp` binary

use crate::config::Overrides;
use crate::error::{Result, TransferError};
use crate::net::{Endpoint, DEFAULT_LISTEN_HOST};
use crate::protocol::OverwriteMode;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "ncp",
    version,
    about = "Minimal file and directory transfer over a single TCP connection"
)]
pub struct Cli {
    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// TOML file with default settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Append timestamped event lines to this file
    #[arg(long = "log-file", global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send a file or directory
    Send {
        #[command(flatten)]
        conn: ConnOpts,

        /// Retry attempts after a connection failure (connect mode only)
        #[arg(long)]
        retries: Option<u32>,

        /// Delay between retry attempts in milliseconds
        #[arg(long = "retry-delay-ms")]
        retry_delay_ms: Option<u64>,

        /// Source file or directory
        src: PathBuf,
    },
    /// Receive into a file or directory
    Recv {
        #[command(flatten)]
        conn: ConnOpts,

        /// Destination file or directory
        dst: PathBuf,
    },
}

/// Connection options shared by both roles
#[derive(Debug, Clone, Args)]
pub struct ConnOpts {
    /// Peer to dial, or address to bind with --listen
    #[arg(long)]
    pub host: Option<String>,

    /// Port number
    #[arg(long)]
    pub port: u16,

    /// Bind and wait for the peer instead of dialing
    #[arg(short = 'l', long)]
    pub listen: bool,

    /// Overwrite policy: ask, yes, no
    #[arg(long, value_enum)]
    pub overwrite: Option<OverwriteMode>,

    /// Disable progress bars
    #[arg(long = "no-progress")]
    pub no_progress: bool,
}

impl Command {
    pub fn conn(&self) -> &ConnOpts {
        match self {
            Command::Send { conn, .. } | Command::Recv { conn, .. } => conn,
        }
    }

    /// Connection strategy. `send` dials unless `--listen`; `recv` listens
    /// unless `--host` is given without `--listen`.
    pub fn endpoint(&self) -> Result<Endpoint> {
        let conn = self.conn();
        let port = conn.port;
        match self {
            Command::Send { .. } => match (&conn.host, conn.listen) {
                (host, true) => Ok(Endpoint::Listen {
                    host: host.clone().unwrap_or_else(|| DEFAULT_LISTEN_HOST.to_string()),
                    port,
                }),
                (Some(host), false) => Ok(Endpoint::Connect {
                    host: host.clone(),
                    port,
                }),
                (None, false) => Err(TransferError::Config(
                    "--host required (or use --listen)".to_string(),
                )),
            },
            Command::Recv { .. } => match (&conn.host, conn.listen) {
                (Some(host), false) => Ok(Endpoint::Connect {
                    host: host.clone(),
                    port,
                }),
                (host, _) => Ok(Endpoint::Listen {
                    host: host.clone().unwrap_or_else(|| DEFAULT_LISTEN_HOST.to_string()),
                    port,
                }),
            },
        }
    }

    pub fn overrides(&self) -> Overrides {
        let conn = self.conn();
        let (retries, retry_delay_ms) = match self {
            Command::Send {
                retries,
                retry_delay_ms,
                ..
            } => (*retries, *retry_delay_ms),
            Command::Recv { .. } => (None, None),
        };
        Overrides {
            retries,
            retry_delay_ms,
            overwrite: conn.overwrite,
            no_progress: conn.no_progress,
        }
    }
}
