//! CLI surface for liasis.
//!
//! One binary hosts the daemon and the thin frontend tools: queries over the
//! control socket, a metainfo dump, and a standalone piece verifier.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

use crate::{config, daemon, Result};

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "liasis",
    version,
    about = "BitTorrent peer daemon with a control protocol for frontends",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Config file (default: $LIASIS_CONFIG, then the user config dir).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Debug output (repeat for more).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Daemon management.
    #[command(subcommand)]
    Daemon(DaemonCommand),

    /// Number of BT clients the daemon hosts.
    Count,

    /// State dump of every hosted client.
    Clients,

    /// Torrents tracked by one client.
    Torrents {
        client_idx: usize,
    },

    /// Throughput history of one torrent.
    Throughput {
        client_idx: usize,
        /// 40-digit hex info hash.
        info_hash: String,
        /// Newest samples to request per direction.
        #[arg(long, default_value_t = 20)]
        samples: usize,
    },

    /// Human-readable dump of a metainfo file.
    Metainfo {
        file: PathBuf,
    },

    /// Verify downloaded data against a metainfo file's piece hashes.
    Verify {
        file: PathBuf,
        data_dir: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground.
    Run {
        /// Control socket path override.
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },
}

pub fn parse_from<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::parse_from(args)
}

pub fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone();
    let mut config = config::load(config_path.as_deref())?;

    match cli.command {
        Commands::Daemon(DaemonCommand::Run { socket }) => {
            if let Some(socket) = socket {
                config.control.socket_path = Some(socket);
            }
            daemon::run_daemon(config, config_path)
        }
        Commands::Count => commands::count(&config),
        Commands::Clients => commands::clients(&config),
        Commands::Torrents { client_idx } => commands::torrents(&config, client_idx),
        Commands::Throughput {
            client_idx,
            info_hash,
            samples,
        } => commands::throughput(&config, client_idx, &info_hash, samples),
        Commands::Metainfo { file } => commands::metainfo_dump(&file),
        Commands::Verify { file, data_dir } => commands::verify(&file, &data_dir),
    }
}
