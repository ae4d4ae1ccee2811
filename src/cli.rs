//! CLI argument definitions using clap
//!
//! trackd is a single long-running daemon, so there are no subcommands; the
//! one-shot `--lookup` mode prints a single track and exits.

use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::config::DATABASE_ENV;
use crate::tracks::DEFAULT_PATH_FORMAT;

/// Default address to listen on
pub const DEFAULT_HOSTPORT: &str = "127.0.0.1:1350";

/// Track metadata server
#[derive(Parser, Debug)]
#[command(name = "trackd")]
#[command(about = "Serves track metadata and server state over a line-based resource protocol")]
#[command(version)]
pub struct Cli {
    /// Address to listen on
    #[arg(value_name = "HOSTPORT", default_value = DEFAULT_HOSTPORT)]
    pub hostport: String,

    /// Track database (SQLite); searched for in .trackd files when absent
    #[arg(long, value_name = "PATH", env = DATABASE_ENV)]
    pub db: Option<PathBuf>,

    /// Template for track file paths, with {record} and {track} placeholders
    #[arg(long, value_name = "FORMAT", default_value = DEFAULT_PATH_FORMAT)]
    pub path_format: String,

    /// Program that prints a track's path given RECORD_ID TRACK_ID (overrides --path-format)
    #[arg(long, value_name = "PROGRAM")]
    pub resolver: Option<String>,

    /// Plays within this many seconds count as recent
    #[arg(long, value_name = "SECS", default_value = "10800")]
    pub recent_window: u64,

    /// Print the resources for one track and exit instead of serving
    #[arg(long, value_name = "TRACKID")]
    pub lookup: Option<u64>,

    /// Show verbose output (repeat for more)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}
