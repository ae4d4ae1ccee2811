//! Runtime configuration
//!
//! Resolved once at startup from the command line, the environment and the
//! `.trackd` location files.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cli::Cli;
use crate::error::{Result, TrackdError};
use crate::tracks::{
    CommandResolver, FormatResolver, PathResolver, SqliteTrackStore, TrackLookup, TrackStore,
};

/// Environment variable naming the track database
pub const DATABASE_ENV: &str = "TRACKD_DB";

/// Name of the files that may hold the database location
const LOCATION_FILE: &str = ".trackd";

/// How track file paths are worked out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverConfig {
    Format(String),
    Command(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub hostport: String,
    pub database: PathBuf,
    pub resolver: ResolverConfig,
    pub recent_window: Duration,
    pub lookup: Option<u64>,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let database = match cli.db {
            Some(db) => db,
            None => discover_database(&database_candidates())?,
        };
        if cli.recent_window == 0 {
            return Err(TrackdError::Config {
                message: "--recent-window must be at least one second".to_string(),
            });
        }
        let resolver = match cli.resolver {
            Some(program) => ResolverConfig::Command(program),
            None => ResolverConfig::Format(cli.path_format),
        };

        Ok(Self {
            hostport: cli.hostport,
            database,
            resolver,
            recent_window: Duration::from_secs(cli.recent_window),
            lookup: cli.lookup,
        })
    }

    pub fn path_resolver(&self) -> Arc<dyn PathResolver> {
        match &self.resolver {
            ResolverConfig::Format(template) => Arc::new(FormatResolver::new(template.clone())),
            ResolverConfig::Command(program) => Arc::new(CommandResolver::new(program.clone())),
        }
    }

    /// Open the database and wire it to the path resolver
    pub fn track_lookup(&self) -> Result<TrackLookup> {
        let store: Arc<dyn TrackStore> =
            Arc::new(SqliteTrackStore::open(&self.database, self.recent_window)?);
        Ok(TrackLookup::new(store, self.path_resolver()))
    }
}

/// Places that may name the database, in search order
pub fn database_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from(LOCATION_FILE)];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(LOCATION_FILE));
    }
    candidates.push(PathBuf::from("/etc/trackd"));
    candidates.push(PathBuf::from("/usr/local/etc/trackd"));
    candidates
}

/// First database location named by a readable candidate file.
///
/// A candidate counts when its first line is non-empty.
pub fn discover_database(candidates: &[PathBuf]) -> Result<PathBuf> {
    for candidate in candidates {
        if let Some(location) = read_location(candidate) {
            tracing::debug!("database location from {}", candidate.display());
            return Ok(location);
        }
    }
    Err(TrackdError::NoDatabase {
        tried: candidates
            .iter()
            .map(|c| c.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

fn read_location(path: &Path) -> Option<PathBuf> {
    let contents = std::fs::read_to_string(path).ok()?;
    let line = contents.lines().next()?.trim();
    if line.is_empty() {
        None
    } else {
        Some(PathBuf::from(line))
    }
}
