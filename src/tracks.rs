//! Track metadata store
//!
//! Backs the `/tracks/<id>` subtree. A [`TrackStore`] supplies catalogue
//! details and recent play counts, a [`PathResolver`] turns record and track
//! ids into a file path, and [`TrackLookup`] combines the two into a [`Track`]
//! for the resource tree.

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::resource::{flatten_value, Lookup, Resource, ResourceError, ResourcePath};

/// Default path template, filled with the record and track ids
pub const DEFAULT_PATH_FORMAT: &str = r"M:\{record}\{track}";

/// Plays younger than this count as recent
pub const DEFAULT_RECENT_WINDOW: Duration = Duration::from_secs(3 * 60 * 60);

/// Catalogue details for one track, joined with its record
const SQL_TRACK_INFO: &str = "
    SELECT
        rec_track.recordid,
        rec_track.title,
        rec_track.artist,
        rec_record.title,
        rec_record.artist
    FROM rec_track
    JOIN rec_record USING (recordid)
    WHERE rec_track.trackid = ?1
";

const SQL_TRACK_RECENT_PLAYS: &str = "
    SELECT COUNT(tracklist_track_rec.audiologid)
    FROM tracklist_track_rec
    JOIN tracklist USING (audiologid)
    WHERE tracklist_track_rec.trackid = ?1
      AND (CAST(strftime('%s', 'now') AS INTEGER) - tracklist.timestart) < ?2
";

/// Tables queried by [`SqliteTrackStore`]. `timestart` is in Unix seconds.
pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS rec_record (
        recordid INTEGER PRIMARY KEY,
        title    TEXT NOT NULL,
        artist   TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS rec_track (
        trackid  INTEGER PRIMARY KEY,
        recordid INTEGER NOT NULL REFERENCES rec_record (recordid),
        title    TEXT NOT NULL,
        artist   TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS tracklist (
        audiologid INTEGER PRIMARY KEY,
        timestart  INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS tracklist_track_rec (
        audiologid INTEGER NOT NULL REFERENCES tracklist (audiologid),
        trackid    INTEGER NOT NULL
    );
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no track with id {0}")]
    NotFound(u64),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("path resolver failed: {0}")]
    Resolver(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the store knows about a track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub title: String,
    pub artist: String,
    pub record_id: i64,
    pub record_title: String,
    pub record_artist: String,
    pub recent_plays: u64,
}

/// A track as published under `/tracks/<id>`. Field order is listing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Track {
    pub path: String,
    pub title: String,
    pub artist: String,
    pub record_id: i64,
    pub record_title: String,
    pub record_artist: String,
    pub recent_plays: u64,
}

impl Track {
    pub fn new(path: String, info: TrackInfo) -> Self {
        Self {
            path,
            title: info.title,
            artist: info.artist,
            record_id: info.record_id,
            record_title: info.record_title,
            record_artist: info.record_artist,
            recent_plays: info.recent_plays,
        }
    }
}

pub trait TrackStore: Send + Sync {
    fn track_info(&self, track_id: u64) -> Result<TrackInfo, StoreError>;
}

/// Maps a track to the path of its audio file
pub trait PathResolver: Send + Sync {
    fn resolve(&self, record_id: i64, track_id: u64) -> Result<String, StoreError>;
}

// ============================================
// Stores
// ============================================

/// Track store over an SQLite music catalogue
pub struct SqliteTrackStore {
    conn: Mutex<Connection>,
    recent_window: Duration,
}

impl SqliteTrackStore {
    /// Open an existing catalogue read-only
    pub fn open(path: &Path, recent_window: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        tracing::info!("opened track database {}", path.display());
        Ok(Self::from_connection(conn, recent_window))
    }

    pub fn from_connection(conn: Connection, recent_window: Duration) -> Self {
        Self {
            conn: Mutex::new(conn),
            recent_window,
        }
    }

    fn recent_plays(&self, conn: &Connection, track_id: i64) -> Result<u64, StoreError> {
        let window = i64::try_from(self.recent_window.as_secs()).unwrap_or(i64::MAX);
        let plays: i64 = conn
            .prepare_cached(SQL_TRACK_RECENT_PLAYS)?
            .query_row(params![track_id, window], |row| row.get(0))?;
        Ok(u64::try_from(plays).unwrap_or(0))
    }
}

impl TrackStore for SqliteTrackStore {
    fn track_info(&self, track_id: u64) -> Result<TrackInfo, StoreError> {
        let id = i64::try_from(track_id).map_err(|_| StoreError::NotFound(track_id))?;
        let conn = self.conn.lock();

        let row = conn
            .prepare_cached(SQL_TRACK_INFO)?
            .query_row(params![id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .optional()?;
        let Some((record_id, title, artist, record_title, record_artist)) = row else {
            return Err(StoreError::NotFound(track_id));
        };

        Ok(TrackInfo {
            title,
            artist,
            record_id,
            record_title,
            record_artist,
            recent_plays: self.recent_plays(&conn, id)?,
        })
    }
}

/// Fixed set of tracks held in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryTrackStore {
    tracks: HashMap<u64, TrackInfo>,
}

impl MemoryTrackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_track(mut self, track_id: u64, info: TrackInfo) -> Self {
        self.tracks.insert(track_id, info);
        self
    }
}

impl TrackStore for MemoryTrackStore {
    fn track_info(&self, track_id: u64) -> Result<TrackInfo, StoreError> {
        self.tracks
            .get(&track_id)
            .cloned()
            .ok_or(StoreError::NotFound(track_id))
    }
}

// ============================================
// Path resolvers
// ============================================

/// Fills `{record}` and `{track}` in a template
#[derive(Debug, Clone)]
pub struct FormatResolver {
    template: String,
}

impl FormatResolver {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

impl Default for FormatResolver {
    fn default() -> Self {
        Self::new(DEFAULT_PATH_FORMAT)
    }
}

impl PathResolver for FormatResolver {
    fn resolve(&self, record_id: i64, track_id: u64) -> Result<String, StoreError> {
        Ok(self
            .template
            .replace("{record}", &record_id.to_string())
            .replace("{track}", &track_id.to_string()))
    }
}

/// Asks an external program for the path.
///
/// The program is run as `PROGRAM RECORD_ID TRACK_ID`; the first line it
/// prints is the path.
#[derive(Debug, Clone)]
pub struct CommandResolver {
    program: String,
}

impl CommandResolver {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl PathResolver for CommandResolver {
    fn resolve(&self, record_id: i64, track_id: u64) -> Result<String, StoreError> {
        let output = Command::new(&self.program)
            .arg(record_id.to_string())
            .arg(track_id.to_string())
            .output()?;
        if !output.status.success() {
            return Err(StoreError::Resolver(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match stdout.lines().next().map(str::trim) {
            Some(path) if !path.is_empty() => Ok(path.to_string()),
            _ => Err(StoreError::Resolver(format!(
                "{} printed no path",
                self.program
            ))),
        }
    }
}

// ============================================
// Tree lookup
// ============================================

/// Serves `/tracks/<id>` from a store and a path resolver
pub struct TrackLookup {
    store: Arc<dyn TrackStore>,
    resolver: Arc<dyn PathResolver>,
}

impl TrackLookup {
    pub fn new(store: Arc<dyn TrackStore>, resolver: Arc<dyn PathResolver>) -> Self {
        Self { store, resolver }
    }

    pub fn track(&self, track_id: u64) -> Result<Track, StoreError> {
        let info = self.store.track_info(track_id)?;
        let path = self.resolver.resolve(info.record_id, track_id)?;
        Ok(Track::new(path, info))
    }

    /// The resources a client reading `/tracks/<id>` would receive
    pub fn resources(&self, track_id: u64) -> Result<Vec<Resource>, ResourceError> {
        let value = self.lookup(&track_id.to_string())?;
        let path = ResourcePath::root().join("tracks").join(track_id.to_string());
        Ok(flatten_value(&path, &value))
    }
}

impl Lookup for TrackLookup {
    fn lookup(&self, key: &str) -> Result<Value, ResourceError> {
        let track_id: u64 = key
            .parse()
            .map_err(|_| ResourceError::BadKey(key.to_string()))?;
        match self.track(track_id) {
            Ok(track) => Ok(serde_json::to_value(track)?),
            Err(StoreError::NotFound(_)) => Err(ResourceError::NotFound(key.to_string())),
            Err(e) => {
                tracing::warn!("track {} lookup failed: {}", track_id, e);
                Err(ResourceError::Backend(e.to_string()))
            }
        }
    }
}
