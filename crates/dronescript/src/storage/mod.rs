//! Mission log storage.
//!
//! `SQLite`-backed record of every mission flown and every target detection,
//! with listing, counting and pruning.

pub mod export;
pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ClimbMode;
use crate::error::{Error, Result};
use crate::state::Position;

/// One mission row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissionRecord {
    /// Database ID.
    pub id: i64,
    /// When the mission started.
    pub started_at: DateTime<Utc>,
    /// When the mission finished, if it has.
    pub finished_at: Option<DateTime<Utc>>,
    /// Address or name of the drone flown.
    pub drone: String,
    /// Climb strategy used.
    pub climb_mode: ClimbMode,
    /// Outcome label, set when the mission finishes.
    pub outcome: Option<String>,
}

/// One detection row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRecord {
    /// Database ID (`None` before insertion).
    pub id: Option<i64>,
    /// Mission that made the detection.
    pub mission_id: i64,
    /// When the target was detected.
    pub timestamp: DateTime<Utc>,
    /// Estimated drone position at detection, in metres.
    pub position: Position,
    /// Bounding box area of the target in pixels.
    pub bbox_area: u64,
}

impl DetectionRecord {
    /// Create a detection stamped now.
    #[must_use]
    pub fn new(mission_id: i64, position: Position, bbox_area: u64) -> Self {
        Self {
            id: None,
            mission_id,
            timestamp: Utc::now(),
            position,
            bbox_area,
        }
    }
}

/// Storage engine for the mission log.
#[derive(Debug)]
pub struct Storage {
    path: PathBuf,
    conn: Connection,
}

const DETECTION_COLUMNS: &str = "id, mission_id, timestamp, x, y, z, bbox_area";
const MISSION_COLUMNS: &str = "id, started_at, finished_at, drone, climb_mode, outcome";

impl Storage {
    /// Open or create a mission log at the given path.
    ///
    /// Creates the parent directories if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory mission log.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record the start of a mission and return its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn begin_mission(&self, drone: &str, climb_mode: ClimbMode) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO missions (started_at, drone, climb_mode) VALUES (?1, ?2, ?3)",
            params![Utc::now().to_rfc3339(), drone, climb_mode.to_string()],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!(mission_id = id, drone, "Mission started");
        Ok(id)
    }

    /// Mark a mission finished with the given outcome label.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the mission does not exist, or an error
    /// if the database operation fails.
    pub fn finish_mission(&self, id: i64, outcome: &str) -> Result<()> {
        let affected = self.conn.execute(
            "UPDATE missions SET finished_at = ?1, outcome = ?2 WHERE id = ?3",
            params![Utc::now().to_rfc3339(), outcome, id],
        )?;
        if affected == 0 {
            return Err(Error::internal(format!("no mission with id {id}")));
        }
        debug!(mission_id = id, outcome, "Mission finished");
        Ok(())
    }

    /// Get a mission by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_mission(&self, id: i64) -> Result<Option<MissionRecord>> {
        let sql = format!("SELECT {MISSION_COLUMNS} FROM missions WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, [id], Self::row_to_mission)
            .optional()?)
    }

    /// The most recent missions, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn recent_missions(&self, limit: usize) -> Result<Vec<MissionRecord>> {
        let sql = format!(
            "SELECT {MISSION_COLUMNS} FROM missions ORDER BY started_at DESC, id DESC LIMIT ?1"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let missions = stmt
            .query_map([to_sql_limit(limit)], Self::row_to_mission)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(missions)
    }

    /// Record a detection and return its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the mission does not exist or the database
    /// operation fails.
    pub fn record_detection(&self, detection: &DetectionRecord) -> Result<i64> {
        let p = detection.position;
        self.conn.execute(
            r"
            INSERT INTO detections (mission_id, timestamp, x, y, z, bbox_area)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
            params![
                detection.mission_id,
                detection.timestamp.to_rfc3339(),
                p.x,
                p.y,
                p.z,
                i64::try_from(detection.bbox_area).unwrap_or(i64::MAX),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!(
            detection_id = id,
            mission_id = detection.mission_id,
            position = %p,
            "Detection recorded"
        );
        Ok(id)
    }

    /// Get a detection by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_detection(&self, id: i64) -> Result<Option<DetectionRecord>> {
        let sql = format!("SELECT {DETECTION_COLUMNS} FROM detections WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, [id], Self::row_to_detection)
            .optional()?)
    }

    /// The most recent detections, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn recent_detections(&self, limit: usize) -> Result<Vec<DetectionRecord>> {
        let sql = format!(
            "SELECT {DETECTION_COLUMNS} FROM detections ORDER BY timestamp DESC, id DESC LIMIT ?1"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let detections = stmt
            .query_map([to_sql_limit(limit)], Self::row_to_detection)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(detections)
    }

    /// The newest detection, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn latest_detection(&self) -> Result<Option<DetectionRecord>> {
        Ok(self.recent_detections(1)?.into_iter().next())
    }

    /// All detections of one mission, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn mission_detections(&self, mission_id: i64) -> Result<Vec<DetectionRecord>> {
        let sql = format!(
            "SELECT {DETECTION_COLUMNS} FROM detections WHERE mission_id = ?1 ORDER BY timestamp ASC, id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let detections = stmt
            .query_map([mission_id], Self::row_to_detection)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(detections)
    }

    /// Count stored detections.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count_detections(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM detections", [], |row| row.get(0))?)
    }

    /// Count stored missions.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count_missions(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM missions", [], |row| row.get(0))?)
    }

    /// Keep only the most recent `keep_count` missions and their detections.
    ///
    /// Returns the number of missions deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn prune_keep_recent(&self, keep_count: usize) -> Result<usize> {
        let affected = self.conn.execute(
            r"
            DELETE FROM missions WHERE id NOT IN (
                SELECT id FROM missions ORDER BY started_at DESC, id DESC LIMIT ?1
            )
            ",
            [to_sql_limit(keep_count)],
        )?;

        if affected > 0 {
            info!("Pruned {} missions to keep {} recent", affected, keep_count);
        }
        Ok(affected)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let total_missions = self.count_missions()?;
        let total_detections = self.count_detections()?;
        let missions_with_target: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT mission_id) FROM detections",
            [],
            |row| row.get(0),
        )?;

        let first: Option<String> = self
            .conn
            .query_row(
                "SELECT started_at FROM missions ORDER BY started_at ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let last: Option<String> = self
            .conn
            .query_row(
                "SELECT started_at FROM missions ORDER BY started_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_missions,
            total_detections,
            missions_with_target,
            first_mission: first.as_deref().and_then(parse_timestamp),
            last_mission: last.as_deref().and_then(parse_timestamp),
            db_size_bytes,
        })
    }

    fn row_to_mission(row: &rusqlite::Row) -> rusqlite::Result<MissionRecord> {
        let started_at: String = row.get(1)?;
        let finished_at: Option<String> = row.get(2)?;
        let climb_mode: String = row.get(4)?;

        let climb_mode = climb_mode.parse().unwrap_or_else(|_| {
            warn!("Unknown climb mode: {}, defaulting to direct", climb_mode);
            ClimbMode::Direct
        });

        Ok(MissionRecord {
            id: row.get(0)?,
            started_at: parse_timestamp(&started_at).unwrap_or_else(Utc::now),
            finished_at: finished_at.as_deref().and_then(parse_timestamp),
            drone: row.get(3)?,
            climb_mode,
            outcome: row.get(5)?,
        })
    }

    fn row_to_detection(row: &rusqlite::Row) -> rusqlite::Result<DetectionRecord> {
        let timestamp: String = row.get(2)?;
        let bbox_area: i64 = row.get(6)?;

        Ok(DetectionRecord {
            id: Some(row.get(0)?),
            mission_id: row.get(1)?,
            timestamp: parse_timestamp(&timestamp).unwrap_or_else(Utc::now),
            position: Position::new(row.get(3)?, row.get(4)?, row.get(5)?),
            bbox_area: u64::try_from(bbox_area).unwrap_or(0),
        })
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn to_sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Statistics about the mission log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    /// Total number of missions.
    pub total_missions: i64,
    /// Total number of detections.
    pub total_detections: i64,
    /// Missions with at least one detection.
    pub missions_with_target: i64,
    /// Start time of the oldest mission.
    pub first_mission: Option<DateTime<Utc>>,
    /// Start time of the newest mission.
    pub last_mission: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
