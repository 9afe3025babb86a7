//! `SQLite` schema definitions for the mission log.

/// Missions, one row per flight.
pub const CREATE_MISSIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS missions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    drone TEXT NOT NULL,
    climb_mode TEXT NOT NULL,
    outcome TEXT
)
";

/// Target detections, each tied to the mission that made it.
pub const CREATE_DETECTIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS detections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    mission_id INTEGER NOT NULL REFERENCES missions(id) ON DELETE CASCADE,
    timestamp TEXT NOT NULL,
    x REAL NOT NULL,
    y REAL NOT NULL,
    z REAL NOT NULL,
    bbox_area INTEGER NOT NULL
)
";

/// Index for newest-first mission listings.
pub const CREATE_MISSION_STARTED_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_missions_started ON missions(started_at DESC)
";

/// Index for newest-first detection listings.
pub const CREATE_DETECTION_TIMESTAMP_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_detections_timestamp ON detections(timestamp DESC)
";

/// Index for per-mission lookups.
pub const CREATE_DETECTION_MISSION_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_detections_mission ON detections(mission_id)
";

/// Key-value metadata, including the schema version.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_MISSIONS_TABLE,
    CREATE_DETECTIONS_TABLE,
    CREATE_MISSION_STARTED_INDEX,
    CREATE_DETECTION_TIMESTAMP_INDEX,
    CREATE_DETECTION_MISSION_INDEX,
    CREATE_METADATA_TABLE,
];
