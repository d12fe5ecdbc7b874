//! Persistent license policy table.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{params, Connection};
use tracing::info;

use super::defaults::default_policies;
use super::types::{LicensePolicyEntry, LicenseTier, PolicyError, ScoreBands};

/// Storage backend for license policy entries.
pub trait LicensePolicyStore: Send + Sync {
    /// All entries, in insertion order.
    fn list_policies(&self) -> Result<Vec<LicensePolicyEntry>, PolicyError>;

    /// Insert or replace an entry, keyed by identifier.
    fn upsert_policy(&self, entry: &LicensePolicyEntry) -> Result<(), PolicyError>;

    /// Number of stored entries.
    fn policy_count(&self) -> Result<i64, PolicyError>;
}

/// SQLite-backed license policy table.
pub struct SqliteLicensePolicyStore {
    conn: Mutex<Connection>,
    bands: ScoreBands,
}

impl SqliteLicensePolicyStore {
    /// Open (or create) the policy table in the given database file.
    pub fn new(path: &Path, bands: ScoreBands) -> Result<Self, PolicyError> {
        let conn = Connection::open(path).map_err(|e| PolicyError::Database(e.to_string()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| PolicyError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            bands,
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory(bands: ScoreBands) -> Result<Self, PolicyError> {
        let conn =
            Connection::open_in_memory().map_err(|e| PolicyError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            bands,
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), PolicyError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS license_policies (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                identifier TEXT NOT NULL UNIQUE,
                tier TEXT NOT NULL,
                score INTEGER NOT NULL,
                aliases TEXT NOT NULL DEFAULT '[]'
            );
            "#,
        )
        .map_err(|e| PolicyError::Database(e.to_string()))
    }

    /// Seed the built-in policy if the table is empty. Returns the number of
    /// entries written.
    pub fn seed_defaults(&self) -> Result<usize, PolicyError> {
        if self.policy_count()? > 0 {
            return Ok(0);
        }
        let defaults = default_policies(&self.bands);
        for entry in &defaults {
            self.upsert_policy(entry)?;
        }
        info!("Seeded {} default license policies", defaults.len());
        Ok(defaults.len())
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<(String, String, u8, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    }
}

impl LicensePolicyStore for SqliteLicensePolicyStore {
    fn list_policies(&self) -> Result<Vec<LicensePolicyEntry>, PolicyError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare("SELECT identifier, tier, score, aliases FROM license_policies ORDER BY seq ASC")
            .map_err(|e| PolicyError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], Self::row_to_entry)
            .map_err(|e| PolicyError::Database(e.to_string()))?;

        let mut entries = Vec::new();
        for row in rows {
            let (identifier, tier, score, aliases) =
                row.map_err(|e| PolicyError::Database(e.to_string()))?;
            let tier: LicenseTier = tier.parse().map_err(PolicyError::Database)?;
            let aliases: Vec<String> = serde_json::from_str(&aliases).unwrap_or_default();
            entries.push(LicensePolicyEntry {
                identifier,
                tier,
                score,
                aliases,
            });
        }

        Ok(entries)
    }

    fn upsert_policy(&self, entry: &LicensePolicyEntry) -> Result<(), PolicyError> {
        entry.validate(&self.bands)?;

        let aliases = serde_json::to_string(&entry.aliases)
            .map_err(|e| PolicyError::Database(e.to_string()))?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO license_policies (identifier, tier, score, aliases) VALUES (?, ?, ?, ?)
             ON CONFLICT(identifier) DO UPDATE SET tier = excluded.tier, score = excluded.score, aliases = excluded.aliases",
            params![entry.identifier, entry.tier.as_str(), entry.score, aliases],
        )
        .map_err(|e| PolicyError::Database(e.to_string()))?;

        Ok(())
    }

    fn policy_count(&self) -> Result<i64, PolicyError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM license_policies", [], |row| row.get(0))
            .map_err(|e| PolicyError::Database(e.to_string()))
    }
}
