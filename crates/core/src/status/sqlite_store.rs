//! SQLite-backed package store implementation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

use super::store::{CreateRequest, PackageFilter, PackageStore, RecoveryReport, StoreError};
use super::types::{
    Decision, Package, PackageStatus, PackageUpdate, RequestRecord, RequestStatus,
    RequestSummary, StatusChange,
};
use crate::scanner::VulnerabilityCounts;
use crate::storage::StoredArtifact;

const PACKAGE_COLUMNS: &str = "id, request_id, name, version, license_expression, \
    license_identifier, license_tier, license_score, security_score, \
    vuln_critical, vuln_high, vuln_medium, vuln_low, vuln_unknown, scan_duration_ms, \
    artifact_path, artifact_sha256, artifact_size, status, retry_count, error, \
    decided_by, decision_reason, created_at, updated_at, published_location, claim_token";

/// Fixed-width RFC 3339 so that text comparison in SQL matches time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_column<T>(idx: usize, value: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::<
            dyn std::error::Error + Send + Sync,
        >::from(e))
    })
}

/// SQLite-backed package store.
///
/// Several processes may open the same database file; claims and transitions
/// run inside `BEGIN IMMEDIATE` transactions so writers are serialized by
/// SQLite itself.
pub struct SqlitePackageStore {
    conn: Mutex<Connection>,
}

impl SqlitePackageStore {
    /// Open (or create) the database file and tables.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(StdDuration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS requests (
                id TEXT PRIMARY KEY,
                requested_by TEXT NOT NULL,
                source TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS packages (
                id TEXT PRIMARY KEY,
                request_id TEXT NOT NULL REFERENCES requests(id),
                name TEXT NOT NULL,
                version TEXT NOT NULL,
                license_expression TEXT,
                license_identifier TEXT,
                license_tier TEXT,
                license_score INTEGER,
                security_score INTEGER,
                vuln_critical INTEGER NOT NULL DEFAULT 0,
                vuln_high INTEGER NOT NULL DEFAULT 0,
                vuln_medium INTEGER NOT NULL DEFAULT 0,
                vuln_low INTEGER NOT NULL DEFAULT 0,
                vuln_unknown INTEGER NOT NULL DEFAULT 0,
                scan_duration_ms INTEGER,
                artifact_path TEXT,
                artifact_sha256 TEXT,
                artifact_size INTEGER,
                status TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                decided_by TEXT,
                decision_reason TEXT,
                published_location TEXT,
                claim_token TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (request_id, name, version)
            );

            CREATE INDEX IF NOT EXISTS idx_packages_status ON packages(status, updated_at);
            CREATE INDEX IF NOT EXISTS idx_packages_request ON packages(request_id);
            CREATE INDEX IF NOT EXISTS idx_packages_claim ON packages(claim_token);

            CREATE TABLE IF NOT EXISTS status_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                package_id TEXT NOT NULL,
                from_status TEXT,
                to_status TEXT NOT NULL,
                detail TEXT,
                at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_history_package ON status_history(package_id, id);
            "#,
        )?;
        Ok(())
    }

    fn build_where_clause(filter: &PackageFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(ref request_id) = filter.request_id {
            conditions.push("request_id = ?");
            params.push(Box::new(request_id.clone()));
        }

        if let Some(ref name) = filter.name {
            conditions.push("name = ?");
            params.push(Box::new(name.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_package(row: &rusqlite::Row) -> rusqlite::Result<Package> {
        let license_tier: Option<String> = row.get(6)?;
        let license_tier = license_tier
            .map(|tier| parse_column(6, &tier))
            .transpose()?;

        let artifact_path: Option<String> = row.get(15)?;
        let artifact_sha256: Option<String> = row.get(16)?;
        let artifact_size: Option<i64> = row.get(17)?;
        let artifact = match (artifact_path, artifact_sha256) {
            (Some(path), Some(sha256)) => Some(StoredArtifact {
                path: PathBuf::from(path),
                sha256,
                size_bytes: artifact_size.unwrap_or(0) as u64,
            }),
            _ => None,
        };

        let status: String = row.get(18)?;
        let created_at: String = row.get(23)?;
        let updated_at: String = row.get(24)?;

        Ok(Package {
            id: row.get(0)?,
            request_id: row.get(1)?,
            name: row.get(2)?,
            version: row.get(3)?,
            license_expression: row.get(4)?,
            license_identifier: row.get(5)?,
            license_tier,
            license_score: row.get(7)?,
            security_score: row.get(8)?,
            vulnerabilities: VulnerabilityCounts {
                critical: row.get(9)?,
                high: row.get(10)?,
                medium: row.get(11)?,
                low: row.get(12)?,
                unknown: row.get(13)?,
            },
            scan_duration_ms: row.get::<_, Option<i64>>(14)?.map(|ms| ms as u64),
            artifact,
            status: parse_column(18, &status)?,
            retry_count: row.get(19)?,
            error: row.get(20)?,
            decided_by: row.get(21)?,
            decision_reason: row.get(22)?,
            published_location: row.get(25)?,
            claim_token: row.get(26)?,
            created_at: parse_timestamp(23, &created_at)?,
            updated_at: parse_timestamp(24, &updated_at)?,
        })
    }

    fn row_to_request(row: &rusqlite::Row) -> rusqlite::Result<RequestRecord> {
        let created_at: String = row.get(3)?;
        Ok(RequestRecord {
            id: row.get(0)?,
            requested_by: row.get(1)?,
            source: row.get(2)?,
            created_at: parse_timestamp(3, &created_at)?,
        })
    }

    fn query_package(conn: &Connection, id: &str) -> Result<Option<Package>, StoreError> {
        let sql = format!("SELECT {} FROM packages WHERE id = ?", PACKAGE_COLUMNS);
        Ok(conn
            .query_row(&sql, params![id], Self::row_to_package)
            .optional()?)
    }

    fn current_status(conn: &Connection, id: &str) -> Result<Option<PackageStatus>, StoreError> {
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM packages WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        status
            .map(|s| s.parse::<PackageStatus>().map_err(StoreError::Database))
            .transpose()
    }

    fn record_change(
        conn: &Connection,
        package_id: &str,
        from: Option<PackageStatus>,
        to: PackageStatus,
        detail: Option<&str>,
        at: &str,
    ) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO status_history (package_id, from_status, to_status, detail, at) VALUES (?, ?, ?, ?, ?)",
            params![package_id, from.map(|s| s.as_str()), to.as_str(), detail, at],
        )?;
        Ok(())
    }
}

impl PackageStore for SqlitePackageStore {
    fn create_request(&self, request: CreateRequest) -> Result<RequestRecord, StoreError> {
        let mut seen = HashSet::new();
        for package in &request.packages {
            if !seen.insert((package.name.as_str(), package.version.as_str())) {
                return Err(StoreError::DuplicatePackage {
                    name: package.name.clone(),
                    version: package.version.clone(),
                });
            }
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let now_str = timestamp(now);

        tx.execute(
            "INSERT INTO requests (id, requested_by, source, created_at) VALUES (?, ?, ?, ?)",
            params![id, request.requested_by, request.source, now_str],
        )?;

        for package in &request.packages {
            let package_id = uuid::Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO packages (id, request_id, name, version, license_expression, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    package_id,
                    id,
                    package.name,
                    package.version,
                    package.license_expression,
                    PackageStatus::Submitted.as_str(),
                    now_str,
                    now_str,
                ],
            )?;
            Self::record_change(&tx, &package_id, None, PackageStatus::Submitted, None, &now_str)?;
        }

        tx.commit()?;

        Ok(RequestRecord {
            id,
            requested_by: request.requested_by,
            source: request.source,
            created_at: now,
        })
    }

    fn get_request(&self, id: &str) -> Result<Option<RequestRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT id, requested_by, source, created_at FROM requests WHERE id = ?",
                params![id],
                Self::row_to_request,
            )
            .optional()?)
    }

    fn request_packages(&self, request_id: &str) -> Result<Vec<Package>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM packages WHERE request_id = ? ORDER BY rowid ASC",
            PACKAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let packages = stmt
            .query_map(params![request_id], Self::row_to_package)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(packages)
    }

    fn request_summary(&self, request_id: &str) -> Result<RequestSummary, StoreError> {
        let request = self
            .get_request(request_id)?
            .ok_or_else(|| StoreError::RequestNotFound(request_id.to_string()))?;

        let statuses: Vec<PackageStatus> = self
            .request_packages(request_id)?
            .into_iter()
            .map(|p| p.status)
            .collect();

        let counts = PackageStatus::ALL
            .iter()
            .map(|status| (*status, statuses.iter().filter(|s| *s == status).count()))
            .filter(|(_, count)| *count > 0)
            .collect();

        Ok(RequestSummary {
            request,
            status: RequestStatus::derive(&statuses),
            total_packages: statuses.len(),
            counts,
        })
    }

    fn get(&self, id: &str) -> Result<Option<Package>, StoreError> {
        let conn = self.conn.lock().unwrap();
        Self::query_package(&conn, id)
    }

    fn list(&self, filter: &PackageFilter) -> Result<Vec<Package>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, mut params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT {} FROM packages {} ORDER BY updated_at ASC, id ASC LIMIT ? OFFSET ?",
            PACKAGE_COLUMNS, where_clause
        );
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let packages = stmt
            .query_map(param_refs.as_slice(), Self::row_to_package)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(packages)
    }

    fn count(&self, filter: &PackageFilter) -> Result<i64, StoreError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM packages {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        Ok(conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?)
    }

    fn transition(
        &self,
        id: &str,
        from: PackageStatus,
        to: PackageStatus,
        claim_token: Option<&str>,
        update: &PackageUpdate,
    ) -> Result<bool, StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::IllegalTransition {
                package_id: id.to_string(),
                from,
                to,
            });
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = timestamp(Utc::now());

        let vulns = update.vulnerabilities;
        let changed = tx.execute(
            "UPDATE packages SET
                status = ?,
                updated_at = ?,
                error = ?,
                claim_token = NULL,
                license_identifier = COALESCE(?, license_identifier),
                license_tier = COALESCE(?, license_tier),
                license_score = COALESCE(?, license_score),
                security_score = COALESCE(?, security_score),
                vuln_critical = COALESCE(?, vuln_critical),
                vuln_high = COALESCE(?, vuln_high),
                vuln_medium = COALESCE(?, vuln_medium),
                vuln_low = COALESCE(?, vuln_low),
                vuln_unknown = COALESCE(?, vuln_unknown),
                scan_duration_ms = COALESCE(?, scan_duration_ms),
                artifact_path = COALESCE(?, artifact_path),
                artifact_sha256 = COALESCE(?, artifact_sha256),
                artifact_size = COALESCE(?, artifact_size),
                decided_by = COALESCE(?, decided_by),
                decision_reason = COALESCE(?, decision_reason),
                published_location = COALESCE(?, published_location)
             WHERE id = ? AND status = ? AND claim_token IS ?",
            params![
                to.as_str(),
                now,
                update.error,
                update.license_identifier,
                update.license_tier.map(|t| t.as_str()),
                update.license_score,
                update.security_score,
                vulns.map(|v| v.critical),
                vulns.map(|v| v.high),
                vulns.map(|v| v.medium),
                vulns.map(|v| v.low),
                vulns.map(|v| v.unknown),
                update.scan_duration_ms.map(|ms| ms as i64),
                update
                    .artifact
                    .as_ref()
                    .map(|a| a.path.to_string_lossy().into_owned()),
                update.artifact.as_ref().map(|a| a.sha256.clone()),
                update.artifact.as_ref().map(|a| a.size_bytes as i64),
                update.decided_by,
                update.decision_reason,
                update.published_location,
                id,
                from.as_str(),
                claim_token,
            ],
        )?;

        if changed == 0 {
            return match Self::current_status(&tx, id)? {
                None => Err(StoreError::NotFound(id.to_string())),
                Some(current) => {
                    debug!(
                        package_id = %id,
                        expected = %from,
                        current = %current,
                        "Transition lost, package moved on or was reclaimed"
                    );
                    Ok(false)
                }
            };
        }

        Self::record_change(&tx, id, Some(from), to, update.error.as_deref(), &now)?;
        tx.commit()?;
        Ok(true)
    }

    fn claim(
        &self,
        from: PackageStatus,
        to: PackageStatus,
        limit: usize,
    ) -> Result<Vec<Package>, StoreError> {
        if !from.can_transition_to(to) {
            return Err(StoreError::IllegalTransition {
                package_id: "*".to_string(),
                from,
                to,
            });
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let token = uuid::Uuid::new_v4().to_string();
        let now = timestamp(Utc::now());

        let claimed = tx.execute(
            "UPDATE packages SET status = ?1, claim_token = ?2, updated_at = ?3
             WHERE status = ?4 AND id IN (
                SELECT id FROM packages WHERE status = ?4
                ORDER BY updated_at ASC, id ASC LIMIT ?5
             )",
            params![to.as_str(), token, now, from.as_str(), limit as i64],
        )?;

        if claimed == 0 {
            return Ok(Vec::new());
        }

        tx.execute(
            "INSERT INTO status_history (package_id, from_status, to_status, detail, at)
             SELECT id, ?, ?, NULL, ? FROM packages WHERE claim_token = ?",
            params![from.as_str(), to.as_str(), now, token],
        )?;

        let packages = {
            let sql = format!(
                "SELECT {} FROM packages WHERE claim_token = ? ORDER BY created_at ASC, rowid ASC",
                PACKAGE_COLUMNS
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt
                .query_map(params![token], Self::row_to_package)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        tx.commit()?;
        Ok(packages)
    }

    fn requeue(
        &self,
        id: &str,
        from: PackageStatus,
        claim_token: Option<&str>,
        error: &str,
    ) -> Result<bool, StoreError> {
        let to = from.recovery_target().ok_or_else(|| StoreError::InvalidState {
            package_id: id.to_string(),
            current: from,
            operation: "requeue".to_string(),
        })?;

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = timestamp(Utc::now());

        let changed = tx.execute(
            "UPDATE packages SET status = ?, retry_count = retry_count + 1, error = ?,
                updated_at = ?, claim_token = NULL
             WHERE id = ? AND status = ? AND claim_token IS ?",
            params![to.as_str(), error, now, id, from.as_str(), claim_token],
        )?;

        if changed == 0 {
            return match Self::current_status(&tx, id)? {
                None => Err(StoreError::NotFound(id.to_string())),
                Some(_) => Ok(false),
            };
        }

        Self::record_change(&tx, id, Some(from), to, Some(error), &now)?;
        tx.commit()?;
        Ok(true)
    }

    fn recover_stuck(
        &self,
        marker: PackageStatus,
        older_than: Duration,
        max_retries: u32,
    ) -> Result<RecoveryReport, StoreError> {
        let (Some(reset_to), Some(fail_to)) = (marker.recovery_target(), marker.failure_sibling())
        else {
            return Err(StoreError::InvalidState {
                package_id: "*".to_string(),
                current: marker,
                operation: "recover".to_string(),
            });
        };

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let now = Utc::now();
        let now_str = timestamp(now);
        let cutoff = timestamp(now - older_than);

        let exhausted_detail = format!(
            "stuck in {} for more than {}s after {} attempts",
            marker,
            older_than.num_seconds(),
            max_retries
        );
        tx.execute(
            "INSERT INTO status_history (package_id, from_status, to_status, detail, at)
             SELECT id, ?1, ?2, ?3, ?4 FROM packages
             WHERE status = ?1 AND updated_at <= ?5 AND retry_count >= ?6",
            params![
                marker.as_str(),
                fail_to.as_str(),
                exhausted_detail,
                now_str,
                cutoff,
                max_retries
            ],
        )?;
        let exhausted = tx.execute(
            "UPDATE packages SET status = ?2, error = ?3, updated_at = ?4, claim_token = NULL
             WHERE status = ?1 AND updated_at <= ?5 AND retry_count >= ?6",
            params![
                marker.as_str(),
                fail_to.as_str(),
                exhausted_detail,
                now_str,
                cutoff,
                max_retries
            ],
        )?;

        let reset_detail = format!(
            "stuck in {} for more than {}s, retrying",
            marker,
            older_than.num_seconds()
        );
        tx.execute(
            "INSERT INTO status_history (package_id, from_status, to_status, detail, at)
             SELECT id, ?1, ?2, ?3, ?4 FROM packages
             WHERE status = ?1 AND updated_at <= ?5",
            params![marker.as_str(), reset_to.as_str(), reset_detail, now_str, cutoff],
        )?;
        let reset = tx.execute(
            "UPDATE packages SET status = ?2, error = ?3, updated_at = ?4, claim_token = NULL,
                retry_count = retry_count + 1
             WHERE status = ?1 AND updated_at <= ?5",
            params![marker.as_str(), reset_to.as_str(), reset_detail, now_str, cutoff],
        )?;

        tx.commit()?;
        Ok(RecoveryReport { reset, exhausted })
    }

    fn decide(&self, id: &str, decision: &Decision) -> Result<Package, StoreError> {
        let to = if decision.approve {
            PackageStatus::Approved
        } else {
            PackageStatus::Rejected
        };

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = timestamp(Utc::now());

        let changed = tx.execute(
            "UPDATE packages SET status = ?, decided_by = ?, decision_reason = ?,
                updated_at = ?, error = NULL, claim_token = NULL
             WHERE id = ? AND status = ?",
            params![
                to.as_str(),
                decision.decided_by,
                decision.reason,
                now,
                id,
                PackageStatus::PendingApproval.as_str()
            ],
        )?;

        if changed == 0 {
            return match Self::current_status(&tx, id)? {
                None => Err(StoreError::NotFound(id.to_string())),
                Some(current) => Err(StoreError::InvalidState {
                    package_id: id.to_string(),
                    current,
                    operation: "decide".to_string(),
                }),
            };
        }

        let detail = format!("decided by {}", decision.decided_by);
        Self::record_change(
            &tx,
            id,
            Some(PackageStatus::PendingApproval),
            to,
            Some(&detail),
            &now,
        )?;
        let package =
            Self::query_package(&tx, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        tx.commit()?;
        Ok(package)
    }

    fn history(&self, id: &str) -> Result<Vec<StatusChange>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT package_id, from_status, to_status, detail, at FROM status_history
             WHERE package_id = ? ORDER BY id ASC",
        )?;
        let changes = stmt
            .query_map(params![id], |row| {
                let from: Option<String> = row.get(1)?;
                let to: String = row.get(2)?;
                let at: String = row.get(4)?;
                Ok(StatusChange {
                    package_id: row.get(0)?,
                    from: from.map(|s| parse_column(1, &s)).transpose()?,
                    to: parse_column(2, &to)?,
                    detail: row.get(3)?,
                    at: parse_timestamp(4, &at)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::license::LicenseTier;
    use crate::status::PackageSpec;

    fn store() -> SqlitePackageStore {
        SqlitePackageStore::in_memory().unwrap()
    }

    fn request_with(store: &SqlitePackageStore, count: usize) -> RequestRecord {
        let mut request = CreateRequest::new("alice").with_source("package-lock.json");
        for i in 0..count {
            request = request.with_package(
                PackageSpec::new(format!("pkg-{}", i), "1.0.0").with_license("MIT"),
            );
        }
        store.create_request(request).unwrap()
    }

    fn advance_all(store: &SqlitePackageStore, from: PackageStatus, to: PackageStatus) {
        for package in store
            .list(&PackageFilter::new().with_status(from).with_limit(1000))
            .unwrap()
        {
            assert!(store
                .transition(&package.id, from, to, None, &PackageUpdate::new())
                .unwrap());
        }
    }

    #[test]
    fn test_create_request_starts_submitted() {
        let store = store();
        let request = request_with(&store, 3);

        let packages = store.request_packages(&request.id).unwrap();
        assert_eq!(packages.len(), 3);
        assert!(packages.iter().all(|p| p.status == PackageStatus::Submitted));
        assert_eq!(packages[0].name, "pkg-0");
        assert_eq!(packages[0].license_expression.as_deref(), Some("MIT"));
        assert_eq!(
            store.get_request(&request.id).unwrap().unwrap().source.as_deref(),
            Some("package-lock.json")
        );
    }

    #[test]
    fn test_create_request_rejects_duplicates() {
        let store = store();
        let request = CreateRequest::new("alice")
            .with_package(PackageSpec::new("a", "1.0.0"))
            .with_package(PackageSpec::new("a", "1.0.0"));
        assert!(matches!(
            store.create_request(request),
            Err(StoreError::DuplicatePackage { .. })
        ));
        assert_eq!(store.count(&PackageFilter::new()).unwrap(), 0);
    }

    #[test]
    fn test_transition_writes_fields_and_history() {
        let store = store();
        let request = request_with(&store, 1);
        let id = store.request_packages(&request.id).unwrap()[0].id.clone();

        store
            .transition(&id, PackageStatus::Submitted, PackageStatus::Parsed, None, &PackageUpdate::new())
            .unwrap();
        let claimed = store
            .claim(PackageStatus::Parsed, PackageStatus::CheckingLicense, 10)
            .unwrap();
        assert_eq!(claimed.len(), 1);
        let token = claimed[0].claim_token.clone();
        assert!(token.is_some());

        let update = PackageUpdate {
            license_identifier: Some("MIT".to_string()),
            license_tier: Some(LicenseTier::AlwaysAllowed),
            license_score: Some(100),
            ..PackageUpdate::default()
        };
        assert!(store
            .transition(
                &id,
                PackageStatus::CheckingLicense,
                PackageStatus::LicenseChecked,
                token.as_deref(),
                &update
            )
            .unwrap());

        let package = store.get(&id).unwrap().unwrap();
        assert_eq!(package.status, PackageStatus::LicenseChecked);
        assert_eq!(package.claim_token, None);
        assert_eq!(package.license_tier, Some(LicenseTier::AlwaysAllowed));
        assert_eq!(package.license_score, Some(100));

        let history: Vec<PackageStatus> =
            store.history(&id).unwrap().into_iter().map(|c| c.to).collect();
        assert_eq!(
            history,
            vec![
                PackageStatus::Submitted,
                PackageStatus::Parsed,
                PackageStatus::CheckingLicense,
                PackageStatus::LicenseChecked,
            ]
        );
    }

    #[test]
    fn test_transition_rejects_illegal_pairs() {
        let store = store();
        let request = request_with(&store, 1);
        let id = store.request_packages(&request.id).unwrap()[0].id.clone();

        let result = store.transition(
            &id,
            PackageStatus::Submitted,
            PackageStatus::Published,
            None,
            &PackageUpdate::new(),
        );
        assert!(matches!(result, Err(StoreError::IllegalTransition { .. })));
        assert_eq!(store.get(&id).unwrap().unwrap().status, PackageStatus::Submitted);
    }

    #[test]
    fn test_transition_from_wrong_status_is_noop() {
        let store = store();
        let request = request_with(&store, 1);
        let id = store.request_packages(&request.id).unwrap()[0].id.clone();

        let moved = store
            .transition(&id, PackageStatus::Parsed, PackageStatus::CheckingLicense, None, &PackageUpdate::new())
            .unwrap();
        assert!(!moved);
        assert_eq!(store.history(&id).unwrap().len(), 1);
    }

    #[test]
    fn test_transition_unknown_package() {
        let store = store();
        let result = store.transition(
            "missing",
            PackageStatus::Submitted,
            PackageStatus::Parsed,
            None,
            &PackageUpdate::new(),
        );
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_claim_respects_limit_and_order() {
        let store = store();
        let request = request_with(&store, 5);
        advance_all(&store, PackageStatus::Submitted, PackageStatus::Parsed);

        let first = store
            .claim(PackageStatus::Parsed, PackageStatus::CheckingLicense, 3)
            .unwrap();
        assert_eq!(first.len(), 3);
        assert!(first.iter().all(|p| p.status == PackageStatus::CheckingLicense));

        let second = store
            .claim(PackageStatus::Parsed, PackageStatus::CheckingLicense, 3)
            .unwrap();
        assert_eq!(second.len(), 2);

        let third = store
            .claim(PackageStatus::Parsed, PackageStatus::CheckingLicense, 3)
            .unwrap();
        assert!(third.is_empty());

        let summary = store.request_summary(&request.id).unwrap();
        assert_eq!(summary.status, RequestStatus::Processing);
        assert_eq!(summary.counts, vec![(PackageStatus::CheckingLicense, 5)]);
    }

    #[test]
    fn test_claim_rejects_illegal_pairs() {
        let store = store();
        let result = store.claim(PackageStatus::Parsed, PackageStatus::Downloading, 1);
        assert!(matches!(result, Err(StoreError::IllegalTransition { .. })));
    }

    #[test]
    fn test_concurrent_claims_never_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pkgvet.db");
        let first = Arc::new(SqlitePackageStore::new(&path).unwrap());
        let second = Arc::new(SqlitePackageStore::new(&path).unwrap());

        request_with(&first, 20);
        advance_all(&first, PackageStatus::Submitted, PackageStatus::Parsed);

        let handles: Vec<_> = [first.clone(), second.clone()]
            .into_iter()
            .map(|store| {
                std::thread::spawn(move || {
                    let mut ids = Vec::new();
                    loop {
                        let batch = store
                            .claim(PackageStatus::Parsed, PackageStatus::CheckingLicense, 3)
                            .unwrap();
                        if batch.is_empty() {
                            break;
                        }
                        ids.extend(batch.into_iter().map(|p| p.id));
                    }
                    ids
                })
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap());
        }
        let unique: HashSet<_> = all.iter().cloned().collect();
        assert_eq!(all.len(), 20);
        assert_eq!(unique.len(), 20);
    }

    #[test]
    fn test_requeue_increments_retry_count() {
        let store = store();
        request_with(&store, 1);
        advance_all(&store, PackageStatus::Submitted, PackageStatus::Parsed);
        let claimed = store
            .claim(PackageStatus::Parsed, PackageStatus::CheckingLicense, 1)
            .unwrap();
        let id = claimed[0].id.clone();
        let token = claimed[0].claim_token.as_deref();

        assert!(store
            .requeue(&id, PackageStatus::CheckingLicense, token, "policy unavailable")
            .unwrap());
        let package = store.get(&id).unwrap().unwrap();
        assert_eq!(package.status, PackageStatus::Parsed);
        assert_eq!(package.retry_count, 1);
        assert_eq!(package.error.as_deref(), Some("policy unavailable"));

        // Second requeue from the same marker finds nothing to move.
        assert!(!store
            .requeue(&id, PackageStatus::CheckingLicense, token, "again")
            .unwrap());
    }

    #[test]
    fn test_stale_claim_cannot_commit_after_reclaim() {
        let store = store();
        request_with(&store, 1);
        advance_all(&store, PackageStatus::Submitted, PackageStatus::Parsed);
        advance_all(&store, PackageStatus::Parsed, PackageStatus::CheckingLicense);
        advance_all(&store, PackageStatus::CheckingLicense, PackageStatus::LicenseChecked);

        let first = store
            .claim(PackageStatus::LicenseChecked, PackageStatus::Downloading, 1)
            .unwrap()
            .remove(0);
        let report = store
            .recover_stuck(PackageStatus::Downloading, Duration::zero(), 3)
            .unwrap();
        assert_eq!(report.reset, 1);
        let second = store
            .claim(PackageStatus::LicenseChecked, PackageStatus::Downloading, 1)
            .unwrap()
            .remove(0);
        assert_eq!(first.id, second.id);
        assert_ne!(first.claim_token, second.claim_token);

        // The first owner's late results are rejected.
        assert!(!store
            .transition(
                &first.id,
                PackageStatus::Downloading,
                PackageStatus::DownloadFailed,
                first.claim_token.as_deref(),
                &PackageUpdate::failed("late"),
            )
            .unwrap());
        assert!(!store
            .requeue(
                &first.id,
                PackageStatus::Downloading,
                first.claim_token.as_deref(),
                "late"
            )
            .unwrap());
        assert!(!store
            .transition(
                &first.id,
                PackageStatus::Downloading,
                PackageStatus::Downloaded,
                None,
                &PackageUpdate::new(),
            )
            .unwrap());

        assert!(store
            .transition(
                &second.id,
                PackageStatus::Downloading,
                PackageStatus::Downloaded,
                second.claim_token.as_deref(),
                &PackageUpdate::new(),
            )
            .unwrap());
        let package = store.get(&second.id).unwrap().unwrap();
        assert_eq!(package.status, PackageStatus::Downloaded);
        assert_eq!(package.retry_count, 1);
    }

    #[test]
    fn test_recover_stuck_resets_then_exhausts() {
        let store = store();
        request_with(&store, 2);
        advance_all(&store, PackageStatus::Submitted, PackageStatus::Parsed);
        advance_all(&store, PackageStatus::Parsed, PackageStatus::CheckingLicense);
        advance_all(&store, PackageStatus::CheckingLicense, PackageStatus::LicenseChecked);
        store
            .claim(PackageStatus::LicenseChecked, PackageStatus::Downloading, 10)
            .unwrap();

        // Not old enough yet.
        let report = store
            .recover_stuck(PackageStatus::Downloading, Duration::hours(1), 1)
            .unwrap();
        assert_eq!(report, RecoveryReport::default());

        let report = store
            .recover_stuck(PackageStatus::Downloading, Duration::zero(), 1)
            .unwrap();
        assert_eq!(report, RecoveryReport { reset: 2, exhausted: 0 });
        assert_eq!(
            store
                .count(&PackageFilter::new().with_status(PackageStatus::LicenseChecked))
                .unwrap(),
            2
        );

        store
            .claim(PackageStatus::LicenseChecked, PackageStatus::Downloading, 10)
            .unwrap();
        let report = store
            .recover_stuck(PackageStatus::Downloading, Duration::zero(), 1)
            .unwrap();
        assert_eq!(report, RecoveryReport { reset: 0, exhausted: 2 });

        let failed = store
            .list(&PackageFilter::new().with_status(PackageStatus::DownloadFailed))
            .unwrap();
        assert_eq!(failed.len(), 2);
        assert!(failed[0].error.as_deref().unwrap().contains("downloading"));
    }

    #[test]
    fn test_recover_stuck_rejects_non_marker() {
        let store = store();
        let result = store.recover_stuck(PackageStatus::Parsed, Duration::zero(), 3);
        assert!(matches!(result, Err(StoreError::InvalidState { .. })));
    }

    #[test]
    fn test_decide_only_from_pending_approval() {
        let store = store();
        let request = request_with(&store, 1);
        let id = store.request_packages(&request.id).unwrap()[0].id.clone();

        let result = store.decide(&id, &Decision::approve("bob"));
        assert!(matches!(result, Err(StoreError::InvalidState { .. })));

        store
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE packages SET status = 'pending_approval' WHERE id = ?",
                params![id],
            )
            .unwrap();

        let package = store
            .decide(&id, &Decision::reject("bob", "unmaintained"))
            .unwrap();
        assert_eq!(package.status, PackageStatus::Rejected);
        assert_eq!(package.decided_by.as_deref(), Some("bob"));
        assert_eq!(package.decision_reason.as_deref(), Some("unmaintained"));

        let summary = store.request_summary(&request.id).unwrap();
        assert_eq!(summary.status, RequestStatus::Failed);
    }
}
