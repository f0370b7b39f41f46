//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("Corrupt row: {0}")]
    Corrupt(String),
    #[error("Connection lock poisoned")]
    Poisoned,
}

const TARGET_COLUMNS: &str =
    "id, name, url, check_interval, timeout, is_active, owner_id, status, last_checked_at";

const CHECK_COLUMNS: &str =
    "id, target_id, status, latency_ms, http_code, error_detail, checked_at";

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Target CRUD ---

    /// Add a new target and return its ID.
    pub fn add_target(&self, target: &mut Target) -> Result<i64, DbError> {
        if target.timeout <= 0 {
            target.timeout = Target::default().timeout;
        }

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO targets (name, url, check_interval, timeout, is_active, owner_id, status, last_checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                target.name,
                target.url,
                target.check_interval,
                target.timeout,
                target.is_active,
                target.owner_id,
                target.status.as_str(),
                target.last_checked_at.map(format_db_time),
            ],
        )?;
        let id = conn.last_insert_rowid();
        target.id = id;
        Ok(id)
    }

    /// Update the configuration of an existing target.
    ///
    /// `status` and `last_checked_at` are left alone; only outcome recording moves them.
    pub fn update_target(&self, target: &Target) -> Result<(), DbError> {
        let conn = self.conn()?;
        let timeout = if target.timeout <= 0 { Target::default().timeout } else { target.timeout };

        let changed = conn.execute(
            "UPDATE targets SET name=?1, url=?2, check_interval=?3, timeout=?4, is_active=?5, owner_id=?6 WHERE id=?7",
            params![
                target.name,
                target.url,
                target.check_interval,
                timeout,
                target.is_active,
                target.owner_id,
                target.id,
            ],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Get all targets.
    pub fn get_targets(&self) -> Result<Vec<Target>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM targets ORDER BY id", TARGET_COLUMNS))?;
        let targets = stmt
            .query_map([], target_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(targets)
    }

    /// Get targets that may be scheduled: active with a positive interval.
    pub fn get_active_targets(&self) -> Result<Vec<Target>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM targets WHERE is_active = 1 AND check_interval > 0",
            TARGET_COLUMNS
        ))?;
        let targets = stmt
            .query_map([], target_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(targets)
    }

    /// Get a target by ID.
    pub fn get_target(&self, id: i64) -> Result<Target, DbError> {
        self.find_target(id)?.ok_or(DbError::NotFound)
    }

    /// Get a target by ID, `None` if it does not exist.
    pub fn find_target(&self, id: i64) -> Result<Option<Target>, DbError> {
        let conn = self.conn()?;
        let target = conn
            .query_row(
                &format!("SELECT {} FROM targets WHERE id = ?1", TARGET_COLUMNS),
                params![id],
                target_from_row,
            )
            .optional()?;
        Ok(target)
    }

    /// Delete a target and its outcomes.
    pub fn delete_target(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM check_outcomes WHERE target_id = ?1", params![id])?;
        let deleted = tx.execute("DELETE FROM targets WHERE id = ?1", params![id])?;
        tx.commit()?;
        if deleted == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Count of targets per current status.
    pub fn status_distribution(&self) -> Result<StatusDistribution, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM targets GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<SqlResult<Vec<_>>>()?;

        let mut dist = StatusDistribution::default();
        for (status, count) in rows {
            match TargetStatus::parse(&status) {
                TargetStatus::Up => dist.up += count,
                TargetStatus::Down => dist.down += count,
                TargetStatus::Unknown => dist.unknown += count,
            }
        }
        Ok(dist)
    }

    // --- Check outcomes ---

    /// Apply an outcome to its target and append it to the history, atomically.
    ///
    /// Returns `None` when the target no longer exists; the outcome is discarded.
    pub fn apply_outcome(
        &self,
        target_id: i64,
        outcome: &Outcome,
        checked_at: DateTime<Utc>,
    ) -> Result<Option<AppliedOutcome>, DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let target = tx
            .query_row(
                &format!("SELECT {} FROM targets WHERE id = ?1", TARGET_COLUMNS),
                params![target_id],
                target_from_row,
            )
            .optional()?;
        let Some(mut target) = target else {
            return Ok(None);
        };

        let previous: Option<String> = tx
            .query_row(
                "SELECT status FROM check_outcomes WHERE target_id = ?1
                 ORDER BY checked_at DESC, id DESC LIMIT 1",
                params![target_id],
                |row| row.get(0),
            )
            .optional()?;

        let checked_at_str = format_db_time(checked_at);
        let status = outcome.status();

        tx.execute(
            "UPDATE targets SET status = ?1, last_checked_at = ?2 WHERE id = ?3",
            params![status.as_str(), checked_at_str, target_id],
        )?;
        tx.execute(
            "INSERT INTO check_outcomes (target_id, status, latency_ms, http_code, error_detail, checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                target_id,
                status.as_str(),
                outcome.latency_ms().map(|l| l.min(i64::MAX as u64) as i64),
                outcome.http_code().map(i64::from),
                outcome.detail(),
                checked_at_str,
            ],
        )?;
        let record_id = tx.last_insert_rowid();
        tx.commit()?;

        target.status = status.into();
        target.last_checked_at = Some(checked_at);

        Ok(Some(AppliedOutcome {
            target,
            previous: previous.map(|s| match s.as_str() {
                "up" => CheckStatus::Up,
                _ => CheckStatus::Down,
            }),
            record_id,
        }))
    }

    /// Outcomes for a target within `[start, end)`, oldest first.
    pub fn get_checks(
        &self,
        target_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CheckRecord>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM check_outcomes
             WHERE target_id = ?1 AND checked_at >= ?2 AND checked_at < ?3
             ORDER BY checked_at ASC, id ASC",
            CHECK_COLUMNS
        ))?;
        let rows = stmt
            .query_map(
                params![target_id, format_db_time(start), format_db_time(end)],
                CheckRow::from_row,
            )?
            .collect::<SqlResult<Vec<_>>>()?;
        rows.into_iter().map(CheckRow::into_record).collect()
    }

    /// Most recent outcome for a target.
    pub fn latest_check(&self, target_id: i64) -> Result<Option<CheckRecord>, DbError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM check_outcomes WHERE target_id = ?1
                     ORDER BY checked_at DESC, id DESC LIMIT 1",
                    CHECK_COLUMNS
                ),
                params![target_id],
                CheckRow::from_row,
            )
            .optional()?;
        row.map(CheckRow::into_record).transpose()
    }

    /// One page of a target's history since `since`, newest first. Pages start at 1.
    pub fn get_history(
        &self,
        target_id: i64,
        since: DateTime<Utc>,
        page: u32,
        per_page: u32,
    ) -> Result<HistoryPage, DbError> {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let offset = i64::from(page - 1) * i64::from(per_page);
        let since_str = format_db_time(since);

        let conn = self.conn()?;
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM check_outcomes WHERE target_id = ?1 AND checked_at >= ?2",
            params![target_id, since_str],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM check_outcomes
             WHERE target_id = ?1 AND checked_at >= ?2
             ORDER BY checked_at DESC, id DESC LIMIT ?3 OFFSET ?4",
            CHECK_COLUMNS
        ))?;
        let rows = stmt
            .query_map(
                params![target_id, since_str, i64::from(per_page), offset],
                CheckRow::from_row,
            )?
            .collect::<SqlResult<Vec<_>>>()?;
        let records = rows
            .into_iter()
            .map(CheckRow::into_record)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(HistoryPage {
            page,
            per_page,
            total,
            records,
        })
    }

    /// Down outcomes across all targets since `since`, newest first.
    pub fn recent_incidents(&self, since: DateTime<Utc>, limit: u32) -> Result<Vec<IncidentRecord>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT c.target_id, t.name, t.url, c.checked_at, c.http_code, c.error_detail
             FROM check_outcomes c
             JOIN targets t ON c.target_id = t.id
             WHERE c.status = 'down' AND c.checked_at >= ?1
             ORDER BY c.checked_at DESC, c.id DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![format_db_time(since), i64::from(limit)], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        rows.into_iter()
            .map(|(target_id, target_name, target_url, time_str, code, detail)| {
                Ok(IncidentRecord {
                    target_id,
                    target_name,
                    target_url,
                    checked_at: parse_required_time(&time_str)?,
                    http_code: code.and_then(|c| u16::try_from(c).ok()),
                    detail,
                })
            })
            .collect()
    }

    /// Delete a target's outcomes before a cutoff time. Returns the number removed.
    pub fn delete_checks_before(&self, target_id: i64, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM check_outcomes WHERE target_id = ?1 AND checked_at < ?2",
            params![target_id, format_db_time(cutoff)],
        )?;
        Ok(deleted)
    }
}

fn target_from_row(row: &Row<'_>) -> SqlResult<Target> {
    let status: String = row.get(7)?;
    let last_checked: Option<String> = row.get(8)?;
    Ok(Target {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        check_interval: row.get(3)?,
        timeout: row.get(4)?,
        is_active: row.get(5)?,
        owner_id: row.get(6)?,
        status: TargetStatus::parse(&status),
        last_checked_at: last_checked.and_then(|s| parse_db_time(&s)),
    })
}

/// Raw columns of a `check_outcomes` row, before the outcome is validated.
struct CheckRow {
    id: i64,
    target_id: i64,
    status: String,
    latency_ms: Option<i64>,
    http_code: Option<i64>,
    detail: Option<String>,
    checked_at: String,
}

impl CheckRow {
    fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            id: row.get(0)?,
            target_id: row.get(1)?,
            status: row.get(2)?,
            latency_ms: row.get(3)?,
            http_code: row.get(4)?,
            detail: row.get(5)?,
            checked_at: row.get(6)?,
        })
    }

    fn into_record(self) -> Result<CheckRecord, DbError> {
        let latency_ms = self.latency_ms.and_then(|l| u64::try_from(l).ok());
        let http_code = self.http_code.and_then(|c| u16::try_from(c).ok());

        let outcome = match self.status.as_str() {
            "up" => match (latency_ms, http_code) {
                (Some(latency_ms), Some(http_code)) => Outcome::Up { latency_ms, http_code },
                _ => {
                    return Err(DbError::Corrupt(format!(
                        "up outcome {} is missing latency or status code",
                        self.id
                    )))
                }
            },
            "down" => Outcome::Down {
                latency_ms,
                http_code,
                detail: self.detail.unwrap_or_default(),
            },
            other => {
                return Err(DbError::Corrupt(format!(
                    "outcome {} has unknown status {:?}",
                    self.id, other
                )))
            }
        };

        Ok(CheckRecord {
            id: self.id,
            target_id: self.target_id,
            checked_at: parse_required_time(&self.checked_at)?,
            outcome,
        })
    }
}

/// Format a datetime the way it is stored: sortable UTC text.
fn format_db_time(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S%.9f").to_string()
}

fn parse_required_time(s: &str) -> Result<DateTime<Utc>, DbError> {
    parse_db_time(s).ok_or_else(|| DbError::Corrupt(format!("unparseable time {:?}", s)))
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        "%Y-%m-%d %H:%M:%S%.9f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use tempfile::NamedTempFile;

    fn test_store() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        (tmp, store)
    }

    fn add(store: &Store, name: &str) -> i64 {
        let mut target = Target {
            name: name.to_string(),
            url: format!("https://{}.example.com", name),
            check_interval: 60,
            ..Default::default()
        };
        store.add_target(&mut target).unwrap()
    }

    #[test]
    fn test_target_crud() {
        let (_tmp, store) = test_store();

        let id = add(&store, "test");
        assert!(id > 0);

        let fetched = store.get_target(id).unwrap();
        assert_eq!(fetched.name, "test");
        assert_eq!(fetched.status, TargetStatus::Unknown);
        assert!(fetched.last_checked_at.is_none());
        assert!(fetched.is_active);

        let mut updated = fetched;
        updated.name = "updated".to_string();
        updated.is_active = false;
        store.update_target(&updated).unwrap();

        let fetched2 = store.get_target(id).unwrap();
        assert_eq!(fetched2.name, "updated");
        assert!(!fetched2.is_active);

        tokio_test::assert_ok!(store.delete_target(id));
        assert!(matches!(store.get_target(id), Err(DbError::NotFound)));
        assert!(matches!(store.delete_target(id), Err(DbError::NotFound)));
    }

    #[test]
    fn test_active_targets_excludes_inactive_and_zero_interval() {
        let (_tmp, store) = test_store();
        let active = add(&store, "active");

        let mut inactive = Target {
            name: "inactive".to_string(),
            is_active: false,
            ..Default::default()
        };
        store.add_target(&mut inactive).unwrap();

        let mut zero = Target {
            name: "zero".to_string(),
            check_interval: 0,
            ..Default::default()
        };
        store.add_target(&mut zero).unwrap();

        let ids: Vec<i64> = store.get_active_targets().unwrap().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![active]);
        assert_eq!(store.get_targets().unwrap().len(), 3);
    }

    #[test]
    fn test_apply_outcome_updates_target_and_history() {
        let (_tmp, store) = test_store();
        let id = add(&store, "site");
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();

        let first = store
            .apply_outcome(id, &Outcome::Up { latency_ms: 80, http_code: 200 }, t0)
            .unwrap()
            .unwrap();
        assert_eq!(first.previous, None);
        assert_eq!(first.target.status, TargetStatus::Up);

        let t1 = t0 + ChronoDuration::seconds(60);
        let second = store
            .apply_outcome(id, &Outcome::failure("HTTP 503"), t1)
            .unwrap()
            .unwrap();
        assert_eq!(second.previous, Some(CheckStatus::Up));

        let target = store.get_target(id).unwrap();
        assert_eq!(target.status, TargetStatus::Down);
        assert_eq!(target.last_checked_at, Some(t1));

        let checks = store.get_checks(id, t0, t1 + ChronoDuration::seconds(1)).unwrap();
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0].status(), CheckStatus::Up);
        assert_eq!(checks[1].outcome.detail(), Some("HTTP 503"));

        let latest = store.latest_check(id).unwrap().unwrap();
        assert_eq!(latest.id, second.record_id);
    }

    #[test]
    fn test_apply_outcome_on_deleted_target_is_discarded() {
        let (_tmp, store) = test_store();
        let id = add(&store, "gone");
        store.delete_target(id).unwrap();

        let applied = store.apply_outcome(id, &Outcome::failure("x"), Utc::now()).unwrap();
        assert!(applied.is_none());
        assert!(store.latest_check(id).unwrap().is_none());
    }

    #[test]
    fn test_delete_target_cascades_history() {
        let (_tmp, store) = test_store();
        let id = add(&store, "cascade");
        let now = Utc::now();
        store
            .apply_outcome(id, &Outcome::Up { latency_ms: 5, http_code: 204 }, now)
            .unwrap();
        store.delete_target(id).unwrap();

        let checks = store
            .get_checks(id, now - ChronoDuration::days(1), now + ChronoDuration::days(1))
            .unwrap();
        assert!(checks.is_empty());
    }

    #[test]
    fn test_history_pagination_newest_first() {
        let (_tmp, store) = test_store();
        let id = add(&store, "paged");
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        for i in 0..5 {
            store
                .apply_outcome(
                    id,
                    &Outcome::Up { latency_ms: i, http_code: 200 },
                    t0 + ChronoDuration::minutes(i as i64),
                )
                .unwrap();
        }

        let page1 = store.get_history(id, t0, 1, 2).unwrap();
        assert_eq!(page1.total, 5);
        assert_eq!(page1.records.len(), 2);
        assert_eq!(page1.records[0].outcome.latency_ms(), Some(4));

        let page3 = store.get_history(id, t0, 3, 2).unwrap();
        assert_eq!(page3.records.len(), 1);
        assert_eq!(page3.records[0].outcome.latency_ms(), Some(0));
    }

    #[test]
    fn test_retention_delete_and_incidents() {
        let (_tmp, store) = test_store();
        let id = add(&store, "old");
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        store
            .apply_outcome(id, &Outcome::failure("ancient"), now - ChronoDuration::days(100))
            .unwrap();
        store
            .apply_outcome(
                id,
                &Outcome::Down { latency_ms: Some(10), http_code: Some(500), detail: "HTTP 500".into() },
                now - ChronoDuration::days(1),
            )
            .unwrap();

        let removed = store.delete_checks_before(id, now - ChronoDuration::days(90)).unwrap();
        assert_eq!(removed, 1);

        let incidents = store.recent_incidents(now - ChronoDuration::days(30), 10).unwrap();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].http_code, Some(500));
        assert_eq!(incidents[0].target_name, "old");
    }

    #[test]
    fn test_status_distribution() {
        let (_tmp, store) = test_store();
        let a = add(&store, "a");
        let b = add(&store, "b");
        add(&store, "c");

        store.apply_outcome(a, &Outcome::Up { latency_ms: 1, http_code: 200 }, Utc::now()).unwrap();
        store.apply_outcome(b, &Outcome::failure("down"), Utc::now()).unwrap();

        let dist = store.status_distribution().unwrap();
        assert_eq!((dist.up, dist.down, dist.unknown), (1, 1, 1));
    }

    #[test]
    fn test_parse_db_time_round_trip() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_db_time(&format_db_time(dt)), Some(dt));
        assert!(parse_db_time("yesterday").is_none());
    }
}
