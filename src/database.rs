use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::DatabaseError;
use crate::export::csv::{from_csv_str, to_csv_string};
use crate::models::DailyTable;

/// One cached dashboard, decoded
#[derive(Debug, Clone, PartialEq)]
pub struct CachedDashboard {
    pub client_id: String,
    pub table: DailyTable,
    /// SHA-256 of the export the table was built from
    pub source_hash: Option<String>,
    pub row_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// Cache metadata without the payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub client_id: String,
    pub source_hash: Option<String>,
    pub row_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// What [`DashboardStore::publish`] did with a table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Stored { rows: usize },
    /// The table was empty and the previous dashboard was kept
    NoData,
}

/// A dated coach note on a client's dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: i64,
    pub client_id: String,
    pub date: NaiveDate,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

/// One day of supplement intake; a client has at most one per date
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VitaminLog {
    pub client_id: String,
    pub date: NaiveDate,
    /// IU
    pub vitamin_d: u32,
    /// mg
    pub vitamin_c: u32,
    /// mcg
    pub vitamin_b12: u32,
    /// mg
    pub omega3: u32,
    /// mg
    pub magnesium: u32,
    /// mg
    pub zinc: u32,
    /// mg
    pub iron: u32,
    pub other: String,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub entry_count: usize,
    pub total_rows: usize,
    pub last_update: Option<DateTime<Utc>>,
}

/// Per-client dashboard cache backed by SQLite
///
/// Each client has at most one entry holding the latest table as CSV text.
pub struct DashboardStore {
    conn: Connection,
}

impl DashboardStore {
    /// Create or open a store at the specified path
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, DatabaseError> {
        let conn = Connection::open(db_path)?;
        let store = Self { conn };
        store.init_schema(true)?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema(false)?;
        Ok(store)
    }

    fn init_schema(&self, on_disk: bool) -> Result<(), DatabaseError> {
        if on_disk {
            let mode: String =
                self.conn
                    .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            debug!(journal_mode = %mode, "opened dashboard store");
            self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        }

        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS dashboard_cache (
                client_id TEXT PRIMARY KEY,
                csv_data TEXT NOT NULL,
                source_hash TEXT,
                row_count INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS annotations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_id TEXT NOT NULL,
                date TEXT NOT NULL,
                note TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS vitamin_logs (
                client_id TEXT NOT NULL,
                date TEXT NOT NULL,
                vitamin_d INTEGER NOT NULL DEFAULT 0,
                vitamin_c INTEGER NOT NULL DEFAULT 0,
                vitamin_b12 INTEGER NOT NULL DEFAULT 0,
                omega3 INTEGER NOT NULL DEFAULT 0,
                magnesium INTEGER NOT NULL DEFAULT 0,
                zinc INTEGER NOT NULL DEFAULT 0,
                iron INTEGER NOT NULL DEFAULT 0,
                other TEXT NOT NULL DEFAULT '',
                notes TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (client_id, date)
            )
            "#,
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_annotations_client_date
             ON annotations(client_id, date)",
            [],
        )?;

        Ok(())
    }

    /// Insert or replace the cached table for a client
    pub fn upsert(
        &self,
        client_id: &str,
        table: &DailyTable,
        source_hash: Option<&str>,
    ) -> Result<(), DatabaseError> {
        self.upsert_at(client_id, table, source_hash, Utc::now())
    }

    pub fn upsert_at(
        &self,
        client_id: &str,
        table: &DailyTable,
        source_hash: Option<&str>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let csv_data = to_csv_string(table).map_err(|e| DatabaseError::CorruptEntry {
            client_id: client_id.to_string(),
            reason: e.to_string(),
        })?;

        self.conn.execute(
            r#"
            INSERT INTO dashboard_cache (client_id, csv_data, source_hash, row_count, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(client_id) DO UPDATE SET
                csv_data = excluded.csv_data,
                source_hash = excluded.source_hash,
                row_count = excluded.row_count,
                updated_at = excluded.updated_at
            "#,
            params![client_id, csv_data, source_hash, table.len() as i64, updated_at],
        )?;

        debug!(client_id, rows = table.len(), "dashboard cached");
        Ok(())
    }

    /// Replace the client's dashboard unless `table` is empty
    ///
    /// An empty table never overwrites a previous dashboard.
    pub fn publish(
        &self,
        client_id: &str,
        table: &DailyTable,
        source_hash: Option<&str>,
    ) -> Result<PublishOutcome, DatabaseError> {
        if table.is_empty() {
            warn!(client_id, "empty table, keeping the cached dashboard");
            return Ok(PublishOutcome::NoData);
        }

        self.upsert(client_id, table, source_hash)?;
        Ok(PublishOutcome::Stored { rows: table.len() })
    }

    /// Whether the cached dashboard was built from `source_hash`
    pub fn is_current(&self, client_id: &str, source_hash: &str) -> Result<bool, DatabaseError> {
        Ok(self
            .entry(client_id)?
            .and_then(|entry| entry.source_hash)
            .is_some_and(|hash| hash == source_hash))
    }

    /// Load and decode a client's cached table
    pub fn load(&self, client_id: &str) -> Result<Option<CachedDashboard>, DatabaseError> {
        let found = self
            .conn
            .query_row(
                r#"
                SELECT client_id, source_hash, row_count, updated_at, csv_data
                FROM dashboard_cache
                WHERE client_id = ?1
                "#,
                params![client_id],
                |row| Ok((Self::entry_from_row(row)?, row.get::<_, String>(4)?)),
            )
            .optional()?;

        let Some((entry, csv_data)) = found else {
            return Ok(None);
        };

        let table = from_csv_str(&csv_data).map_err(|e| DatabaseError::CorruptEntry {
            client_id: client_id.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Some(CachedDashboard {
            client_id: entry.client_id,
            table,
            source_hash: entry.source_hash,
            row_count: entry.row_count,
            updated_at: entry.updated_at,
        }))
    }

    /// Cache metadata for one client
    pub fn entry(&self, client_id: &str) -> Result<Option<CacheEntry>, DatabaseError> {
        let entry = self
            .conn
            .query_row(
                r#"
                SELECT client_id, source_hash, row_count, updated_at
                FROM dashboard_cache
                WHERE client_id = ?1
                "#,
                params![client_id],
                Self::entry_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    /// When the client's table was last written
    pub fn last_sync(&self, client_id: &str) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        Ok(self.entry(client_id)?.map(|entry| entry.updated_at))
    }

    /// All cache entries, most recently updated first
    pub fn list(&self) -> Result<Vec<CacheEntry>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT client_id, source_hash, row_count, updated_at
            FROM dashboard_cache
            ORDER BY updated_at DESC, client_id
            "#,
        )?;

        let entries = stmt
            .query_map([], Self::entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Remove a client's entry; returns whether one existed
    pub fn delete(&self, client_id: &str) -> Result<bool, DatabaseError> {
        let removed = self.conn.execute(
            "DELETE FROM dashboard_cache WHERE client_id = ?1",
            params![client_id],
        )?;
        Ok(removed > 0)
    }

    /// Remove everything stored for a client; returns the number of rows deleted
    pub fn purge_client(&self, client_id: &str) -> Result<usize, DatabaseError> {
        let mut removed = 0;
        for table in ["dashboard_cache", "annotations", "vitamin_logs"] {
            removed += self.conn.execute(
                &format!("DELETE FROM {} WHERE client_id = ?1", table),
                params![client_id],
            )?;
        }
        Ok(removed)
    }

    pub fn add_annotation(
        &self,
        client_id: &str,
        date: NaiveDate,
        note: &str,
    ) -> Result<Annotation, DatabaseError> {
        self.add_annotation_at(client_id, date, note, Utc::now())
    }

    pub fn add_annotation_at(
        &self,
        client_id: &str,
        date: NaiveDate,
        note: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Annotation, DatabaseError> {
        self.conn.execute(
            "INSERT INTO annotations (client_id, date, note, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![client_id, date, note, created_at],
        )?;

        Ok(Annotation {
            id: self.conn.last_insert_rowid(),
            client_id: client_id.to_string(),
            date,
            note: note.to_string(),
            created_at,
        })
    }

    /// A client's annotations, newest date first
    pub fn annotations(&self, client_id: &str) -> Result<Vec<Annotation>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, client_id, date, note, created_at
            FROM annotations
            WHERE client_id = ?1
            ORDER BY date DESC, id DESC
            "#,
        )?;

        let annotations = stmt
            .query_map(params![client_id], |row| {
                Ok(Annotation {
                    id: row.get(0)?,
                    client_id: row.get(1)?,
                    date: row.get(2)?,
                    note: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(annotations)
    }

    /// Insert or replace the entry for the log's client and date
    pub fn upsert_vitamin_log(&self, log: &VitaminLog) -> Result<(), DatabaseError> {
        self.conn.execute(
            r#"
            INSERT INTO vitamin_logs (
                client_id, date, vitamin_d, vitamin_c, vitamin_b12, omega3,
                magnesium, zinc, iron, other, notes
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(client_id, date) DO UPDATE SET
                vitamin_d = excluded.vitamin_d,
                vitamin_c = excluded.vitamin_c,
                vitamin_b12 = excluded.vitamin_b12,
                omega3 = excluded.omega3,
                magnesium = excluded.magnesium,
                zinc = excluded.zinc,
                iron = excluded.iron,
                other = excluded.other,
                notes = excluded.notes
            "#,
            params![
                log.client_id,
                log.date,
                log.vitamin_d,
                log.vitamin_c,
                log.vitamin_b12,
                log.omega3,
                log.magnesium,
                log.zinc,
                log.iron,
                log.other,
                log.notes,
            ],
        )?;

        debug!(client_id = %log.client_id, date = %log.date, "vitamin log saved");
        Ok(())
    }

    /// A client's vitamin logs, newest date first
    pub fn vitamin_logs(&self, client_id: &str) -> Result<Vec<VitaminLog>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT client_id, date, vitamin_d, vitamin_c, vitamin_b12, omega3,
                   magnesium, zinc, iron, other, notes
            FROM vitamin_logs
            WHERE client_id = ?1
            ORDER BY date DESC
            "#,
        )?;

        let logs = stmt
            .query_map(params![client_id], |row| {
                Ok(VitaminLog {
                    client_id: row.get(0)?,
                    date: row.get(1)?,
                    vitamin_d: row.get(2)?,
                    vitamin_c: row.get(3)?,
                    vitamin_b12: row.get(4)?,
                    omega3: row.get(5)?,
                    magnesium: row.get(6)?,
                    zinc: row.get(7)?,
                    iron: row.get(8)?,
                    other: row.get(9)?,
                    notes: row.get(10)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(logs)
    }

    pub fn get_stats(&self) -> Result<StoreStats, DatabaseError> {
        let (entry_count, total_rows, last_update): (i64, i64, Option<DateTime<Utc>>) =
            self.conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(row_count), 0), MAX(updated_at)
                 FROM dashboard_cache",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

        Ok(StoreStats {
            entry_count: entry_count as usize,
            total_rows: total_rows as usize,
            last_update,
        })
    }

    fn entry_from_row(row: &Row) -> rusqlite::Result<CacheEntry> {
        Ok(CacheEntry {
            client_id: row.get(0)?,
            source_hash: row.get(1)?,
            row_count: row.get::<_, i64>(2)? as usize,
            updated_at: row.get(3)?,
        })
    }
}
