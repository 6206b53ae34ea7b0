//! Fault record store
//!
//! Append-only SQLite log of defect events. Rows are only ever removed by a
//! composite-key delete or a full clear. Export writes CSV with a fixed header.

use std::path::{Path, PathBuf};

use rusqlite::{params, params_from_iter, Connection, Row};
use tracing::{debug, info};

use crate::constants::storage;
use crate::data::{FaultQuery, FaultRecord, FaultStatistics, FaultType};
use fl_error::{FlexlineError, Result};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS faults (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT,
    fault_type TEXT,
    image_index INTEGER,
    details TEXT,
    measurement REAL
)";

pub struct FaultStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl FaultStore {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(FlexlineError::persistence)?;
        let store = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        store.init_schema()?;
        info!(path = %path.display(), "Fault database initialized");
        Ok(store)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(FlexlineError::persistence)?;
        let store = Self { conn, path: None };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute(SCHEMA, []).map_err(FlexlineError::persistence)?;
        Ok(())
    }

    /// Insert a record, returning its new id
    pub fn insert(&self, record: &FaultRecord) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO faults (timestamp, fault_type, image_index, details, measurement)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.timestamp,
                    record.fault_type.as_str(),
                    record.image_index,
                    record.details,
                    record.measurement_mm,
                ],
            )
            .map_err(FlexlineError::persistence)?;

        let id = self.conn.last_insert_rowid();
        info!("Fault logged: {} - {}", record.fault_type, record.details);
        Ok(id)
    }

    /// Stamp a new record with the current time and insert it
    pub fn log_fault(
        &self,
        fault_type: FaultType,
        image_index: u32,
        details: impl Into<String>,
        measurement_mm: Option<f64>,
    ) -> Result<FaultRecord> {
        let mut record = FaultRecord::now(fault_type, image_index, details, measurement_mm);
        record.id = Some(self.insert(&record)?);
        Ok(record)
    }

    /// Records matching `query`, newest first
    pub fn query(&self, query: &FaultQuery) -> Result<Vec<FaultRecord>> {
        let mut sql = String::from(
            "SELECT id, timestamp, fault_type, image_index, details, measurement FROM faults WHERE 1=1",
        );
        let mut args: Vec<String> = Vec::new();

        if let Some(start) = query.start_date {
            sql.push_str(" AND timestamp >= ?");
            args.push(format!("{} 00:00:00", start.format(storage::DATE_FORMAT)));
        }
        if let Some(end) = query.end_date {
            sql.push_str(" AND timestamp <= ?");
            args.push(format!("{} 23:59:59", end.format(storage::DATE_FORMAT)));
        }
        if let Some(fault_type) = query.fault_type {
            sql.push_str(" AND fault_type = ?");
            args.push(fault_type.as_str().to_string());
        }
        // Same-second inserts keep insertion order reversed
        sql.push_str(" ORDER BY timestamp DESC, id DESC");

        let mut stmt = self.conn.prepare(&sql).map_err(FlexlineError::persistence)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), row_to_raw)
            .map_err(FlexlineError::persistence)?;

        let mut records = Vec::new();
        for row in rows {
            let raw = row.map_err(FlexlineError::persistence)?;
            records.push(raw.into_record()?);
        }

        debug!("Retrieved {} faults from database", records.len());
        Ok(records)
    }

    /// Every record, newest first
    pub fn all(&self) -> Result<Vec<FaultRecord>> {
        self.query(&FaultQuery::default())
    }

    pub fn statistics(records: &[FaultRecord]) -> FaultStatistics {
        FaultStatistics::from_records(records)
    }

    /// Delete by (timestamp, type, image index)
    ///
    /// The key is not unique: every row sharing it is removed. Returns the row count.
    pub fn delete(&self, timestamp: &str, fault_type: FaultType, image_index: u32) -> Result<usize> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM faults WHERE timestamp = ?1 AND fault_type = ?2 AND image_index = ?3",
                params![timestamp, fault_type.as_str(), image_index],
            )
            .map_err(FlexlineError::persistence)?;
        info!("Deleted fault: {} at {} ({} row(s))", fault_type, timestamp, removed);
        Ok(removed)
    }

    pub fn clear_all(&self) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM faults", [])
            .map_err(FlexlineError::persistence)?;
        info!("All faults cleared from database");
        Ok(removed)
    }

    /// Write `records` as CSV; an absent measurement becomes an empty field
    pub fn export_csv(path: &Path, records: &[FaultRecord]) -> Result<()> {
        let mut writer = csv::Writer::from_path(path).map_err(|e| FlexlineError::export(path, e))?;
        writer
            .write_record(storage::CSV_HEADER)
            .map_err(|e| FlexlineError::export(path, e))?;

        for record in records {
            let image = record.image_index.to_string();
            let measurement = record.measurement_mm.map(|m| m.to_string()).unwrap_or_default();
            writer
                .write_record([
                    record.timestamp.as_str(),
                    record.fault_type.as_str(),
                    image.as_str(),
                    record.details.as_str(),
                    measurement.as_str(),
                ])
                .map_err(|e| FlexlineError::export(path, e))?;
        }

        writer.flush().map_err(|e| FlexlineError::export(path, e))?;
        info!(path = %path.display(), "Faults exported to CSV");
        Ok(())
    }
}

struct RawRow {
    id: i64,
    timestamp: String,
    fault_type: String,
    image_index: u32,
    details: String,
    measurement: Option<f64>,
}

fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        timestamp: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        fault_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        image_index: row.get::<_, Option<u32>>(3)?.unwrap_or_default(),
        details: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        measurement: row.get(5)?,
    })
}

impl RawRow {
    fn into_record(self) -> Result<FaultRecord> {
        let fault_type = self
            .fault_type
            .parse()
            .map_err(|_| FlexlineError::persistence(format!("row {} has unknown fault type '{}'", self.id, self.fault_type)))?;
        Ok(FaultRecord {
            id: Some(self.id),
            timestamp: self.timestamp,
            fault_type,
            image_index: self.image_index,
            details: self.details,
            measurement_mm: self.measurement,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn record(ts: &str, fault_type: FaultType, image: u32, measurement: Option<f64>) -> FaultRecord {
        FaultRecord {
            id: None,
            timestamp: ts.to_string(),
            fault_type,
            image_index: image,
            details: format!("{} at {}", fault_type, ts),
            measurement_mm: measurement,
        }
    }

    fn seeded() -> FaultStore {
        let store = FaultStore::open_in_memory().unwrap();
        store.insert(&record("2024-05-01 08:00:00", FaultType::Nail, 1, None)).unwrap();
        store.insert(&record("2024-05-02 12:30:00", FaultType::BoardAlignment, 2, Some(27.5))).unwrap();
        store.insert(&record("2024-05-03 23:59:59", FaultType::Nail, 2, None)).unwrap();
        store
    }

    #[test]
    fn test_query_all_newest_first() {
        let records = seeded().all().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].timestamp, "2024-05-03 23:59:59");
        assert_eq!(records[2].timestamp, "2024-05-01 08:00:00");
        assert!(records.iter().all(|r| r.id.is_some()));
    }

    #[test]
    fn test_query_date_range_is_inclusive() {
        let store = seeded();
        let q = FaultQuery {
            start_date: NaiveDate::from_ymd_opt(2024, 5, 2),
            end_date: NaiveDate::from_ymd_opt(2024, 5, 3),
            fault_type: None,
        };
        let records = store.query(&q).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_query_by_type() {
        let store = seeded();
        let q = FaultQuery {
            fault_type: Some(FaultType::BoardAlignment),
            ..FaultQuery::default()
        };
        let records = store.query(&q).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].measurement_mm, Some(27.5));
    }

    #[test]
    fn test_statistics() {
        let store = seeded();
        let stats = FaultStore::statistics(&store.all().unwrap());
        assert_eq!(stats.total, 3);
        assert_eq!(stats.nail(), 2);
        assert_eq!(stats.board(), 1);
    }

    #[test]
    fn test_delete_removes_every_duplicate() {
        let store = seeded();
        store.insert(&record("2024-05-01 08:00:00", FaultType::Nail, 1, None)).unwrap();

        let removed = store.delete("2024-05-01 08:00:00", FaultType::Nail, 1).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.all().unwrap().len(), 2);
    }

    #[test]
    fn test_clear_all() {
        let store = seeded();
        assert_eq!(store.clear_all().unwrap(), 3);
        assert!(store.all().unwrap().is_empty());
    }

    #[test]
    fn test_schema_creation_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("faults.db");
        {
            let store = FaultStore::open(&path).unwrap();
            store.log_fault(FaultType::Nail, 1, "Detected 1 nails", None).unwrap();
        }
        let store = FaultStore::open(&path).unwrap();
        assert_eq!(store.all().unwrap().len(), 1);
    }

    #[test]
    fn test_export_csv_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("faults.csv");
        let store = seeded();
        FaultStore::export_csv(&path, &store.all().unwrap()).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), storage::CSV_HEADER.to_vec());

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.len() == 5));
        assert_eq!(&rows[0][4], "");
        assert_eq!(&rows[1][4], "27.5");
        assert_eq!(&rows[1][1], "Board Alignment");
    }

    #[test]
    fn test_export_to_missing_dir_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("no").join("such").join("faults.csv");
        let err = FaultStore::export_csv(&path, &[]).unwrap_err();
        assert!(matches!(err, FlexlineError::Export { .. }));
    }
}
