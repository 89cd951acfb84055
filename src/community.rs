use crate::aircraft::normalize_hex;
use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS aircraft (
    icao24 TEXT PRIMARY KEY,
    registration TEXT,
    manufacturerName TEXT,
    model TEXT,
    typecode TEXT,
    operator TEXT,
    operatorCallsign TEXT,
    owner TEXT,
    country TEXT
);
"#;

const INSERT: &str = "INSERT OR REPLACE INTO aircraft \
    (icao24, registration, manufacturerName, model, typecode, operator, operatorCallsign, owner, country) \
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

const CSV_COLUMNS: [&str; 9] = [
    "icao24",
    "registration",
    "manufacturerName",
    "model",
    "typecode",
    "operator",
    "operatorCallsign",
    "owner",
    "country",
];

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CommunityRecord {
    pub icao24: String,
    pub registration: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub typecode: Option<String>,
    pub operator: Option<String>,
    pub operator_callsign: Option<String>,
    pub owner: Option<String>,
    pub country: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CommunityStats {
    pub total_aircraft: u64,
    pub with_manufacturer: u64,
    pub with_model: u64,
    pub path: Option<PathBuf>,
}

pub struct CommunityDatabase {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl CommunityDatabase {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(anyhow!("aircraft database not found: {}", path.display()));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Failed to open aircraft database: {}", path.display()))?;
        let db = CommunityDatabase {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        let stats = db
            .stats()
            .with_context(|| format!("Unreadable aircraft database: {}", path.display()))?;
        info!(
            "community database ready aircraft={} path={}",
            stats.total_aircraft,
            path.display()
        );
        Ok(db)
    }

    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to create aircraft database: {}", path.display()))?;
        conn.execute_batch(SCHEMA)?;
        Ok(CommunityDatabase {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(CommunityDatabase {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, record: &CommunityRecord) -> Result<()> {
        let conn = self.conn();
        insert_record(&conn, record)?;
        Ok(())
    }

    pub fn lookup(&self, hex_code: &str) -> Result<Option<CommunityRecord>> {
        let key = normalize_hex(hex_code);
        let conn = self.conn();
        let record = conn
            .query_row(
                "SELECT icao24, registration, manufacturerName, model, typecode, \
                 operator, operatorCallsign, owner, country FROM aircraft WHERE icao24 = ?1",
                params![key],
                |row| {
                    Ok(CommunityRecord {
                        icao24: row.get(0)?,
                        registration: blank_to_none(row.get(1)?),
                        manufacturer: blank_to_none(row.get(2)?),
                        model: blank_to_none(row.get(3)?),
                        typecode: blank_to_none(row.get(4)?),
                        operator: blank_to_none(row.get(5)?),
                        operator_callsign: blank_to_none(row.get(6)?),
                        owner: blank_to_none(row.get(7)?),
                        country: blank_to_none(row.get(8)?),
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    pub fn stats(&self) -> Result<CommunityStats> {
        let conn = self.conn();
        let count = |sql: &str| -> rusqlite::Result<u64> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n.max(0) as u64)
        };
        Ok(CommunityStats {
            total_aircraft: count("SELECT COUNT(*) FROM aircraft")?,
            with_manufacturer: count(
                "SELECT COUNT(*) FROM aircraft WHERE manufacturerName IS NOT NULL AND manufacturerName != ''",
            )?,
            with_model: count("SELECT COUNT(*) FROM aircraft WHERE model IS NOT NULL AND model != ''")?,
            path: self.path.clone(),
        })
    }

    pub fn import_csv(&self, csv_path: &Path) -> Result<usize> {
        let file = File::open(csv_path)
            .with_context(|| format!("Failed to read {}", csv_path.display()))?;
        self.import_reader(file)
    }

    pub fn import_csv_text(&self, text: &str) -> Result<usize> {
        self.import_reader(text.as_bytes())
    }

    pub fn import_reader<R: Read>(&self, reader: R) -> Result<usize> {
        let mut rdr = csv::ReaderBuilder::new()
            .quote(b'\'')
            .flexible(true)
            .from_reader(reader);
        let header = rdr.byte_headers().context("Failed to read CSV header")?;
        let positions: Vec<Option<usize>> = CSV_COLUMNS
            .iter()
            .map(|name| {
                header
                    .iter()
                    .map(|h| String::from_utf8_lossy(h))
                    .position(|h| h.trim_start_matches('\u{feff}').trim() == *name)
            })
            .collect();
        if positions[0].is_none() {
            return Err(anyhow!("CSV header has no icao24 column"));
        }

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut written = 0usize;
        let mut skipped = 0usize;
        {
            let mut stmt = tx.prepare(INSERT)?;
            for record in rdr.byte_records() {
                let fields = match record {
                    Ok(fields) => fields,
                    Err(err) => {
                        debug!("unreadable community row: {err}");
                        skipped += 1;
                        continue;
                    }
                };
                let column = |idx: usize| -> String {
                    positions[idx]
                        .and_then(|pos| fields.get(pos))
                        .map(|v| String::from_utf8_lossy(v).trim().to_string())
                        .unwrap_or_default()
                };
                let icao24 = column(0).to_ascii_lowercase();
                if icao24.is_empty() {
                    skipped += 1;
                    continue;
                }
                stmt.execute(params![
                    icao24,
                    column(1),
                    column(2),
                    column(3),
                    column(4),
                    column(5),
                    column(6),
                    column(7),
                    column(8),
                ])?;
                written += 1;
            }
        }
        tx.commit()?;
        if skipped > 0 {
            warn!("community import skipped {skipped} rows");
        }
        info!("community import wrote {written} rows");
        Ok(written)
    }
}

fn insert_record(conn: &Connection, record: &CommunityRecord) -> rusqlite::Result<usize> {
    conn.execute(
        INSERT,
        params![
            normalize_hex(&record.icao24),
            record.registration,
            record.manufacturer,
            record.model,
            record.typecode,
            record.operator,
            record.operator_callsign,
            record.owner,
            record.country,
        ],
    )
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
