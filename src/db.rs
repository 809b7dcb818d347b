use crate::entities::{Institution, SupportRecord};
use crate::store::SupportStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Event for audit trail ("Every upload is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Institutions Table (name is the natural key, uuid the identity)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS institutions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            institution_uuid TEXT UNIQUE NOT NULL,
            name TEXT UNIQUE NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Support Records Table (amount kept as decimal text, never REAL)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS support_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            idempotency_hash TEXT UNIQUE NOT NULL,
            institution_uuid TEXT NOT NULL REFERENCES institutions(institution_uuid),
            year TEXT NOT NULL,
            month TEXT NOT NULL,
            amount TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_support_institution_month
            ON support_records(institution_uuid, month)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    let timestamp_text: String = row.get(1)?;
    let data_text: String = row.get(5)?;

    Ok(Event {
        event_id: row.get(0)?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp_text)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?
            .with_timezone(&Utc),
        event_type: row.get(2)?,
        entity_type: row.get(3)?,
        entity_id: row.get(4)?,
        data: serde_json::from_str(&data_text)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
        actor: row.get(6)?,
    })
}

/// Audit events of one type, oldest first
pub fn events_of_type(conn: &Connection, event_type: &str) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE event_type = ?1
         ORDER BY id",
    )?;

    let events = stmt
        .query_map([event_type], event_from_row)?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to read {} events", event_type))?;

    Ok(events)
}

/// Number of stored support records
pub fn count_support_records(conn: &Connection) -> Result<usize> {
    let count: i64 =
        conn.query_row("SELECT COUNT(*) FROM support_records", [], |row| row.get(0))?;

    Ok(usize::try_from(count)?)
}

// ============================================================================
// SQLITE STORE
// ============================================================================

/// SQLite-backed storage collaborator
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn).context("Failed to initialize schema")?;
        Ok(SqliteStore { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn record_count(&self) -> Result<usize> {
        count_support_records(&self.conn)
    }

    /// Audit events of one type, oldest first
    pub fn events(&self, event_type: &str) -> Result<Vec<Event>> {
        events_of_type(&self.conn, event_type)
    }

    fn query_records(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<SupportRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let records = stmt
            .query_map(params, record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<SupportRecord> {
    let amount_text: String = row.get(4)?;
    let amount = Decimal::from_str(&amount_text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

    Ok(SupportRecord {
        institution: Institution::with_id(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
        year: row.get(2)?,
        month: row.get(3)?,
        amount,
    })
}

fn institution_from_row(row: &Row<'_>) -> rusqlite::Result<Institution> {
    Ok(Institution::with_id(
        row.get::<_, String>(0)?,
        row.get::<_, String>(1)?,
    ))
}

const RECORD_COLUMNS: &str = "SELECT i.institution_uuid, i.name, s.year, s.month, s.amount
     FROM support_records s
     JOIN institutions i ON i.institution_uuid = s.institution_uuid";

impl SupportStore for SqliteStore {
    fn list_institutions(&self) -> Result<Vec<Institution>> {
        let mut stmt = self
            .conn
            .prepare("SELECT institution_uuid, name FROM institutions ORDER BY id")?;
        let institutions = stmt
            .query_map([], institution_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(institutions)
    }

    fn find_institutions_by_name(&self, name: &str) -> Result<Vec<Institution>> {
        let mut stmt = self.conn.prepare(
            "SELECT institution_uuid, name FROM institutions WHERE name = ?1 ORDER BY id",
        )?;
        let institutions = stmt
            .query_map([name], institution_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(institutions)
    }

    fn save_institution(&self, institution: &Institution) -> Result<Institution> {
        // UNIQUE(name) makes this get-or-create atomic across writers
        self.conn.execute(
            "INSERT OR IGNORE INTO institutions (institution_uuid, name) VALUES (?1, ?2)",
            params![institution.id, institution.name],
        )?;

        let stored = self
            .conn
            .query_row(
                "SELECT institution_uuid, name FROM institutions WHERE name = ?1",
                [&institution.name],
                institution_from_row,
            )
            .with_context(|| format!("Institution vanished after insert: {}", institution.name))?;

        Ok(stored)
    }

    fn find_support_records_by_institution(
        &self,
        institution: &Institution,
    ) -> Result<Vec<SupportRecord>> {
        let sql = format!("{} WHERE s.institution_uuid = ?1 ORDER BY s.id", RECORD_COLUMNS);
        self.query_records(&sql, params![institution.id])
    }

    fn find_support_records_by_institution_and_month(
        &self,
        institution: &Institution,
        month: &str,
    ) -> Result<Vec<SupportRecord>> {
        let sql = format!(
            "{} WHERE s.institution_uuid = ?1 AND s.month = ?2 ORDER BY s.id",
            RECORD_COLUMNS
        );
        self.query_records(&sql, params![institution.id, month])
    }

    fn save_support_record(&self, record: &SupportRecord) -> Result<bool> {
        // OR IGNORE covers the idempotency hash only; foreign keys still fail
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO support_records (
                    idempotency_hash, institution_uuid, year, month, amount
                ) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.compute_idempotency_hash(),
                    record.institution.id,
                    record.year,
                    record.month,
                    record.amount.to_string(),
                ],
            )
            .with_context(|| {
                format!(
                    "Failed to store record for {} {}-{}",
                    record.institution.name, record.year, record.month
                )
            })?;

        if inserted == 0 {
            debug!(
                institution = %record.institution.name,
                year = %record.year,
                month = %record.month,
                "skipped duplicate record"
            );
        }

        Ok(inserted > 0)
    }

    fn record_event(&self, event: &Event) -> Result<()> {
        insert_event(&self.conn, event)
    }

    fn in_batch<T, F>(&self, work: F) -> Result<T>
    where
        Self: Sized,
        F: FnOnce(&Self) -> Result<T>,
    {
        // IMMEDIATE takes the write lock up front so concurrent uploads serialize
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .context("Failed to begin ingestion transaction")?;

        let value = work(self)?;

        tx.commit().context("Failed to commit ingestion transaction")?;
        info!("ingestion batch committed");
        Ok(value)
    }
}
