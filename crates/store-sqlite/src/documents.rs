use crate::{now_ms, Db};
use rusqlite::{params, OptionalExtension};
use scan_core::{ReportStore, StoreError, Versioned, WriteCondition};
use serde_json::Value;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// `ReportStore` over the `documents` table. Every document carries a version
/// that starts at 1 and grows by one on each write.
pub struct SqliteStore {
    db: Mutex<Db>,
}

impl SqliteStore {
    pub fn new(db: Db) -> Self {
        SqliteStore { db: Mutex::new(db) }
    }

    pub fn open(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        Ok(Self::new(Db::open_or_create(path)?))
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Ok(Self::new(Db::open_in_memory()?))
    }

    /// Direct access for run bookkeeping and queries.
    pub fn db(&self) -> MutexGuard<'_, Db> {
        self.db.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl ReportStore for SqliteStore {
    fn exists(&self, index: &str, id: &str) -> Result<bool, StoreError> {
        let db = self.db();
        let cnt: i64 = db
            .conn
            .query_row("SELECT COUNT(1) FROM documents WHERE index_name=? AND doc_id=?", params![index, id], |r| r.get(0))
            .map_err(backend)?;
        Ok(cnt > 0)
    }

    fn get(&self, index: &str, id: &str) -> Result<Option<Versioned>, StoreError> {
        let db = self.db();
        let row: Option<(i64, String)> = db
            .conn
            .query_row(
                "SELECT version, body FROM documents WHERE index_name=? AND doc_id=?",
                params![index, id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
            .map_err(backend)?;
        match row {
            Some((version, body)) => Ok(Some(Versioned { version: version as u64, document: serde_json::from_str(&body)? })),
            None => Ok(None),
        }
    }

    fn put(&self, index: &str, id: &str, document: &Value, condition: WriteCondition) -> Result<u64, StoreError> {
        let body = serde_json::to_string(document)?;
        let at = now_ms();
        let db = self.db();
        let changed = match condition {
            WriteCondition::Any => db.conn.execute(
                "INSERT INTO documents(index_name,doc_id,version,body,updated_ms) VALUES (?,?,1,?,?)
                 ON CONFLICT(index_name,doc_id) DO UPDATE SET version=documents.version+1, body=excluded.body, updated_ms=excluded.updated_ms",
                params![index, id, body, at],
            ),
            WriteCondition::Absent => db.conn.execute(
                "INSERT OR IGNORE INTO documents(index_name,doc_id,version,body,updated_ms) VALUES (?,?,1,?,?)",
                params![index, id, body, at],
            ),
            WriteCondition::Version(v) => db.conn.execute(
                "UPDATE documents SET version=version+1, body=?, updated_ms=? WHERE index_name=? AND doc_id=? AND version=?",
                params![body, at, index, id, v as i64],
            ),
        }
        .map_err(backend)?;
        if changed == 0 {
            debug!(index, id, ?condition, "conditional write rejected");
            return Err(StoreError::Conflict { index: index.to_string(), id: id.to_string() });
        }
        let version: i64 = db
            .conn
            .query_row("SELECT version FROM documents WHERE index_name=? AND doc_id=?", params![index, id], |r| r.get(0))
            .map_err(backend)?;
        Ok(version as u64)
    }

    fn bulk_put(&self, index: &str, documents: &[(String, Value)]) -> Vec<Result<u64, StoreError>> {
        documents
            .iter()
            .map(|(id, doc)| self.put(index, id, doc, WriteCondition::Any))
            .collect()
    }

    fn list(&self, index: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let db = self.db();
        let mut stmt = db.conn.prepare("SELECT doc_id, body FROM documents WHERE index_name=? ORDER BY doc_id").map_err(backend)?;
        let rows = stmt
            .query_map(params![index], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
            .map_err(backend)?;
        let mut out = Vec::new();
        for row in rows {
            let (id, body) = row.map_err(backend)?;
            out.push((id, serde_json::from_str(&body)?));
        }
        Ok(out)
    }
}
