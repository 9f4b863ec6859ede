use crate::{Db, RunSummary};
use anyhow::Result;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

impl Db {
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let cnt: i64 = self.conn.query_row(
            "SELECT COUNT(1) FROM sqlite_master WHERE type='table' AND name=?",
            [name],
            |r| r.get(0),
        )?;
        Ok(cnt > 0)
    }

    pub fn run_summary(&self, run_id: &Uuid) -> Result<Option<RunSummary>> {
        let row = self
            .conn
            .query_row(
                "SELECT run_id, started_at, finished_at, total, success, failed, skipped, error_count FROM runs WHERE run_id=?",
                params![run_id.to_string()],
                |r| {
                    Ok(RunSummary {
                        run_id: r.get(0)?,
                        started_at: r.get(1)?,
                        finished_at: r.get(2)?,
                        total: r.get(3)?,
                        success: r.get(4)?,
                        failed: r.get(5)?,
                        skipped: r.get(6)?,
                        error_count: r.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Failing URLs of a run that share an error code.
    pub fn errors_by_code(&self, run_id: &Uuid, code: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT url FROM errors WHERE run_id=? AND code=? ORDER BY error_id")?;
        let urls = stmt
            .query_map(params![run_id.to_string(), code], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(urls)
    }

    pub fn document_count(&self, index: &str) -> Result<i64> {
        let cnt: i64 = self.conn.query_row("SELECT COUNT(1) FROM documents WHERE index_name=?", [index], |r| r.get(0))?;
        Ok(cnt)
    }
}
