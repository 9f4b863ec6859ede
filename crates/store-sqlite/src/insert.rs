use crate::{now_ms, Db, RunMeta};
use anyhow::Result;
use rusqlite::params;
use scan_core::Tally;
use uuid::Uuid;

impl Db {
    pub fn begin_run(&self, meta: RunMeta) -> Result<Uuid> {
        self.conn.execute(
            "INSERT INTO runs(run_id, started_at, tool_version, args_json) VALUES (?,?,?,?)",
            params![meta.run_id.to_string(), meta.started_at, meta.tool_version, meta.args_json],
        )?;
        Ok(meta.run_id)
    }

    /// Close a run with its final counters and one error row per failing URL.
    pub fn finish_run(&mut self, run_id: &Uuid, finished_at: i64, tally: &Tally) -> Result<()> {
        let tx = self.conn.transaction()?;
        let at = now_ms();
        let mut error_count = 0i64;
        for (code, urls) in &tally.errors {
            for url in urls {
                tx.execute(
                    "INSERT INTO errors(run_id,code,url,at_ms) VALUES (?,?,?,?)",
                    params![run_id.to_string(), code, url, at],
                )?;
                error_count += 1;
            }
        }
        tx.execute(
            "UPDATE runs SET finished_at=?, total=?, success=?, failed=?, skipped=?, undelivered=?, merge_failures=?, error_count=? WHERE run_id=?",
            params![
                finished_at,
                tally.total as i64,
                tally.success as i64,
                tally.failed as i64,
                tally.skipped as i64,
                tally.undelivered as i64,
                tally.merge_failures as i64,
                error_count,
                run_id.to_string()
            ],
        )?;
        tx.commit()?;
        Ok(())
    }
}
