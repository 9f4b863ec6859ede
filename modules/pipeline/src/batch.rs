use crate::{normalize_submission_url, ReportSink, Scanner};
use scan_core::{BrowserLauncher, Stamp, Tally, UrlOutcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Error code recorded for every URL of a chunk whose browser never started.
pub const LAUNCH_FAILED: &str = "BROWSER_LAUNCH_FAILED";

/// Summary of one batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineLog {
    pub engine_id: String,
    pub start_utc: String,
    pub date: String,
    pub completion_utc: String,
    /// Wall time, e.g. `12.345s`.
    pub time: String,
    #[serde(flatten)]
    pub tally: Tally,
}

#[derive(Debug, Clone)]
pub struct BatchJob {
    pub urls: Vec<String>,
    pub threads: usize,
    pub skip_if_exists: bool,
}

/// Split into `chunks` contiguous runs; the last one also takes the remainder.
/// Fewer items than chunks gives one item per chunk.
pub fn chunk_list<T: Clone>(items: &[T], chunks: usize) -> Vec<Vec<T>> {
    let chunks = chunks.max(1);
    if items.len() <= chunks {
        return items.iter().map(|i| vec![i.clone()]).collect();
    }
    let size = items.len() / chunks;
    let mut out: Vec<Vec<T>> = items[..size * (chunks - 1)].chunks(size).map(<[T]>::to_vec).collect();
    out.push(items[size * (chunks - 1)..].to_vec());
    out
}

/// Scan every URL of `job` on `job.threads` workers. Each worker owns one
/// browser session for its chunk and reports per-URL outcomes to a single
/// aggregator; a failing URL never stops its chunk or the batch.
pub async fn run_batch(scanner: Arc<Scanner>, sink: Arc<ReportSink>, launcher: Arc<dyn BrowserLauncher>, job: BatchJob) -> EngineLog {
    let start = Stamp::now();
    let started = Instant::now();
    let engine_id = scanner.settings().engine_id.clone();

    let (tx, mut rx) = mpsc::unbounded_channel::<UrlOutcome>();
    let aggregator = tokio::spawn(async move {
        let mut tally = Tally::default();
        while let Some(outcome) = rx.recv().await {
            tally.record(outcome);
        }
        tally
    });

    let chunks = chunk_list(&job.urls, job.threads);
    info!(urls = job.urls.len(), workers = chunks.len(), %engine_id, "batch started");
    let mut handles = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let (tx, scanner, sink, launcher) = (tx.clone(), scanner.clone(), sink.clone(), launcher.clone());
        let skip = job.skip_if_exists;
        handles.push(tokio::task::spawn_blocking(move || process_chunk(chunk, &scanner, &sink, launcher.as_ref(), skip, &tx)));
    }
    drop(tx);
    for h in handles {
        if let Err(e) = h.await {
            error!(error = %e, "scan worker aborted");
        }
    }
    let tally = aggregator.await.unwrap_or_default();

    let end = Stamp::now();
    let log = EngineLog {
        engine_id,
        start_utc: start.utc,
        date: start.date,
        completion_utc: end.utc,
        time: format!("{:.3}s", started.elapsed().as_secs_f64()),
        tally,
    };
    info!(
        total = log.tally.total,
        success = log.tally.success,
        failed = log.tally.failed,
        skipped = log.tally.skipped,
        undelivered = log.tally.undelivered,
        merge_failures = log.tally.merge_failures,
        "batch finished"
    );
    if let Err(e) = sink.record_engine_log(&log) {
        warn!(error = %e, "engine log not saved");
    }
    log
}

fn process_chunk(
    chunk: Vec<String>,
    scanner: &Scanner,
    sink: &ReportSink,
    launcher: &dyn BrowserLauncher,
    skip_if_exists: bool,
    tx: &mpsc::UnboundedSender<UrlOutcome>,
) {
    let mut driver = match launcher.launch() {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, urls = chunk.len(), "browser launch failed, chunk abandoned");
            for url in chunk {
                let _ = tx.send(UrlOutcome::Failed { errors: vec![(LAUNCH_FAILED.to_string(), url)] });
            }
            return;
        }
    };

    for raw in chunk {
        let url = normalize_submission_url(&raw);
        if skip_if_exists {
            match sink.already_scanned(&url) {
                Ok(Some(previous)) => {
                    info!(%url, %previous, "skipping, scanned previously");
                    let _ = tx.send(UrlOutcome::Skipped);
                    continue;
                }
                Ok(None) => {}
                Err(e) => warn!(%url, error = %e, "could not check previous scans"),
            }
        }

        let outcome = scanner.scan(driver.as_mut(), &url, None);
        let status = match sink.deliver(&outcome, &Stamp::now()) {
            Err(e) => {
                warn!(%url, report_id = %outcome.report.report_id, error = %e, "report not delivered");
                UrlOutcome::Undelivered { url }
            }
            Ok(_) if !outcome.report.is_success() => {
                UrlOutcome::Failed { errors: outcome.report.errors.iter().map(|e| (e.error.clone(), e.url.clone())).collect() }
            }
            Ok(delivery) => UrlOutcome::Succeeded { merge_failures: delivery.merge_failures },
        };
        let _ = tx.send(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remainder_goes_to_last_chunk() {
        let items: Vec<u32> = (1..=11).collect();
        let c = chunk_list(&items, 4);
        assert_eq!(c.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 2, 2, 5]);
        assert_eq!(c.concat(), items);
    }

    #[test]
    fn small_lists_get_one_item_per_chunk() {
        assert_eq!(chunk_list(&["a", "b"], 4), vec![vec!["a"], vec!["b"]]);
        assert_eq!(chunk_list(&[1, 2, 3], 1), vec![vec![1, 2, 3]]);
        assert!(chunk_list::<u8>(&[], 3).is_empty());
        assert_eq!(chunk_list(&[1, 2, 3, 4], 0), vec![vec![1, 2, 3, 4]]);
    }

    #[test]
    fn engine_log_flattens_counters() {
        let mut tally = Tally::default();
        tally.record(UrlOutcome::Failed { errors: vec![("ERR_CONNECTION_REFUSED".into(), "https://a.test".into())] });
        let log = EngineLog {
            engine_id: "e".into(),
            start_utc: "2024-01-01 00:00:00".into(),
            date: "2024-01-01".into(),
            completion_utc: "2024-01-01 00:00:01".into(),
            time: "1.000s".into(),
            tally,
        };
        let v = serde_json::to_value(&log).unwrap();
        assert_eq!(v["failed"], 1);
        assert_eq!(v["errors"]["ERR_CONNECTION_REFUSED"][0], "https://a.test");
    }
}
