use anyhow::Result;
use clap::{Parser, Subcommand};
use pipeline::{run_batch, BatchJob, ReplayDriver, ReplayLauncher};
use scan_core::{BrowserLauncher, Stamp};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod setup;

use setup::{BatchArgs, Engine, EngineArgs};

#[derive(Debug, Parser)]
#[command(name = "sandbox", version, about = "Scan report engine: rendered-page traces to reports and rollup history")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./sandbox.yaml if present.
    #[arg(long, global = true, env = "SANDBOX_CONFIG")]
    config: Option<PathBuf>,
    /// Log level (INFO or DEBUG); RUST_LOG takes precedence
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "INFO")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Scan one URL and deliver its report
    Scan {
        /// Submission URL; `https://` is assumed when no scheme is given
        url: String,
        /// Report id to use instead of a generated one
        #[arg(long)]
        report_id: Option<String>,
        /// Print the whole report instead of a summary line
        #[arg(long, default_value_t = false)]
        full: bool,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Scan URLs from the selected source on a pool of workers and print the engine log
    Batch {
        #[command(flatten)]
        batch: BatchArgs,
        #[command(flatten)]
        engine: EngineArgs,
    },
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_ascii_lowercase())))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    let cfg = config::load_config(cli.config.as_deref())?.unwrap_or_default();

    match cli.command {
        Commands::Version => {
            println!("sandbox {} (core {})", env!("CARGO_PKG_VERSION"), scan_core::version());
        }
        Commands::Scan { url, report_id, full, engine } => {
            let settings = engine.resolve(cfg.engine.as_ref())?;
            let engine = Engine::build(&settings)?;
            let mut driver = ReplayDriver::new(engine.captures.clone());
            let outcome = engine.scanner.scan(&mut driver, &url, report_id);
            let delivery = match engine.sink.deliver(&outcome, &Stamp::now()) {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!(report_id = %outcome.report.report_id, error = %e, "report not delivered");
                    None
                }
            };
            if full {
                println!("{}", serde_json::to_string(&outcome.report)?);
            } else {
                let r = &outcome.report;
                let obj = serde_json::json!({
                    "report_id": r.report_id,
                    "submission_url": r.submission_url,
                    "resolved_url": r.resolved_url,
                    "scan_status": r.scan_status,
                    "errors": r.errors,
                    "requests": r.request.len(),
                    "resources": outcome.resources.len(),
                    "domains": r.domain.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
                    "servers": r.server.iter().map(|s| s.ip.as_str()).collect::<Vec<_>>(),
                    "technology": r.technology.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
                    "delivered": delivery.is_some(),
                    "resources_saved": delivery.as_ref().map(|d| d.resources_saved),
                    "scan_time_ms": r.scan_time_ms,
                });
                println!("{}", serde_json::to_string(&obj)?);
            }
        }
        Commands::Batch { batch, engine } => {
            let settings = engine.resolve(cfg.engine.as_ref())?;
            let source = batch.source(&settings.scan.source, cfg.batch.as_ref())?;
            let engine = Engine::build(&settings)?;
            let urls = source.collect(engine.sink.backing_store(), settings.scan.timeout)?;
            if urls.is_empty() {
                warn!(source = source.label(), "no urls to scan");
            }
            let job = batch.job(urls, cfg.batch.as_ref());

            #[cfg(feature = "sqlite")]
            let run = begin_run(&engine, &settings, &job);

            let launcher: Arc<dyn BrowserLauncher> = Arc::new(ReplayLauncher::new(engine.captures.clone()));
            let rt = tokio::runtime::Runtime::new()?;
            let log = rt.block_on(run_batch(engine.scanner.clone(), engine.sink.clone(), launcher, job));

            #[cfg(feature = "sqlite")]
            {
                if let (Some(db), Some(run_id)) = (&engine.sqlite, run) {
                    let finished = time::OffsetDateTime::now_utc().unix_timestamp();
                    if let Err(e) = db.db().finish_run(&run_id, finished, &log.tally) {
                        warn!(%run_id, error = %e, "run bookkeeping not saved");
                    }
                }
            }
            println!("{}", serde_json::to_string(&log)?);
        }
    }
    Ok(())
}

#[cfg(feature = "sqlite")]
fn begin_run(engine: &Engine, settings: &setup::Settings, job: &BatchJob) -> Option<uuid::Uuid> {
    let db = engine.sqlite.as_ref()?;
    let meta = store_sqlite::RunMeta {
        run_id: uuid::Uuid::new_v4(),
        started_at: time::OffsetDateTime::now_utc().unix_timestamp(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        args_json: serde_json::json!({
            "engine_id": settings.scan.engine_id,
            "urls": job.urls.len(),
            "threads": job.threads,
            "skip_if_exists": job.skip_if_exists,
            "source": settings.scan.source,
            "tag": settings.scan.tag,
            "feed": settings.scan.feed,
        })
        .to_string(),
    };
    match db.db().begin_run(meta) {
        Ok(id) => {
            info!(run_id = %id, "run recorded");
            Some(id)
        }
        Err(e) => {
            warn!(error = %e, "run bookkeeping not started");
            None
        }
    }
}
