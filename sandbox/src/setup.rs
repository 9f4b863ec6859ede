//! Resolving command-line, environment and YAML options into a wired engine.

use crate::config::{BatchConfig, EngineConfig};
use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use enrichment::{DnsResolver, GeoTable, LocalEnrichment};
use pipeline::community::DEFAULT_COMMUNITY_URL;
use pipeline::sources::{DEFAULT_FEED_URL, DEFAULT_QUERY_INDEX, DEFAULT_QUERY_SIZE};
use pipeline::{BatchJob, CaptureSet, HttpCommunityClient, ReportSink, ScanSettings, Scanner, SinkOptions, UrlSource};
use resources::ResourcePolicy;
use rollup::{DnsScope, DEFAULT_RECORD_TYPES};
use scan_core::{MemoryStore, ReportStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use technology::Fingerprinter;
use tracing::{info, warn};

const RESOLVER_TIMEOUT: Duration = Duration::from_secs(5);

/// Engine options. Each falls back to its environment variable, then to the config file.
#[derive(Debug, Args, Clone, Default)]
pub struct EngineArgs {
    /// Capture file or directory of capture files to replay
    #[arg(long, env = "CAPTURES", value_name = "PATH")]
    pub captures: Option<PathBuf>,
    /// Page load timeout in seconds [default: 30]
    #[arg(long, env = "SCAN_TIMEOUT")]
    pub timeout: Option<u64>,
    /// Tag recorded on reports and saved resources
    #[arg(long, env = "TAG")]
    pub tag: Option<String>,
    /// Feed name recorded on reports and saved resources
    #[arg(long, env = "FEED")]
    pub feed: Option<String>,
    /// Where batch URLs come from: url (--url/--urls), feed or query. Recorded on reports [default: url]
    #[arg(long, env = "SOURCE")]
    pub source: Option<String>,
    /// DNS lookups: ALL, MAIN (root domain only) or NONE [default: NONE]
    #[arg(long, env = "DNS")]
    pub dns: Option<String>,
    /// Keep the rendered DOM in saved reports [default: true]
    #[arg(long, env = "SAVE_DOM", num_args = 0..=1, default_missing_value = "true", value_parser = clap::builder::BoolishValueParser::new())]
    pub save_dom: Option<bool>,
    /// Save response bodies to the store [default: false]
    #[arg(long, env = "SAVE_RESOURCES", num_args = 0..=1, default_missing_value = "true", value_parser = clap::builder::BoolishValueParser::new())]
    pub save_resources: Option<bool>,
    /// Include image bodies when saving resources [default: false]
    #[arg(long, env = "SAVE_IMAGES", num_args = 0..=1, default_missing_value = "true", value_parser = clap::builder::BoolishValueParser::new())]
    pub save_images: Option<bool>,
    /// Include stylesheet bodies when saving resources [default: false]
    #[arg(long, env = "SAVE_CSS", num_args = 0..=1, default_missing_value = "true", value_parser = clap::builder::BoolishValueParser::new())]
    pub save_css: Option<bool>,
    /// Capture and save a screenshot [default: false]
    #[arg(long, env = "SAVE_SCREENSHOT", num_args = 0..=1, default_missing_value = "true", value_parser = clap::builder::BoolishValueParser::new())]
    pub save_screenshot: Option<bool>,
    /// Submit to the community service instead of a store [default: false]
    #[arg(long, env = "COMMUNITY", num_args = 0..=1, default_missing_value = "true", value_parser = clap::builder::BoolishValueParser::new())]
    pub community: Option<bool>,
    /// Community service base URL
    #[arg(long, env = "COMMUNITY_URL")]
    pub community_url: Option<String>,
    /// Community API key
    #[arg(long, env = "WEBAMON_APIKEY", hide_env_values = true)]
    pub api_key: Option<String>,
    /// SQLite database for reports and rollup history
    #[arg(long, env = "STORE", value_name = "FILE")]
    pub store: Option<PathBuf>,
    /// Technology pattern file (`pattern,technology` lines) [default: built-in list]
    #[arg(long, env = "PATTERNS", value_name = "FILE")]
    pub patterns: Option<PathBuf>,
    /// IP geo CSV (network,country,iso_code,asn,organization)
    #[arg(long, env = "GEO_TABLE", value_name = "FILE")]
    pub geo: Option<PathBuf>,
}

/// Fully resolved engine options.
#[derive(Debug, Clone)]
pub struct Settings {
    pub captures: PathBuf,
    pub scan: ScanSettings,
    pub sink: SinkOptions,
    pub community: bool,
    pub community_url: String,
    pub api_key: Option<String>,
    pub store: Option<PathBuf>,
    pub patterns: Option<PathBuf>,
    pub geo: Option<PathBuf>,
}

impl EngineArgs {
    pub fn resolve(self, cfg: Option<&EngineConfig>) -> Result<Settings> {
        let c = cfg.cloned().unwrap_or_default();
        let captures = self.captures.or(c.captures).ok_or_else(|| anyhow!("provide --captures <PATH> (or CAPTURES)"))?;
        let dns = match self.dns.or(c.dns) {
            Some(s) => s.parse::<DnsScope>().map_err(|e| anyhow!(e))?,
            None => DnsScope::None,
        };
        let scan = ScanSettings {
            timeout: Duration::from_secs(self.timeout.or(c.timeout_secs).unwrap_or(30)),
            engine_id: uuid::Uuid::new_v4().to_string(),
            tag: self.tag.or(c.tag).unwrap_or_default(),
            source: self.source.or(c.source).unwrap_or_else(|| "url".into()),
            feed: self.feed.or(c.feed).unwrap_or_default(),
            dns_scope: dns,
            record_types: c.record_types.unwrap_or_else(|| DEFAULT_RECORD_TYPES.iter().map(|s| s.to_string()).collect()),
            capture_screenshot: self.save_screenshot.or(c.save_screenshot).unwrap_or(false),
        };
        let sink = SinkOptions {
            save_dom: self.save_dom.or(c.save_dom).unwrap_or(true),
            save_resources: self.save_resources.or(c.save_resources).unwrap_or(false),
            save_screenshot: scan.capture_screenshot,
            policy: ResourcePolicy {
                save_images: self.save_images.or(c.save_images).unwrap_or(false),
                save_css: self.save_css.or(c.save_css).unwrap_or(false),
            },
        };
        Ok(Settings {
            captures,
            scan,
            sink,
            community: self.community.or(c.community).unwrap_or(false),
            community_url: self.community_url.or(c.community_url).unwrap_or_else(|| DEFAULT_COMMUNITY_URL.to_string()),
            api_key: self.api_key.or(c.api_key).filter(|k| !k.is_empty()),
            store: self.store.or(c.store),
            patterns: self.patterns.or(c.patterns),
            geo: self.geo.or(c.geo),
        })
    }
}

/// Everything a scan or batch needs, built once at startup.
pub struct Engine {
    pub scanner: Arc<Scanner>,
    pub sink: Arc<ReportSink>,
    pub captures: Arc<CaptureSet>,
    #[cfg(feature = "sqlite")]
    pub sqlite: Option<Arc<store_sqlite::SqliteStore>>,
}

impl Engine {
    /// Must run outside the async runtime: the community client is blocking.
    pub fn build(s: &Settings) -> Result<Self> {
        let captures = Arc::new(CaptureSet::load(&s.captures)?);
        if captures.is_empty() {
            warn!(path = %s.captures.display(), "no captures found");
        }
        let fingerprinter = match &s.patterns {
            Some(p) => Fingerprinter::load(p).with_context(|| format!("loading patterns {}", p.display()))?,
            None => Fingerprinter::builtin()?,
        };
        let geo = match &s.geo {
            Some(p) => Some(GeoTable::load(p)?),
            None => None,
        };
        let enrichment = LocalEnrichment::new(DnsResolver::from_system(RESOLVER_TIMEOUT)?, geo);
        let scanner = Arc::new(Scanner::new(Arc::new(fingerprinter), Arc::new(enrichment), s.scan.clone()));
        info!(engine_id = %s.scan.engine_id, captures = captures.len(), community = s.community, "engine ready");

        if s.community {
            let Some(key) = &s.api_key else { bail!("community submission needs --api-key (or WEBAMON_APIKEY)") };
            let client = HttpCommunityClient::new(&s.community_url, key, s.scan.timeout)?;
            return Ok(Engine {
                scanner,
                sink: Arc::new(ReportSink::community(Box::new(client), s.sink)),
                captures,
                #[cfg(feature = "sqlite")]
                sqlite: None,
            });
        }

        #[cfg(feature = "sqlite")]
        {
            let sqlite = match &s.store {
                Some(p) => Some(Arc::new(store_sqlite::SqliteStore::open(p).with_context(|| format!("opening store {}", p.display()))?)),
                None => None,
            };
            let store: Arc<dyn ReportStore> = match &sqlite {
                Some(db) => db.clone() as Arc<dyn ReportStore>,
                None => memory_store(),
            };
            Ok(Engine { scanner, sink: Arc::new(ReportSink::store(store, s.sink)), captures, sqlite })
        }
        #[cfg(not(feature = "sqlite"))]
        {
            if let Some(p) = &s.store {
                bail!("cannot open {}: built without the `sqlite` feature", p.display());
            }
            Ok(Engine { scanner, sink: Arc::new(ReportSink::store(memory_store(), s.sink)), captures })
        }
    }
}

fn memory_store() -> Arc<dyn ReportStore> {
    warn!("no --store given, documents are kept in memory for this run only");
    Arc::new(MemoryStore::new())
}

/// Batch input and worker options; each falls back to its environment variable, then to the config file.
#[derive(Debug, Args, Clone, Default)]
pub struct BatchArgs {
    /// Single URL to scan
    #[arg(long, env = "URL", conflicts_with = "urls")]
    pub url: Option<String>,
    /// File with newline-delimited URLs (comments with # and blanks ignored)
    #[arg(long, env = "URLS", value_name = "FILE")]
    pub urls: Option<PathBuf>,
    /// Feed fetched when --source is feed
    #[arg(long, env = "FEED_URL")]
    pub feed_url: Option<String>,
    /// `field:value` terms over stored documents when --source is query
    #[arg(long, env = "QUERY")]
    pub query: Option<String>,
    /// Index the query reads [default: feeds]
    #[arg(long, env = "QUERY_INDEX")]
    pub query_index: Option<String>,
    /// Most URLs a query contributes [default: 100]
    #[arg(long, env = "QUERY_SIZE")]
    pub query_size: Option<usize>,
    /// Worker count; each worker owns one browser session [default: 2]
    #[arg(long, env = "THREADS")]
    pub threads: Option<usize>,
    /// Skip URLs the store has a submission for [default: false]
    #[arg(long, env = "SKIP_IF_EXISTS", num_args = 0..=1, default_missing_value = "true", value_parser = clap::builder::BoolishValueParser::new())]
    pub skip_if_exists: Option<bool>,
}

impl BatchArgs {
    /// `source` picks the input: `feed` (or `openphish`) and `query` name theirs,
    /// anything else reads `--url`, then `--urls`.
    pub fn source(&self, source: &str, cfg: Option<&BatchConfig>) -> Result<UrlSource> {
        let c = cfg.cloned().unwrap_or_default();
        match source.to_ascii_lowercase().as_str() {
            "feed" | "openphish" => Ok(UrlSource::Feed(self.feed_url.clone().or(c.feed_url).unwrap_or_else(|| DEFAULT_FEED_URL.to_string()))),
            "query" => Ok(UrlSource::Query {
                index: self.query_index.clone().or(c.query_index).unwrap_or_else(|| DEFAULT_QUERY_INDEX.to_string()),
                query: self.query.clone().or(c.query).ok_or_else(|| anyhow!("--source query needs --query (or QUERY)"))?,
                size: self.query_size.or(c.query_size).unwrap_or(DEFAULT_QUERY_SIZE),
            }),
            _ => match (self.url.clone().or(c.url), self.urls.clone().or(c.urls)) {
                (Some(u), _) => Ok(UrlSource::Single(u)),
                (None, Some(path)) => Ok(UrlSource::File(path)),
                (None, None) => bail!("provide --url or --urls <file>, or pick --source feed|query"),
            },
        }
    }

    pub fn job(&self, urls: Vec<String>, cfg: Option<&BatchConfig>) -> BatchJob {
        let c = cfg.cloned().unwrap_or_default();
        BatchJob {
            urls,
            threads: self.threads.or(c.threads).unwrap_or(2).max(1),
            skip_if_exists: self.skip_if_exists.or(c.skip_if_exists).unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_beats_config_beats_defaults() {
        let args = EngineArgs { captures: Some("caps".into()), tag: Some("cli".into()), ..Default::default() };
        let cfg = EngineConfig {
            tag: Some("yaml".into()),
            feed: Some("openphish".into()),
            dns: Some("main".into()),
            save_images: Some(true),
            ..Default::default()
        };
        let s = args.resolve(Some(&cfg)).unwrap();
        assert_eq!(s.scan.tag, "cli");
        assert_eq!(s.scan.feed, "openphish");
        assert_eq!(s.scan.dns_scope, DnsScope::Root);
        assert_eq!(s.scan.timeout, Duration::from_secs(30));
        assert_eq!(s.scan.source, "url");
        assert!(s.sink.save_dom);
        assert!(s.sink.policy.save_images && !s.sink.policy.save_css);
        assert!(!s.community);
        assert_eq!(s.community_url, DEFAULT_COMMUNITY_URL);
        assert!(!s.scan.engine_id.is_empty());
    }

    #[test]
    fn captures_are_required_and_dns_is_checked() {
        assert!(EngineArgs::default().resolve(None).is_err());
        let bad = EngineArgs { captures: Some("c".into()), dns: Some("SOME".into()), ..Default::default() };
        assert!(bad.resolve(None).is_err());
    }

    #[test]
    fn source_picks_the_batch_input() {
        let single = BatchArgs { url: Some("a.test".into()), urls: Some("list.txt".into()), ..Default::default() };
        assert_eq!(single.source("url", None).unwrap(), UrlSource::Single("a.test".into()));
        let file = BatchArgs { urls: Some("list.txt".into()), ..Default::default() };
        assert_eq!(file.source("url", None).unwrap(), UrlSource::File("list.txt".into()));
        assert!(BatchArgs::default().source("url", None).is_err());

        assert_eq!(BatchArgs::default().source("openphish", None).unwrap(), UrlSource::Feed(DEFAULT_FEED_URL.into()));
        let cfg = BatchConfig { feed_url: Some("https://feeds.test/today.txt".into()), query: Some("tag:phish".into()), ..Default::default() };
        assert_eq!(BatchArgs::default().source("FEED", Some(&cfg)).unwrap(), UrlSource::Feed("https://feeds.test/today.txt".into()));

        assert_eq!(
            BatchArgs::default().source("query", Some(&cfg)).unwrap(),
            UrlSource::Query { index: DEFAULT_QUERY_INDEX.into(), query: "tag:phish".into(), size: DEFAULT_QUERY_SIZE }
        );
        assert!(BatchArgs::default().source("query", None).is_err());
    }

    #[test]
    fn batch_job_defaults() {
        let job = BatchArgs { threads: Some(0), ..Default::default() }.job(vec!["a.test".into()], None);
        assert_eq!((job.threads, job.skip_if_exists), (1, false));
        let cfg = BatchConfig { threads: Some(6), skip_if_exists: Some(true), ..Default::default() };
        let job = BatchArgs::default().job(vec![], Some(&cfg));
        assert_eq!((job.threads, job.skip_if_exists), (6, true));
    }
}
