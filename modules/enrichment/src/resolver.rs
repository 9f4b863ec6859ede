use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::TokioAsyncResolver;
use scan_core::EnrichmentError;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, warn};

/// Answers one record type for one name. `Ok(vec![])` means the name exists
/// but has no records of that type; `NotFound` means the name does not exist.
pub trait RecordSource: Send + Sync {
    fn lookup(&self, domain: &str, record_type: &str) -> Result<Vec<String>, EnrichmentError>;
}

/// Look up every type in `record_types`, keyed by lowercase type name.
///
/// A nonexistent domain fails the whole query. Other per-type failures leave
/// that type empty, unless no type could be answered at all.
pub fn collect_records(
    source: &dyn RecordSource,
    domain: &str,
    record_types: &[&str],
) -> Result<BTreeMap<String, BTreeSet<String>>, EnrichmentError> {
    let mut out = BTreeMap::new();
    let mut first_err = None;
    let mut answered = 0usize;
    for t in record_types {
        let kind = t.to_ascii_lowercase();
        match source.lookup(domain, t) {
            Ok(values) => {
                answered += 1;
                out.insert(kind, values.into_iter().collect());
            }
            Err(EnrichmentError::NotFound) => return Err(EnrichmentError::NotFound),
            Err(e) => {
                debug!(%domain, record_type = %kind, error = %e, "record lookup failed");
                first_err.get_or_insert(e);
                out.insert(kind, BTreeSet::new());
            }
        }
    }
    match first_err {
        Some(e) if answered == 0 => Err(e),
        _ => Ok(out),
    }
}

/// DNS over the host's configured nameservers. Lookups run on a small
/// private runtime so callers can stay synchronous; each one is bounded by
/// `timeout`.
pub struct DnsResolver {
    runtime: Runtime,
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

impl DnsResolver {
    /// Must be called outside an async context.
    pub fn from_system(timeout: Duration) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread().worker_threads(1).thread_name("dns").enable_all().build()?;
        let (config, mut opts) = hickory_resolver::system_conf::read_system_conf().unwrap_or_else(|e| {
            warn!(error = %e, "system resolver config unreadable, using defaults");
            (ResolverConfig::default(), ResolverOpts::default())
        });
        opts.timeout = timeout;
        opts.attempts = 1;
        let resolver = {
            let _guard = runtime.enter();
            TokioAsyncResolver::tokio(config, opts)
        };
        Ok(DnsResolver { runtime, resolver, timeout })
    }
}

impl RecordSource for DnsResolver {
    fn lookup(&self, domain: &str, record_type: &str) -> Result<Vec<String>, EnrichmentError> {
        let rtype = RecordType::from_str(&record_type.to_ascii_uppercase())
            .map_err(|e| EnrichmentError::Lookup(format!("{record_type}: {e}")))?;
        let timeout = self.timeout;
        let answer = self
            .runtime
            .handle()
            .block_on(async { tokio::time::timeout(timeout, self.resolver.lookup(domain, rtype)).await });
        match answer {
            Err(_) => Err(EnrichmentError::Timeout),
            Ok(Ok(lookup)) => Ok(lookup.iter().map(|r| r.to_string()).collect()),
            Ok(Err(e)) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { response_code, .. } if *response_code == ResponseCode::NXDomain => {
                    Err(EnrichmentError::NotFound)
                }
                ResolveErrorKind::NoRecordsFound { .. } => Ok(Vec::new()),
                ResolveErrorKind::Timeout => Err(EnrichmentError::Timeout),
                _ => Err(EnrichmentError::Lookup(e.to_string())),
            },
        }
    }
}
