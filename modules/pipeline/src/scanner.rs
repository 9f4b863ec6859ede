use crate::normalize_submission_url;
use correlator::Correlation;
use rollup::{build_servers, DnsScope, GeoCache, RollupBuilder, DEFAULT_RECORD_TYPES};
use scan_core::{extract_domain, BrowserDriver, EnrichmentProvider, Navigation, ResourceTable, ScanReport, ScanStatus, Stamp};
use std::sync::Arc;
use std::time::{Duration, Instant};
use technology::{opening_tags, Fingerprinter, TagKind};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub timeout: Duration,
    pub engine_id: String,
    pub tag: String,
    pub source: String,
    pub feed: String,
    pub dns_scope: DnsScope,
    pub record_types: Vec<String>,
    pub capture_screenshot: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        ScanSettings {
            timeout: Duration::from_secs(30),
            engine_id: String::new(),
            tag: String::new(),
            source: "url".into(),
            feed: String::new(),
            dns_scope: DnsScope::None,
            record_types: DEFAULT_RECORD_TYPES.iter().map(|s| s.to_string()).collect(),
            capture_screenshot: false,
        }
    }
}

/// Everything one scan produced. The resource table holds the bodies the
/// report only references by hash.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub report: ScanReport,
    pub resources: ResourceTable,
    pub screenshot: Option<Vec<u8>>,
}

/// Turns one navigation into a report. Shared by all workers of a batch; the
/// browser session is supplied per call.
pub struct Scanner {
    fingerprinter: Arc<Fingerprinter>,
    enrichment: Arc<dyn EnrichmentProvider>,
    geo: Arc<GeoCache>,
    settings: ScanSettings,
}

impl Scanner {
    pub fn new(fingerprinter: Arc<Fingerprinter>, enrichment: Arc<dyn EnrichmentProvider>, settings: ScanSettings) -> Self {
        Scanner { fingerprinter, enrichment, geo: Arc::new(GeoCache::new()), settings }
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    /// Scan `url` with `driver`. Never fails: a navigation error yields a
    /// report with `scan_status = failed` and the error code recorded.
    pub fn scan(&self, driver: &mut dyn BrowserDriver, url: &str, report_id: Option<String>) -> ScanOutcome {
        let url = normalize_submission_url(url);
        let started = Instant::now();
        let report_id = report_id.filter(|id| !id.is_empty()).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut report = ScanReport::new(&url, report_id, &Stamp::now());
        report.engine_id = self.settings.engine_id.clone();
        report.tag = self.settings.tag.clone();
        report.source = self.settings.source.clone();
        report.feed = self.settings.feed.clone();

        let mut outcome = ScanOutcome { report, resources: ResourceTable::new(), screenshot: None };
        match driver.navigate(&url, self.settings.timeout) {
            Ok(nav) => self.assemble(&mut outcome, driver, nav),
            Err(e) => {
                warn!(%url, error = %e, "navigation failed");
                outcome.report.fail(e.code(), &url);
            }
        }

        outcome.report.completion_utc = Some(Stamp::now().utc);
        outcome.report.scan_time_ms = started.elapsed().as_millis() as u64;
        info!(
            %url,
            report_id = %outcome.report.report_id,
            status = ?outcome.report.scan_status,
            requests = outcome.report.request.len(),
            resources = outcome.resources.len(),
            "scan finished"
        );
        outcome
    }

    fn assemble(&self, outcome: &mut ScanOutcome, driver: &mut dyn BrowserDriver, nav: Navigation) {
        let report = &mut outcome.report;
        let resolved = extract_domain(&nav.final_url);
        report.resolved_domain = resolved.domain;
        report.resolved_sub_domain = resolved.subdomain;
        report.resolved_tld = resolved.suffix;
        report.page_title = Some(nav.title);
        report.cookie = nav.cookies;

        let events = driver.trace_events();
        debug!(events = events.len(), "trace captured");
        let Correlation { requests, certificates } = correlator::correlate(events);

        let extraction = resources::extract(&requests, |id| driver.fetch_body(id), &report.report_id, &report.submission_url);
        if self.settings.capture_screenshot {
            outcome.screenshot = driver.screenshot();
        }

        report.page_scripts = opening_tags(&nav.dom, TagKind::Script);
        report.page_links = opening_tags(&nav.dom, TagKind::Link);
        report.technology = self.fingerprinter.detect(&nav.dom, &requests);

        let builder = RollupBuilder::new(self.enrichment.as_ref(), &self.geo)
            .dns_scope(self.settings.dns_scope)
            .record_types(self.settings.record_types.clone());
        report.domain = builder.build_domains(&requests, &extraction.mapping, &certificates, &nav.final_url);
        report.server = build_servers(&report.domain);

        report.request = requests;
        report.certificate = certificates;
        report.resource = extraction.mapping;
        report.dom = Some(nav.dom);
        report.resolved_url = Some(nav.final_url);
        normalize::normalize_report(report);
        report.refresh_meta();
        report.scan_status = ScanStatus::Success;
        outcome.resources = extraction.table;
    }
}
