use crate::scanner::ScanOutcome;
use crate::EngineLog;
use base64::Engine;
use merge::{MergeEngine, MergeOutcome};
use resources::{resource_document, ResourcePolicy, RESOURCES_INDEX};
use scan_core::{identity_key, CommunityApi, ReportStore, Resource, SinkError, Stamp, WriteCondition};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const SCANS_INDEX: &str = "scans";
pub const SUBMISSIONS_INDEX: &str = "submissions";
pub const SCREENSHOTS_INDEX: &str = "screenshots";
pub const ENGINE_LOG_INDEX: &str = "engine_log";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkOptions {
    pub save_dom: bool,
    pub save_resources: bool,
    pub save_screenshot: bool,
    pub policy: ResourcePolicy,
}

/// What a delivery wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    pub report_id: String,
    pub resources_saved: usize,
    pub domains_created: usize,
    pub domains_updated: usize,
    pub servers_created: usize,
    pub servers_updated: usize,
    /// Rollups that could not be merged; the report itself was still saved.
    pub merge_failures: usize,
}

/// Destination of finished reports, chosen once at startup.
pub enum ReportSink {
    /// Submit to the community service, which keeps its own history.
    Community { api: Box<dyn CommunityApi>, options: SinkOptions },
    /// Write to a store and merge rollups into its history.
    Store(StoreSink),
}

impl ReportSink {
    pub fn community(api: Box<dyn CommunityApi>, options: SinkOptions) -> Self {
        ReportSink::Community { api, options }
    }

    pub fn store(store: Arc<dyn ReportStore>, options: SinkOptions) -> Self {
        ReportSink::Store(StoreSink::new(store, options))
    }

    pub fn deliver(&self, outcome: &ScanOutcome, now: &Stamp) -> Result<Delivery, SinkError> {
        match self {
            ReportSink::Community { api, options } => deliver_community(api.as_ref(), options, outcome, now),
            ReportSink::Store(s) => s.deliver(outcome, now),
        }
    }

    /// Report id of an earlier scan of `url`, if this sink remembers submissions.
    pub fn already_scanned(&self, url: &str) -> Result<Option<String>, SinkError> {
        match self {
            ReportSink::Community { .. } => Ok(None),
            ReportSink::Store(s) => s.already_scanned(url),
        }
    }

    /// The backing store, when this sink writes to one.
    pub fn backing_store(&self) -> Option<&dyn ReportStore> {
        match self {
            ReportSink::Community { .. } => None,
            ReportSink::Store(s) => Some(s.store.as_ref()),
        }
    }

    pub fn record_engine_log(&self, log: &EngineLog) -> Result<(), SinkError> {
        match self {
            ReportSink::Community { .. } => Ok(()),
            ReportSink::Store(s) => s.record_engine_log(log),
        }
    }
}

fn report_document(outcome: &ScanOutcome, save_dom: bool) -> Result<Value, SinkError> {
    let mut doc = serde_json::to_value(&outcome.report)?;
    if !save_dom {
        if let Some(map) = doc.as_object_mut() {
            map.remove("dom");
        }
    }
    Ok(doc)
}

fn deliver_community(api: &dyn CommunityApi, options: &SinkOptions, outcome: &ScanOutcome, now: &Stamp) -> Result<Delivery, SinkError> {
    let report = &outcome.report;
    let mut delivery = Delivery { report_id: report.report_id.clone(), ..Default::default() };

    let hashes: Vec<String> = report.resource.iter().map(|r| r.sha256.clone()).collect::<BTreeSet<_>>().into_iter().collect();
    if !hashes.is_empty() && !outcome.resources.is_empty() {
        let known = api.check_resource_existence(&hashes)?;
        for sha in hashes.iter().filter(|h| !known.get(*h).copied().unwrap_or(false)) {
            let Some(res) = outcome.resources.get(sha) else { continue };
            if !options.policy.admits(&res.mime_type) {
                debug!(sha256 = %sha, mime = %res.mime_type, "resource type not shared");
                continue;
            }
            api.save_resource(&json!({"date": now.date, "resource": res.raw_data, "mime_type": res.mime_type, "sha256": res.sha256}))?;
            delivery.resources_saved += 1;
        }
    }

    let ack = api.save_report(&report_document(outcome, options.save_dom)?)?;
    info!(report_id = %report.report_id, resources = delivery.resources_saved, %ack, "report submitted");
    Ok(delivery)
}

/// Direct-to-store delivery. Rollup merges are serialized per identity by the merge engine.
pub struct StoreSink {
    store: Arc<dyn ReportStore>,
    merge: MergeEngine,
    options: SinkOptions,
}

impl StoreSink {
    pub fn new(store: Arc<dyn ReportStore>, options: SinkOptions) -> Self {
        StoreSink { merge: MergeEngine::new(store.clone()), store, options }
    }

    pub fn already_scanned(&self, url: &str) -> Result<Option<String>, SinkError> {
        let marker = self.store.get(SUBMISSIONS_INDEX, &identity_key(url))?;
        Ok(marker.and_then(|m| m.document.get("report_id").and_then(Value::as_str).map(str::to_string)))
    }

    pub fn record_engine_log(&self, log: &EngineLog) -> Result<(), SinkError> {
        self.store.put(ENGINE_LOG_INDEX, &log.engine_id, &serde_json::to_value(log)?, WriteCondition::Any)?;
        Ok(())
    }

    pub fn deliver(&self, outcome: &ScanOutcome, now: &Stamp) -> Result<Delivery, SinkError> {
        let report = &outcome.report;
        let mut delivery = Delivery { report_id: report.report_id.clone(), ..Default::default() };

        self.store.put(SCANS_INDEX, &report.report_id, &report_document(outcome, self.options.save_dom)?, WriteCondition::Any)?;
        self.store.put(
            SUBMISSIONS_INDEX,
            &identity_key(&report.submission_url),
            &json!({"report_id": report.report_id, "submission_url": report.submission_url, "submission_utc": report.submission_utc}),
            WriteCondition::Any,
        )?;

        if self.options.save_resources {
            delivery.resources_saved = self.save_resources(outcome.resources.iter(), report, now)?;
        }

        if self.options.save_screenshot {
            if let Some(png) = &outcome.screenshot {
                let doc = json!({
                    "screenshot": base64::engine::general_purpose::STANDARD.encode(png),
                    "page_title": report.page_title,
                    "domain_name": report.domain_name,
                    "tag": report.tag,
                    "date": report.date,
                    "submission_url": report.submission_url,
                });
                self.store.put(SCREENSHOTS_INDEX, &report.report_id, &doc, WriteCondition::Any)?;
            }
        }

        for d in &report.domain {
            match self.merge.merge(d.clone(), now) {
                Ok(m) if m.outcome == MergeOutcome::Created => delivery.domains_created += 1,
                Ok(_) => delivery.domains_updated += 1,
                Err(e) => {
                    warn!(domain = %d.name, error = %e, "domain rollup not merged");
                    delivery.merge_failures += 1;
                }
            }
        }
        for s in &report.server {
            match self.merge.merge(s.clone(), now) {
                Ok(m) if m.outcome == MergeOutcome::Created => delivery.servers_created += 1,
                Ok(_) => delivery.servers_updated += 1,
                Err(e) => {
                    warn!(ip = %s.ip, error = %e, "server rollup not merged");
                    delivery.merge_failures += 1;
                }
            }
        }

        info!(
            report_id = %report.report_id,
            resources = delivery.resources_saved,
            domains = report.domain.len(),
            servers = report.server.len(),
            merge_failures = delivery.merge_failures,
            "report stored"
        );
        Ok(delivery)
    }

    /// Bulk-write resources the store has not seen and the policy admits.
    fn save_resources<'a>(
        &self,
        resources: impl Iterator<Item = &'a Resource>,
        report: &scan_core::ScanReport,
        now: &Stamp,
    ) -> Result<usize, SinkError> {
        let mut docs = Vec::new();
        for res in resources {
            if !self.options.policy.admits(&res.mime_type) {
                debug!(sha256 = %res.sha256, mime = %res.mime_type, "resource type not saved");
                continue;
            }
            if self.store.exists(RESOURCES_INDEX, &res.sha256)? {
                debug!(sha256 = %res.sha256, "resource already stored");
                continue;
            }
            docs.push((res.sha256.clone(), resource_document(res, &now.date, &report.feed, &report.tag)));
        }
        let mut saved = 0;
        for ((sha, _), status) in docs.iter().zip(self.store.bulk_put(RESOURCES_INDEX, &docs)) {
            match status {
                Ok(_) => saved += 1,
                Err(e) => warn!(sha256 = %sha, error = %e, "resource not saved"),
            }
        }
        Ok(saved)
    }
}
