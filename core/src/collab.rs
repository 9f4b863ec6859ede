//! Interfaces to the systems the engine consumes but does not implement.

use crate::error::{EnrichmentError, NavigationError, SinkError, StoreError};
use crate::model::{Asn, Country, Payload, TraceEvent};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::IpAddr;
use std::time::Duration;

/// What the browser reports once a page has rendered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Navigation {
    pub final_url: String,
    pub dom: String,
    pub title: String,
    pub cookies: Vec<Payload>,
}

/// One browser session. Owned by a single worker for the lifetime of its chunk.
pub trait BrowserDriver {
    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<Navigation, NavigationError>;
    fn trace_events(&mut self) -> Vec<TraceEvent>;
    /// Raw body bytes, or `None` when the browser has no retrievable body.
    fn fetch_body(&mut self, request_id: &str) -> Option<Vec<u8>>;
    fn screenshot(&mut self) -> Option<Vec<u8>>;
}

/// Starts browser sessions; shared by all workers.
pub trait BrowserLauncher: Send + Sync {
    fn launch(&self) -> anyhow::Result<Box<dyn BrowserDriver>>;
}

pub trait EnrichmentProvider: Send + Sync {
    /// Answers keyed by lower-case record type.
    fn dns_records(&self, domain: &str, record_types: &[&str]) -> Result<BTreeMap<String, BTreeSet<String>>, EnrichmentError>;
    fn country_of(&self, ip: IpAddr) -> Option<Country>;
    fn asn_of(&self, ip: IpAddr) -> Option<Asn>;
}

/// A stored document and the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub version: u64,
    pub document: Value,
}

/// Precondition for a store write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCondition {
    /// Unconditional upsert.
    Any,
    /// Only create; fails with `Conflict` if the id exists.
    Absent,
    /// Only replace the document last read at this version.
    Version(u64),
}

pub trait ReportStore: Send + Sync {
    fn exists(&self, index: &str, id: &str) -> Result<bool, StoreError>;
    fn get(&self, index: &str, id: &str) -> Result<Option<Versioned>, StoreError>;
    /// Returns the new version of the document.
    fn put(&self, index: &str, id: &str, document: &Value, condition: WriteCondition) -> Result<u64, StoreError>;
    /// Unconditional writes; one status per input document.
    fn bulk_put(&self, index: &str, documents: &[(String, Value)]) -> Vec<Result<u64, StoreError>>;
    /// Every document of `index` as `(id, document)`, ordered by id.
    fn list(&self, index: &str) -> Result<Vec<(String, Value)>, StoreError>;
}

pub trait CommunityApi: Send + Sync {
    fn check_resource_existence(&self, hashes: &[String]) -> Result<HashMap<String, bool>, SinkError>;
    fn save_resource(&self, document: &Value) -> Result<(), SinkError>;
    fn save_report(&self, document: &Value) -> Result<Value, SinkError>;
}
