use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A raw protocol object (request, response, cookie) whose field names are
/// rewritten in place by normalization. Accessors accept both the raw and the
/// canonical spelling of a field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(pub Map<String, Value>);

impl Payload {
    pub fn new(map: Map<String, Value>) -> Self {
        Payload(map)
    }

    pub fn from_value(v: Value) -> Option<Self> {
        match v {
            Value::Object(map) => Some(Payload(map)),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    fn first(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter().find_map(|k| self.0.get(*k))
    }

    fn first_str(&self, keys: &[&str]) -> &str {
        self.first(keys).and_then(Value::as_str).unwrap_or("")
    }

    pub fn url(&self) -> &str {
        self.first_str(&["url"])
    }

    pub fn mime_type(&self) -> &str {
        self.first_str(&["mime_type", "mimeType"])
    }

    pub fn remote_ip(&self) -> &str {
        self.first_str(&["ip", "remoteIPAddress"])
    }

    pub fn status(&self) -> Option<u16> {
        let v = self.0.get("status")?;
        v.as_u64()
            .or_else(|| v.as_f64().map(|f| f as u64))
            .and_then(|n| u16::try_from(n).ok())
    }

    pub fn encoded_data_length(&self) -> f64 {
        self.first(&["encoded_data_length", "encodedDataLength"])
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    /// First header named `name` (case-insensitive). Works on both the raw
    /// `{name: value}` map and the normalized `[{name, value}]` list.
    pub fn header(&self, name: &str) -> Option<String> {
        match self.0.get("headers")? {
            Value::Object(map) => map
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| value_to_string(v)),
            Value::Array(pairs) => pairs.iter().find_map(|pair| {
                let n = pair.get("name")?.as_str()?;
                if n.eq_ignore_ascii_case(name) {
                    pair.get("value").map(value_to_string)
                } else {
                    None
                }
            }),
            _ => None,
        }
    }

    pub fn security_details(&self) -> Option<&Map<String, Value>> {
        self.first(&["securityDetails", "security_details"]).and_then(Value::as_object)
    }
}

/// Strings are taken verbatim, anything else is rendered as JSON text.
pub fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One entry of the browser's network log, correlated by request identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    RequestWillBeSent { request_id: String, request: Payload },
    ResponseReceived { request_id: String, response: Payload },
}

impl TraceEvent {
    pub fn request_id(&self) -> &str {
        match self {
            TraceEvent::RequestWillBeSent { request_id, .. } | TraceEvent::ResponseReceived { request_id, .. } => request_id,
        }
    }

    /// Parse a `{method, params}` object, or a performance-log entry whose
    /// `message` holds that object (possibly as a JSON string, possibly nested
    /// one more level under `message`). Returns `None` for anything else.
    pub fn from_value(v: &Value) -> Option<Self> {
        match v.get("message") {
            Some(Value::String(s)) => {
                let inner: Value = serde_json::from_str(s).ok()?;
                Self::from_value(&inner)
            }
            Some(inner) if inner.is_object() => Self::from_value(inner),
            Some(_) => None,
            None => Self::from_method(v),
        }
    }

    fn from_method(v: &Value) -> Option<Self> {
        let method = v.get("method")?.as_str()?;
        let params = v.get("params")?;
        let request_id = params.get("requestId")?.as_str()?.to_string();
        match method {
            "Network.requestWillBeSent" => Some(TraceEvent::RequestWillBeSent {
                request_id,
                request: Payload::from_value(params.get("request")?.clone())?,
            }),
            "Network.responseReceived" => Some(TraceEvent::ResponseReceived {
                request_id,
                response: Payload::from_value(params.get("response")?.clone())?,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedRequest {
    pub request_id: String,
    pub request: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Payload>,
}

impl CorrelatedRequest {
    pub fn request_url(&self) -> &str {
        self.request.url()
    }

    pub fn response_url(&self) -> Option<&str> {
        self.response.as_ref().map(Payload::url)
    }
}

/// A response body identified by its content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub sha256: String,
    pub mime_type: String,
    /// Body text; base64 when the body is not valid UTF-8.
    pub raw_data: String,
    #[serde(default)]
    pub base64_encoded: bool,
    pub request_id: String,
    pub report_id: String,
    pub submission_url: String,
    pub resource_url: String,
}

/// Links one request to the content it fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub sha256: String,
    pub url: String,
    pub mime_type: String,
}

/// Content-addressed resource arena: one entry per distinct hash, insertion ordered.
#[derive(Debug, Clone, Default)]
pub struct ResourceTable {
    entries: Vec<Resource>,
    by_hash: HashMap<String, usize>,
}

impl ResourceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the hash is already present. Returns whether the resource was new;
    /// an existing entry is never replaced.
    pub fn insert(&mut self, resource: Resource) -> bool {
        if self.by_hash.contains_key(&resource.sha256) {
            return false;
        }
        self.by_hash.insert(resource.sha256.clone(), self.entries.len());
        self.entries.push(resource);
        true
    }

    pub fn get(&self, sha256: &str) -> Option<&Resource> {
        self.by_hash.get(sha256).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, sha256: &str) -> bool {
        self.by_hash.contains_key(sha256)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.entries.iter()
    }
}

/// TLS certificate details; identity is `subject_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    pub subject_name: String,
    pub domain_name: String,
    pub sub_domain: String,
    pub tld: String,
    #[serde(default)]
    pub valid_from: Option<f64>,
    #[serde(default)]
    pub valid_to: Option<f64>,
    #[serde(default)]
    pub valid_from_utc: Option<String>,
    #[serde(default)]
    pub valid_to_utc: Option<String>,
    /// Remaining protocol fields (issuer, protocol, cipher, san list...).
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Country {
    pub name: String,
    pub iso: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asn {
    pub number: u32,
    pub name: String,
    pub network: String,
}

/// DNS answers by lower-case record type. `error` marks a failed lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecords {
    #[serde(default)]
    pub records: BTreeMap<String, BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DnsRecords {
    pub fn failed(reason: impl Into<String>) -> Self {
        DnsRecords { records: BTreeMap::new(), error: Some(reason.into()) }
    }

    pub fn union_with(&mut self, other: &DnsRecords) {
        for (kind, values) in &other.records {
            self.records.entry(kind.clone()).or_default().extend(values.iter().cloned());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSummary {
    pub url: String,
    pub mime_type: String,
    pub ip: String,
    pub response_code: Option<u16>,
    pub encoded_data_length: f64,
}

/// Aggregate of one scan's observations for a registrable domain, merged into history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainRollup {
    pub name: String,
    #[serde(default)]
    pub sub_domain: BTreeSet<String>,
    #[serde(default)]
    pub tld: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub mime_type: BTreeSet<String>,
    #[serde(default)]
    pub response_code: BTreeSet<u16>,
    #[serde(default)]
    pub total_response_size: f64,
    #[serde(default)]
    pub request: Vec<RequestSummary>,
    #[serde(default)]
    pub request_count: usize,
    #[serde(default)]
    pub resource: Vec<ResourceRef>,
    #[serde(default)]
    pub certificate: Option<Certificate>,
    #[serde(default)]
    pub dns: DnsRecords,
    #[serde(default)]
    pub country: Option<Country>,
    #[serde(default)]
    pub asn: Option<Asn>,
    #[serde(default)]
    pub root: bool,
    #[serde(default)]
    pub hosting_scripts: bool,
    #[serde(default)]
    pub first_seen_utc: Option<String>,
    #[serde(default)]
    pub last_update_utc: Option<String>,
    #[serde(default)]
    pub last_update: Option<String>,
}

/// Aggregate of the domains that resolved to one IP, merged into history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerRollup {
    pub ip: String,
    #[serde(default)]
    pub domain: BTreeSet<String>,
    /// Distinct `server` response header values.
    #[serde(default)]
    pub server: BTreeSet<String>,
    #[serde(default)]
    pub mime_type: BTreeSet<String>,
    #[serde(default)]
    pub resource: Vec<ResourceRef>,
    #[serde(default)]
    pub response_code: BTreeSet<u16>,
    #[serde(default)]
    pub total_response_size: f64,
    #[serde(default)]
    pub hosting_scripts: bool,
    #[serde(default)]
    pub country: Option<Country>,
    #[serde(default)]
    pub asn: Option<Asn>,
    #[serde(default)]
    pub first_seen_utc: Option<String>,
    #[serde(default)]
    pub last_update_utc: Option<String>,
    #[serde(default)]
    pub last_update: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Technology {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanErrorEntry {
    pub error: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanMeta {
    pub report_id: String,
    pub submission_url: String,
    pub submission_utc: String,
    pub request_count: usize,
    pub script_count: usize,
    pub domain_count: usize,
}

/// Root document of one scan attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub report_id: String,
    pub submission_url: String,
    pub submission_utc: String,
    pub date: String,
    #[serde(default)]
    pub completion_utc: Option<String>,
    #[serde(default)]
    pub scan_time_ms: u64,
    #[serde(default)]
    pub engine_id: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub feed: String,
    #[serde(default)]
    pub domain_name: String,
    #[serde(default)]
    pub sub_domain: String,
    #[serde(default)]
    pub tld: String,
    #[serde(default)]
    pub resolved_url: Option<String>,
    #[serde(default)]
    pub resolved_domain: String,
    #[serde(default)]
    pub resolved_sub_domain: String,
    #[serde(default)]
    pub resolved_tld: String,
    #[serde(default)]
    pub page_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dom: Option<String>,
    #[serde(default)]
    pub page_scripts: Vec<String>,
    #[serde(default)]
    pub page_links: Vec<String>,
    #[serde(default)]
    pub request: Vec<CorrelatedRequest>,
    #[serde(default)]
    pub certificate: Vec<Certificate>,
    #[serde(default)]
    pub cookie: Vec<Payload>,
    #[serde(default)]
    pub resource: Vec<ResourceRef>,
    #[serde(default)]
    pub domain: Vec<DomainRollup>,
    #[serde(default)]
    pub server: Vec<ServerRollup>,
    #[serde(default)]
    pub technology: Vec<Technology>,
    #[serde(default)]
    pub meta: Option<ScanMeta>,
    pub scan_status: ScanStatus,
    #[serde(default)]
    pub errors: Vec<ScanErrorEntry>,
}

impl ScanReport {
    /// A fresh report for `submission_url`; status stays `failed` until the scan completes.
    pub fn new(submission_url: &str, report_id: String, submitted: &crate::Stamp) -> Self {
        let parts = crate::extract_domain(submission_url);
        ScanReport {
            report_id,
            submission_url: submission_url.to_string(),
            submission_utc: submitted.utc.clone(),
            date: submitted.date.clone(),
            completion_utc: None,
            scan_time_ms: 0,
            engine_id: String::new(),
            tag: String::new(),
            source: String::new(),
            feed: String::new(),
            domain_name: parts.domain,
            sub_domain: parts.subdomain,
            tld: parts.suffix,
            resolved_url: None,
            resolved_domain: String::new(),
            resolved_sub_domain: String::new(),
            resolved_tld: String::new(),
            page_title: None,
            dom: None,
            page_scripts: Vec::new(),
            page_links: Vec::new(),
            request: Vec::new(),
            certificate: Vec::new(),
            cookie: Vec::new(),
            resource: Vec::new(),
            domain: Vec::new(),
            server: Vec::new(),
            technology: Vec::new(),
            meta: None,
            scan_status: ScanStatus::Failed,
            errors: Vec::new(),
        }
    }

    pub fn fail(&mut self, error: impl Into<String>, url: &str) {
        self.scan_status = ScanStatus::Failed;
        self.errors.push(ScanErrorEntry { error: error.into(), url: url.to_string() });
    }

    pub fn is_success(&self) -> bool {
        self.scan_status == ScanStatus::Success
    }

    pub fn refresh_meta(&mut self) {
        self.meta = Some(ScanMeta {
            report_id: self.report_id.clone(),
            submission_url: self.submission_url.clone(),
            submission_utc: self.submission_utc.clone(),
            request_count: self.request.len(),
            script_count: self.page_scripts.len(),
            domain_count: self.domain.len(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(v: Value) -> Payload {
        Payload::from_value(v).unwrap()
    }

    #[test]
    fn accessors_read_raw_and_canonical_names() {
        let raw = payload(json!({"url": "https://a.test/", "mimeType": "text/html", "remoteIPAddress": "192.0.2.1", "status": 200, "encodedDataLength": 512}));
        let canon = payload(json!({"url": "https://a.test/", "mime_type": "text/html", "ip": "192.0.2.1", "status": 200.0, "encoded_data_length": 512.0}));
        for p in [raw, canon] {
            assert_eq!(p.mime_type(), "text/html");
            assert_eq!(p.remote_ip(), "192.0.2.1");
            assert_eq!(p.status(), Some(200));
            assert_eq!(p.encoded_data_length(), 512.0);
        }
    }

    #[test]
    fn header_lookup_handles_map_and_pairs() {
        let map = payload(json!({"headers": {"Server": "nginx", "Content-Type": "text/html"}}));
        assert_eq!(map.header("server").as_deref(), Some("nginx"));
        let pairs = payload(json!({"headers": [{"name": "server", "value": "caddy"}, {"name": "server", "value": "other"}]}));
        assert_eq!(pairs.header("Server").as_deref(), Some("caddy"));
        assert!(pairs.header("x-missing").is_none());
    }

    #[test]
    fn parses_plain_and_wrapped_trace_events() {
        let plain = json!({"method": "Network.requestWillBeSent", "params": {"requestId": "1", "request": {"url": "https://a.test/"}}});
        let ev = TraceEvent::from_value(&plain).unwrap();
        assert_eq!(ev.request_id(), "1");

        let inner = json!({"message": {"method": "Network.responseReceived", "params": {"requestId": "1", "response": {"url": "https://a.test/"}}}, "webview": "x"});
        let wrapped = json!({"level": "INFO", "message": inner.to_string(), "timestamp": 1});
        assert!(matches!(TraceEvent::from_value(&wrapped), Some(TraceEvent::ResponseReceived { .. })));
    }

    #[test]
    fn rejects_unknown_and_malformed_events() {
        assert!(TraceEvent::from_value(&json!({"method": "Network.loadingFinished", "params": {"requestId": "1"}})).is_none());
        assert!(TraceEvent::from_value(&json!({"method": "Network.requestWillBeSent", "params": {}})).is_none());
        assert!(TraceEvent::from_value(&json!({"message": "{not json"})).is_none());
    }

    #[test]
    fn resource_table_keeps_first_entry_per_hash() {
        let mk = |url: &str| Resource {
            sha256: "abc".into(),
            mime_type: "text/javascript".into(),
            raw_data: "x".into(),
            base64_encoded: false,
            request_id: url.into(),
            report_id: "r".into(),
            submission_url: "https://s.test/".into(),
            resource_url: url.into(),
        };
        let mut t = ResourceTable::new();
        assert!(t.insert(mk("https://a.test/x.js")));
        assert!(!t.insert(mk("https://b.test/y.js")));
        assert_eq!(t.len(), 1);
        assert_eq!(t.get("abc").unwrap().resource_url, "https://a.test/x.js");
    }

    #[test]
    fn report_starts_failed_and_records_errors() {
        let stamp = crate::Stamp::from_unix(0).unwrap();
        let mut r = ScanReport::new("https://www.example.com/", "id".into(), &stamp);
        assert_eq!(r.domain_name, "example.com");
        assert!(!r.is_success());
        r.fail("ERR_NAME_NOT_RESOLVED", "https://www.example.com/");
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["scan_status"], "failed");
        assert_eq!(v["errors"][0]["error"], "ERR_NAME_NOT_RESOLVED");
    }
}
