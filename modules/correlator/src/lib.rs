//! Pairs request/response trace events by request id and collects TLS certificates.

use scan_core::stamp::unix_to_rfc3339;
use scan_core::{extract_domain, Certificate, CorrelatedRequest, TraceEvent};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Schemes whose URLs never reach the network. Matched on the first four characters.
pub const NON_FETCHABLE_SCHEMES: [&str; 2] = ["blob", "data"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Correlation {
    /// In order of first-seen request id.
    pub requests: Vec<CorrelatedRequest>,
    /// One per subject name, first occurrence wins.
    pub certificates: Vec<Certificate>,
}

/// Parse raw log entries, dropping anything that is not a request/response event.
pub fn parse_trace(entries: &[Value]) -> Vec<TraceEvent> {
    let mut events = Vec::with_capacity(entries.len());
    let mut dropped = 0usize;
    for entry in entries {
        match TraceEvent::from_value(entry) {
            Some(ev) => events.push(ev),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        debug!(dropped, kept = events.len(), "ignored non-network or malformed trace entries");
    }
    events
}

pub fn is_fetchable(url: &str) -> bool {
    let prefix = url.get(..4).unwrap_or(url);
    !NON_FETCHABLE_SCHEMES.contains(&prefix)
}

pub fn correlate<I>(events: I) -> Correlation
where
    I: IntoIterator<Item = TraceEvent>,
{
    let mut entries: Vec<CorrelatedRequest> = Vec::new();
    let mut by_id: HashMap<String, usize> = HashMap::new();

    for event in events {
        match event {
            TraceEvent::RequestWillBeSent { request_id, request } => {
                let entry = CorrelatedRequest { request_id: request_id.clone(), request, response: None };
                match by_id.get(&request_id) {
                    // Redirects redeliver the same id; the newest request replaces the old pair in place.
                    Some(&i) => entries[i] = entry,
                    None => {
                        by_id.insert(request_id, entries.len());
                        entries.push(entry);
                    }
                }
            }
            TraceEvent::ResponseReceived { request_id, response } => match by_id.get(&request_id) {
                Some(&i) => entries[i].response = Some(response),
                None => debug!(%request_id, "response without a captured request"),
            },
        }
    }

    let requests: Vec<CorrelatedRequest> = entries
        .into_iter()
        .filter(|r| {
            let keep = is_fetchable(r.request_url()) && r.response_url().map_or(true, is_fetchable);
            if !keep {
                debug!(request_id = %r.request_id, "dropping non-fetchable url");
            }
            keep
        })
        .collect();

    let mut certificates = Vec::new();
    let mut subjects = HashSet::new();
    for r in &requests {
        let Some(details) = r.response.as_ref().and_then(|resp| resp.security_details()) else { continue };
        let Some(cert) = certificate_from(details, r.request_url()) else { continue };
        if subjects.insert(cert.subject_name.clone()) {
            certificates.push(cert);
        }
    }

    Correlation { requests, certificates }
}

/// Build a certificate from a response's security details. Details without a
/// subject name carry no identity and are ignored.
pub fn certificate_from(details: &Map<String, Value>, request_url: &str) -> Option<Certificate> {
    let subject_name = details.get("subjectName")?.as_str()?.to_string();
    let valid_from = details.get("validFrom").and_then(Value::as_f64);
    let valid_to = details.get("validTo").and_then(Value::as_f64);
    let mut rest = details.clone();
    for k in ["subjectName", "validFrom", "validTo"] {
        rest.remove(k);
    }
    let parts = extract_domain(request_url);
    Some(Certificate {
        subject_name,
        domain_name: parts.domain,
        sub_domain: parts.subdomain,
        tld: parts.suffix,
        valid_from,
        valid_to,
        valid_from_utc: valid_from.and_then(unix_to_rfc3339),
        valid_to_utc: valid_to.and_then(unix_to_rfc3339),
        details: rest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan_core::Payload;
    use serde_json::json;

    fn req(id: &str, url: &str) -> TraceEvent {
        TraceEvent::RequestWillBeSent { request_id: id.into(), request: Payload::from_value(json!({"url": url})).unwrap() }
    }

    fn resp(id: &str, body: Value) -> TraceEvent {
        TraceEvent::ResponseReceived { request_id: id.into(), response: Payload::from_value(body).unwrap() }
    }

    #[test]
    fn pairs_in_first_seen_order_and_drops_orphans() {
        let c = correlate(vec![
            req("A", "https://a.example.com/x.js"),
            req("B", "https://b.example.com/y.png"),
            resp("C", json!({"url": "https://c.example.com/"})),
            resp("B", json!({"url": "https://b.example.com/y.png"})),
            resp("A", json!({"url": "https://a.example.com/x.js"})),
        ]);
        let ids: Vec<_> = c.requests.iter().map(|r| r.request_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert!(c.requests.iter().all(|r| r.response.is_some()));
    }

    #[test]
    fn redelivered_request_replaces_in_place() {
        let c = correlate(vec![
            req("1", "http://example.com/"),
            req("2", "https://example.com/app.js"),
            resp("1", json!({"url": "http://example.com/", "status": 301})),
            req("1", "https://example.com/"),
        ]);
        assert_eq!(c.requests.len(), 2);
        assert_eq!(c.requests[0].request_url(), "https://example.com/");
        assert!(c.requests[0].response.is_none());
        assert_eq!(c.requests[1].request_id, "2");
    }

    #[test]
    fn request_only_entries_are_kept() {
        let c = correlate(vec![req("1", "https://example.com/pending")]);
        assert_eq!(c.requests.len(), 1);
        assert!(c.requests[0].response.is_none());
    }

    #[test]
    fn filters_blob_and_data_schemes() {
        let c = correlate(vec![
            req("1", "data:image/png;base64,AAAA"),
            req("2", "https://example.com/"),
            resp("2", json!({"url": "blob:https://example.com/123"})),
            req("3", "blob:https://example.com/456"),
            req("4", "https://example.com/ok.css"),
            resp("4", json!({"url": "https://example.com/ok.css"})),
        ]);
        let ids: Vec<_> = c.requests.iter().map(|r| r.request_id.as_str()).collect();
        assert_eq!(ids, vec!["4"]);
        assert!(is_fetchable("https://x"));
        assert!(!is_fetchable("data:,"));
    }

    #[test]
    fn certificates_dedup_by_subject_first_wins() {
        let tls = |from: f64| json!({"subjectName": "*.example.com", "issuer": "R3", "validFrom": from, "validTo": 1_800_000_000.0, "protocol": "TLS 1.3"});
        let c = correlate(vec![
            req("1", "https://www.example.com/"),
            resp("1", json!({"url": "https://www.example.com/", "securityDetails": tls(1_700_000_000.0)})),
            req("2", "https://cdn.example.com/a.js"),
            resp("2", json!({"url": "https://cdn.example.com/a.js", "securityDetails": tls(1_600_000_000.0)})),
        ]);
        assert_eq!(c.certificates.len(), 1);
        let cert = &c.certificates[0];
        assert_eq!(cert.valid_from, Some(1_700_000_000.0));
        assert_eq!(cert.domain_name, "example.com");
        assert_eq!(cert.sub_domain, "www");
        assert_eq!(cert.tld, "com");
        assert_eq!(cert.valid_from_utc.as_deref(), Some("2023-11-14T22:13:20Z"));
        assert_eq!(cert.details.get("issuer"), Some(&json!("R3")));
        assert!(!cert.details.contains_key("subjectName"));
    }

    #[test]
    fn parse_trace_skips_noise() {
        let entries = vec![
            json!({"method": "Network.requestWillBeSent", "params": {"requestId": "1", "request": {"url": "https://a.test/"}}}),
            json!({"method": "Page.loadEventFired", "params": {}}),
            json!("garbage"),
        ];
        assert_eq!(parse_trace(&entries).len(), 1);
    }
}
