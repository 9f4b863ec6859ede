//! Canonical field names for stored reports.
//!
//! Every pass is idempotent: fields are renamed only when the raw name is
//! present, and header maps are converted to pairs only while still maps.

use scan_core::{value_to_string, Certificate, CorrelatedRequest, Payload, ScanReport};
use serde_json::{Map, Value};

pub const REQUEST_DROPS: &[&str] = &["initialPriority", "isLinkPreload", "isSameSite", "mixedContentType"];

pub const REQUEST_RENAMES: &[(&str, &str)] = &[
    ("hasPostData", "has_post_data"),
    ("postData", "post_data"),
    ("postDataEntries", "post_data_entry"),
    ("referrerPolicy", "referrer_policy"),
];

pub const RESPONSE_DROPS: &[&str] = &[
    "timing",
    "alternateProtocolUsage",
    "charset",
    "connectionId",
    "connectionReused",
    "fromDiskCache",
    "fromPrefetchCache",
    "fromServiceWorker",
];

pub const RESPONSE_RENAMES: &[(&str, &str)] = &[
    ("encodedDataLength", "encoded_data_length"),
    ("mimeType", "mime_type"),
    ("remoteIPAddress", "ip"),
    ("remotePort", "port"),
    ("responseTime", "response_time"),
    ("securityDetails", "security_details"),
    ("securityState", "security_state"),
    ("statusText", "status_text"),
];

pub const CERTIFICATE_DROPS: &[&str] = &["certificateId", "certificateTransparencyCompliance", "encryptedClientHello"];

pub const CERTIFICATE_RENAMES: &[(&str, &str)] = &[
    ("keyExchange", "key_exchange"),
    ("keyExchangeGroup", "key_exchange_group"),
    ("sanList", "san_list"),
    ("serverSignatureAlgorithm", "signature_algorithm"),
];

pub const COOKIE_RENAMES: &[(&str, &str)] = &[("httpOnly", "http_only"), ("sameSite", "same_site")];

fn strip(map: &mut Map<String, Value>, drops: &[&str], renames: &[(&str, &str)]) {
    for k in drops {
        map.remove(*k);
    }
    for (from, to) in renames {
        if let Some(v) = map.remove(*from) {
            map.insert((*to).to_string(), v);
        }
    }
}

/// Replace a `{name: value}` map under `key` with an ordered `[{name, value}]` list.
pub fn pairs_in_place(map: &mut Map<String, Value>, key: &str) {
    let Some(Value::Object(fields)) = map.get_mut(key) else { return };
    let pairs: Vec<Value> = std::mem::take(fields)
        .into_iter()
        .map(|(name, v)| serde_json::json!({"name": name, "value": value_to_string(&v)}))
        .collect();
    map.insert(key.to_string(), Value::Array(pairs));
}

pub fn normalize_request(r: &mut CorrelatedRequest) {
    let req = &mut r.request.0;
    strip(req, REQUEST_DROPS, REQUEST_RENAMES);
    pairs_in_place(req, "headers");
    if let Some(resp) = r.response.as_mut() {
        let resp = &mut resp.0;
        strip(resp, RESPONSE_DROPS, RESPONSE_RENAMES);
        pairs_in_place(resp, "headers");
        pairs_in_place(resp, "security_details");
    }
}

pub fn normalize_certificate(cert: &mut Certificate) {
    strip(&mut cert.details, CERTIFICATE_DROPS, CERTIFICATE_RENAMES);
}

pub fn normalize_cookie(cookie: &mut Payload) {
    strip(&mut cookie.0, &[], COOKIE_RENAMES);
}

/// Normalize every request, certificate and cookie of a report, including the
/// certificates already attached to domain rollups.
pub fn normalize_report(report: &mut ScanReport) {
    report.request.iter_mut().for_each(normalize_request);
    report.certificate.iter_mut().for_each(normalize_certificate);
    report.cookie.iter_mut().for_each(normalize_cookie);
    for d in &mut report.domain {
        if let Some(cert) = d.certificate.as_mut() {
            normalize_certificate(cert);
        }
    }
}
