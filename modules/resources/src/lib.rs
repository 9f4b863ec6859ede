//! Content-addressed extraction of response bodies.

use base64::Engine;
use scan_core::{CorrelatedRequest, Resource, ResourceRef, ResourceTable};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

pub const RESOURCES_INDEX: &str = "resources";

/// Hex SHA-256 of raw body bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut sha = Sha256::new();
    sha.update(bytes);
    hex::encode(sha.finalize())
}

#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// One entry per request whose body was fetched; hashes may repeat.
    pub mapping: Vec<ResourceRef>,
    /// One entry per distinct hash.
    pub table: ResourceTable,
}

/// Fetch the body of every response-bearing request and index it by content hash.
/// Requests whose body cannot be fetched are skipped.
pub fn extract<F>(requests: &[CorrelatedRequest], mut fetch_body: F, report_id: &str, submission_url: &str) -> Extraction
where
    F: FnMut(&str) -> Option<Vec<u8>>,
{
    let mut out = Extraction::default();
    for r in requests {
        let Some(response) = &r.response else { continue };
        let Some(bytes) = fetch_body(&r.request_id) else {
            trace!(request_id = %r.request_id, "no retrievable body");
            continue;
        };
        let sha256 = content_hash(&bytes);
        let mime_type = response.mime_type().to_string();
        out.mapping.push(ResourceRef { sha256: sha256.clone(), url: r.request_url().to_string(), mime_type: mime_type.clone() });
        if out.table.contains(&sha256) {
            debug!(%sha256, url = r.request_url(), "duplicate content, referencing existing resource");
            continue;
        }
        let (raw_data, base64_encoded) = body_text(bytes);
        out.table.insert(Resource {
            sha256,
            mime_type,
            raw_data,
            base64_encoded,
            request_id: r.request_id.clone(),
            report_id: report_id.to_string(),
            submission_url: submission_url.to_string(),
            resource_url: response.url().to_string(),
        });
    }
    out
}

fn body_text(bytes: Vec<u8>) -> (String, bool) {
    match String::from_utf8(bytes) {
        Ok(s) => (s, false),
        Err(e) => (base64::engine::general_purpose::STANDARD.encode(e.as_bytes()), true),
    }
}

/// Which resource mime types are persisted beyond the report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourcePolicy {
    pub save_images: bool,
    pub save_css: bool,
}

impl ResourcePolicy {
    pub fn admits(&self, mime_type: &str) -> bool {
        let m = mime_type.to_ascii_lowercase();
        if m.contains("image") && !self.save_images {
            return false;
        }
        if m.contains("css") && !self.save_css {
            return false;
        }
        true
    }
}

/// Stored form of a resource, keyed elsewhere by its hash.
pub fn resource_document(resource: &Resource, date: &str, feed: &str, tag: &str) -> Value {
    json!({
        "sha256": resource.sha256,
        "mime_type": resource.mime_type,
        "raw_data": resource.raw_data,
        "base64_encoded": resource.base64_encoded,
        "report_id": resource.report_id,
        "submission_url": resource.submission_url,
        "resource_url": resource.resource_url,
        "date": date,
        "feed": feed,
        "tag": if tag.is_empty() { Vec::<&str>::new() } else { vec![tag] },
    })
}
