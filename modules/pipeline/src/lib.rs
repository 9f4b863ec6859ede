//! One scan from navigation to delivered documents, and batches of them.

pub mod batch;
pub mod community;
pub mod replay;
pub mod scanner;
pub mod sink;
pub mod sources;

pub use batch::{chunk_list, run_batch, BatchJob, EngineLog};
pub use community::HttpCommunityClient;
pub use replay::{Capture, CaptureSet, ReplayDriver, ReplayLauncher};
pub use scanner::{ScanOutcome, ScanSettings, Scanner};
pub use sink::{Delivery, ReportSink, SinkOptions, StoreSink};
pub use sources::UrlSource;

/// Submissions without an explicit http(s) scheme are scanned over https.
pub fn normalize_submission_url(raw: &str) -> String {
    let url = raw.trim();
    if url.starts_with("https://") || url.starts_with("http://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_hosts_get_https() {
        assert_eq!(normalize_submission_url("example.com/login"), "https://example.com/login");
        assert_eq!(normalize_submission_url(" http://example.com "), "http://example.com");
        assert_eq!(normalize_submission_url("https://example.com"), "https://example.com");
    }
}
