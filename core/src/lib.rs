//! Core types and collaborator interfaces shared by the scan report engine.

pub mod collab;
pub mod domain;
pub mod error;
pub mod model;
pub mod stamp;
pub mod store;
pub mod tally;

pub use collab::{BrowserDriver, BrowserLauncher, CommunityApi, EnrichmentProvider, Navigation, ReportStore, Versioned, WriteCondition};
pub use domain::{extract_domain, DomainParts};
pub use error::{EnrichmentError, NavigationError, SinkError, StoreError};
pub use model::*;
pub use stamp::Stamp;
pub use store::MemoryStore;
pub use tally::{Tally, UrlOutcome, DELIVERY_FAILED};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Encode an identity (domain name, IP, URL) as a store document id.
pub fn identity_key(identity: &str) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(identity.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!version().is_empty());
    }

    #[test]
    fn identity_key_is_standard_base64() {
        assert_eq!(identity_key("example.com"), "ZXhhbXBsZS5jb20=");
        assert_eq!(identity_key("10.0.0.1"), "MTAuMC4wLjE=");
    }
}
