//! Local `EnrichmentProvider`: DNS through the host's nameservers, CSV table for IP geo data.

mod geo;
mod resolver;

pub use geo::{GeoRow, GeoTable};
pub use resolver::{collect_records, DnsResolver, RecordSource};

use scan_core::{Asn, Country, EnrichmentError, EnrichmentProvider};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

/// Enrichment that needs no network service beyond DNS.
/// Without a geo table every IP is unknown.
pub struct LocalEnrichment {
    dns: Box<dyn RecordSource>,
    geo: Option<GeoTable>,
}

impl LocalEnrichment {
    pub fn new(dns: impl RecordSource + 'static, geo: Option<GeoTable>) -> Self {
        LocalEnrichment { dns: Box::new(dns), geo }
    }
}

impl EnrichmentProvider for LocalEnrichment {
    fn dns_records(&self, domain: &str, record_types: &[&str]) -> Result<BTreeMap<String, BTreeSet<String>>, EnrichmentError> {
        collect_records(self.dns.as_ref(), domain, record_types)
    }

    fn country_of(&self, ip: IpAddr) -> Option<Country> {
        self.geo.as_ref()?.lookup(ip).map(GeoRow::country)
    }

    fn asn_of(&self, ip: IpAddr) -> Option<Asn> {
        self.geo.as_ref()?.lookup(ip).and_then(GeoRow::asn)
    }
}
