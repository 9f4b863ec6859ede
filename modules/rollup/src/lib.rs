//! Per-domain and per-IP aggregates of one scan's correlated traffic.

use scan_core::{
    extract_domain, Asn, Certificate, CorrelatedRequest, Country, DnsRecords, DomainRollup, EnrichmentProvider,
    RequestSummary, ResourceRef, ServerRollup,
};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::RwLock;
use tracing::{debug, warn};

pub const DEFAULT_RECORD_TYPES: [&str; 8] = ["A", "AAAA", "MX", "NS", "TXT", "CNAME", "SOA", "PTR"];

/// Which domain rollups get DNS records attached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DnsScope {
    All,
    /// Only the domain of the page's final URL.
    #[default]
    Root,
    None,
}

impl FromStr for DnsScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ALL" => Ok(DnsScope::All),
            "MAIN" | "ROOT" => Ok(DnsScope::Root),
            "NONE" => Ok(DnsScope::None),
            other => Err(format!("unknown dns scope `{other}` (expected ALL, MAIN or NONE)")),
        }
    }
}

/// IP -> country/ASN answers, shared by every worker of a run. Misses are cached too.
#[derive(Debug, Default)]
pub struct GeoCache {
    entries: RwLock<HashMap<IpAddr, (Option<Country>, Option<Asn>)>>,
}

impl GeoCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, ip: IpAddr, provider: &dyn EnrichmentProvider) -> (Option<Country>, Option<Asn>) {
        if let Some(hit) = self.entries.read().unwrap_or_else(|p| p.into_inner()).get(&ip) {
            return hit.clone();
        }
        let answer = (provider.country_of(ip), provider.asn_of(ip));
        if answer.0.is_none() && answer.1.is_none() {
            debug!(%ip, "no geo data");
        }
        self.entries
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .entry(ip)
            .or_insert(answer)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct RollupBuilder<'a> {
    enrichment: &'a dyn EnrichmentProvider,
    geo: &'a GeoCache,
    dns_scope: DnsScope,
    record_types: Vec<String>,
}

impl<'a> RollupBuilder<'a> {
    pub fn new(enrichment: &'a dyn EnrichmentProvider, geo: &'a GeoCache) -> Self {
        RollupBuilder {
            enrichment,
            geo,
            dns_scope: DnsScope::default(),
            record_types: DEFAULT_RECORD_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn dns_scope(mut self, scope: DnsScope) -> Self {
        self.dns_scope = scope;
        self
    }

    pub fn record_types(mut self, types: Vec<String>) -> Self {
        self.record_types = types;
        self
    }

    /// One rollup per registrable domain seen among response-bearing requests, in
    /// order of first appearance. `resolved_url` decides which domain is the root.
    pub fn build_domains(
        &self,
        requests: &[CorrelatedRequest],
        resources: &[ResourceRef],
        certificates: &[Certificate],
        resolved_url: &str,
    ) -> Vec<DomainRollup> {
        let root_domain = extract_domain(resolved_url).domain;

        let mut names: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for r in requests.iter().filter(|r| r.response.is_some()) {
            let d = extract_domain(r.request_url()).domain;
            if !d.is_empty() && seen.insert(d.clone()) {
                names.push(d);
            }
        }

        names
            .into_iter()
            .map(|name| {
                let root = !root_domain.is_empty() && name == root_domain;
                self.build_domain(name, root, requests, resources, certificates)
            })
            .collect()
    }

    fn build_domain(
        &self,
        name: String,
        root: bool,
        requests: &[CorrelatedRequest],
        resources: &[ResourceRef],
        certificates: &[Certificate],
    ) -> DomainRollup {
        let mut d = DomainRollup { name, root, ..Default::default() };

        for r in requests {
            let Some(resp) = &r.response else { continue };
            let parts = extract_domain(resp.url());
            if parts.domain != d.name {
                continue;
            }
            if !parts.subdomain.is_empty() {
                d.sub_domain.insert(parts.subdomain);
            }
            if d.tld.is_empty() {
                d.tld = parts.suffix;
            }
            if d.ip.is_empty() {
                d.ip = resp.remote_ip().to_string();
            }
            if d.server.is_empty() {
                if let Some(server) = resp.header("server").filter(|s| !s.is_empty()) {
                    d.server = server;
                }
            }
            let mime = resp.mime_type();
            if !mime.is_empty() {
                d.mime_type.insert(mime.to_string());
            }
            let status = resp.status();
            if let Some(code) = status {
                d.response_code.insert(code);
            }
            let size = resp.encoded_data_length();
            d.total_response_size += size;
            d.request.push(RequestSummary {
                url: resp.url().to_string(),
                mime_type: mime.to_string(),
                ip: resp.remote_ip().to_string(),
                response_code: status,
                encoded_data_length: size,
            });
        }
        d.request_count = d.request.len();

        let mut hashes = HashSet::new();
        for res in resources {
            if extract_domain(&res.url).domain == d.name && hashes.insert(res.sha256.clone()) {
                d.resource.push(res.clone());
            }
        }

        d.certificate = certificates.iter().find(|c| c.domain_name == d.name).cloned();
        d.hosting_scripts = d.mime_type.iter().any(|m| m.contains("script"));
        d.dns = self.dns_for(&d.name, root);

        if let Ok(ip) = d.ip.parse::<IpAddr>() {
            let (country, asn) = self.geo.lookup(ip, self.enrichment);
            d.country = country;
            d.asn = asn;
        }
        d
    }

    fn dns_for(&self, domain: &str, root: bool) -> DnsRecords {
        let wanted = match self.dns_scope {
            DnsScope::All => true,
            DnsScope::Root => root,
            DnsScope::None => false,
        };
        if !wanted {
            return DnsRecords::default();
        }
        let types: Vec<&str> = self.record_types.iter().map(String::as_str).collect();
        match self.enrichment.dns_records(domain, &types) {
            Ok(records) => DnsRecords { records, error: None },
            Err(e) => {
                warn!(%domain, error = %e, "dns lookup failed");
                DnsRecords::failed(e.to_string())
            }
        }
    }
}

/// Group domain rollups by IP. Domains without an IP are not attributed to any server.
pub fn build_servers(domains: &[DomainRollup]) -> Vec<ServerRollup> {
    let mut servers: Vec<ServerRollup> = Vec::new();
    let mut by_ip: HashMap<&str, usize> = HashMap::new();

    for d in domains.iter().filter(|d| !d.ip.is_empty()) {
        let s = match by_ip.get(d.ip.as_str()) {
            Some(&i) => &mut servers[i],
            None => {
                by_ip.insert(&d.ip, servers.len());
                servers.push(ServerRollup {
                    ip: d.ip.clone(),
                    country: d.country.clone(),
                    asn: d.asn.clone(),
                    ..Default::default()
                });
                let last = servers.len() - 1;
                &mut servers[last]
            }
        };
        s.domain.insert(d.name.clone());
        if !d.server.is_empty() {
            s.server.insert(d.server.clone());
        }
        s.hosting_scripts |= d.hosting_scripts;
        s.mime_type.extend(d.mime_type.iter().cloned());
        s.response_code.extend(d.response_code.iter().copied());
        s.total_response_size += d.total_response_size;
        for res in &d.resource {
            if !s.resource.iter().any(|r| r.sha256 == res.sha256) {
                s.resource.push(res.clone());
            }
        }
    }
    servers
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan_core::{EnrichmentError, Payload};
    use serde_json::json;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeEnrichment {
        geo_calls: AtomicUsize,
        dns_calls: AtomicUsize,
    }

    impl EnrichmentProvider for FakeEnrichment {
        fn dns_records(&self, domain: &str, types: &[&str]) -> Result<BTreeMap<String, BTreeSet<String>>, EnrichmentError> {
            self.dns_calls.fetch_add(1, Ordering::SeqCst);
            if domain == "nx.test" {
                return Err(EnrichmentError::NotFound);
            }
            Ok(types.iter().take(1).map(|t| (t.to_ascii_lowercase(), BTreeSet::from(["192.0.2.1".to_string()]))).collect())
        }

        fn country_of(&self, _ip: IpAddr) -> Option<Country> {
            self.geo_calls.fetch_add(1, Ordering::SeqCst);
            Some(Country { name: "Testland".into(), iso: "TL".into() })
        }

        fn asn_of(&self, _ip: IpAddr) -> Option<Asn> {
            None
        }
    }

    fn pair(id: &str, url: &str, mime: &str, ip: &str, status: u16, size: f64, server: &str) -> CorrelatedRequest {
        CorrelatedRequest {
            request_id: id.into(),
            request: Payload::from_value(json!({"url": url})).unwrap(),
            response: Some(
                Payload::from_value(json!({
                    "url": url, "mimeType": mime, "remoteIPAddress": ip, "status": status,
                    "encodedDataLength": size, "headers": {"Server": server}
                }))
                .unwrap(),
            ),
        }
    }

    fn sample() -> Vec<CorrelatedRequest> {
        vec![
            pair("1", "https://www.example.com/", "text/html", "192.0.2.1", 200, 1000.0, ""),
            pair("2", "https://static.example.com/app.js", "application/javascript", "192.0.2.2", 304, 250.5, "nginx"),
            pair("3", "https://cdn.other.org/lib.js", "text/javascript", "198.51.100.9", 200, 10.0, "cloudflare"),
            pair("4", "https://www.example.com/logo.png", "image/png", "192.0.2.1", 200, 49.5, "apache"),
        ]
    }

    #[test]
    fn aggregates_per_registrable_domain() {
        let fake = FakeEnrichment::default();
        let geo = GeoCache::new();
        let resources = vec![
            ResourceRef { sha256: "h1".into(), url: "https://static.example.com/app.js".into(), mime_type: "application/javascript".into() },
            ResourceRef { sha256: "h1".into(), url: "https://www.example.com/copy.js".into(), mime_type: "application/javascript".into() },
            ResourceRef { sha256: "h2".into(), url: "https://cdn.other.org/lib.js".into(), mime_type: "text/javascript".into() },
        ];
        let domains = RollupBuilder::new(&fake, &geo).build_domains(&sample(), &resources, &[], "https://www.example.com/");

        assert_eq!(domains.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(), vec!["example.com", "other.org"]);
        let ex = &domains[0];
        assert!(ex.root);
        assert_eq!(ex.sub_domain, BTreeSet::from(["www".to_string(), "static".to_string()]));
        assert_eq!(ex.ip, "192.0.2.1");
        assert_eq!(ex.server, "nginx");
        assert_eq!(ex.response_code, BTreeSet::from([200, 304]));
        assert_eq!(ex.total_response_size, 1300.0);
        assert_eq!(ex.request_count, 3);
        assert_eq!(ex.resource.len(), 1);
        assert!(ex.hosting_scripts);
        assert_eq!(ex.tld, "com");
        assert_eq!(ex.country.as_ref().map(|c| c.iso.as_str()), Some("TL"));
        assert!(!domains[1].root);
    }

    #[test]
    fn dns_scope_and_failure_marker() {
        let fake = FakeEnrichment::default();
        let geo = GeoCache::new();
        let requests = vec![pair("1", "https://nx.test/", "text/html", "", 200, 1.0, "")];

        let root_only = RollupBuilder::new(&fake, &geo).build_domains(&sample(), &[], &[], "https://www.example.com/");
        assert_eq!(fake.dns_calls.load(Ordering::SeqCst), 1);
        assert!(root_only[0].dns.records.contains_key("a"));
        assert!(root_only[1].dns.records.is_empty());

        let failed = RollupBuilder::new(&fake, &geo).dns_scope(DnsScope::All).build_domains(&requests, &[], &[], "https://nx.test/");
        assert_eq!(failed[0].dns.error.as_deref(), Some("Domain does not exist"));

        let none = RollupBuilder::new(&fake, &geo).dns_scope(DnsScope::None).build_domains(&sample(), &[], &[], "https://www.example.com/");
        assert!(none.iter().all(|d| d.dns == DnsRecords::default()));
        assert_eq!("main".parse::<DnsScope>(), Ok(DnsScope::Root));
    }

    #[test]
    fn geo_lookups_are_cached_per_ip() {
        let fake = FakeEnrichment::default();
        let geo = GeoCache::new();
        let builder = RollupBuilder::new(&fake, &geo).dns_scope(DnsScope::None);
        builder.build_domains(&sample(), &[], &[], "https://www.example.com/");
        builder.build_domains(&sample(), &[], &[], "https://www.example.com/");
        assert_eq!(geo.len(), 2);
        assert_eq!(fake.geo_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn certificate_matches_by_domain() {
        let fake = FakeEnrichment::default();
        let geo = GeoCache::new();
        let cert = Certificate {
            subject_name: "*.other.org".into(),
            domain_name: "other.org".into(),
            sub_domain: "cdn".into(),
            tld: "org".into(),
            valid_from: None,
            valid_to: None,
            valid_from_utc: None,
            valid_to_utc: None,
            details: Default::default(),
        };
        let domains = RollupBuilder::new(&fake, &geo).dns_scope(DnsScope::None).build_domains(&sample(), &[], &[cert], "");
        assert!(domains[0].certificate.is_none());
        assert_eq!(domains[1].certificate.as_ref().map(|c| c.subject_name.as_str()), Some("*.other.org"));
        assert!(domains.iter().all(|d| !d.root));
    }

    #[test]
    fn servers_group_domains_by_ip() {
        let mk = |name: &str, ip: &str, server: &str, mime: &str, size: f64, scripts: bool| DomainRollup {
            name: name.into(),
            ip: ip.into(),
            server: server.into(),
            mime_type: BTreeSet::from([mime.to_string()]),
            response_code: BTreeSet::from([200]),
            total_response_size: size,
            hosting_scripts: scripts,
            resource: vec![ResourceRef { sha256: "same".into(), url: format!("https://{name}/x"), mime_type: mime.into() }],
            ..Default::default()
        };
        let domains = vec![
            mk("a.test", "192.0.2.1", "nginx", "text/html", 10.0, false),
            mk("b.test", "192.0.2.1", "", "application/javascript", 5.0, true),
            mk("c.test", "192.0.2.9", "caddy", "text/css", 1.0, false),
            mk("d.test", "", "iis", "text/html", 1.0, false),
        ];
        let servers = build_servers(&domains);
        assert_eq!(servers.len(), 2);
        let s = &servers[0];
        assert_eq!(s.ip, "192.0.2.1");
        assert_eq!(s.domain, BTreeSet::from(["a.test".to_string(), "b.test".to_string()]));
        assert_eq!(s.server, BTreeSet::from(["nginx".to_string()]));
        assert!(s.hosting_scripts);
        assert_eq!(s.total_response_size, 15.0);
        assert_eq!(s.mime_type.len(), 2);
        assert_eq!(s.resource.len(), 1);
        assert!(!servers[1].hosting_scripts);
    }
}
