//! Registrable-domain extraction following public suffix list semantics.

use serde::{Deserialize, Serialize};
use url::{Host, Url};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainParts {
    /// Registrable domain, e.g. `example.co.uk`. For IP hosts this is the address itself.
    pub domain: String,
    /// Labels left of the registrable domain, e.g. `shop.sub`.
    pub subdomain: String,
    /// Public suffix, e.g. `co.uk`.
    pub suffix: String,
}

impl DomainParts {
    pub fn is_empty(&self) -> bool {
        self.domain.is_empty()
    }
}

/// Split the network location of `url` into registrable domain, subdomain and suffix.
/// Unparseable URLs and URLs without a host yield empty parts.
pub fn extract_domain(url: &str) -> DomainParts {
    let Ok(parsed) = Url::parse(url) else { return DomainParts::default(); };
    match parsed.host() {
        Some(Host::Domain(d)) => split_host(d),
        Some(Host::Ipv4(ip)) => DomainParts { domain: ip.to_string(), ..Default::default() },
        Some(Host::Ipv6(ip)) => DomainParts { domain: ip.to_string(), ..Default::default() },
        None => DomainParts::default(),
    }
}

/// Split a bare host name. Hosts with no registrable part (a bare suffix, `localhost`)
/// are kept whole as the domain so they still group.
pub fn split_host(host: &str) -> DomainParts {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() {
        return DomainParts::default();
    }
    let suffix = psl::suffix_str(&host).unwrap_or("").to_string();
    match psl::domain_str(&host) {
        Some(domain) => {
            let subdomain = host
                .strip_suffix(domain)
                .map(|rest| rest.trim_end_matches('.'))
                .unwrap_or("")
                .to_string();
            DomainParts { domain: domain.to_string(), subdomain, suffix }
        }
        None => DomainParts { domain: host.clone(), subdomain: String::new(), suffix },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_label_suffix() {
        let p = extract_domain("https://shop.sub.example.co.uk/path");
        assert_eq!(p.domain, "example.co.uk");
        assert_eq!(p.subdomain, "shop.sub");
        assert_eq!(p.suffix, "co.uk");
    }

    #[test]
    fn plain_domain_has_no_subdomain() {
        let p = extract_domain("http://example.com:8080/a?b=c");
        assert_eq!(p.domain, "example.com");
        assert_eq!(p.subdomain, "");
        assert_eq!(p.suffix, "com");
    }

    #[test]
    fn host_case_and_trailing_dot_are_ignored() {
        let p = extract_domain("https://WWW.Example.COM./");
        assert_eq!(p.domain, "example.com");
        assert_eq!(p.subdomain, "www");
    }

    #[test]
    fn ip_hosts_are_their_own_domain() {
        let p = extract_domain("http://192.0.2.7/x.js");
        assert_eq!(p.domain, "192.0.2.7");
        assert!(p.subdomain.is_empty() && p.suffix.is_empty());
    }

    #[test]
    fn unparseable_input_is_empty() {
        assert!(extract_domain("not a url").is_empty());
        assert!(extract_domain("data:text/plain,hi").is_empty());
    }
}
