//! Folding freshly built rollups into their persisted history.
//!
//! The merge functions are pure: given the fresh rollup, the prior record (if
//! any) and the current stamp they produce the record to persist. History is
//! additive: resources and set-valued fields only grow, scalars take the fresh
//! value, and `first_seen_utc` is fixed by the first write.

mod engine;

pub use engine::{KeyLocks, MergeEngine, MergeError, MergeOutcome, Merged};

use scan_core::{DomainRollup, ResourceRef, ServerRollup, Stamp};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub const DOMAINS_INDEX: &str = "domains";
pub const SERVERS_INDEX: &str = "servers";

/// A rollup persisted under its identity in one store index.
pub trait Rollup: Serialize + DeserializeOwned + Clone {
    const INDEX: &'static str;

    /// Domain name or IP address.
    fn identity(&self) -> &str;

    fn merge_with(self, prior: Option<&Self>, now: &Stamp) -> Self;
}

impl Rollup for DomainRollup {
    const INDEX: &'static str = DOMAINS_INDEX;

    fn identity(&self) -> &str {
        &self.name
    }

    fn merge_with(self, prior: Option<&Self>, now: &Stamp) -> Self {
        merge_domain(self, prior, now)
    }
}

impl Rollup for ServerRollup {
    const INDEX: &'static str = SERVERS_INDEX;

    fn identity(&self) -> &str {
        &self.ip
    }

    fn merge_with(self, prior: Option<&Self>, now: &Stamp) -> Self {
        merge_server(self, prior, now)
    }
}

/// Append the prior resources whose hash the fresh list lacks.
fn union_resources(fresh: &mut Vec<ResourceRef>, prior: &[ResourceRef]) {
    for p in prior {
        if !fresh.iter().any(|r| r.sha256 == p.sha256) {
            fresh.push(p.clone());
        }
    }
}

fn first_seen(prior: Option<&Option<String>>, now: &Stamp) -> Option<String> {
    prior.cloned().flatten().or_else(|| Some(now.utc.clone()))
}

pub fn merge_domain(mut fresh: DomainRollup, prior: Option<&DomainRollup>, now: &Stamp) -> DomainRollup {
    fresh.first_seen_utc = first_seen(prior.map(|p| &p.first_seen_utc), now);
    fresh.last_update_utc = Some(now.utc.clone());
    fresh.last_update = Some(now.date.clone());
    let Some(p) = prior else { return fresh };

    union_resources(&mut fresh.resource, &p.resource);
    fresh.sub_domain.extend(p.sub_domain.iter().cloned());
    fresh.dns.union_with(&p.dns);
    fresh
}

pub fn merge_server(mut fresh: ServerRollup, prior: Option<&ServerRollup>, now: &Stamp) -> ServerRollup {
    fresh.first_seen_utc = first_seen(prior.map(|p| &p.first_seen_utc), now);
    fresh.last_update_utc = Some(now.utc.clone());
    fresh.last_update = Some(now.date.clone());
    let Some(p) = prior else { return fresh };

    union_resources(&mut fresh.resource, &p.resource);
    fresh.domain.extend(p.domain.iter().cloned());
    fresh.server.extend(p.server.iter().cloned());
    fresh
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn res(hash: &str) -> ResourceRef {
        ResourceRef { sha256: hash.into(), url: format!("https://example.com/{hash}"), mime_type: "text/javascript".into() }
    }

    fn domain(subs: &[&str], hashes: &[&str]) -> DomainRollup {
        DomainRollup {
            name: "example.com".into(),
            ip: "192.0.2.1".into(),
            sub_domain: set(subs),
            resource: hashes.iter().map(|h| res(h)).collect(),
            ..Default::default()
        }
    }

    fn at(secs: i64) -> Stamp {
        Stamp::from_unix(secs).unwrap()
    }

    #[test]
    fn new_entity_gets_first_seen_now() {
        let now = at(1_700_000_000);
        let m = merge_domain(domain(&["www"], &[]), None, &now);
        assert_eq!(m.first_seen_utc.as_deref(), Some("2023-11-14 22:13:20"));
        assert_eq!(m.last_update_utc, m.first_seen_utc);
        assert_eq!(m.last_update.as_deref(), Some("2023-11-14"));
    }

    #[test]
    fn set_fields_union_and_stay_unioned() {
        let now = at(1_700_000_000);
        let prior = merge_domain(domain(&["api"], &[]), None, &at(1_600_000_000));
        let merged = merge_domain(domain(&["www"], &[]), Some(&prior), &now);
        assert_eq!(merged.sub_domain, set(&["api", "www"]));
        let again = merge_domain(domain(&["www"], &[]), Some(&merged), &now);
        assert_eq!(again.sub_domain, set(&["api", "www"]));
    }

    #[test]
    fn merge_is_idempotent() {
        let now = at(1_700_000_000);
        let mut prior = domain(&["api"], &["p1", "shared"]);
        prior.dns.records = BTreeMap::from([("a".to_string(), set(&["192.0.2.9"]))]);
        let prior = merge_domain(prior, None, &at(1_600_000_000));

        let mut fresh = domain(&["www"], &["shared", "r1"]);
        fresh.dns.records = BTreeMap::from([("a".to_string(), set(&["192.0.2.1"])), ("mx".to_string(), set(&["mail.example.com"]))]);

        let once = merge_domain(fresh.clone(), Some(&prior), &now);
        let twice = merge_domain(fresh, Some(&once), &now);
        assert_eq!(once, twice);
        let hashes: Vec<_> = once.resource.iter().map(|r| r.sha256.as_str()).collect();
        assert_eq!(hashes, vec!["shared", "r1", "p1"]);
        assert_eq!(once.dns.records["a"], set(&["192.0.2.1", "192.0.2.9"]));
    }

    #[test]
    fn first_seen_never_moves() {
        let created = merge_domain(domain(&[], &[]), None, &at(1_600_000_000));
        let mut history = created.clone();
        for secs in [1_650_000_000, 1_700_000_000] {
            history = merge_domain(domain(&[], &[]), Some(&history), &at(secs));
        }
        assert_eq!(history.first_seen_utc, created.first_seen_utc);
        assert_eq!(history.last_update_utc.as_deref(), Some("2023-11-14 22:13:20"));
    }

    #[test]
    fn scalars_take_fresh_values() {
        let mut prior = domain(&[], &[]);
        prior.ip = "198.51.100.1".into();
        prior.root = true;
        prior.mime_type = set(&["image/png"]);
        let m = merge_domain(domain(&[], &[]), Some(&prior), &at(0));
        assert_eq!(m.ip, "192.0.2.1");
        assert!(!m.root);
        assert!(m.mime_type.is_empty());
    }

    #[test]
    fn server_merge_unions_domains_and_server_headers() {
        let now = at(1_700_000_000);
        let prior = ServerRollup {
            ip: "192.0.2.1".into(),
            domain: set(&["old.test"]),
            server: set(&["apache"]),
            resource: vec![res("p")],
            first_seen_utc: Some("2020-01-01 00:00:00".into()),
            ..Default::default()
        };
        let fresh = ServerRollup { ip: "192.0.2.1".into(), domain: set(&["new.test"]), server: set(&["nginx"]), resource: vec![res("r")], ..Default::default() };
        let once = merge_server(fresh.clone(), Some(&prior), &now);
        assert_eq!(once.domain, set(&["new.test", "old.test"]));
        assert_eq!(once.server, set(&["apache", "nginx"]));
        assert_eq!(once.resource.len(), 2);
        assert_eq!(once.first_seen_utc.as_deref(), Some("2020-01-01 00:00:00"));
        assert_eq!(merge_server(fresh, Some(&once), &now), once);
    }
}
