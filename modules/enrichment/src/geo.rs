use anyhow::{Context, Result};
use ipnet::IpNet;
use scan_core::{Asn, Country};
use serde::Deserialize;
use std::io::Read;
use std::net::IpAddr;
use std::path::Path;
use tracing::debug;

/// One `network,country,iso_code,asn,organization` line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GeoRow {
    pub network: IpNet,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub iso_code: String,
    #[serde(default)]
    pub asn: Option<u32>,
    #[serde(default)]
    pub organization: String,
}

impl GeoRow {
    pub fn country(&self) -> Country {
        Country { name: self.country.clone(), iso: self.iso_code.clone() }
    }

    pub fn asn(&self) -> Option<Asn> {
        self.asn.map(|number| Asn { number, name: self.organization.clone(), network: self.network.to_string() })
    }
}

/// Network ranges ordered most specific first, so the first containing range is the longest prefix.
#[derive(Debug, Clone, Default)]
pub struct GeoTable {
    rows: Vec<GeoRow>,
}

impl GeoTable {
    pub fn load(path: &Path) -> Result<Self> {
        let f = std::fs::File::open(path).with_context(|| format!("opening geo table {}", path.display()))?;
        Self::from_reader(f).with_context(|| format!("reading geo table {}", path.display()))
    }

    pub fn from_reader<R: Read>(r: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).comment(Some(b'#')).from_reader(r);
        let mut rows = Vec::new();
        for (i, rec) in rdr.deserialize::<GeoRow>().enumerate() {
            rows.push(rec.with_context(|| format!("row {}", i + 1))?);
        }
        rows.sort_by(|a, b| b.network.prefix_len().cmp(&a.network.prefix_len()));
        debug!(ranges = rows.len(), "geo table loaded");
        Ok(GeoTable { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn lookup(&self, ip: IpAddr) -> Option<&GeoRow> {
        self.rows.iter().find(|r| r.network.contains(&ip))
    }
}
