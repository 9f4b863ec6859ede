//! Where a batch gets its URLs: one URL, a list file, a public feed, or a
//! query over documents already in the store.

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::Client;
use scan_core::ReportStore;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_FEED_URL: &str = "https://www.openphish.com/feed.txt";
pub const DEFAULT_QUERY_INDEX: &str = "feeds";
pub const DEFAULT_QUERY_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlSource {
    Single(String),
    /// Newline-delimited URLs; blanks and `#` comments are ignored.
    File(PathBuf),
    /// Plain-text feed, one URL per line.
    Feed(String),
    /// Documents of `index` matching `query`; each contributes its `url`, else its `domain`.
    Query { index: String, query: String, size: usize },
}

impl UrlSource {
    pub fn label(&self) -> &'static str {
        match self {
            UrlSource::Single(_) => "url",
            UrlSource::File(_) => "file",
            UrlSource::Feed(_) => "feed",
            UrlSource::Query { .. } => "query",
        }
    }

    /// Blocking; call before entering the batch runtime.
    pub fn collect(&self, store: Option<&dyn ReportStore>, timeout: Duration) -> Result<Vec<String>> {
        let urls = match self {
            UrlSource::Single(url) => vec![url.trim().to_string()],
            UrlSource::File(path) => read_url_file(path)?,
            UrlSource::Feed(url) => fetch_feed(url, timeout)?,
            UrlSource::Query { index, query, size } => {
                let store = store.ok_or_else(|| anyhow!("the query source reads from a store; community submission has none"))?;
                query_store(store, index, query, *size)?
            }
        };
        info!(source = self.label(), urls = urls.len(), "batch urls collected");
        Ok(urls)
    }
}

pub fn parse_url_list(text: &str) -> Vec<String> {
    text.lines().map(str::trim).filter(|l| !l.is_empty() && !l.starts_with('#')).map(str::to_string).collect()
}

pub fn read_url_file(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(parse_url_list(&text))
}

pub fn fetch_feed(url: &str, timeout: Duration) -> Result<Vec<String>> {
    let client = Client::builder()
        .timeout(timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .gzip(true)
        .build()?;
    let resp = client.get(url).send().with_context(|| format!("fetching feed {url}"))?;
    let status = resp.status();
    if !status.is_success() {
        bail!("feed {url} returned {status}");
    }
    Ok(parse_url_list(&resp.text()?))
}

/// `field:value` terms, all of which must hold. A value of `*` only requires
/// the field; `*` alone or an empty query matches everything. Dotted fields
/// reach into nested objects and array fields match when any element does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    terms: Vec<(String, String)>,
}

impl Query {
    pub fn parse(query: &str) -> Result<Self> {
        let mut terms = Vec::new();
        for raw in query.split_whitespace() {
            if raw == "*" {
                continue;
            }
            let (field, value) = raw.split_once(':').ok_or_else(|| anyhow!("query term {raw:?} is not field:value"))?;
            if field.is_empty() || value.is_empty() {
                bail!("query term {raw:?} is not field:value");
            }
            terms.push((field.to_string(), value.trim_matches('"').to_string()));
        }
        Ok(Query { terms })
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.terms.iter().all(|(field, want)| {
            let pointer = format!("/{}", field.replace('.', "/"));
            match doc.pointer(&pointer) {
                None | Some(Value::Null) => false,
                Some(_) if want == "*" => true,
                Some(Value::Array(items)) => items.iter().any(|v| scalar_eq(v, want)),
                Some(v) => scalar_eq(v, want),
            }
        })
    }
}

fn scalar_eq(v: &Value, want: &str) -> bool {
    match v {
        Value::String(s) => s.eq_ignore_ascii_case(want),
        Value::Number(n) => n.to_string() == want,
        Value::Bool(b) => b.to_string() == want,
        _ => false,
    }
}

pub fn query_store(store: &dyn ReportStore, index: &str, query: &str, size: usize) -> Result<Vec<String>> {
    let query = Query::parse(query)?;
    let docs = store.list(index)?;
    let mut urls = Vec::new();
    for (id, doc) in docs.iter().filter(|(_, d)| query.matches(d)) {
        if urls.len() >= size {
            break;
        }
        match doc.get("url").or_else(|| doc.get("domain")).and_then(Value::as_str) {
            Some(u) if !u.trim().is_empty() => urls.push(u.trim().to_string()),
            _ => debug!(%index, %id, "matching document has no url or domain"),
        }
    }
    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan_core::{MemoryStore, WriteCondition};
    use serde_json::json;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 2048];
            let _ = sock.read(&mut buf);
            let resp = format!("HTTP/1.1 {status}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}", body.len());
            sock.write_all(resp.as_bytes()).unwrap();
        });
        format!("http://{addr}/feed.txt")
    }

    fn feeds_store() -> MemoryStore {
        let store = MemoryStore::new();
        let docs = [
            ("1", json!({"url": "https://a.test/login", "tag": ["phish", "bank"], "feed": "openphish"})),
            ("2", json!({"domain": "b.test", "tag": ["phish"], "feed": "urlhaus"})),
            ("3", json!({"url": "https://c.test/", "tag": ["benign"], "feed": "openphish"})),
            ("4", json!({"tag": ["phish"], "feed": "openphish"})),
            ("5", json!({"url": "https://e.test/", "tag": ["phish"], "feed": "openphish", "meta": {"score": 9}})),
        ];
        for (id, doc) in docs {
            store.put(DEFAULT_QUERY_INDEX, id, &doc, WriteCondition::Any).unwrap();
        }
        store
    }

    #[test]
    fn single_and_file_sources() {
        let single = UrlSource::Single(" example.com ".into()).collect(None, Duration::from_secs(1)).unwrap();
        assert_eq!(single, vec!["example.com"]);

        let path = std::env::temp_dir().join(format!("sandbox-urls-{}.txt", std::process::id()));
        std::fs::write(&path, "# daily\na.test\n\n  https://b.test/x  \n#c.test\n").unwrap();
        let listed = UrlSource::File(path.clone()).collect(None, Duration::from_secs(1)).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(listed, vec!["a.test", "https://b.test/x"]);
    }

    #[test]
    fn feed_source_fetches_lines() {
        let url = serve_once("200 OK", "https://a.test/login\n\nhttps://b.test/verify\n");
        let urls = UrlSource::Feed(url).collect(None, Duration::from_secs(5)).unwrap();
        assert_eq!(urls, vec!["https://a.test/login", "https://b.test/verify"]);
    }

    #[test]
    fn feed_errors_surface() {
        let url = serve_once("503 Service Unavailable", "busy");
        assert!(fetch_feed(&url, Duration::from_secs(5)).is_err());
    }

    #[test]
    fn query_source_reads_matching_documents() {
        let store = feeds_store();
        let src = UrlSource::Query { index: DEFAULT_QUERY_INDEX.into(), query: "tag:phish".into(), size: 10 };
        assert_eq!(src.collect(Some(&store as &dyn ReportStore), Duration::from_secs(1)).unwrap(), vec!["https://a.test/login", "b.test", "https://e.test/"]);

        assert_eq!(query_store(&store, DEFAULT_QUERY_INDEX, "tag:phish feed:openphish", 1).unwrap(), vec!["https://a.test/login"]);
        assert_eq!(query_store(&store, DEFAULT_QUERY_INDEX, "meta.score:9", 10).unwrap(), vec!["https://e.test/"]);
        assert_eq!(query_store(&store, DEFAULT_QUERY_INDEX, "*", 10).unwrap().len(), 4);
        assert!(query_store(&store, "missing", "*", 10).unwrap().is_empty());
    }

    #[test]
    fn query_needs_a_store_and_well_formed_terms() {
        let src = UrlSource::Query { index: "feeds".into(), query: "*".into(), size: 1 };
        assert!(src.collect(None, Duration::from_secs(1)).is_err());
        assert!(Query::parse("phish").is_err());
        assert!(Query::parse("tag:").is_err());
        assert!(Query::parse("tag:\"phish\"").unwrap().matches(&json!({"tag": "PHISH"})));
    }
}
