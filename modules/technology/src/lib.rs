//! URL-pattern technology fingerprinting over page tags and requests.

use regex::{Regex, RegexBuilder};
use scan_core::{CorrelatedRequest, Technology};
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

const BUILTIN_PATTERNS: &str = include_str!("../patterns.txt");

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("line {line}: expected `pattern,technology`")]
    Malformed { line: usize },
    #[error("line {line}: invalid pattern: {source}")]
    Regex { line: usize, source: regex::Error },
    #[error("reading patterns: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
struct Pattern {
    regex: Regex,
    technology: String,
}

/// Ordered `(pattern, technology)` table. The first matching pattern names the technology.
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    patterns: Vec<Pattern>,
}

impl Fingerprinter {
    /// Parse `pattern,technology` lines; blank lines and `#` comments are skipped.
    /// The line is split at its first comma.
    pub fn parse(text: &str) -> Result<Self, PatternError> {
        let mut patterns = Vec::new();
        for (i, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (pattern, technology) = line.split_once(',').ok_or(PatternError::Malformed { line: i + 1 })?;
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| PatternError::Regex { line: i + 1, source })?;
            patterns.push(Pattern { regex, technology: technology.trim().to_string() });
        }
        Ok(Fingerprinter { patterns })
    }

    pub fn load(path: &Path) -> Result<Self, PatternError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn builtin() -> Result<Self, PatternError> {
        Self::parse(BUILTIN_PATTERNS)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn identify(&self, url: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|p| p.regex.is_match(url))
            .map(|p| p.technology.as_str())
    }

    /// Technologies referenced by script `src`, link `href` and request URLs, one
    /// entry per name. A later match replaces the URL but keeps the entry's position.
    pub fn detect(&self, html: &str, requests: &[CorrelatedRequest]) -> Vec<Technology> {
        let candidates = attribute_values(html, TagKind::Script)
            .into_iter()
            .chain(attribute_values(html, TagKind::Link))
            .chain(requests.iter().map(|r| r.request_url().to_string()));

        let mut found: Vec<Technology> = Vec::new();
        let mut by_name: HashMap<String, usize> = HashMap::new();
        for url in candidates {
            let Some(name) = self.identify(&url) else { continue };
            match by_name.get(name) {
                Some(&i) => found[i].url = url,
                None => {
                    by_name.insert(name.to_string(), found.len());
                    found.push(Technology { name: name.to_string(), url });
                }
            }
        }
        debug!(count = found.len(), "technologies identified");
        found
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Script,
    Link,
}

fn tag_regex(kind: TagKind) -> &'static Regex {
    static SCRIPT: OnceLock<Regex> = OnceLock::new();
    static LINK: OnceLock<Regex> = OnceLock::new();
    let (cell, pattern) = match kind {
        TagKind::Script => (&SCRIPT, r"(?is)<script\b[^>]*>"),
        TagKind::Link => (&LINK, r"(?is)<link\b[^>]*>"),
    };
    cell.get_or_init(|| Regex::new(pattern).expect("tag pattern compiles"))
}

fn attr_regex(kind: TagKind) -> &'static Regex {
    static SRC: OnceLock<Regex> = OnceLock::new();
    static HREF: OnceLock<Regex> = OnceLock::new();
    let (cell, pattern) = match kind {
        TagKind::Script => (&SRC, r#"(?i)\ssrc\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#),
        TagKind::Link => (&HREF, r#"(?i)\shref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#),
    };
    cell.get_or_init(|| Regex::new(pattern).expect("attribute pattern compiles"))
}

/// Opening `<script>` or `<link>` tags of a document, verbatim.
pub fn opening_tags(html: &str, kind: TagKind) -> Vec<String> {
    tag_regex(kind).find_iter(html).map(|m| m.as_str().to_string()).collect()
}

/// `src` of every script tag or `href` of every link tag that has one.
pub fn attribute_values(html: &str, kind: TagKind) -> Vec<String> {
    let attr = attr_regex(kind);
    tag_regex(kind)
        .find_iter(html)
        .filter_map(|tag| {
            let caps = attr.captures(tag.as_str())?;
            let v = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3))?;
            Some(v.as_str().to_string())
        })
        .filter(|v| !v.is_empty())
        .collect()
}
