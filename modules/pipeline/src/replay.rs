//! A `BrowserDriver` that replays recorded page captures instead of driving a browser.
//!
//! A capture is one JSON file:
//!
//! ```json
//! {
//!   "url": "https://example.com/",
//!   "final_url": "https://www.example.com/",
//!   "title": "Example", "dom": "<html>...</html>", "cookies": [],
//!   "events": [{"method": "Network.requestWillBeSent", "params": {...}}],
//!   "bodies": {"1000.1": "text body", "1000.2": {"base64": "iVBORw0..."}},
//!   "screenshot": "<base64>",
//!   "error": "unknown error: net::ERR_NAME_NOT_RESOLVED",
//!   "load_ms": 1200
//! }
//! ```
//!
//! `events` accepts both plain protocol events and performance-log entries.

use anyhow::{Context, Result};
use base64::Engine;
use scan_core::{BrowserDriver, BrowserLauncher, Navigation, NavigationError, Payload, TraceEvent};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Body {
    Text(String),
    Encoded { base64: String },
}

impl Body {
    fn bytes(&self) -> Option<Vec<u8>> {
        match self {
            Body::Text(s) => Some(s.as_bytes().to_vec()),
            Body::Encoded { base64 } => base64::engine::general_purpose::STANDARD.decode(base64).ok(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Capture {
    pub url: String,
    #[serde(default)]
    pub final_url: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub dom: String,
    #[serde(default)]
    pub cookies: Vec<Payload>,
    #[serde(default)]
    pub events: Vec<Value>,
    #[serde(default)]
    pub bodies: HashMap<String, Body>,
    #[serde(default)]
    pub screenshot: Option<String>,
    /// Driver error message to fail navigation with.
    #[serde(default)]
    pub error: Option<String>,
    /// Recorded page load time; loads slower than the scan timeout time out.
    #[serde(default)]
    pub load_ms: u64,
}

/// Captures keyed by submission URL.
#[derive(Debug, Default)]
pub struct CaptureSet {
    by_url: HashMap<String, Arc<Capture>>,
}

impl CaptureSet {
    pub fn new(captures: Vec<Capture>) -> Self {
        let by_url = captures.into_iter().map(|c| (url_key(&c.url), Arc::new(c))).collect();
        CaptureSet { by_url }
    }

    /// Load a single capture file, or every `*.json` file of a directory.
    pub fn load(path: &Path) -> Result<Self> {
        let mut captures = Vec::new();
        if path.is_dir() {
            let mut files: Vec<_> = std::fs::read_dir(path)
                .with_context(|| format!("listing {}", path.display()))?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|x| x == "json"))
                .collect();
            files.sort();
            for f in files {
                captures.push(read_capture(&f)?);
            }
        } else {
            captures.push(read_capture(path)?);
        }
        debug!(captures = captures.len(), path = %path.display(), "captures loaded");
        Ok(Self::new(captures))
    }

    pub fn len(&self) -> usize {
        self.by_url.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_url.is_empty()
    }

    pub fn get(&self, url: &str) -> Option<Arc<Capture>> {
        self.by_url.get(&url_key(url)).cloned()
    }
}

fn read_capture(path: &Path) -> Result<Capture> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing capture {}", path.display()))
}

fn url_key(url: &str) -> String {
    crate::normalize_submission_url(url).trim_end_matches('/').to_ascii_lowercase()
}

pub struct ReplayDriver {
    captures: Arc<CaptureSet>,
    current: Option<Arc<Capture>>,
}

impl ReplayDriver {
    pub fn new(captures: Arc<CaptureSet>) -> Self {
        ReplayDriver { captures, current: None }
    }
}

impl BrowserDriver for ReplayDriver {
    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<Navigation, NavigationError> {
        self.current = None;
        let capture = self
            .captures
            .get(url)
            .ok_or_else(|| NavigationError::Driver(format!("no capture recorded for {url}")))?;
        if let Some(msg) = &capture.error {
            return Err(NavigationError::from_driver_message(msg));
        }
        if capture.load_ms > timeout.as_millis() as u64 {
            return Err(NavigationError::Timeout(timeout.as_secs()));
        }
        let nav = Navigation {
            final_url: capture.final_url.clone().unwrap_or_else(|| capture.url.clone()),
            dom: capture.dom.clone(),
            title: capture.title.clone(),
            cookies: capture.cookies.clone(),
        };
        self.current = Some(capture);
        Ok(nav)
    }

    fn trace_events(&mut self) -> Vec<TraceEvent> {
        self.current.as_ref().map(|c| correlator::parse_trace(&c.events)).unwrap_or_default()
    }

    fn fetch_body(&mut self, request_id: &str) -> Option<Vec<u8>> {
        self.current.as_ref()?.bodies.get(request_id)?.bytes()
    }

    fn screenshot(&mut self) -> Option<Vec<u8>> {
        let encoded = self.current.as_ref()?.screenshot.as_ref()?;
        match base64::engine::general_purpose::STANDARD.decode(encoded) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(error = %e, "recorded screenshot is not base64");
                None
            }
        }
    }
}

/// Hands every worker its own replay session over the shared capture set.
pub struct ReplayLauncher {
    captures: Arc<CaptureSet>,
}

impl ReplayLauncher {
    pub fn new(captures: Arc<CaptureSet>) -> Self {
        ReplayLauncher { captures }
    }
}

impl BrowserLauncher for ReplayLauncher {
    fn launch(&self) -> Result<Box<dyn BrowserDriver>> {
        Ok(Box::new(ReplayDriver::new(self.captures.clone())))
    }
}
