use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Options shared by `scan` and `batch`. Command-line and environment values take precedence.
#[derive(Debug, Default, Deserialize, Clone)]
pub struct EngineConfig {
    pub captures: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub tag: Option<String>,
    pub feed: Option<String>,
    pub source: Option<String>,
    pub dns: Option<String>,
    pub record_types: Option<Vec<String>>,
    pub save_dom: Option<bool>,
    pub save_resources: Option<bool>,
    pub save_images: Option<bool>,
    pub save_css: Option<bool>,
    pub save_screenshot: Option<bool>,
    pub community: Option<bool>,
    pub community_url: Option<String>,
    pub api_key: Option<String>,
    pub store: Option<PathBuf>,
    pub patterns: Option<PathBuf>,
    pub geo: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct BatchConfig {
    pub url: Option<String>,
    pub urls: Option<PathBuf>,
    pub threads: Option<usize>,
    pub skip_if_exists: Option<bool>,
    pub feed_url: Option<String>,
    pub query: Option<String>,
    pub query_index: Option<String>,
    pub query_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Clone)]
pub struct Config {
    pub engine: Option<EngineConfig>,
    pub batch: Option<BatchConfig>,
}

/// Load `path`, or `./sandbox.yaml` when no path is given and the file exists.
pub fn load_config(path: Option<&Path>) -> Result<Option<Config>> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new("sandbox.yaml");
            if p.exists() { p.to_path_buf() } else { return Ok(None); }
        }
    };
    let s = fs::read_to_string(&path).with_context(|| format!("reading config {}", path.display()))?;
    let cfg = serde_yaml::from_str(&s).with_context(|| format!("parsing config {}", path.display()))?;
    Ok(Some(cfg))
}
