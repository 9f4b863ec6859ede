use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use scan_core::{CommunityApi, SinkError};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_COMMUNITY_URL: &str = "https://community.webamon.co.uk";

/// Community submission API over HTTPS, authenticated with an `x-api-key` header.
///
/// Uses the blocking client: calls are made from scan worker threads, never
/// from async tasks.
pub struct HttpCommunityClient {
    client: Client,
    base: String,
    api_key: String,
}

impl HttpCommunityClient {
    pub fn new(base: &str, api_key: &str, timeout: Duration) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .build()
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        Ok(HttpCommunityClient { client, base: base.trim_end_matches('/').to_string(), api_key: api_key.to_string() })
    }

    fn post(&self, path: &str, body: &Value) -> Result<Value, SinkError> {
        let url = format!("{}/{}", self.base, path);
        debug!(%url, "community request");
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(body)
            .send()
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        read_response(resp)
    }
}

fn read_response(resp: Response) -> Result<Value, SinkError> {
    let status = resp.status();
    match status {
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => Err(SinkError::Unauthorized),
        s if s.is_success() => resp.json::<Value>().map_err(|e| SinkError::Transport(e.to_string())),
        s => {
            let text = resp.text().unwrap_or_default();
            Err(SinkError::Rejected(format!("{s}: {text}")))
        }
    }
}

/// `{"resources": [{"sha256": .., "exists": ..}]}` into a hash -> exists map.
pub fn parse_existence(body: &Value) -> Result<HashMap<String, bool>, SinkError> {
    let list = body
        .get("resources")
        .and_then(Value::as_array)
        .ok_or_else(|| SinkError::Rejected("resource check response has no `resources` list".into()))?;
    Ok(list
        .iter()
        .filter_map(|r| {
            let sha = r.get("sha256")?.as_str()?;
            Some((sha.to_string(), r.get("exists").and_then(Value::as_bool).unwrap_or(false)))
        })
        .collect())
}

impl CommunityApi for HttpCommunityClient {
    fn check_resource_existence(&self, hashes: &[String]) -> Result<HashMap<String, bool>, SinkError> {
        let body = self.post("resource-check", &json!({ "sha256_list": hashes }))?;
        parse_existence(&body)
    }

    fn save_resource(&self, document: &Value) -> Result<(), SinkError> {
        self.post("save-resource", document).map(|_| ())
    }

    fn save_report(&self, document: &Value) -> Result<Value, SinkError> {
        self.post("save-report", document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existence_list_becomes_map() {
        let body = json!({"resources": [{"sha256": "a", "exists": true}, {"sha256": "b", "exists": false}, {"exists": true}]});
        let m = parse_existence(&body).unwrap();
        assert_eq!(m.len(), 2);
        assert_eq!(m["a"], true);
        assert_eq!(m["b"], false);
        assert!(matches!(parse_existence(&json!({"error": "x"})), Err(SinkError::Rejected(_))));
    }

    #[test]
    fn client_trims_base() {
        let c = HttpCommunityClient::new("https://community.example/", "k", Duration::from_secs(1)).unwrap();
        assert_eq!(c.base, "https://community.example");
    }
}
