//! HTTP access to the inference engine through the forwarded port.

use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

/// Status and catalog queries against the engine.
pub trait EngineEndpoint: Send + Sync {
    /// `Ok` when `url` answers with a 2xx status.
    fn status(&self, url: &str) -> impl Future<Output = Result<(), String>> + Send;

    /// Model names listed at `url`.
    fn models(&self, url: &str) -> impl Future<Output = Result<Vec<String>, String>> + Send;
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    client: reqwest::Client,
}

impl HttpEndpoint {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl EngineEndpoint for HttpEndpoint {
    async fn status(&self, url: &str) -> Result<(), String> {
        let response = self.client.get(url).send().await.map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("HTTP {}", response.status()))
        }
    }

    async fn models(&self, url: &str) -> Result<Vec<String>, String> {
        let response = self.client.get(url).send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        let tags: TagsResponse = response.json().await.map_err(|e| e.to_string())?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

/// Whether `wanted` is in `available`, treating a missing tag as `:latest`.
pub fn model_listed(available: &[String], wanted: &str) -> bool {
    let normalize = |name: &str| {
        if name.contains(':') {
            name.to_string()
        } else {
            format!("{name}:latest")
        }
    };
    let wanted = normalize(wanted);
    available.iter().any(|name| normalize(name) == wanted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_response_parses() {
        let body = r#"{"models":[{"name":"codellama:7b-instruct-q4_K_M","size":3825819519},{"name":"llama3"}]}"#;
        let tags: TagsResponse = serde_json::from_str(body).unwrap();
        let names: Vec<String> = tags.models.into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["codellama:7b-instruct-q4_K_M", "llama3"]);

        let empty: TagsResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.models.is_empty());
    }

    #[test]
    fn test_model_listed_normalizes_latest() {
        let available = vec!["llama3".to_string(), "codellama:7b-instruct-q4_K_M".to_string()];
        assert!(model_listed(&available, "llama3:latest"));
        assert!(model_listed(&available, "codellama:7b-instruct-q4_K_M"));
        assert!(!model_listed(&available, "codellama"));
    }

    #[tokio::test]
    async fn test_status_against_closed_port_fails() {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let endpoint = HttpEndpoint::new(Duration::from_millis(500)).unwrap();
        let result = endpoint.status(&format!("http://127.0.0.1:{port}/api/tags")).await;
        assert!(result.is_err());
    }
}
