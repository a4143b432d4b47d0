//! Thin client for the server's status API.

use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

pub struct ApiClient {
    client: reqwest::Client,
    base: Url,
}

impl ApiClient {
    pub fn new(api_url: &str) -> Result<Self> {
        let mut base = Url::parse(api_url).with_context(|| format!("Invalid API URL: {}", api_url))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base,
        })
    }

    /// Resolve an `api/v1` path against the base URL.
    pub fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(&format!("api/v1/{}", path.trim_start_matches('/')))
            .with_context(|| format!("Invalid API path: {}", path))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path)?;
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to reach the server")?;
        decode(response).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path)?;
        debug!(url = %url, "DELETE");
        let response = self
            .client
            .delete(url)
            .send()
            .await
            .context("Failed to reach the server")?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let message = body["error"].as_str().unwrap_or("no details");
        bail!("Server returned {}: {}", status, message);
    }
    response.json().await.context("Malformed server response")
}
