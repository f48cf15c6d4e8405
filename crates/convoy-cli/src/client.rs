//! HTTP client for the convoy API.
//!
//! Retrieval captures the raw JSON and etag alongside the parsed value;
//! updates re-serialize through the conservative put-back merge so fields
//! this binary's structs don't know about survive the round trip.

use anyhow::{bail, Context, Result};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use convoy_api::putback_json;

/// A parsed resource plus what's needed to write it back safely.
pub struct Retrieved<T> {
    pub value: T,
    pub updater: Updater,
}

/// Captured retrieve context: the JSON as received, our round-trip of it,
/// and the etag to condition the write on.
pub struct Updater {
    url: String,
    etag: Option<String>,
    original: Value,
    base: Value,
}

/// API client for the convoy server.
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path_and_query: &str) -> String {
        if path_and_query.starts_with("http://") || path_and_query.starts_with("https://") {
            path_and_query.to_string()
        } else {
            format!("{}{}", self.base_url, path_and_query)
        }
    }

    /// GET a resource as plain JSON.
    pub async fn get_json<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<T> {
        let url = self.url(path_and_query);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("GET {url} returned {status}: {body}");
        }
        response
            .json()
            .await
            .with_context(|| format!("decoding response from {url}"))
    }

    /// GET a resource, capturing the update context.
    ///
    /// Returns None on 404 so callers can distinguish create from update.
    pub async fn retrieve<T: DeserializeOwned + Serialize>(
        &self,
        path_and_query: &str,
    ) -> Result<Option<Retrieved<T>>> {
        let url = self.url(path_and_query);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("GET {url} returned {status}: {body}");
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let original: Value = response
            .json()
            .await
            .with_context(|| format!("decoding response from {url}"))?;
        let value: T = serde_json::from_value(original.clone())
            .with_context(|| format!("parsing resource from {url}"))?;
        // Round-trip our view so the merge can tell which fields we own.
        let base = serde_json::to_value(&value).context("re-serializing resource")?;

        Ok(Some(Retrieved {
            value,
            updater: Updater {
                url,
                etag,
                original,
                base,
            },
        }))
    }

    /// PUT an updated value through the put-back merge; returns the
    /// Location header when the server queued follow-up work.
    pub async fn update<T: Serialize>(
        &self,
        updater: &Updater,
        value: &T,
    ) -> Result<Option<String>> {
        let changed = serde_json::to_value(value).context("serializing update")?;
        let merged = putback_json(&updater.original, &updater.base, &changed);

        let mut request = self.http.put(&updater.url).json(&merged);
        if let Some(etag) = &updater.etag {
            request = request.header(reqwest::header::IF_MATCH, etag);
        }
        let response = request
            .send()
            .await
            .with_context(|| format!("PUT {}", updater.url))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("PUT {} returned {status}: {body}", updater.url);
        }
        Ok(response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string()))
    }

    /// Unconditional PUT for resources that don't exist yet.
    pub async fn put_json<T: Serialize>(&self, path_and_query: &str, value: &T) -> Result<()> {
        let url = self.url(path_and_query);
        let response = self
            .http
            .put(&url)
            .json(value)
            .send()
            .await
            .with_context(|| format!("PUT {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("PUT {url} returned {status}: {body}");
        }
        Ok(())
    }

    /// DELETE a resource.
    pub async fn delete(&self, path_and_query: &str) -> Result<()> {
        let url = self.url(path_and_query);
        let response = self
            .http
            .delete(&url)
            .send()
            .await
            .with_context(|| format!("DELETE {url}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("DELETE {url} returned {status}: {body}");
        }
        Ok(())
    }
}
