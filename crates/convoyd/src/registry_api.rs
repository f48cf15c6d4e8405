//! HTTP client for the build metadata service.
//!
//! The build pipeline owns image construction and label bookkeeping;
//! convoy only asks it one question: which labels does an image carry.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;

use convoy_core::RegistryError;
use convoy_registry::RegistryApi;

pub struct HttpRegistryApi {
    http: Client,
    base_url: String,
}

impl HttpRegistryApi {
    pub fn new(base_url: &str) -> Result<Self, RegistryError> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| RegistryError::Backend {
                message: e.to_string(),
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RegistryApi for HttpRegistryApi {
    async fn image_labels(
        &self,
        image: &str,
    ) -> Result<BTreeMap<String, String>, RegistryError> {
        let url = format!("{}/v1/images/labels?image={image}", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| RegistryError::Backend {
                message: format!("GET {url}: {e}"),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Backend {
                message: format!("GET {url} returned {status}"),
            });
        }
        response.json().await.map_err(|e| RegistryError::Backend {
            message: format!("decoding labels for {image}: {e}"),
        })
    }
}
