use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response};
use tracing::{debug, instrument};
use url::Url;

use super::ControlPlane;
use crate::config::ControlPlaneConfig;
use crate::error::{PoolError, Result};
use crate::models::{GroupInfo, ProxiesPayload, SelectRequest};

/// Client for a Clash-compatible external controller
pub struct ClashApi {
    client: Client,
    base: Url,
}

impl ClashApi {
    pub fn new(config: &ControlPlaneConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(secret) = &config.secret {
            let value = HeaderValue::from_str(&format!("Bearer {}", secret)).map_err(|_| {
                PoolError::InvalidConfig("CLASH_SECRET contains invalid header characters".into())
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        if config.api_url.cannot_be_a_base() {
            return Err(PoolError::InvalidConfig(format!(
                "Control plane URL cannot be used as a base: {}",
                config.api_url
            )));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .no_proxy()
            .build()
            .map_err(|e| PoolError::Client(format!("Failed to build control plane client: {}", e)))?;

        Ok(Self {
            client,
            base: config.api_url.clone(),
        })
    }

    /// `{base}/proxies[/{group}]`, with the group name percent-encoded
    fn endpoint(&self, group: Option<&str>) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("proxies");
            if let Some(group) = group {
                segments.push(group);
            }
        }
        url
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| unavailable(&url, e))?;

        let response = require_success(response).await?;
        response.json::<T>().await.map_err(|e| {
            PoolError::ControlPlaneUnavailable(format!("Malformed response from {}: {}", url, e))
        })
    }
}

#[async_trait]
impl ControlPlane for ClashApi {
    #[instrument(skip(self))]
    async fn list_groups(&self) -> Result<ProxiesPayload> {
        self.get_json(self.endpoint(None)).await
    }

    #[instrument(skip(self))]
    async fn group_now(&self, group: &str) -> Result<Option<String>> {
        let info: GroupInfo = self.get_json(self.endpoint(Some(group))).await?;
        Ok(info.now)
    }

    #[instrument(skip(self))]
    async fn select(&self, group: &str, node: &str) -> Result<()> {
        let url = self.endpoint(Some(group));
        let response = self
            .client
            .put(url.clone())
            .json(&SelectRequest { name: node })
            .send()
            .await
            .map_err(|e| unavailable(&url, e))?;

        require_success(response).await?;
        debug!("Control plane activated {} in {}", node, group);
        Ok(())
    }
}

fn unavailable(url: &Url, err: reqwest::Error) -> PoolError {
    PoolError::ControlPlaneUnavailable(format!("{}: {}", url, err))
}

async fn require_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(PoolError::ControlPlane { status, body })
}
