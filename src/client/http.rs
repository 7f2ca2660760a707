use super::traits::{PolicyHint, ReadError, RemoteReader, RequestClient, SendError, ServerStatus};
use crate::config::types::RemoteConfig;
use crate::model::{Color, Coord, Operation, Region, ResourceId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// HTTP transport for one grid endpoint.
#[derive(Debug, Clone)]
pub struct HttpGridClient {
    name: String,
    base_url: String,
    resource: ResourceId,
    client: reqwest::Client,
}

impl HttpGridClient {
    pub fn new(base_url: &str, config: &RemoteConfig, resource: ResourceId) -> Result<Self, reqwest::Error> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(token) = &config.token {
            if let Ok(value) = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token)) {
                headers.insert(reqwest::header::AUTHORIZATION, value);
            }
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            name: base_url.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            resource,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn resource_url(&self, path: &str) -> String {
        format!("{}/resources/{}/{}", self.base_url, self.resource, path)
    }
}

#[async_trait]
impl RequestClient for HttpGridClient {
    async fn send(&self, op: &Operation) -> Result<(), SendError> {
        let body = WriteRequest {
            x: op.key.x,
            y: op.key.y,
            color: op.payload.0,
        };

        let response = self
            .client
            .post(self.resource_url("cells"))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SendError::Timeout
                } else {
                    SendError::Other(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return match response.json::<WriteResponse>().await {
                Ok(WriteResponse { painted: true, .. }) => Ok(()),
                Ok(WriteResponse { error, .. }) => Err(SendError::classify(
                    error.as_deref().unwrap_or("write not applied"),
                )),
                Err(e) => Err(SendError::Malformed(e.to_string())),
            };
        }

        let text = response.text().await.unwrap_or_default();
        Err(SendError::from_status(status.as_u16(), &text))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl RemoteReader for HttpGridClient {
    async fn read_region(&self, region: Region) -> Result<HashMap<Coord, Color>, ReadError> {
        let url = self.resource_url(&format!(
            "regions/{}/{}?size={}",
            region.x0, region.y0, region.size
        ));
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(ReadError::Remote {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body: RegionResponse = response.json().await?;
        Ok(body
            .cells
            .into_iter()
            .map(|c| (Coord::new(c.x, c.y), Color(c.color)))
            .collect())
    }
}

#[async_trait]
impl ServerStatus for HttpGridClient {
    async fn balance(&self) -> Option<u64> {
        self.account().await.and_then(|a| a.charges)
    }

    async fn policy_hint(&self) -> Option<PolicyHint> {
        self.account().await.map(|a| PolicyHint {
            tier: a.tier,
            burst_quota: a.burst_quota,
            burst_window: a.burst_window_ms.map(Duration::from_millis),
        })
    }
}

impl HttpGridClient {
    async fn account(&self) -> Option<AccountResponse> {
        let url = format!("{}/me", self.base_url);
        let response = match self.client.get(&url).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::debug!(status = r.status().as_u16(), "Account query rejected");
                return None;
            }
            Err(e) => {
                tracing::debug!(error = %e, "Account query failed");
                return None;
            }
        };

        match response.json().await {
            Ok(account) => Some(account),
            Err(e) => {
                tracing::debug!(error = %e, "Account response unreadable");
                None
            }
        }
    }
}

// ===== Wire Types =====

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRequest {
    pub x: i64,
    pub y: i64,
    pub color: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResponse {
    #[serde(default)]
    pub painted: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionResponse {
    pub cells: Vec<CellState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellState {
    pub x: i64,
    pub y: i64,
    pub color: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountResponse {
    #[serde(default)]
    pub charges: Option<u64>,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub burst_quota: Option<usize>,
    #[serde(default)]
    pub burst_window_ms: Option<u64>,
}
