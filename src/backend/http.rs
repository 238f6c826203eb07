//! REST client for the admin API.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use super::Backend;
use crate::config::Config;
use crate::error::BackendError;
use crate::models::{Entity, LedgerMutation, MutationRequest, OutstandingLoan, PayrollSlip};

#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpBackend {
    pub fn new(base_url: &str, api_token: Option<&str>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).context("Invalid API URL")?;
        if base_url.cannot_be_a_base() {
            bail!("API URL {} cannot carry a path", base_url);
        }
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                if let Some(token) = api_token {
                    headers.insert(
                        reqwest::header::AUTHORIZATION,
                        format!("Bearer {}", token)
                            .parse()
                            .context("Invalid API token")?,
                    );
                }
                headers
            })
            .build()
            .context("Failed to build HttpBackend")?;

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.api_url,
            config.api_token.as_deref(),
            config.request_timeout,
        )
    }

    /// Base URL with `segments` appended. Each segment is percent-encoded,
    /// so opaque keys containing `/`, `?` or `#` stay a single segment.
    fn url(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::Network(format!("{} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn transport_error(&self, e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else {
            BackendError::Network(e.to_string())
        }
    }

    async fn check(resp: Response) -> Result<Response, BackendError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        Err(BackendError::from_status(status.as_u16(), &text))
    }

    async fn decode<T: DeserializeOwned>(&self, resp: Response) -> Result<T, BackendError> {
        resp.json::<T>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn search_entities(&self, query: &str, limit: usize) -> Result<Vec<Entity>, BackendError> {
        let limit = limit.to_string();
        let qp = [("q", query), ("limit", limit.as_str())];
        debug!(query, "GET /entities");

        let resp = self
            .client
            .get(self.url(&["entities"])?)
            .query(&qp)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let resp = Self::check(resp).await?;
        self.decode(resp).await
    }

    async fn get_entity(&self, key: &str) -> Result<Option<Entity>, BackendError> {
        let resp = self
            .client
            .get(self.url(&["entities", key])?)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = Self::check(resp).await?;
        self.decode(resp).await.map(Some)
    }

    async fn disbursed_loans(&self, subject_key: &str) -> Result<Vec<OutstandingLoan>, BackendError> {
        let qp = [("subject", subject_key), ("status", "disbursed")];

        let resp = self
            .client
            .get(self.url(&["loans"])?)
            .query(&qp)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let resp = Self::check(resp).await?;
        self.decode(resp).await
    }

    async fn create_mutation(
        &self,
        loan_id: &str,
        req: &MutationRequest,
    ) -> Result<LedgerMutation, BackendError> {
        let resp = self
            .client
            .post(self.url(&["loans", loan_id, "mutations"])?)
            .json(req)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let resp = Self::check(resp).await?;
        self.decode(resp).await
    }

    async fn save_slip(&self, slip: &PayrollSlip, existing: bool) -> Result<PayrollSlip, BackendError> {
        let request = if existing {
            self.client
                .put(self.url(&["financial-records", slip.id.as_str()])?)
        } else {
            self.client.post(self.url(&["financial-records"])?)
        };

        let resp = request
            .json(slip)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let resp = Self::check(resp).await?;
        self.decode(resp).await
    }
}
