//! HTTP signing service client.
//!
//! - `POST {endpoint}/jobs` with `{source, origin}` answers `{job_id, state}`
//! - `GET {endpoint}/jobs/{job_id}?source=...` answers `{state, destination?}`

use super::types::{PollReceipt, PollResponse, SubmitReceipt, SubmitRequest, SubmitResponse};
use crate::config::SigningConfig;
use std::future::Future;
use thiserror::Error;
use url::Url;

/// Transport-level failures talking to the signing service.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid response: {reason}")]
    InvalidResponse { reason: String },

    #[error("invalid endpoint {endpoint}")]
    InvalidEndpoint { endpoint: String },
}

/// Asynchronous signing service.
pub trait SigningService {
    /// Submits the bundle stored at `source` for signing.
    fn submit(
        &self,
        source: &str,
        origin: &str,
    ) -> impl Future<Output = Result<SubmitReceipt, ServiceError>> + Send;

    /// Queries the state of `job_id`.
    fn poll(
        &self,
        source: &str,
        job_id: &str,
    ) -> impl Future<Output = Result<PollReceipt, ServiceError>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpSigningService {
    client: reqwest::Client,
    endpoint: Url,
    token: Option<String>,
}

impl HttpSigningService {
    pub fn new(config: &SigningConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            token: config.token.clone(),
        })
    }

    fn jobs_url(&self, job_id: Option<&str>) -> Result<Url, ServiceError> {
        let mut url = self.endpoint.clone();
        {
            let mut segments =
                url.path_segments_mut()
                    .map_err(|()| ServiceError::InvalidEndpoint {
                        endpoint: self.endpoint.to_string(),
                    })?;
            segments.pop_if_empty().push("jobs");
            if let Some(job_id) = job_id {
                segments.push(job_id);
            }
        }
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

impl SigningService for HttpSigningService {
    async fn submit(&self, source: &str, origin: &str) -> Result<SubmitReceipt, ServiceError> {
        let url = self.jobs_url(None)?;
        log::debug!("POST {}", url);

        let response = self
            .authorize(self.client.post(url))
            .json(&SubmitRequest {
                source: source.to_string(),
                origin: origin.to_string(),
            })
            .send()
            .await?;

        let status = response.status().as_u16();
        // A body without a job id surfaces as MissingJobId, not a transport error
        let body = response.json::<SubmitResponse>().await.ok();
        Ok(SubmitReceipt {
            status,
            job_id: body.as_ref().and_then(|b| b.job_id.clone()),
            state: body.and_then(|b| b.state),
        })
    }

    async fn poll(&self, source: &str, job_id: &str) -> Result<PollReceipt, ServiceError> {
        let mut url = self.jobs_url(Some(job_id))?;
        url.query_pairs_mut().append_pair("source", source);
        log::debug!("GET {}", url);

        let response = self.authorize(self.client.get(url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Ok(PollReceipt {
                status: status.as_u16(),
                state: None,
                destination: None,
            });
        }

        let body: PollResponse =
            response
                .json()
                .await
                .map_err(|e| ServiceError::InvalidResponse {
                    reason: e.to_string(),
                })?;
        Ok(PollReceipt {
            status: status.as_u16(),
            state: Some(body.state),
            destination: body.destination,
        })
    }
}
