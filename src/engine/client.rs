//! HTTP implementation of [`EngineApi`] using [`reqwest`].

use super::wire::{self, EvaluateBody, EvaluationBody, JobBody, StatusBody};
use super::{Ack, ArtifactStatus, EngineApi, EngineError, EvaluationRequest};
use crate::job_config::JobSpec;
use crate::model::{CandidateModel, EngineConfig, EvaluationResult, ProgressReport};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;

/// Client for a single engine instance. Holds no job state.
#[derive(Clone)]
pub struct HttpEngine {
    http: reqwest::Client,
    base_url: String,
}

impl HttpEngine {
    pub fn new(cfg: &EngineConfig) -> Result<Self> {
        let base = reqwest::Url::parse(&cfg.base_url)
            .with_context(|| format!("invalid engine URL {}", cfg.base_url))?;
        let mut builder = reqwest::Client::builder().user_agent(cfg.user_agent.clone());
        if let Some(timeout) = cfg.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context("build HTTP client")?;
        Ok(Self {
            http,
            base_url: base.as_str().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Returns the response unchanged on success, or an
    /// [`EngineError::Engine`] carrying the body's error text.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, EngineError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        let message = serde_json::from_str::<StatusBody>(&body)
            .ok()
            .and_then(|b| b.text().map(str::to_string))
            .unwrap_or_else(|| {
                if body.trim().is_empty() {
                    status.to_string()
                } else {
                    body.trim().to_string()
                }
            });
        Err(EngineError::Engine {
            status: Some(status.as_u16()),
            message,
        })
    }

    /// Read a status/message acknowledgement; tolerant of non-JSON bodies.
    async fn read_ack(response: reqwest::Response) -> Result<Ack, EngineError> {
        let response = Self::ensure_success(response).await?;
        let body = response.text().await.map_err(classify)?;
        let message = serde_json::from_str::<StatusBody>(&body)
            .ok()
            .and_then(|b| b.message.or(b.status))
            .unwrap_or_default();
        Ok(Ack { message })
    }
}

/// Decode failures are the engine's fault; everything else on the transport
/// (connect, timeout, dropped body) means the engine is unreachable.
fn classify(e: reqwest::Error) -> EngineError {
    if e.is_decode() {
        EngineError::Engine {
            status: e.status().map(|s| s.as_u16()),
            message: format!("malformed engine response: {e}"),
        }
    } else {
        EngineError::Network(e.to_string())
    }
}

/// The engine answers `GET /candidates` with a JSON status object until it
/// has written its first table.
fn is_placeholder_body(content_type: Option<&str>, body: &str) -> bool {
    content_type.is_some_and(|ct| ct.contains("json")) || body.trim_start().starts_with('{')
}

#[async_trait]
impl EngineApi for HttpEngine {
    async fn submit(&self, spec: &JobSpec) -> Result<Ack, EngineError> {
        let response = self
            .http
            .post(self.url("job"))
            .json(&JobBody::from(spec))
            .send()
            .await
            .map_err(classify)?;
        Self::read_ack(response).await
    }

    async fn fetch_progress(&self) -> Result<ProgressReport, EngineError> {
        let response = self
            .http
            .get(self.url("progress"))
            .send()
            .await
            .map_err(classify)?;
        let response = Self::ensure_success(response).await?;
        let body: StatusBody = response.json().await.map_err(classify)?;
        Ok(body.into_progress())
    }

    async fn fetch_candidates(&self) -> Result<Vec<CandidateModel>, EngineError> {
        let response = self
            .http
            .get(self.url("candidates"))
            .send()
            .await
            .map_err(classify)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let response = Self::ensure_success(response).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(classify)?;
        if is_placeholder_body(content_type.as_deref(), &body) {
            return Ok(Vec::new());
        }
        wire::parse_candidates_csv(&body)
    }

    async fn stop(&self) -> Result<Ack, EngineError> {
        let response = self
            .http
            .post(self.url("stop"))
            .send()
            .await
            .map_err(classify)?;
        Self::read_ack(response).await
    }

    async fn delete_artifact(&self) -> Result<ArtifactStatus, EngineError> {
        let response = self
            .http
            .delete(self.url("candidates"))
            .send()
            .await
            .map_err(classify)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(ArtifactStatus::NotFound);
        }
        Self::ensure_success(response).await?;
        Ok(ArtifactStatus::Deleted)
    }

    async fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationResult, EngineError> {
        let response = self
            .http
            .post(self.url("evaluate"))
            .json(&EvaluateBody::from(request))
            .send()
            .await
            .map_err(classify)?;
        let response = Self::ensure_success(response).await?;
        let body: EvaluationBody = response.json().await.map_err(classify)?;
        Ok(body.into_result(&request.equation))
    }
}
