use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::stream::ResponseBody;
use crate::{FailureKind, JobSnapshot, RequestError, SearchHit, StartAck};

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    /// Path prefix in front of every endpoint, e.g. "/api".
    pub api_prefix: String,
    pub connect_timeout: Duration,
    /// Read generated reports chunk by chunk. When false the body is read in
    /// one piece.
    pub incremental_reports: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            api_prefix: "/api".to_string(),
            connect_timeout: Duration::from_secs(10),
            incremental_reports: true,
        }
    }
}

#[async_trait::async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>, RequestError>;
}

/// Endpoints of one server-side background job.
#[async_trait::async_trait]
pub trait JobClient: Send + Sync {
    async fn status(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<JobSnapshot, RequestError>;

    /// A 409 answer is reported as [`FailureKind::Conflict`].
    async fn start(
        &self,
        job_id: &str,
        params: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<StartAck, RequestError>;

    async fn generate(
        &self,
        job_id: &str,
        params: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<ResponseBody, RequestError>;

    async fn reset(&self, job_id: &str, cancel: &CancellationToken) -> Result<(), RequestError>;

    async fn result(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, RequestError>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SearchResponse {
    List(Vec<SearchHit>),
    Wrapped { results: Vec<SearchHit> },
}

#[derive(Deserialize)]
struct ResetAck {
    #[serde(default = "reset_ok_by_default")]
    ok: bool,
    #[serde(default)]
    message: Option<String>,
}

fn reset_ok_by_default() -> bool {
    true
}

#[derive(Debug, Clone)]
pub struct ReqwestClient {
    settings: ClientSettings,
    http: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(settings: ClientSettings) -> Result<Self, RequestError> {
        Url::parse(&settings.base_url)
            .map_err(|err| RequestError::new(FailureKind::Transport, err.to_string()))?;
        let http = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|err| RequestError::new(FailureKind::Transport, err.to_string()))?;
        Ok(Self { settings, http })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, RequestError> {
        let mut url = Url::parse(&self.settings.base_url)
            .map_err(|err| RequestError::new(FailureKind::Transport, err.to_string()))?;
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                RequestError::new(FailureKind::Transport, "base url cannot carry a path")
            })?;
            path.pop_if_empty();
            for segment in self.settings.api_prefix.split('/').filter(|s| !s.is_empty()) {
                path.push(segment);
            }
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    fn job_endpoint(&self, job_id: &str, action: &str) -> Result<Url, RequestError> {
        self.endpoint(&["jobs", job_id, action])
    }

    fn post_json(
        &self,
        url: Url,
        params: &serde_json::Value,
    ) -> Result<reqwest::RequestBuilder, RequestError> {
        let body = serde_json::to_vec(params)
            .map_err(|err| RequestError::new(FailureKind::Decode, err.to_string()))?;
        Ok(self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body))
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, RequestError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RequestError::aborted()),
            response = request.send() => response.map_err(map_reqwest_error)?,
        };
        expect_success(response, cancel).await
    }
}

#[async_trait::async_trait]
impl SearchClient for ReqwestClient {
    async fn search(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>, RequestError> {
        let mut url = self.endpoint(&["search"])?;
        url.query_pairs_mut().append_pair("q", query);
        let response = self.send(self.http.get(url), cancel).await?;
        let body = read_body(response, cancel).await?;
        match serde_json::from_slice::<SearchResponse>(&body)
            .map_err(|err| RequestError::new(FailureKind::Decode, err.to_string()))?
        {
            SearchResponse::List(hits) | SearchResponse::Wrapped { results: hits } => Ok(hits),
        }
    }
}

#[async_trait::async_trait]
impl JobClient for ReqwestClient {
    async fn status(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<JobSnapshot, RequestError> {
        let url = self.job_endpoint(job_id, "status")?;
        let response = self.send(self.http.get(url), cancel).await?;
        let body = read_body(response, cancel).await?;
        JobSnapshot::from_json(&body)
    }

    async fn start(
        &self,
        job_id: &str,
        params: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<StartAck, RequestError> {
        let url = self.job_endpoint(job_id, "start")?;
        let request = self.post_json(url, params)?;
        let response = self.send(request, cancel).await.map_err(|err| {
            if err.kind == FailureKind::HttpStatus(StatusCode::CONFLICT.as_u16()) {
                RequestError::new(FailureKind::Conflict, err.message)
            } else {
                err
            }
        })?;
        let body = read_body(response, cancel).await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(StartAck::default());
        }
        serde_json::from_slice(&body)
            .map_err(|err| RequestError::new(FailureKind::Decode, err.to_string()))
    }

    async fn generate(
        &self,
        job_id: &str,
        params: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<ResponseBody, RequestError> {
        let url = self.job_endpoint(job_id, "generate")?;
        let request = self.post_json(url, params)?;
        let response = self.send(request, cancel).await?;
        if self.settings.incremental_reports {
            Ok(ResponseBody::incremental(
                response
                    .bytes_stream()
                    .map(|chunk| chunk.map_err(map_reqwest_error)),
            ))
        } else {
            Ok(ResponseBody::whole(async move {
                response.bytes().await.map_err(map_reqwest_error)
            }))
        }
    }

    async fn reset(&self, job_id: &str, cancel: &CancellationToken) -> Result<(), RequestError> {
        let url = self.job_endpoint(job_id, "reset")?;
        let request = self.post_json(url, &serde_json::Value::Null)?;
        let response = self.send(request, cancel).await?;
        let status = response.status();
        let body = read_body(response, cancel).await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        let ack: ResetAck = serde_json::from_slice(&body)
            .map_err(|err| RequestError::new(FailureKind::Decode, err.to_string()))?;
        if ack.ok {
            Ok(())
        } else {
            Err(RequestError::new(
                FailureKind::HttpStatus(status.as_u16()),
                ack.message.unwrap_or_else(|| "reset refused".to_string()),
            ))
        }
    }

    async fn result(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value, RequestError> {
        let url = self.job_endpoint(job_id, "result")?;
        let response = self.send(self.http.get(url), cancel).await?;
        let body = read_body(response, cancel).await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_slice(&body)
            .map_err(|err| RequestError::new(FailureKind::Decode, err.to_string()))
    }
}

async fn read_body(
    response: reqwest::Response,
    cancel: &CancellationToken,
) -> Result<Bytes, RequestError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RequestError::aborted()),
        body = response.bytes() => body.map_err(map_reqwest_error),
    }
}

async fn expect_success(
    response: reqwest::Response,
    cancel: &CancellationToken,
) -> Result<reqwest::Response, RequestError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = match read_body(response, cancel).await {
        Ok(body) => body,
        Err(err) if err.is_aborted() => return Err(err),
        Err(_) => Bytes::new(),
    };
    let message = error_message(&body).unwrap_or_else(|| status.to_string());
    Err(RequestError::new(
        FailureKind::HttpStatus(status.as_u16()),
        message,
    ))
}

/// Pulls a human-readable message out of an error body: a JSON object's
/// `message`, `detail` or `error` field, or the plain text itself.
fn error_message(body: &[u8]) -> Option<String> {
    if let Ok(serde_json::Value::Object(fields)) = serde_json::from_slice(body) {
        return ["message", "detail", "error"]
            .iter()
            .find_map(|key| fields.get(*key).and_then(|value| value.as_str()))
            .map(ToOwned::to_owned);
    }
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn map_reqwest_error(err: reqwest::Error) -> RequestError {
    if err.is_decode() {
        return RequestError::new(FailureKind::Decode, err.to_string());
    }
    if let Some(status) = err.status() {
        return RequestError::new(FailureKind::HttpStatus(status.as_u16()), err.to_string());
    }
    RequestError::new(FailureKind::Transport, err.to_string())
}
