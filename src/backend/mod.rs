//! HTTP client for the lead pipeline backend.

mod error;

pub use error::BackendError;

use crate::config::ClientConfig;
use crate::model::{BusinessLine, CacheStats, Lead, ScrapeParams, StatusSnapshot, ValidationConfig};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Acknowledgement returned by trigger endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Which export the backend should stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Json,
    Csv,
}

impl ExportKind {
    fn path(self) -> &'static str {
        match self {
            ExportKind::Json => "/download",
            ExportKind::Csv => "/download-csv",
        }
    }
}

#[derive(Serialize)]
struct EnrichRequest<'a> {
    leads: &'a [Lead],
    openai_api_key: &'a str,
}

#[derive(Serialize)]
struct ValidateRequest<'a> {
    leads: &'a [Lead],
    config: &'a ValidationConfig,
}

#[derive(Debug, Clone)]
pub struct BackendClient {
    http: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(cfg: &ClientConfig) -> Result<Self, BackendError> {
        let http = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.request_timeout)
            .build()
            .map_err(BackendError::Client)?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn business_lines(&self) -> Result<Vec<BusinessLine>, BackendError> {
        self.get_json("/business-lines").await
    }

    pub async fn status(&self) -> Result<StatusSnapshot, BackendError> {
        self.get_json("/status").await
    }

    pub async fn cache_stats(&self) -> Result<CacheStats, BackendError> {
        self.get_json("/cache/stats").await
    }

    pub async fn start_scrape(&self, params: &ScrapeParams) -> Result<Ack, BackendError> {
        self.post_json("/scrape", Some(params)).await
    }

    pub async fn start_enrich(&self, leads: &[Lead], api_key: &str) -> Result<Ack, BackendError> {
        let body = EnrichRequest {
            leads,
            openai_api_key: api_key,
        };
        self.post_json("/enrich", Some(&body)).await
    }

    pub async fn start_validate(
        &self,
        leads: &[Lead],
        config: &ValidationConfig,
    ) -> Result<Ack, BackendError> {
        let body = ValidateRequest { leads, config };
        self.post_json("/validate", Some(&body)).await
    }

    pub async fn clear_cache(&self) -> Result<Ack, BackendError> {
        self.post_json::<(), _>("/cache/clear", None).await
    }

    /// Start a download of a backend-side export file. The caller streams the body.
    pub async fn download(&self, kind: ExportKind, filename: &str) -> Result<Response, BackendError> {
        let path = kind.path();
        let resp = self
            .http
            .get(self.url(path))
            .query(&[("filename", filename)])
            .send()
            .await
            .map_err(|source| BackendError::Transport { path, source })?;
        check_status(path, resp).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &'static str) -> Result<T, BackendError> {
        let resp = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|source| BackendError::Transport { path, source })?;
        let resp = check_status(path, resp).await?;
        resp.json::<T>()
            .await
            .map_err(|source| BackendError::Decode { path, source })
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &'static str,
        body: Option<&B>,
    ) -> Result<T, BackendError> {
        let mut req = self.http.post(self.url(path));
        if let Some(b) = body {
            req = req.json(b);
        }
        let resp = req
            .send()
            .await
            .map_err(|source| BackendError::Transport { path, source })?;
        let resp = check_status(path, resp).await?;
        resp.json::<T>()
            .await
            .map_err(|source| BackendError::Decode { path, source })
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Turn a non-2xx response into `BackendError::Status`, preferring the backend's
/// `{"error": ...}` message over the raw body.
async fn check_status(path: &'static str, resp: Response) -> Result<Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => body.error,
        Err(_) => text.trim().to_string(),
    };
    Err(BackendError::Status {
        path,
        status,
        message,
    })
}
