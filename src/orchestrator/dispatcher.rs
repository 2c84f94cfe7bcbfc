//! One-shot phase triggers.
//!
//! Each call resolves once the backend has accepted the request. Completion is only
//! ever observed through the poller; nothing here touches local phase state.

use crate::backend::{Ack, BackendClient, BackendError};
use crate::model::{CacheStats, Lead, ScrapeParams, ValidationConfig};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    /// A client-side precondition failed; no request was sent.
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Network(#[from] BackendError),
}

/// Outcome of a cache clear: the backend's message plus freshly fetched stats.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheCleared {
    pub message: String,
    pub stats: Option<CacheStats>,
}

#[derive(Debug, Clone)]
pub struct ActionDispatcher {
    client: BackendClient,
}

impl ActionDispatcher {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }

    pub async fn start_scrape(&self, params: &ScrapeParams) -> Result<Ack, ActionError> {
        let ack = self.client.start_scrape(params).await?;
        info!(
            business_line = %params.main_business_line,
            location = %params.location,
            max = params.max_companies,
            "scrape accepted"
        );
        Ok(ack)
    }

    pub async fn start_enrich(&self, leads: &[Lead], api_key: &str) -> Result<Ack, ActionError> {
        if api_key.trim().is_empty() {
            return Err(ActionError::Rejected(
                "an OpenAI API key is required to enrich leads".into(),
            ));
        }
        if leads.is_empty() {
            return Err(ActionError::Rejected(
                "there are no leads to enrich yet; run a scrape first".into(),
            ));
        }
        let ack = self.client.start_enrich(leads, api_key.trim()).await?;
        info!(leads = leads.len(), "enrichment accepted");
        Ok(ack)
    }

    pub async fn start_validate(
        &self,
        leads: &[Lead],
        config: &ValidationConfig,
    ) -> Result<Ack, ActionError> {
        if leads.is_empty() {
            return Err(ActionError::Rejected(
                "there are no leads to validate yet; run a scrape first".into(),
            ));
        }
        let ack = self.client.start_validate(leads, config).await?;
        info!(
            leads = leads.len(),
            retry_delay = config.retry_delay(),
            between_delay = config.between_delay(),
            "validation accepted"
        );
        Ok(ack)
    }

    /// Clear the backend cache, then re-read the stats so callers need not wait for
    /// the next poll tick. A failed re-read is logged and leaves `stats` empty.
    pub async fn clear_cache(&self) -> Result<CacheCleared, ActionError> {
        let ack = self.client.clear_cache().await?;
        let stats = match self.client.cache_stats().await {
            Ok(s) => Some(s),
            Err(e) => {
                warn!("cache stats refresh failed: {e}");
                None
            }
        };
        Ok(CacheCleared {
            message: ack.message.unwrap_or_else(|| "Cache cleared".into()),
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{any, body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn dispatcher_for(server: &MockServer) -> ActionDispatcher {
        let cfg = ClientConfig {
            base_url: format!("{}/api", server.uri()),
            ..Default::default()
        };
        ActionDispatcher::new(BackendClient::new(&cfg).unwrap())
    }

    fn leads() -> Vec<Lead> {
        vec![serde_json::from_value(json!({"business_id": "1234567-8", "name": "Acme Oy"})).unwrap()]
    }

    #[tokio::test]
    async fn blank_api_key_never_reaches_the_network() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = dispatcher_for(&server)
            .start_enrich(&leads(), "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Rejected(_)));
    }

    #[tokio::test]
    async fn enrich_without_leads_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = dispatcher_for(&server)
            .start_enrich(&[], "sk-test")
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Rejected(_)));
    }

    #[tokio::test]
    async fn enrich_posts_leads_and_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/enrich"))
            .and(body_json(json!({
                "leads": [{"business_id": "1234567-8", "name": "Acme Oy"}],
                "openai_api_key": "sk-test"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"message": "Agent enrichment started", "status": "running"}),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let ack = dispatcher_for(&server)
            .start_enrich(&leads(), "sk-test")
            .await
            .unwrap();
        assert_eq!(ack.status.as_deref(), Some("running"));
    }

    #[tokio::test]
    async fn rejected_scrape_is_a_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/scrape"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"error": "Scraping already in progress"})),
            )
            .mount(&server)
            .await;

        let err = dispatcher_for(&server)
            .start_scrape(&ScrapeParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Network(_)));
        assert!(err.to_string().contains("Scraping already in progress"));
    }

    #[tokio::test]
    async fn clear_cache_refreshes_stats() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/cache/clear"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"message": "Cache cleared successfully"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/cache/stats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"entries": 0, "size_kb": 0})))
            .expect(1)
            .mount(&server)
            .await;

        let cleared = dispatcher_for(&server).clear_cache().await.unwrap();
        assert_eq!(
            cleared,
            CacheCleared {
                message: "Cache cleared successfully".into(),
                stats: Some(CacheStats::default()),
            }
        );
    }

    #[tokio::test]
    async fn clear_cache_survives_failed_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/cache/clear"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "ok"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/cache/stats"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let cleared = dispatcher_for(&server).clear_cache().await.unwrap();
        assert_eq!(cleared.stats, None);
    }
}
