//! HTTP capability source for the automation engine
//!
//! Node and credential types come from the editor's type catalogues
//! (`/types/nodes.json`, `/types/credentials.json`); workflows come from the
//! paginated public API (`/api/v1/workflows`).

use async_trait::async_trait;
use nf_core::config::SourceSettings;
use nf_core::{CredentialTypeDescriptor, Error, NodeCatalog, Result, WorkflowDescriptor};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::CapabilitySource;

const API_KEY_HEADER: &str = "X-N8N-API-KEY";
const RETRY_BACKOFF: Duration = Duration::from_millis(250);
const WORKFLOW_PAGE_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowPage {
    #[serde(default)]
    data: Vec<WorkflowDescriptor>,
    #[serde(default)]
    next_cursor: Option<String>,
}

pub struct HttpCapabilitySource {
    base_url: String,
    http_client: reqwest::Client,
    max_retries: u32,
}

impl HttpCapabilitySource {
    pub fn new(settings: &SourceSettings) -> Result<Self> {
        let mut client_builder = reqwest::Client::builder().timeout(settings.timeout);

        if let Some(api_key) = &settings.api_key {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert(
                API_KEY_HEADER,
                api_key
                    .parse()
                    .map_err(|_| Error::config("API key is not a valid header value"))?,
            );
            client_builder = client_builder.default_headers(headers);
        }

        let http_client = client_builder
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            http_client,
            max_retries: settings.max_retries,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET with retries; connection failures and 5xx are retried, 4xx are not.
    ///
    /// A body that is not valid JSON means the engine is not serving its API
    /// and is reported as a source failure.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_get_json(url, query).await {
                Ok(value) => return Ok(value),
                Err(RequestFailure::Fatal(e)) => return Err(e),
                Err(RequestFailure::Retryable(e)) if attempt > self.max_retries => {
                    warn!("Giving up on {} after {} attempts: {}", url, attempt, e);
                    return Err(Error::source_unavailable(format!("{}: {}", url, e)));
                }
                Err(RequestFailure::Retryable(e)) => {
                    debug!("Attempt {} for {} failed: {}", attempt, url, e);
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
            }
        }
    }

    async fn try_get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> std::result::Result<T, RequestFailure> {
        let response = self
            .http_client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| RequestFailure::Retryable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(RequestFailure::Retryable(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            return Err(RequestFailure::Fatal(Error::http(format!(
                "{} returned HTTP {}",
                url, status
            ))));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| RequestFailure::Retryable(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| {
            RequestFailure::Fatal(Error::source_unavailable(format!(
                "{} returned an unreadable body: {}",
                url, e
            )))
        })
    }
}

enum RequestFailure {
    Retryable(String),
    Fatal(Error),
}

#[async_trait]
impl CapabilitySource for HttpCapabilitySource {
    fn name(&self) -> &str {
        "http"
    }

    async fn get_nodes(&self) -> Result<NodeCatalog> {
        let body: Value = self.get_json(&self.url("/types/nodes.json"), &[]).await?;
        let catalog = NodeCatalog::from_json(body)?;
        info!(
            "Fetched {} node types from {} ({} rejected)",
            catalog.len(),
            self.base_url,
            catalog.rejected.len()
        );
        Ok(catalog)
    }

    async fn get_workflows(&self) -> Result<Vec<WorkflowDescriptor>> {
        let mut workflows = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut query = vec![("limit", WORKFLOW_PAGE_LIMIT.to_string())];
            if let Some(cursor) = cursor.take() {
                query.push(("cursor", cursor));
            }

            let page: WorkflowPage = self
                .get_json(&self.url("/api/v1/workflows"), &query)
                .await?;
            workflows.extend(page.data);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        info!("Fetched {} workflows from {}", workflows.len(), self.base_url);
        Ok(workflows)
    }

    async fn get_credential_types(&self) -> Result<Vec<CredentialTypeDescriptor>> {
        let types: Vec<CredentialTypeDescriptor> =
            self.get_json(&self.url("/types/credentials.json"), &[]).await?;
        info!(
            "Fetched {} credential types from {}",
            types.len(),
            self.base_url
        );
        Ok(types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let settings = SourceSettings {
            base_url: "http://n8n.local:5678/".to_string(),
            ..Default::default()
        };
        let source = HttpCapabilitySource::new(&settings).unwrap();
        assert_eq!(source.base_url(), "http://n8n.local:5678");
        assert_eq!(
            source.url("/types/nodes.json"),
            "http://n8n.local:5678/types/nodes.json"
        );
    }

    #[test]
    fn test_invalid_api_key_is_rejected() {
        let settings = SourceSettings {
            api_key: Some("bad\nkey".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            HttpCapabilitySource::new(&settings),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_workflow_page_deserialize() {
        let page: WorkflowPage = serde_json::from_value(serde_json::json!({
            "data": [{"id": "1", "name": "Sync contacts", "active": true}],
            "nextCursor": "abc"
        }))
        .unwrap();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.next_cursor.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_unreachable_engine_is_source_unavailable() {
        let settings = SourceSettings {
            // Port 9 (discard) on localhost: connection refused on test hosts
            base_url: "http://127.0.0.1:9".to_string(),
            timeout: Duration::from_millis(200),
            max_retries: 0,
            ..Default::default()
        };
        let source = HttpCapabilitySource::new(&settings).unwrap();
        let result = source.get_nodes().await;
        assert!(result.unwrap_err().is_source_failure());
    }

    mod engine {
        use super::*;
        use serde_json::json;
        use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        fn source_for(server: &MockServer, max_retries: u32) -> HttpCapabilitySource {
            let settings = SourceSettings {
                base_url: server.uri(),
                api_key: Some("test-key".to_string()),
                timeout: Duration::from_secs(5),
                max_retries,
            };
            HttpCapabilitySource::new(&settings).unwrap()
        }

        #[tokio::test]
        async fn test_node_catalogue_keeps_good_entries() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/types/nodes.json"))
                .and(header("X-N8N-API-KEY", "test-key"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                    {
                        "name": "n8n-nodes-base.slack",
                        "displayName": "Slack",
                        "group": ["output"],
                        "version": [1, 2.2],
                        "codex": {"categories": ["Communication"]},
                        "properties": [{"name": "channel", "type": "string"}],
                        "credentials": [{"name": "slackApi", "required": true}]
                    },
                    {"name": "n8n-nodes-base.broken", "description": null}
                ])))
                .expect(1)
                .mount(&server)
                .await;

            let catalog = source_for(&server, 0).get_nodes().await.unwrap();
            assert_eq!(catalog.len(), 1);
            assert_eq!(catalog.nodes[0].primary_category(), "Communication");
            assert_eq!(
                catalog.rejected[0].name.as_deref(),
                Some("n8n-nodes-base.broken")
            );
        }

        #[tokio::test]
        async fn test_unreadable_body_is_source_failure() {
            let server = MockServer::start().await;
            Mock::given(path("/types/nodes.json"))
                .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
                .mount(&server)
                .await;

            let err = source_for(&server, 0).get_nodes().await.unwrap_err();
            assert!(err.is_source_failure());
        }

        #[tokio::test]
        async fn test_workflow_cursor_is_query_encoded() {
            let cursor = "eyJsYXN0SWQiOiIxIn0+/=";
            let server = MockServer::start().await;
            Mock::given(path("/api/v1/workflows"))
                .and(query_param("limit", "100"))
                .and(query_param_is_missing("cursor"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "data": [{"id": "1", "name": "First"}],
                    "nextCursor": cursor
                })))
                .expect(1)
                .mount(&server)
                .await;
            Mock::given(path("/api/v1/workflows"))
                .and(query_param("cursor", cursor))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "data": [{"id": "2", "name": "Second"}],
                    "nextCursor": null
                })))
                .expect(1)
                .mount(&server)
                .await;

            let workflows = source_for(&server, 0).get_workflows().await.unwrap();
            let ids: Vec<&str> = workflows.iter().map(|w| w.id.as_str()).collect();
            assert_eq!(ids, vec!["1", "2"]);
        }

        #[tokio::test]
        async fn test_server_errors_are_retried() {
            let server = MockServer::start().await;
            Mock::given(path("/types/credentials.json"))
                .respond_with(ResponseTemplate::new(503))
                .up_to_n_times(2)
                .with_priority(1)
                .expect(2)
                .mount(&server)
                .await;
            Mock::given(path("/types/credentials.json"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(json!([{"name": "slackApi", "displayName": "Slack API"}])),
                )
                .expect(1)
                .mount(&server)
                .await;

            let types = source_for(&server, 2).get_credential_types().await.unwrap();
            assert_eq!(types[0].name, "slackApi");
        }

        #[tokio::test]
        async fn test_retries_exhausted_is_source_failure() {
            let server = MockServer::start().await;
            Mock::given(path("/types/nodes.json"))
                .respond_with(ResponseTemplate::new(502))
                .expect(2)
                .mount(&server)
                .await;

            let err = source_for(&server, 1).get_nodes().await.unwrap_err();
            assert!(matches!(err, Error::SourceUnavailable(_)));
        }

        #[tokio::test]
        async fn test_client_error_is_not_retried() {
            let server = MockServer::start().await;
            Mock::given(path("/types/nodes.json"))
                .respond_with(ResponseTemplate::new(401))
                .expect(1)
                .mount(&server)
                .await;

            let err = source_for(&server, 3).get_nodes().await.unwrap_err();
            assert!(matches!(err, Error::Http(_)));
        }
    }
}
