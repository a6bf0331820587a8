//! Microsoft Graph and SharePoint REST client with pagination.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::{AuthMode, EntraError, EntraResult, GraphConfig, TokenCache};

/// Header Graph requires for advanced directory queries.
const CONSISTENCY_LEVEL: (&str, &str) = ("ConsistencyLevel", "eventual");

/// SharePoint REST responses without OData metadata annotations.
const SHAREPOINT_ACCEPT: &str = "application/json;odata=nometadata";

/// `OData` error response from Microsoft Graph.
#[derive(Debug, Deserialize)]
pub struct ODataError {
    pub error: ODataErrorBody,
}

/// `OData` error body.
#[derive(Debug, Deserialize)]
pub struct ODataErrorBody {
    pub code: String,
    pub message: String,
    #[serde(rename = "innerError")]
    pub inner_error: Option<serde_json::Value>,
}

/// Error envelope of the SharePoint REST API.
#[derive(Debug, Deserialize)]
struct SharePointError {
    #[serde(rename = "odata.error")]
    error: SharePointErrorBody,
}

#[derive(Debug, Deserialize)]
struct SharePointErrorBody {
    code: String,
    message: SharePointErrorMessage,
}

#[derive(Debug, Deserialize)]
struct SharePointErrorMessage {
    value: String,
}

/// Response wrapper for paginated Graph API responses.
#[derive(Debug, Deserialize)]
pub struct ODataResponse<T> {
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink", alias = "odata.nextLink")]
    pub next_link: Option<String>,
}

/// Authenticated client for one run.
#[derive(Debug)]
pub struct GraphClient {
    http_client: reqwest::Client,
    token_cache: Arc<TokenCache>,
    config: GraphConfig,
}

impl GraphClient {
    /// Creates a client and resolves `mode` into its token cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created or the
    /// authentication mode is invalid.
    pub fn new(config: GraphConfig, mode: AuthMode) -> EntraResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EntraError::Config(format!("Failed to create HTTP client: {e}")))?;

        let token_cache = TokenCache::new(
            mode,
            config.login_endpoint.clone(),
            config.managed_identity.clone(),
            http_client.clone(),
        )?;

        Ok(Self {
            http_client,
            token_cache: Arc::new(token_cache),
            config,
        })
    }

    /// Returns the connection settings.
    #[must_use]
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Returns the token cache shared by Graph and SharePoint calls.
    #[must_use]
    pub fn token_cache(&self) -> &Arc<TokenCache> {
        &self.token_cache
    }

    /// Returns the base URL for Graph API requests.
    #[must_use]
    pub fn base_url(&self) -> String {
        self.config.graph_base_url()
    }

    fn graph_resource(&self) -> &str {
        self.config.graph_endpoint.trim_end_matches('/')
    }

    /// Fetches a token up front so credential problems fail the run early.
    pub async fn connect(&self) -> EntraResult<()> {
        self.token_cache.get_token(self.graph_resource()).await?;
        Ok(())
    }

    /// Performs a Graph GET request.
    #[instrument(skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> EntraResult<T> {
        self.request(reqwest::Method::GET, url, self.graph_resource(), &[], None::<&()>)
            .await
    }

    /// Performs a Graph GET request with advanced query semantics.
    #[instrument(skip(self))]
    pub async fn get_advanced<T: DeserializeOwned>(&self, url: &str) -> EntraResult<T> {
        self.request(
            reqwest::Method::GET,
            url,
            self.graph_resource(),
            &[CONSISTENCY_LEVEL],
            None::<&()>,
        )
        .await
    }

    /// Performs a Graph POST request.
    #[instrument(skip(self, body))]
    pub async fn post<T: DeserializeOwned, B: serde::Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> EntraResult<T> {
        self.request(reqwest::Method::POST, url, self.graph_resource(), &[], Some(body))
            .await
    }

    /// Performs a SharePoint REST GET request, authenticating against the
    /// origin of `url`.
    #[instrument(skip(self))]
    pub async fn get_sharepoint<T: DeserializeOwned>(&self, url: &str) -> EntraResult<T> {
        let origin = url::Url::parse(url)?.origin().ascii_serialization();
        self.request(
            reqwest::Method::GET,
            url,
            &origin,
            &[("Accept", SHAREPOINT_ACCEPT)],
            None::<&()>,
        )
        .await
    }

    async fn request<T: DeserializeOwned, B: serde::Serialize>(
        &self,
        method: reqwest::Method,
        url: &str,
        resource: &str,
        headers: &[(&str, &str)],
        body: Option<&B>,
    ) -> EntraResult<T> {
        let token = self.token_cache.get_token(resource).await?;

        let mut request = self.http_client.request(method, url).bearer_auth(&token);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        if let Some(b) = body {
            request = request.json(b);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            warn!(retry_after_secs, "Request throttled");
            return Err(EntraError::RateLimited { retry_after_secs });
        }

        if status.is_success() {
            return response.json().await.map_err(EntraError::from);
        }

        let error_body = response.text().await.unwrap_or_default();
        Err(parse_error_body(status, error_body))
    }

    /// Fetches all pages of a paginated response, processing each page via callback.
    #[instrument(skip(self, callback))]
    pub async fn get_paginated<T, F>(
        &self,
        initial_url: &str,
        advanced: bool,
        mut callback: F,
    ) -> EntraResult<()>
    where
        T: DeserializeOwned,
        F: FnMut(Vec<T>) -> EntraResult<()>,
    {
        let mut url = initial_url.to_string();

        loop {
            debug!("Fetching page: {}", url);
            let response: ODataResponse<T> = if advanced {
                self.get_advanced(&url).await?
            } else {
                self.get(&url).await?
            };

            callback(response.value)?;

            match response.next_link {
                Some(next) => url = next,
                None => return Ok(()),
            }
        }
    }
}

fn parse_error_body(status: reqwest::StatusCode, error_body: String) -> EntraError {
    if let Ok(odata_error) = serde_json::from_str::<ODataError>(&error_body) {
        return EntraError::GraphApi {
            code: odata_error.error.code,
            message: odata_error.error.message,
            inner_error: odata_error.error.inner_error.map(|v| v.to_string()),
        };
    }

    if let Ok(sp_error) = serde_json::from_str::<SharePointError>(&error_body) {
        return EntraError::GraphApi {
            code: sp_error.error.code,
            message: sp_error.error.message.value,
            inner_error: None,
        };
    }

    if status == reqwest::StatusCode::NOT_FOUND {
        return EntraError::NotFound(error_body);
    }

    EntraError::GraphApi {
        code: status.to_string(),
        message: error_body,
        inner_error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_odata_error_parsing() {
        let json = r#"{
            "error": {
                "code": "Request_ResourceNotFound",
                "message": "Resource not found",
                "innerError": {"date": "2024-01-15"}
            }
        }"#;

        let error: ODataError = serde_json::from_str(json).unwrap();
        assert_eq!(error.error.code, "Request_ResourceNotFound");
        assert_eq!(error.error.message, "Resource not found");
        assert!(error.error.inner_error.is_some());
    }

    #[test]
    fn test_sharepoint_error_mapped_to_graph_api() {
        let body = r#"{"odata.error":{"code":"-2147024891, System.UnauthorizedAccessException","message":{"lang":"en-US","value":"Access denied."}}}"#;

        let err = parse_error_body(reqwest::StatusCode::FORBIDDEN, body.to_string());
        match err {
            EntraError::GraphApi { code, message, .. } => {
                assert!(code.contains("UnauthorizedAccessException"));
                assert_eq!(message, "Access denied.");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_unparsable_not_found() {
        let err = parse_error_body(reqwest::StatusCode::NOT_FOUND, "gone".into());
        assert!(matches!(err, EntraError::NotFound(_)));
    }

    #[test]
    fn test_odata_response_parsing() {
        let json = r#"{
            "value": [{"id": "1"}, {"id": "2"}],
            "@odata.nextLink": "https://graph.microsoft.com/v1.0/groups?$skiptoken=xxx"
        }"#;

        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct TestItem {
            id: String,
        }

        let response: ODataResponse<TestItem> = serde_json::from_str(json).unwrap();
        assert_eq!(response.value.len(), 2);
        assert!(response.next_link.is_some());
    }
}
