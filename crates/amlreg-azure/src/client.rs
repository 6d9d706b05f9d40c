//! Authenticated HTTP access to one workspace.

use std::fmt;
use std::time::Duration;

use amlreg_state::WorkspaceLocation;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::auth::ServicePrincipalToken;
use crate::dto::Page;
use crate::error::{AzureError, Result};

/// Public cloud resource manager.
pub const DEFAULT_MANAGEMENT_HOST: &str = "https://management.azure.com";

/// API version used for the resource manager workspace lookup.
pub const WORKSPACE_API_VERSION: &str = "2023-04-01";

/// Client-wide request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Error bodies are cut to this many characters.
const MAX_ERROR_BODY: usize = 500;

/// Shared HTTP client for every workspace call.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("aml-registermodel/", env!("CARGO_PKG_VERSION")))
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(AzureError::from)
}

/// `/subscriptions/{sub}/resourceGroups/{rg}/providers/.../workspaces/{ws}`
pub fn workspace_scope(location: &WorkspaceLocation) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.MachineLearningServices/workspaces/{}",
        location.subscription_id, location.resource_group, location.workspace_name
    )
}

/// Regional data-plane host of a workspace.
pub fn service_url_for_region(region: &str) -> String {
    format!("https://{}.api.azureml.ms", region.to_ascii_lowercase())
}

/// Pull a readable message out of an error body.
pub(crate) fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        v.pointer("/error/message")
            .or_else(|| v.pointer("/message"))
            .and_then(|m| m.as_str())
    });
    let text = message.unwrap_or(body).trim();
    if text.is_empty() {
        return "no response body".to_string();
    }
    text.chars().take(MAX_ERROR_BODY).collect()
}

/// Data-plane client bound to one workspace.
pub struct AmlClient {
    http: reqwest::Client,
    token: ServicePrincipalToken,
    service_url: String,
    scope: String,
}

impl AmlClient {
    pub fn new(
        http: reqwest::Client,
        token: ServicePrincipalToken,
        service_url: &str,
        location: &WorkspaceLocation,
    ) -> Self {
        Self {
            http,
            token,
            service_url: service_url.trim_end_matches('/').to_string(),
            scope: workspace_scope(location),
        }
    }

    /// `{service}/{api}{scope}{path}`, e.g. `history/v1.0` + `/experiments/x`.
    pub fn url(&self, api: &str, path: &str) -> String {
        format!("{}/{}{}{}", self.service_url, api, self.scope, path)
    }

    /// The raw HTTP client, for unauthenticated blob uploads.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Send an authenticated request and fail on non-success statuses.
    pub async fn send(
        &self,
        request: RequestBuilder,
        resource: &'static str,
        name: &str,
    ) -> Result<Response> {
        let request_id = Uuid::new_v4();
        let request = self
            .token
            .authorize(request)
            .await?
            .header("x-ms-client-request-id", request_id.to_string());

        let response = request.send().await?;
        let status = response.status();
        debug!(
            resource,
            name = %name,
            status = status.as_u16(),
            request_id = %request_id,
            "Workspace API call"
        );

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(AzureError::Status {
            resource,
            name: name.to_string(),
            status: status.as_u16(),
            message: error_message(&body),
        })
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        resource: &'static str,
        name: &str,
    ) -> Result<T> {
        let request = self.http.request(Method::GET, url).query(query);
        Self::decode(self.send(request, resource, name).await?).await
    }

    /// Like [`get_json`](Self::get_json), with 404 mapped to `None`.
    pub async fn get_optional<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        resource: &'static str,
        name: &str,
    ) -> Result<Option<T>> {
        match self.get_json(url, query, resource, name).await {
            Ok(value) => Ok(Some(value)),
            Err(AzureError::Status { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
        resource: &'static str,
        name: &str,
    ) -> Result<T> {
        let request = self.http.request(Method::POST, url).json(body);
        Self::decode(self.send(request, resource, name).await?).await
    }

    /// Follow continuation tokens until the listing is exhausted.
    pub async fn get_all<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        resource: &'static str,
        name: &str,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut params: Vec<(&str, &str)> = query.to_vec();
            if let Some(t) = token.as_deref() {
                params.push(("continuationToken", t));
            }
            let page: Page<T> = self.get_json(url, &params, resource, name).await?;
            items.extend(page.value);
            match page.continuation_token.filter(|t| !t.is_empty()) {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(items)
    }
}

impl fmt::Debug for AmlClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmlClient")
            .field("service_url", &self.service_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amlreg_state::AzureCredentials;
    use secrecy::SecretString;

    fn location() -> WorkspaceLocation {
        WorkspaceLocation {
            subscription_id: "sub".to_string(),
            resource_group: "rg".to_string(),
            workspace_name: "ws".to_string(),
        }
    }

    #[test]
    fn test_workspace_scope() {
        assert_eq!(
            workspace_scope(&location()),
            "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.MachineLearningServices/workspaces/ws"
        );
    }

    #[test]
    fn test_service_url_for_region() {
        assert_eq!(
            service_url_for_region("WestEurope"),
            "https://westeurope.api.azureml.ms"
        );
    }

    #[test]
    fn test_client_url() {
        let credentials = AzureCredentials {
            tenant_id: "t".to_string(),
            client_id: "c".to_string(),
            client_secret: SecretString::from("s".to_string()),
            subscription_id: "sub".to_string(),
        };
        let http = reqwest::Client::new();
        let token = ServicePrincipalToken::new(http.clone(), "https://login", &credentials);
        let client = AmlClient::new(http, token, "https://eastus.api.azureml.ms/", &location());
        assert_eq!(
            client.url("history/v1.0", "/experiments/exp/runs/r1"),
            "https://eastus.api.azureml.ms/history/v1.0/subscriptions/sub/resourceGroups/rg/providers/Microsoft.MachineLearningServices/workspaces/ws/experiments/exp/runs/r1"
        );
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(r#"{"error":{"code":"UserError","message":"Model name invalid"}}"#),
            "Model name invalid"
        );
        assert_eq!(error_message(r#"{"message":"nope"}"#), "nope");
        assert_eq!(error_message("  plain text "), "plain text");
        assert_eq!(error_message(""), "no response body");
        assert_eq!(error_message(&"x".repeat(2000)).len(), MAX_ERROR_BODY);
    }
}
