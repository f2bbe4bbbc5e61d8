use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::CloudError;

const API_BASE: &str = "https://api.powerbi.com";
pub const DEFAULT_SCOPE: &str = "https://analysis.windows.net/powerbi/api/.default";

/// App registration and target dataset for a semantic-model refresh.
#[derive(Debug, Clone)]
pub struct PowerBiConfig {
    /// `https://login.microsoftonline.com/{tenant}`
    pub authority: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
    pub group_id: String,
    pub dataset_id: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Power BI REST client.
#[derive(Debug, Clone)]
pub struct PowerBi {
    http: Client,
    api_base: String,
}

impl PowerBi {
    pub fn new(http: Client) -> Self {
        Self::with_base_url(http, API_BASE)
    }

    pub fn with_base_url(http: Client, api_base: &str) -> Self {
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    /// Client-credentials token from the Entra ID authority.
    async fn app_token(&self, config: &PowerBiConfig) -> Result<String, CloudError> {
        let url = format!("{}/oauth2/v2.0/token", config.authority.trim_end_matches('/'));
        let response = self
            .http
            .post(url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", config.client_id.as_str()),
                ("client_secret", config.client_secret.as_str()),
                ("scope", config.scope.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CloudError::from_response("entra id", response).await);
        }
        let body: TokenResponse = response.json().await?;
        Ok(body.access_token)
    }

    /// Queue a refresh of the dataset. Power BI answers 202 Accepted and
    /// runs the refresh asynchronously.
    pub async fn refresh(&self, config: &PowerBiConfig) -> Result<(), CloudError> {
        let token = self.app_token(config).await?;
        tracing::info!(dataset = %config.dataset_id, "Obtained Power BI token, requesting refresh");

        let url = format!(
            "{}/v1.0/myorg/groups/{}/datasets/{}/refreshes",
            self.api_base, config.group_id, config.dataset_id
        );
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body("{}")
            .send()
            .await?;

        match response.status() {
            StatusCode::ACCEPTED => {
                tracing::info!(dataset = %config.dataset_id, "Refresh accepted");
                Ok(())
            }
            _ => Err(CloudError::from_response("power bi", response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn config(server: &mockito::Server) -> PowerBiConfig {
        PowerBiConfig {
            authority: format!("{}/tenant-1", server.url()),
            client_id: "cid".into(),
            client_secret: "secret".into(),
            scope: DEFAULT_SCOPE.into(),
            group_id: "g1".into(),
            dataset_id: "d1".into(),
        }
    }

    async fn mock_token(server: &mut mockito::Server) -> mockito::Mock {
        server
            .mock("POST", "/tenant-1/oauth2/v2.0/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
                Matcher::UrlEncoded("client_id".into(), "cid".into()),
                Matcher::UrlEncoded("scope".into(), DEFAULT_SCOPE.into()),
            ]))
            .with_status(200)
            .with_body(r#"{"token_type":"Bearer","expires_in":3599,"access_token":"pbi-token"}"#)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_refresh_accepted() {
        let mut server = mockito::Server::new_async().await;
        let token = mock_token(&mut server).await;
        let refresh = server
            .mock("POST", "/v1.0/myorg/groups/g1/datasets/d1/refreshes")
            .match_header("authorization", "Bearer pbi-token")
            .with_status(202)
            .create_async()
            .await;

        let pbi = PowerBi::with_base_url(Client::new(), &server.url());
        pbi.refresh(&config(&server)).await.unwrap();
        token.assert_async().await;
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_rejected() {
        let mut server = mockito::Server::new_async().await;
        mock_token(&mut server).await;
        server
            .mock("POST", "/v1.0/myorg/groups/g1/datasets/d1/refreshes")
            .with_status(429)
            .with_body("too many refreshes")
            .create_async()
            .await;

        let pbi = PowerBi::with_base_url(Client::new(), &server.url());
        let err = pbi.refresh(&config(&server)).await.unwrap_err();
        assert!(matches!(err, CloudError::Api { status: 429, .. }));
    }

    #[tokio::test]
    async fn test_token_failure_stops_refresh() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/tenant-1/oauth2/v2.0/token")
            .with_status(401)
            .with_body(r#"{"error":"invalid_client"}"#)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/v1.0/myorg/groups/g1/datasets/d1/refreshes")
            .expect(0)
            .create_async()
            .await;

        let pbi = PowerBi::with_base_url(Client::new(), &server.url());
        let err = pbi.refresh(&config(&server)).await.unwrap_err();
        assert!(matches!(err, CloudError::Api { status: 401, service: "entra id", .. }));
        refresh.assert_async().await;
    }
}
