//! Thin REST clients for the cloud services the pipeline talks to:
//! Cloud Storage (bronze/silver/gold uploads and existence checks),
//! BigQuery (verification-token lookup) and Power BI (dataset refresh).

pub mod auth;
pub mod bigquery;
pub mod gcs;
pub mod powerbi;

pub use auth::{AccessToken, Credentials, GoogleAuth, ServiceAccount, CLOUD_PLATFORM_SCOPE};
pub use bigquery::BigQuery;
pub use gcs::Gcs;
pub use powerbi::{PowerBi, PowerBiConfig};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("failed to read {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid credentials: {0}")]
    Credentials(String),

    #[error("failed to sign token assertion: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned {status}: {body}")]
    Api {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("query failed: {0}")]
    Query(String),

    #[error("invalid url: {0}")]
    Url(String),
}

impl CloudError {
    /// Build an [`CloudError::Api`] from a non-success response.
    pub(crate) async fn from_response(service: &'static str, response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        CloudError::Api {
            service,
            status,
            body,
        }
    }
}
