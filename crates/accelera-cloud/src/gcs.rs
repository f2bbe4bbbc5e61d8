use std::path::Path;
use std::sync::Arc;

use reqwest::{Client, StatusCode, Url};

use crate::auth::GoogleAuth;
use crate::CloudError;

const API_BASE: &str = "https://storage.googleapis.com/storage/v1";
const UPLOAD_BASE: &str = "https://storage.googleapis.com/upload/storage/v1";

/// Cloud Storage JSON API client.
#[derive(Debug, Clone)]
pub struct Gcs {
    http: Client,
    auth: Arc<GoogleAuth>,
    api_base: String,
    upload_base: String,
}

impl Gcs {
    pub fn new(http: Client, auth: Arc<GoogleAuth>) -> Self {
        Self::with_base_urls(http, auth, API_BASE, UPLOAD_BASE)
    }

    pub fn with_base_urls(http: Client, auth: Arc<GoogleAuth>, api_base: &str, upload_base: &str) -> Self {
        Self {
            http,
            auth,
            api_base: api_base.trim_end_matches('/').to_string(),
            upload_base: upload_base.trim_end_matches('/').to_string(),
        }
    }

    /// Upload `bytes` as `gs://{bucket}/{object}`, replacing any existing object.
    pub async fn upload(
        &self,
        bucket: &str,
        object: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), CloudError> {
        let size = bytes.len();
        let token = self.auth.token().await?;
        let response = self
            .http
            .post(format!("{}/b/{bucket}/o", self.upload_base))
            .query(&[("uploadType", "media"), ("name", object)])
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CloudError::from_response("cloud storage", response).await);
        }
        tracing::info!(uri = %format!("gs://{bucket}/{object}"), bytes = size, "Uploaded object");
        Ok(())
    }

    /// Upload a local file. Parquet and CSV get their proper content types.
    pub async fn upload_file(&self, bucket: &str, object: &str, path: &Path) -> Result<(), CloudError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| CloudError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        self.upload(bucket, object, bytes, content_type_for(path)).await
    }

    /// True when `gs://{bucket}/{object}` exists.
    pub async fn exists(&self, bucket: &str, object: &str) -> Result<bool, CloudError> {
        let url = self.object_url(bucket, object)?;
        let token = self.auth.token().await?;
        let response = self.http.get(url).bearer_auth(token).send().await?;

        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(CloudError::from_response("cloud storage", response).await),
        }
    }

    /// Metadata URL of an object. The object name is one path segment, so
    /// its slashes are percent-encoded.
    fn object_url(&self, bucket: &str, object: &str) -> Result<Url, CloudError> {
        let mut url = Url::parse(&format!("{}/b/{bucket}/o", self.api_base))
            .map_err(|e| CloudError::Url(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| CloudError::Url(format!("{} cannot be a base", self.api_base)))?
            .push(object);
        Ok(url)
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => "text/csv",
        Some("parquet") => "application/octet-stream",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}
