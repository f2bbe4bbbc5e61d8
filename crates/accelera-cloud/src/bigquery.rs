use std::sync::Arc;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::GoogleAuth;
use crate::CloudError;

const API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
const QUERY_TIMEOUT_MS: u64 = 30_000;

/// BigQuery REST client for synchronous standard-SQL queries.
#[derive(Debug, Clone)]
pub struct BigQuery {
    http: Client,
    auth: Arc<GoogleAuth>,
    api_base: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    rows: Vec<QueryRow>,
}

#[derive(Debug, Deserialize)]
struct QueryRow {
    f: Vec<QueryCell>,
}

#[derive(Debug, Deserialize)]
struct QueryCell {
    v: Value,
}

impl BigQuery {
    pub fn new(http: Client, auth: Arc<GoogleAuth>) -> Self {
        Self::with_base_url(http, auth, API_BASE)
    }

    pub fn with_base_url(http: Client, auth: Arc<GoogleAuth>, api_base: &str) -> Self {
        Self {
            http,
            auth,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    /// Run `sql` in `project` and return every row as text cells.
    pub async fn query_rows(&self, project: &str, sql: &str) -> Result<Vec<Vec<Option<String>>>, CloudError> {
        let token = self.auth.token().await?;
        let response = self
            .http
            .post(format!("{}/projects/{project}/queries", self.api_base))
            .bearer_auth(token)
            .json(&json!({
                "query": sql,
                "useLegacySql": false,
                "timeoutMs": QUERY_TIMEOUT_MS,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CloudError::from_response("bigquery", response).await);
        }

        let body: QueryResponse = response.json().await?;
        if !body.job_complete {
            return Err(CloudError::Query(format!(
                "job did not complete within {QUERY_TIMEOUT_MS} ms"
            )));
        }

        Ok(body
            .rows
            .into_iter()
            .map(|row| row.f.into_iter().map(|cell| cell_text(cell.v)).collect())
            .collect())
    }

    /// Most recent verification token in `table` (`dataset.table`).
    pub async fn latest_token(&self, project: &str, table: &str) -> Result<Option<String>, CloudError> {
        let sql = latest_token_sql(project, table);
        let rows = self.query_rows(project, &sql).await?;
        let token = rows.into_iter().next().and_then(|r| r.into_iter().next().flatten());

        match &token {
            Some(t) => tracing::info!(prefix = %t.chars().take(3).collect::<String>(), "Fetched verification token"),
            None => tracing::warn!(table, "Token table returned no rows"),
        }
        Ok(token)
    }
}

fn latest_token_sql(project: &str, table: &str) -> String {
    format!(
        "WITH MAXDATE AS (\n  \
           SELECT MAX(data_token) AS max_data FROM `{project}.{table}`\n\
         )\n\
         SELECT token\n\
         FROM `{project}.{table}` vt\n\
         CROSS JOIN MAXDATE\n\
         WHERE vt.data_token = MAXDATE.max_data"
    )
}

fn cell_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}
