//! `accelera.toml` settings plus the secrets that only ever come from the
//! environment.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use accelera_acquire::{ClintCredentials, OriginTarget, WebmailAccount};
use accelera_cloud::powerbi::DEFAULT_SCOPE;
use accelera_cloud::{Credentials, PowerBiConfig, ServiceAccount};
use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "accelera.toml";

const DEFAULT_ORIGIN: &str = "https://app.clint.digital/origin/1bb864dd-9fdf-498c-aaee-256776337fe8";
const DEFAULT_STEM: &str = accelera_acquire::collect::DEFAULT_STEM;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub clint: ClintConfig,
    pub gcp: GcpConfig,
    pub powerbi: PowerBiSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClintConfig {
    /// Used when `CLINT_URL` is not set.
    pub login_url: Option<String>,
    pub origin_urls: Vec<OriginEntry>,
    pub webdriver_url: String,
    pub headless: bool,
    pub login_settle_secs: u64,
    pub page_settle_secs: u64,
    pub between_urls_secs: u64,
    pub download_timeout_secs: u64,
    pub code_source: CodeSourceKind,
    pub webmail_url: Option<String>,
    pub code_sender: String,
}

impl Default for ClintConfig {
    fn default() -> Self {
        Self {
            login_url: None,
            origin_urls: vec![OriginEntry::Url(DEFAULT_ORIGIN.into())],
            webdriver_url: "http://localhost:9515".into(),
            headless: false,
            login_settle_secs: 60,
            page_settle_secs: 90,
            between_urls_secs: 20,
            download_timeout_secs: 120,
            code_source: CodeSourceKind::default(),
            webmail_url: None,
            code_sender: "oi@clint.digital".into(),
        }
    }
}

/// An origin page, either a bare URL or a URL with its own file stem.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum OriginEntry {
    Url(String),
    Target {
        url: String,
        #[serde(default = "default_stem")]
        stem: String,
    },
}

fn default_stem() -> String {
    DEFAULT_STEM.to_string()
}

impl OriginEntry {
    pub fn target(&self) -> OriginTarget {
        match self {
            OriginEntry::Url(url) => OriginTarget::new(url.clone()),
            OriginEntry::Target { url, stem } => OriginTarget::new(url.clone()).with_stem(stem.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeSourceKind {
    #[default]
    Bigquery,
    Webmail,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GcpConfig {
    /// Service-account key; `GOOGLE_APPLICATION_CREDENTIALS` when unset.
    pub credentials_path: Option<PathBuf>,
    /// Defaults to the service account's project.
    pub project_id: Option<String>,
    pub bucket: String,
    pub token_table: String,
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            credentials_path: None,
            project_id: None,
            bucket: "p95-accelera360".into(),
            token_table: "P95_Accelera360.validacao_token".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PowerBiSettings {
    pub tenant_id: Option<String>,
    /// Overrides the authority derived from `tenant_id`.
    pub authority: Option<String>,
    pub client_id: Option<String>,
    pub group_id: Option<String>,
    pub dataset_id: Option<String>,
    pub scope: String,
}

impl Default for PowerBiSettings {
    fn default() -> Self {
        Self {
            tenant_id: None,
            authority: None,
            client_id: None,
            group_id: None,
            dataset_id: None,
            scope: DEFAULT_SCOPE.into(),
        }
    }
}

/// Environment lookup, injectable for tests.
pub type Env<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Process environment, blank values treated as unset.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Read `path`. A missing file yields the defaults; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => {
                let config = Self::from_toml(&text).with_context(|| format!("Invalid config file {}", path.display()))?;
                tracing::info!(path = %path.display(), "Loaded config");
                Ok(config)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn origin_targets(&self) -> Vec<OriginTarget> {
        self.clint.origin_urls.iter().map(OriginEntry::target).collect()
    }

    /// Clint login secrets; `login_url` stands in for a missing `CLINT_URL`.
    pub fn clint_credentials(&self, env: Env<'_>) -> Result<ClintCredentials> {
        ClintCredentials::from_lookup(|key| {
            env(key).or_else(|| match key {
                "CLINT_URL" => self.clint.login_url.clone(),
                _ => None,
            })
        })
    }

    /// Webmail inbox for the verification code. User and password default
    /// to the Clint ones.
    pub fn webmail_account(&self, clint: &ClintCredentials, env: Env<'_>) -> Result<WebmailAccount> {
        let url = env("WEBMAIL_URL")
            .or_else(|| self.clint.webmail_url.clone())
            .context("Webmail code source needs clint.webmail_url or WEBMAIL_URL")?;
        Ok(WebmailAccount {
            url,
            user: env("WEBMAIL_USER").unwrap_or_else(|| clint.user.clone()),
            password: env("WEBMAIL_PASSWORD").unwrap_or_else(|| clint.password.clone()),
            sender: self.clint.code_sender.clone(),
        })
    }

    /// `GCP_ACCESS_TOKEN` wins; otherwise a service-account key file.
    pub fn google_credentials(&self, env: Env<'_>) -> Result<Credentials> {
        if let Some(token) = env("GCP_ACCESS_TOKEN") {
            return Ok(Credentials::Bearer(token));
        }
        let path = self
            .gcp
            .credentials_path
            .clone()
            .or_else(|| env("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from))
            .context("No GCP credentials: set gcp.credentials_path, GOOGLE_APPLICATION_CREDENTIALS or GCP_ACCESS_TOKEN")?;
        let account = ServiceAccount::from_file(&path)
            .with_context(|| format!("Failed to load service account {}", path.display()))?;
        Ok(Credentials::ServiceAccount(account))
    }

    /// Power BI app registration. Every missing setting is reported at once.
    pub fn powerbi_config(&self, env: Env<'_>) -> Result<PowerBiConfig> {
        let pbi = &self.powerbi;
        let authority = pbi.authority.clone().or_else(|| {
            pbi.tenant_id
                .as_ref()
                .map(|tenant| format!("https://login.microsoftonline.com/{tenant}"))
        });
        let client_id = env("PBI_CLIENT_ID").or_else(|| pbi.client_id.clone());
        let client_secret = env("PBI_CLIENT_SECRET");
        let group_id = env("PBI_GROUP_ID").or_else(|| pbi.group_id.clone());
        let dataset_id = env("PBI_DATASET_ID").or_else(|| pbi.dataset_id.clone());

        match (authority, client_id, client_secret, group_id, dataset_id) {
            (Some(authority), Some(client_id), Some(client_secret), Some(group_id), Some(dataset_id)) => {
                Ok(PowerBiConfig {
                    authority,
                    client_id,
                    client_secret,
                    scope: pbi.scope.clone(),
                    group_id,
                    dataset_id,
                })
            }
            (authority, client_id, client_secret, group_id, dataset_id) => {
                let missing: Vec<&str> = [
                    ("powerbi.tenant_id", authority.is_none()),
                    ("PBI_CLIENT_ID", client_id.is_none()),
                    ("PBI_CLIENT_SECRET", client_secret.is_none()),
                    ("PBI_GROUP_ID", group_id.is_none()),
                    ("PBI_DATASET_ID", dataset_id.is_none()),
                ]
                .iter()
                .filter(|(_, absent)| *absent)
                .map(|(name, _)| *name)
                .collect();
                anyhow::bail!("Missing Power BI settings: {}", missing.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("accelera.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.clint.webdriver_url, "http://localhost:9515");
        assert_eq!(config.gcp.bucket, "p95-accelera360");
        assert_eq!(config.origin_targets()[0].stem, "leads-forms-accelera");
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accelera.toml");
        fs::write(&path, "[clint]\nheadless = \"sometimes\"\n").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid config file"));

        fs::write(&path, "[clint]\nheadles = true\n").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
            [clint]
            headless = true
            code_source = "webmail"
            webmail_url = "https://mail.accelera.com"
            origin_urls = [
                "https://app.clint.digital/origin/a",
                { url = "https://app.clint.digital/origin/b", stem = "closer" },
            ]

            [powerbi]
            tenant_id = "t-1"
            "#,
        )
        .unwrap();

        assert!(config.clint.headless);
        assert_eq!(config.clint.code_source, CodeSourceKind::Webmail);
        assert_eq!(config.clint.page_settle_secs, 90);
        assert_eq!(config.powerbi.scope, DEFAULT_SCOPE);
        let targets = config.origin_targets();
        assert_eq!(targets[0].stem, "leads-forms-accelera");
        assert_eq!(targets[1].stem, "closer");
    }

    #[test]
    fn test_clint_credentials_fall_back_to_login_url() {
        let mut config = Config::default();
        config.clint.login_url = Some("https://app.clint.digital/login".into());
        let env = env_of(&[("CLINT_USER", "ops@accelera.com"), ("CLINT_PASSWORD", "pw")]);
        let creds = config.clint_credentials(&env).unwrap();
        assert_eq!(creds.url, "https://app.clint.digital/login");

        let err = Config::default().clint_credentials(&env).unwrap_err();
        assert!(err.to_string().contains("CLINT_URL"));
    }

    #[test]
    fn test_webmail_defaults_to_clint_login() {
        let mut config = Config::default();
        let clint = ClintCredentials {
            url: "u".into(),
            user: "ops@accelera.com".into(),
            password: "pw".into(),
        };
        let none = env_of(&[]);
        assert!(config.webmail_account(&clint, &none).is_err());

        config.clint.webmail_url = Some("https://mail.accelera.com".into());
        let account = config.webmail_account(&clint, &none).unwrap();
        assert_eq!(account.user, "ops@accelera.com");
        assert_eq!(account.sender, "oi@clint.digital");

        let env = env_of(&[("WEBMAIL_PASSWORD", "other")]);
        assert_eq!(config.webmail_account(&clint, &env).unwrap().password, "other");
    }

    #[test]
    fn test_google_credentials() {
        let config = Config::default();
        let token = env_of(&[("GCP_ACCESS_TOKEN", "ya29.x")]);
        assert!(matches!(config.google_credentials(&token).unwrap(), Credentials::Bearer(t) if t == "ya29.x"));

        let err = config.google_credentials(&env_of(&[])).unwrap_err();
        assert!(err.to_string().contains("No GCP credentials"));
    }

    #[test]
    fn test_powerbi_config() {
        let mut config = Config::default();
        config.powerbi.tenant_id = Some("t-1".into());
        config.powerbi.group_id = Some("g-file".into());
        let env = env_of(&[
            ("PBI_CLIENT_ID", "c"),
            ("PBI_CLIENT_SECRET", "s"),
            ("PBI_GROUP_ID", "g-env"),
            ("PBI_DATASET_ID", "d"),
        ]);
        let pbi = config.powerbi_config(&env).unwrap();
        assert_eq!(pbi.authority, "https://login.microsoftonline.com/t-1");
        assert_eq!(pbi.group_id, "g-env");
        assert_eq!(pbi.scope, DEFAULT_SCOPE);

        let err = Config::default().powerbi_config(&env_of(&[("PBI_CLIENT_ID", "c")])).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("powerbi.tenant_id"));
        assert!(msg.contains("PBI_CLIENT_SECRET"));
        assert!(!msg.contains("PBI_CLIENT_ID"));
    }
}
