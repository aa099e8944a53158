//! Reloadable runtime configuration.
//!
//! # Purpose
//! Parses and validates the YAML document that drives one configuration
//! generation: authentication mode, OAuth2 client settings, user cache size and
//! namespace cache timing.
//!
//! # Key invariants
//! - A [`ConfigGeneration`] is only constructed from a validated
//!   [`RuntimeConfig`] and is never mutated afterwards.
//! - The version is taken from the document when present, otherwise it is the
//!   sha256 of the raw content, so identical documents map to identical
//!   versions.
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid runtime configuration yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("read runtime configuration {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("authentication.{0} is required for this authentication type")]
    MissingSection(&'static str),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("unsupported oauth2 provider {0:?}")]
    UnsupportedProvider(String),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub authentication: AuthenticationConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticationKind {
    #[default]
    None,
    Anonymous,
    OAuth2,
}

impl AuthenticationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthenticationKind::None => "none",
            AuthenticationKind::Anonymous => "anonymous",
            AuthenticationKind::OAuth2 => "oauth2",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationConfig {
    #[serde(rename = "type", default)]
    pub kind: AuthenticationKind,
    #[serde(default)]
    pub anonymous: Option<AnonymousConfig>,
    #[serde(default)]
    pub oauth2: Option<OAuth2Config>,
    #[serde(default = "default_user_cache_size")]
    pub user_cache_size: usize,
}

impl Default for AuthenticationConfig {
    fn default() -> Self {
        Self {
            kind: AuthenticationKind::None,
            anonymous: None,
            oauth2: None,
            user_cache_size: default_user_cache_size(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnonymousConfig {
    pub username: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuth2Config {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub claims: ClaimMappings,
}

// The client secret also keys the state cipher; keep it out of logs.
impl fmt::Debug for OAuth2Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2Config")
            .field("provider", &self.provider)
            .field("issuer_url", &self.issuer_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_url", &self.redirect_url)
            .field("scopes", &self.scopes)
            .field("claims", &self.claims)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimMappings {
    #[serde(default = "default_username_claim")]
    pub username: String,
    #[serde(default = "default_groups_claim")]
    pub groups: String,
}

impl Default for ClaimMappings {
    fn default() -> Self {
        Self {
            username: default_username_claim(),
            groups: default_groups_claim(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_namespaces_ttl_secs")]
    pub namespaces_ttl_secs: u64,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespaces_ttl_secs: default_namespaces_ttl_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

impl CacheConfig {
    pub fn namespaces_ttl(&self) -> Duration {
        Duration::from_secs(self.namespaces_ttl_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

fn default_user_cache_size() -> usize {
    100
}

fn default_provider() -> String {
    "oidc".to_string()
}

fn default_scopes() -> Vec<String> {
    ["openid", "profile", "email", "groups"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_username_claim() -> String {
    "email".to_string()
}

fn default_groups_claim() -> String {
    "groups".to_string()
}

fn default_namespaces_ttl_secs() -> u64 {
    60
}

fn default_refresh_interval_secs() -> u64 {
    30
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let auth = &self.authentication;
        if auth.user_cache_size == 0 {
            return Err(invalid("authentication.user_cache_size", "must be positive"));
        }
        if self.cache.refresh_interval_secs == 0 {
            return Err(invalid("cache.refresh_interval_secs", "must be positive"));
        }
        match auth.kind {
            AuthenticationKind::None => {}
            AuthenticationKind::Anonymous => {
                let anonymous = auth
                    .anonymous
                    .as_ref()
                    .ok_or(ConfigError::MissingSection("anonymous"))?;
                if anonymous.username.trim().is_empty() {
                    return Err(invalid("authentication.anonymous.username", "must not be empty"));
                }
            }
            AuthenticationKind::OAuth2 => {
                let oauth2 = auth
                    .oauth2
                    .as_ref()
                    .ok_or(ConfigError::MissingSection("oauth2"))?;
                oauth2.validate()?;
            }
        }
        Ok(())
    }
}

impl OAuth2Config {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.provider != "oidc" {
            return Err(ConfigError::UnsupportedProvider(self.provider.clone()));
        }
        url::Url::parse(&self.issuer_url)
            .map_err(|err| invalid("authentication.oauth2.issuer_url", err.to_string()))?;
        url::Url::parse(&self.redirect_url)
            .map_err(|err| invalid("authentication.oauth2.redirect_url", err.to_string()))?;
        if self.client_id.is_empty() {
            return Err(invalid("authentication.oauth2.client_id", "must not be empty"));
        }
        if self.client_secret.is_empty() {
            return Err(invalid("authentication.oauth2.client_secret", "must not be empty"));
        }
        Ok(())
    }
}

/// One immutable, validated version of the runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigGeneration {
    version: String,
    config: RuntimeConfig,
}

impl ConfigGeneration {
    /// Parse and validate a YAML document.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_yaml::from_str(raw)?;
        let version = config
            .version
            .clone()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| content_hash(raw));
        Self::new(version, config)
    }

    pub fn new(version: impl Into<String>, config: RuntimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            version: version.into(),
            config,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

pub fn content_hash(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const OAUTH2: &str = r#"
version: "2024-05-01"
authentication:
  type: oauth2
  oauth2:
    issuer_url: https://idp.example.com
    client_id: warden
    client_secret: s3cret
    redirect_url: https://warden.example.com/oauth2/callback
    claims:
      username: preferred_username
  user_cache_size: 10
cache:
  namespaces_ttl_secs: 15
"#;

    #[test]
    fn parses_oauth2_document_with_defaults() {
        let generation = ConfigGeneration::parse(OAUTH2).expect("parse");
        assert_eq!(generation.version(), "2024-05-01");
        let auth = &generation.config().authentication;
        assert_eq!(auth.kind, AuthenticationKind::OAuth2);
        assert_eq!(auth.user_cache_size, 10);
        let oauth2 = auth.oauth2.as_ref().expect("oauth2");
        assert_eq!(oauth2.provider, "oidc");
        assert_eq!(oauth2.claims.username, "preferred_username");
        assert_eq!(oauth2.claims.groups, "groups");
        assert!(oauth2.scopes.contains(&"openid".to_string()));
        assert_eq!(generation.config().cache.namespaces_ttl_secs, 15);
        assert_eq!(generation.config().cache.refresh_interval_secs, 30);
    }

    #[test]
    fn empty_document_means_no_authentication() {
        let generation = ConfigGeneration::parse("{}").expect("parse");
        assert_eq!(
            generation.config().authentication.kind,
            AuthenticationKind::None
        );
        assert_eq!(generation.config().authentication.user_cache_size, 100);
    }

    #[test]
    fn version_defaults_to_content_hash() {
        let raw = "authentication:\n  type: none\n";
        let a = ConfigGeneration::parse(raw).expect("parse");
        let b = ConfigGeneration::parse(raw).expect("parse");
        assert_eq!(a.version(), b.version());
        assert_eq!(a.version(), content_hash(raw));
        let c = ConfigGeneration::parse("authentication:\n  type: none\n# edit\n").expect("parse");
        assert_ne!(a.version(), c.version());
    }

    #[test]
    fn oauth2_requires_its_section() {
        let err = ConfigGeneration::parse("authentication:\n  type: oauth2\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingSection("oauth2")));
    }

    #[test]
    fn anonymous_requires_username() {
        let err = ConfigGeneration::parse(
            "authentication:\n  type: anonymous\n  anonymous:\n    username: ''\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn rejects_unknown_provider_and_bad_urls() {
        let doc = OAUTH2.replace("client_id: warden", "provider: saml\n    client_id: warden");
        assert!(matches!(
            ConfigGeneration::parse(&doc).unwrap_err(),
            ConfigError::UnsupportedProvider(_)
        ));
        let doc = OAUTH2.replace("https://idp.example.com", "not a url");
        assert!(matches!(
            ConfigGeneration::parse(&doc).unwrap_err(),
            ConfigError::Invalid { field: "authentication.oauth2.issuer_url", .. }
        ));
    }

    #[test]
    fn rejects_zero_sizes() {
        let err = ConfigGeneration::parse("authentication:\n  user_cache_size: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        let err = ConfigGeneration::parse("cache:\n  refresh_interval_secs: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn debug_redacts_client_secret() {
        let generation = ConfigGeneration::parse(OAUTH2).expect("parse");
        let rendered = format!("{generation:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        assert!(matches!(
            ConfigGeneration::parse("authentication: [").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }
}
