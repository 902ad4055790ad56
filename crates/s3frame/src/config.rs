//! Per-call datasource configuration.
//!
//! Deserialized once from the host's settings JSON when a query batch
//! arrives, then passed by shared reference and never mutated. Concurrent
//! queries therefore need no synchronization over configuration.

use serde::Deserialize;

/// Connection settings for the object store holding the queried files.
///
/// The secret key is decrypted by the host and supplied out of band, not
/// through the settings JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceConfig {
    pub bucket: String,
    pub region: String,
    #[serde(default, rename = "accessKey")]
    pub access_key: String,
    #[serde(skip)]
    pub secret_key: String,
    /// Custom endpoint for S3-compatible stores.
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl SourceConfig {
    /// Attach the decrypted secret key to settings parsed from JSON.
    pub fn with_secret(mut self, secret_key: impl Into<String>) -> Self {
        self.secret_key = secret_key.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_settings_json() {
        let config = serde_json::from_str::<SourceConfig>(
            r#"{"bucket": "metrics", "region": "eu-west-1", "accessKey": "AKIA"}"#,
        )
        .unwrap()
        .with_secret("shh");

        assert_eq!(config.bucket, "metrics");
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.access_key, "AKIA");
        assert_eq!(config.secret_key, "shh");
        assert_eq!(config.endpoint, None);
    }

    #[test]
    fn access_key_is_optional() {
        let config: SourceConfig =
            serde_json::from_str(r#"{"bucket": "b", "region": "r"}"#).unwrap();
        assert!(config.access_key.is_empty());
    }
}
