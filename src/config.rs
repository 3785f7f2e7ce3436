use std::{path::Path, time::Duration};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value as Json;
use url::Url;

const DEFAULT_CLIENT_ID: &str = "waltid-test-token";
const DEFAULT_CREDENTIAL_FORMAT: &str = "vc+sd-jwt";
const DEFAULT_POLLING_INTERVAL_MS: u64 = 3000;

/// Settings for talking to the identity provider and the issuance/verification APIs.
///
/// Keys follow the names used by the deployment's `config.json`, so an existing file can be
/// loaded as-is.
#[derive(Deserialize, Clone)]
pub struct Config {
    /// OAuth2 token endpoint used for the password grant.
    pub token_url: Url,
    #[serde(alias = "keycloak_username")]
    pub username: String,
    #[serde(alias = "keycloak_password")]
    pub password: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    pub issuer_api: BaseUrl,
    pub verifier_api: BaseUrl,
    /// Public address of the verifier front end, target of the wallet redirects.
    pub verifier_base: BaseUrl,
    #[serde(alias = "credentialFormat", default = "default_credential_format")]
    pub credential_format: String,
    #[serde(alias = "credentialType", default)]
    pub credential_type: String,
    /// Claim paths (dot separated) issued as selectively disclosable.
    #[serde(default)]
    pub disclosable_claims: Vec<String>,
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    /// Unset means poll until a terminal result arrives.
    #[serde(default)]
    pub poll_timeout_ms: Option<u64>,
    #[serde(default)]
    pub poll_max_attempts: Option<u32>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("token_url", &self.token_url.as_str())
            .field("username", &self.username)
            .field("client_id", &self.client_id)
            .field("issuer_api", &self.issuer_api)
            .field("verifier_api", &self.verifier_api)
            .field("verifier_base", &self.verifier_base)
            .field("credential_format", &self.credential_format)
            .field("credential_type", &self.credential_type)
            .field("disclosable_claims", &self.disclosable_claims)
            .field("polling_interval_ms", &self.polling_interval_ms)
            .field("poll_timeout_ms", &self.poll_timeout_ms)
            .field("poll_max_attempts", &self.poll_max_attempts)
            .finish_non_exhaustive()
    }
}

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_owned()
}

fn default_credential_format() -> String {
    DEFAULT_CREDENTIAL_FORMAT.to_owned()
}

fn default_polling_interval_ms() -> u64 {
    DEFAULT_POLLING_INTERVAL_MS
}

impl Config {
    /// Load the configuration file at `path`, overlaid with the process environment.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read configuration '{}'", path.display()))?;
        Self::from_json(&raw)
    }

    /// Parse a JSON configuration document, overlaid with the process environment.
    pub fn from_json(raw: &str) -> Result<Self> {
        let value = serde_json::from_str(raw).context("configuration is not valid JSON")?;
        Self::from_value_with_env(value, |key| std::env::var(key).ok())
    }

    /// Build the configuration from a JSON object.
    ///
    /// Every key present in `value` is replaced by `env(key)` when that returns a value. Keys
    /// missing from the document are never read from the environment. Overrides of arrays and
    /// objects are parsed as JSON.
    pub fn from_value_with_env(
        mut value: Json,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let Json::Object(map) = &mut value else {
            bail!("configuration must be a JSON object")
        };

        for (key, entry) in map.iter_mut() {
            let Some(overridden) = env(key) else {
                continue;
            };
            *entry = match entry {
                Json::Number(_) => overridden
                    .parse::<serde_json::Number>()
                    .map(Json::Number)
                    .with_context(|| format!("environment override for '{key}' is not a number"))?,
                Json::Bool(_) => overridden
                    .parse::<bool>()
                    .map(Json::Bool)
                    .with_context(|| format!("environment override for '{key}' is not a boolean"))?,
                Json::Array(_) | Json::Object(_) => serde_json::from_str(&overridden)
                    .with_context(|| format!("environment override for '{key}' is not JSON"))?,
                _ => Json::String(overridden),
            };
        }

        serde_path_to_error::deserialize(value)
            .map_err(|e| anyhow::anyhow!("invalid configuration at '{}': {}", e.path(), e.inner()))
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn poll_timeout(&self) -> Option<Duration> {
        self.poll_timeout_ms.map(Duration::from_millis)
    }
}

/// A url that is always a base (can be safely join()'ed with further path elements without
/// mangling).
#[derive(Deserialize, Debug, Clone, Hash, PartialEq, Eq)]
#[serde(try_from = "String")]
pub struct BaseUrl(Url);

impl BaseUrl {
    /// Append path segments to the base. Segments are percent-encoded, so remote identifiers
    /// can be pushed verbatim.
    pub fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
        let mut url = self.0.clone();
        {
            let Ok(mut path) = url.path_segments_mut() else {
                bail!("'{}' cannot be used as a base URL", self.0)
            };
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }
}

impl std::ops::Deref for BaseUrl {
    type Target = Url;

    fn deref(&self) -> &Url {
        &self.0
    }
}

impl TryFrom<String> for BaseUrl {
    type Error = url::ParseError;

    fn try_from(mut url: String) -> Result<Self, Self::Error> {
        // Make URL a base.
        if !url.ends_with('/') {
            url += "/"
        }
        url.parse().map(Self)
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    fn document() -> Json {
        json!({
            "token_url": "https://keycloak.example.com/realms/waltid/protocol/openid-connect/token",
            "keycloak_username": "demo",
            "keycloak_password": "secret",
            "issuer_api": "https://issuer.example.com/api",
            "verifier_api": "https://verifier.example.com",
            "verifier_base": "https://hsl.example.com",
            "credentialFormat": "vc+sd-jwt",
            "credentialType": "PensionCredential",
            "polling_interval_ms": 3000
        })
    }

    #[test]
    fn deployment_keys_are_accepted() {
        let config = Config::from_value_with_env(document(), |_| None).unwrap();
        assert_eq!(config.username, "demo");
        assert_eq!(config.client_id, DEFAULT_CLIENT_ID);
        assert_eq!(config.credential_type, "PensionCredential");
        assert_eq!(config.issuer_api.as_str(), "https://issuer.example.com/api/");
        assert_eq!(config.poll_timeout(), None);
    }

    #[test]
    fn environment_overrides_present_keys_only() {
        let env = HashMap::from([
            ("keycloak_password", "from-env"),
            ("polling_interval_ms", "500"),
            ("poll_timeout_ms", "1000"),
        ]);
        let config =
            Config::from_value_with_env(document(), |k| env.get(k).map(|v| v.to_string()))
                .unwrap();
        assert_eq!(config.password, "from-env");
        assert_eq!(config.polling_interval(), Duration::from_millis(500));
        assert_eq!(config.poll_timeout_ms, None);
    }

    #[test]
    fn list_override_is_parsed_as_json() {
        let mut value = document();
        value["disclosable_claims"] = json!([]);
        let claims = r#"["Person.givenName", "Pension.typeCode"]"#;
        let config = Config::from_value_with_env(value.clone(), |k| {
            (k == "disclosable_claims").then(|| claims.to_owned())
        })
        .unwrap();
        assert_eq!(config.disclosable_claims, ["Person.givenName", "Pension.typeCode"]);

        let result = Config::from_value_with_env(value, |k| {
            (k == "disclosable_claims").then(|| "Person.givenName".to_owned())
        });
        assert!(result.is_err());
    }

    #[test]
    fn non_numeric_override_is_rejected() {
        let result = Config::from_value_with_env(document(), |k| {
            (k == "polling_interval_ms").then(|| "soon".to_owned())
        });
        assert!(result.is_err());
    }

    #[test]
    fn error_names_the_offending_key() {
        let mut value = document();
        value["verifier_api"] = json!("not a url");
        let error = Config::from_value_with_env(value, |_| None).unwrap_err();
        assert!(error.to_string().contains("verifier_api"), "{error}");
    }

    #[test]
    fn endpoint_appends_encoded_segments() {
        let base = BaseUrl::try_from("https://verifier.example.com/api".to_owned()).unwrap();
        let url = base.endpoint(["openid4vc", "session", "a b"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://verifier.example.com/api/openid4vc/session/a%20b"
        );
    }
}
