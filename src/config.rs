use crate::errors::SsoError;
use serde_derive::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Upper bound for any configured lifetime.
pub const MAX_TTL_SECS: u64 = (i64::MAX / 2) as u64;

/// Broker configuration.
///
/// Read from the `sso` table of the Rocket figment (`Rocket.toml` or
/// `ROCKET_SSO_*`), falling back to [`SsoConfig::from_env`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SsoConfig {
    /// Issuer identifier, also the base url of every advertised endpoint.
    pub issuer: String,
    /// RSA private key (PKCS#8 or PKCS#1 PEM) used to sign ID tokens.
    /// When unset an ephemeral key is generated at startup.
    pub signing_key_path: Option<PathBuf>,
    pub key_id: String,
    /// JSON file holding the OAuth client registry.
    pub clients_file: Option<PathBuf>,
    /// Base url of the national citizen registry.
    pub citizen_registry_url: Option<String>,
    /// Serve the built-in mock citizens when no registry is reachable.
    pub allow_mock_citizens: bool,

    pub code_ttl_secs: u64,
    pub access_token_ttl_secs: u64,
    pub refresh_token_ttl_secs: u64,
    pub id_token_ttl_secs: u64,
    pub session_ttl_secs: u64,
    pub sweep_interval_secs: u64,

    /// Where a login without a pending authorization lands.
    pub post_login_redirect: String,
    /// Where logout lands when the client gave no acceptable redirect.
    pub post_logout_redirect: Option<String>,
    pub secure_cookies: bool,
}

/// please note this is just a development default; deployments should set
/// at least `issuer`, `signing_key_path` and `citizen_registry_url`.
impl Default for SsoConfig {
    fn default() -> SsoConfig {
        Self {
            issuer: "http://localhost:8000".to_string(),
            signing_key_path: None,
            key_id: "wangov-sso-1".to_string(),
            clients_file: None,
            citizen_registry_url: None,
            allow_mock_citizens: true,
            code_ttl_secs: 300,
            access_token_ttl_secs: 3600,
            refresh_token_ttl_secs: 30 * 24 * 3600,
            id_token_ttl_secs: 3600,
            session_ttl_secs: 8 * 3600,
            sweep_interval_secs: 60,
            post_login_redirect: "http://localhost:3000/dashboard".to_string(),
            post_logout_redirect: None,
            secure_cookies: false,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, current: T) -> Result<T, SsoError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| SsoError::Config(format!("{name} has an invalid value: {raw}"))),
        Err(_) => Ok(current),
    }
}

impl SsoConfig {
    /// Build the configuration from `WANGOV_SSO_*` environment variables.
    /// Unset variables keep their default value.
    pub fn from_env() -> Result<Self, SsoError> {
        let defaults = Self::default();

        let issuer = match env::var("WANGOV_SSO_ISSUER") {
            Ok(issuer) => issuer,
            _ => defaults.issuer,
        };
        let signing_key_path = env::var("WANGOV_SSO_SIGNING_KEY")
            .ok()
            .map(PathBuf::from)
            .or(defaults.signing_key_path);
        let key_id = env::var("WANGOV_SSO_KEY_ID").unwrap_or(defaults.key_id);
        let clients_file = env::var("WANGOV_SSO_CLIENTS_FILE")
            .ok()
            .map(PathBuf::from)
            .or(defaults.clients_file);
        let citizen_registry_url = env::var("WANGOV_SSO_CITIZEN_REGISTRY_URL")
            .ok()
            .or(defaults.citizen_registry_url);
        let post_login_redirect =
            env::var("WANGOV_SSO_POST_LOGIN_REDIRECT").unwrap_or(defaults.post_login_redirect);
        let post_logout_redirect = env::var("WANGOV_SSO_POST_LOGOUT_REDIRECT")
            .ok()
            .or(defaults.post_logout_redirect);

        let config = Self {
            issuer,
            signing_key_path,
            key_id,
            clients_file,
            citizen_registry_url,
            allow_mock_citizens: parse_var(
                "WANGOV_SSO_ALLOW_MOCK_CITIZENS",
                defaults.allow_mock_citizens,
            )?,
            code_ttl_secs: parse_var("WANGOV_SSO_CODE_TTL", defaults.code_ttl_secs)?,
            access_token_ttl_secs: parse_var(
                "WANGOV_SSO_ACCESS_TOKEN_TTL",
                defaults.access_token_ttl_secs,
            )?,
            refresh_token_ttl_secs: parse_var(
                "WANGOV_SSO_REFRESH_TOKEN_TTL",
                defaults.refresh_token_ttl_secs,
            )?,
            id_token_ttl_secs: parse_var("WANGOV_SSO_ID_TOKEN_TTL", defaults.id_token_ttl_secs)?,
            session_ttl_secs: parse_var("WANGOV_SSO_SESSION_TTL", defaults.session_ttl_secs)?,
            sweep_interval_secs: parse_var(
                "WANGOV_SSO_SWEEP_INTERVAL",
                defaults.sweep_interval_secs,
            )?,
            post_login_redirect,
            post_logout_redirect,
            secure_cookies: parse_var("WANGOV_SSO_SECURE_COOKIES", defaults.secure_cookies)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Issuer without a trailing slash, ready for endpoint concatenation.
    pub fn base_url(&self) -> &str {
        self.issuer.trim_end_matches('/')
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    pub fn validate(&self) -> Result<(), SsoError> {
        reqwest::Url::parse(&self.issuer)
            .map_err(|e| SsoError::Config(format!("issuer is not a url: {e}")))?;
        if self.code_ttl_secs == 0 || self.access_token_ttl_secs == 0 {
            return Err(SsoError::Config(
                "code and access token lifetimes must be positive".into(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(SsoError::Config("sweep interval must be positive".into()));
        }
        let lifetimes = [
            ("code_ttl_secs", self.code_ttl_secs),
            ("access_token_ttl_secs", self.access_token_ttl_secs),
            ("refresh_token_ttl_secs", self.refresh_token_ttl_secs),
            ("id_token_ttl_secs", self.id_token_ttl_secs),
            ("session_ttl_secs", self.session_ttl_secs),
        ];
        for (name, secs) in lifetimes {
            // expiries are i64 unix seconds
            if secs > MAX_TTL_SECS {
                return Err(SsoError::Config(format!("{name} is too large: {secs}")));
            }
        }
        Ok(())
    }
}
