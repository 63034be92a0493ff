pub mod forms;
pub mod pages;
pub mod routes;

use crate::clients::SUPPORTED_SCOPES;
use crate::config::SsoConfig;
use serde_derive::{Deserialize, Serialize};

/// OIDC discovery document served at `/.well-known/openid-configuration`.
///
/// Only what the broker actually implements is advertised.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryDocument {
    /// Issuer identifier; tokens carry it as `iss`.
    pub issuer: String,

    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub jwks_uri: String,
    pub end_session_endpoint: String,
    pub introspection_endpoint: String,
    pub revocation_endpoint: String,

    /// `authorization_code` and `refresh_token`.
    pub grant_types_supported: Vec<String>,
    pub response_types_supported: Vec<String>,
    pub response_modes_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub prompt_values_supported: Vec<String>,

    /// ID tokens are RS256 only.
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub claims_supported: Vec<String>,

    /// `none` is listed for PKCE-only public clients.
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub introspection_endpoint_auth_methods_supported: Vec<String>,
    pub revocation_endpoint_auth_methods_supported: Vec<String>,

    pub code_challenge_methods_supported: Vec<String>,
    pub claims_parameter_supported: bool,
    pub request_parameter_supported: bool,
    pub request_uri_parameter_supported: bool,
    pub frontchannel_logout_supported: bool,
    pub backchannel_logout_supported: bool,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl DiscoveryDocument {
    pub fn new(config: &SsoConfig) -> Self {
        let client_auth = strings(&["client_secret_basic", "client_secret_post"]);
        Self {
            issuer: config.base_url().to_string(),
            authorization_endpoint: config.endpoint("/authorize"),
            token_endpoint: config.endpoint("/token"),
            userinfo_endpoint: config.endpoint("/userinfo"),
            jwks_uri: config.endpoint("/jwks"),
            end_session_endpoint: config.endpoint("/logout"),
            introspection_endpoint: config.endpoint("/introspect"),
            revocation_endpoint: config.endpoint("/revoke"),

            grant_types_supported: strings(&["authorization_code", "refresh_token"]),
            response_types_supported: strings(&["code"]),
            response_modes_supported: strings(&["query"]),
            subject_types_supported: strings(&["public"]),
            prompt_values_supported: strings(&["none", "login"]),
            id_token_signing_alg_values_supported: strings(&["RS256"]),
            scopes_supported: strings(SUPPORTED_SCOPES),
            claims_supported: strings(&[
                "sub",
                "iss",
                "aud",
                "exp",
                "iat",
                "auth_time",
                "nonce",
                "name",
                "given_name",
                "family_name",
                "preferred_username",
                "nin",
                "nin_verified",
                "email",
                "email_verified",
                "phone_number",
                "phone_number_verified",
            ]),
            token_endpoint_auth_methods_supported: strings(&[
                "client_secret_basic",
                "client_secret_post",
                "none",
            ]),
            introspection_endpoint_auth_methods_supported: client_auth.clone(),
            revocation_endpoint_auth_methods_supported: client_auth,
            code_challenge_methods_supported: strings(&["S256"]),
            claims_parameter_supported: false,
            request_parameter_supported: false,
            request_uri_parameter_supported: false,
            frontchannel_logout_supported: false,
            backchannel_logout_supported: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_hang_off_the_issuer() {
        let config = SsoConfig {
            issuer: "https://sso.wangov.sl/".into(),
            ..Default::default()
        };
        let doc = DiscoveryDocument::new(&config);
        assert_eq!(doc.issuer, "https://sso.wangov.sl");
        assert_eq!(doc.token_endpoint, "https://sso.wangov.sl/token");
        assert_eq!(doc.jwks_uri, "https://sso.wangov.sl/jwks");
        assert_eq!(doc.code_challenge_methods_supported, vec!["S256"]);
        assert!(doc.scopes_supported.contains(&"openid".to_string()));
    }
}
