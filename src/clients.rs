//! OAuth client registry.
//!
//! The registry is static configuration: which portals may use the broker,
//! where they may be redirected, which scopes they may receive and whether
//! they are first-party (trusted, no consent page). Portals are also reachable
//! by subdomain, so `https://nra.wangov.sl/...` resolves to the NRA client when
//! a request omits `client_id`.

use crate::errors::SsoError;
use crate::utils::constant_time_eq;
use reqwest::Url;
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const SUPPORTED_SCOPES: &[&str] = &["openid", "profile", "email", "phone"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OAuthClient {
    pub client_id: String,
    pub name: String,
    /// `None` marks a public client, which must use PKCE.
    #[serde(default)]
    pub client_secret: Option<String>,
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub post_logout_redirect_uris: Vec<String>,
    pub scopes: Vec<String>,
    #[serde(default)]
    pub trusted: bool,
    #[serde(default)]
    pub subdomains: Vec<String>,
}

impl OAuthClient {
    pub fn is_public(&self) -> bool {
        self.client_secret.is_none()
    }

    pub fn allows_redirect(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|registered| registered == uri)
    }

    pub fn allows_post_logout_redirect(&self, uri: &str) -> bool {
        self.post_logout_redirect_uris
            .iter()
            .any(|registered| registered == uri)
    }
}

/// Lookup table of registered clients plus the subdomain mapping.
#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    clients: HashMap<String, OAuthClient>,
    subdomains: HashMap<String, String>,
}

impl ClientRegistry {
    pub fn new(clients: Vec<OAuthClient>) -> Result<Self, SsoError> {
        let mut registry = Self::default();
        for client in clients {
            registry.insert(client)?;
        }
        Ok(registry)
    }

    pub fn insert(&mut self, client: OAuthClient) -> Result<(), SsoError> {
        if client.redirect_uris.is_empty() {
            return Err(SsoError::Config(format!(
                "client {} has no redirect uris",
                client.client_id
            )));
        }
        for uri in client
            .redirect_uris
            .iter()
            .chain(client.post_logout_redirect_uris.iter())
        {
            Url::parse(uri).map_err(|e| {
                SsoError::Config(format!(
                    "client {} has an invalid redirect uri {uri}: {e}",
                    client.client_id
                ))
            })?;
        }
        for label in &client.subdomains {
            let label = label.to_ascii_lowercase();
            if let Some(owner) = self.subdomains.get(&label) {
                if owner != &client.client_id {
                    return Err(SsoError::Config(format!(
                        "subdomain {label} is claimed by both {owner} and {}",
                        client.client_id
                    )));
                }
            }
            self.subdomains.insert(label, client.client_id.clone());
        }
        self.clients.insert(client.client_id.clone(), client);
        Ok(())
    }

    /// Loads the registry from a JSON array of clients.
    pub fn from_file(path: &Path) -> Result<Self, SsoError> {
        let raw = std::fs::read_to_string(path)?;
        let clients: Vec<OAuthClient> = serde_json::from_str(&raw)?;
        Self::new(clients)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn get(&self, client_id: &str) -> Option<&OAuthClient> {
        self.clients.get(client_id)
    }

    pub fn for_subdomain(&self, label: &str) -> Option<&OAuthClient> {
        self.subdomains
            .get(&label.to_ascii_lowercase())
            .and_then(|id| self.clients.get(id))
    }

    /// Finds the client for an authorization request.
    ///
    /// With no `client_id` the client is inferred from the first host label
    /// of `redirect_uri`. Either way the redirect uri must be registered for
    /// the client; failures here must never be redirected.
    pub fn resolve(
        &self,
        client_id: Option<&str>,
        redirect_uri: Option<&str>,
    ) -> Result<(&OAuthClient, String), SsoError> {
        let client = match client_id {
            Some(id) => self
                .get(id)
                .ok_or_else(|| SsoError::InvalidClient(format!("unknown client: {id}")))?,
            None => {
                let uri = redirect_uri.ok_or_else(|| {
                    SsoError::InvalidRequest("client_id or redirect_uri is required".into())
                })?;
                let url = Url::parse(uri)
                    .map_err(|_| SsoError::InvalidRedirectUri(format!("malformed redirect_uri: {uri}")))?;
                let label = url
                    .host_str()
                    .and_then(|host| host.split('.').next())
                    .ok_or_else(|| SsoError::InvalidRedirectUri("redirect_uri has no host".into()))?;
                self.for_subdomain(label).ok_or_else(|| {
                    SsoError::InvalidClient(format!("no client registered for subdomain {label}"))
                })?
            }
        };

        let redirect_uri = match redirect_uri {
            Some(uri) => uri.to_string(),
            // a single registered uri may be implied
            None if client.redirect_uris.len() == 1 => client.redirect_uris[0].clone(),
            None => {
                return Err(SsoError::InvalidRedirectUri(
                    "redirect_uri is required for this client".into(),
                ));
            }
        };
        Self::validate_redirect(client, &redirect_uri)?;
        Ok((client, redirect_uri))
    }

    /// Exact-match check of `uri` against the client's registered redirects.
    pub fn validate_redirect(client: &OAuthClient, uri: &str) -> Result<(), SsoError> {
        if client.allows_redirect(uri) {
            Ok(())
        } else {
            Err(SsoError::InvalidRedirectUri(format!(
                "redirect_uri is not registered for {}",
                client.client_id
            )))
        }
    }

    /// Authenticates a client at the token, introspection and revocation
    /// endpoints. Public clients authenticate by id alone.
    pub fn authenticate(
        &self,
        client_id: &str,
        secret: Option<&str>,
    ) -> Result<&OAuthClient, SsoError> {
        let client = self
            .get(client_id)
            .ok_or_else(|| SsoError::InvalidClient("client authentication failed".into()))?;
        match (&client.client_secret, secret) {
            (Some(expected), Some(given)) if constant_time_eq(expected, given) => Ok(client),
            (None, None) => Ok(client),
            _ => Err(SsoError::InvalidClient(
                "client authentication failed".into(),
            )),
        }
    }

    /// The built-in WanGov client table used when no clients file is configured.
    pub fn wangov_defaults() -> Self {
        let all_scopes = || SUPPORTED_SCOPES.iter().map(|s| s.to_string()).collect();
        let clients = vec![
            OAuthClient {
                client_id: "wangov-portal".into(),
                name: "WanGov Citizen Portal".into(),
                client_secret: Some("wangov-portal-secret".into()),
                redirect_uris: vec![
                    "http://localhost:3000/auth/callback".into(),
                    "https://portal.wangov.sl/auth/callback".into(),
                ],
                post_logout_redirect_uris: vec![
                    "http://localhost:3000/".into(),
                    "https://portal.wangov.sl/".into(),
                ],
                scopes: all_scopes(),
                trusted: true,
                subdomains: vec!["portal".into(), "www".into()],
            },
            OAuthClient {
                client_id: "nra-portal".into(),
                name: "National Revenue Authority".into(),
                client_secret: Some("nra-portal-secret".into()),
                redirect_uris: vec![
                    "http://localhost:3001/auth/callback".into(),
                    "https://nra.wangov.sl/auth/callback".into(),
                ],
                post_logout_redirect_uris: vec!["https://nra.wangov.sl/".into()],
                scopes: vec!["openid".into(), "profile".into(), "email".into()],
                trusted: true,
                subdomains: vec!["nra".into()],
            },
            OAuthClient {
                client_id: "mda-wordpress".into(),
                name: "MDA WordPress Site".into(),
                client_secret: Some("mda-wordpress-secret".into()),
                redirect_uris: vec![
                    "http://localhost:8080/wp-admin/admin-ajax.php?action=wangov_sso_callback"
                        .into(),
                    "https://mda.wangov.sl/wp-admin/admin-ajax.php?action=wangov_sso_callback"
                        .into(),
                ],
                post_logout_redirect_uris: vec!["https://mda.wangov.sl/".into()],
                scopes: vec!["openid".into(), "profile".into(), "email".into()],
                trusted: false,
                subdomains: vec!["mda".into()],
            },
            OAuthClient {
                client_id: "citizen-mobile".into(),
                name: "WanGov Mobile".into(),
                client_secret: None,
                redirect_uris: vec!["sl.wangov.mobile:/oauth/callback".into()],
                post_logout_redirect_uris: vec![],
                scopes: vec!["openid".into(), "profile".into(), "phone".into()],
                trusted: false,
                subdomains: vec![],
            },
        ];
        // the table above is static and known to be valid
        let mut registry = Self::default();
        for client in clients {
            if let Err(e) = registry.insert(client) {
                log::error!("invalid built-in client: {}", e);
            }
        }
        registry
    }
}

/// Splits a space-delimited scope parameter.
pub fn parse_scope(scope: Option<&str>) -> Vec<String> {
    let mut scopes: Vec<String> = Vec::new();
    for s in scope.unwrap_or_default().split_whitespace() {
        if !scopes.iter().any(|known| known == s) {
            scopes.push(s.to_string());
        }
    }
    scopes
}

/// Narrows the requested scopes to what the client was granted.
///
/// An empty request means every granted scope; an empty intersection is an
/// `invalid_scope` error.
pub fn grant_scopes(client: &OAuthClient, requested: &[String]) -> Result<Vec<String>, SsoError> {
    if requested.is_empty() {
        return Ok(client.scopes.clone());
    }
    let granted: Vec<String> = requested
        .iter()
        .filter(|scope| client.scopes.contains(scope))
        .cloned()
        .collect();
    if granted.is_empty() {
        return Err(SsoError::InvalidScope(format!(
            "none of the requested scopes are allowed for {}",
            client.client_id
        )));
    }
    Ok(granted)
}

pub fn join_scope(scopes: &[String]) -> String {
    scopes.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ClientRegistry {
        ClientRegistry::wangov_defaults()
    }

    #[test]
    fn builtin_table_loads() {
        let registry = registry();
        assert_eq!(registry.len(), 4);
        assert!(registry.get("wangov-portal").unwrap().trusted);
        assert!(registry.get("citizen-mobile").unwrap().is_public());
    }

    #[test]
    fn resolves_client_by_subdomain() {
        let registry = registry();
        let (client, uri) = registry
            .resolve(None, Some("https://nra.wangov.sl/auth/callback"))
            .unwrap();
        assert_eq!(client.client_id, "nra-portal");
        assert_eq!(uri, "https://nra.wangov.sl/auth/callback");
        assert_eq!(
            registry.for_subdomain("WWW").unwrap().client_id,
            "wangov-portal"
        );
    }

    #[test]
    fn unregistered_redirect_is_refused() {
        let registry = registry();
        let err = registry
            .resolve(
                Some("wangov-portal"),
                Some("https://evil.example/auth/callback"),
            )
            .unwrap_err();
        assert!(matches!(err, SsoError::InvalidRedirectUri(_)));

        // prefix matches are not enough
        let err = registry
            .resolve(
                Some("wangov-portal"),
                Some("https://portal.wangov.sl/auth/callback/../../steal"),
            )
            .unwrap_err();
        assert!(matches!(err, SsoError::InvalidRedirectUri(_)));
    }

    #[test]
    fn single_redirect_uri_may_be_implied() {
        let registry = registry();
        let (_, uri) = registry.resolve(Some("citizen-mobile"), None).unwrap();
        assert_eq!(uri, "sl.wangov.mobile:/oauth/callback");
        assert!(registry.resolve(Some("wangov-portal"), None).is_err());
    }

    #[test]
    fn unknown_client_is_invalid_client() {
        let err = registry()
            .resolve(Some("ghost"), Some("https://portal.wangov.sl/auth/callback"))
            .unwrap_err();
        assert!(matches!(err, SsoError::InvalidClient(_)));
    }

    #[test]
    fn client_authentication() {
        let registry = registry();
        assert!(
            registry
                .authenticate("wangov-portal", Some("wangov-portal-secret"))
                .is_ok()
        );
        assert!(registry.authenticate("wangov-portal", Some("wrong")).is_err());
        assert!(registry.authenticate("wangov-portal", None).is_err());
        assert!(registry.authenticate("citizen-mobile", None).is_ok());
        assert!(
            registry
                .authenticate("citizen-mobile", Some("anything"))
                .is_err()
        );
        assert!(registry.authenticate("ghost", None).is_err());
    }

    #[test]
    fn scopes_are_narrowed_to_the_grant() {
        let registry = registry();
        let nra = registry.get("nra-portal").unwrap();

        let granted = grant_scopes(nra, &parse_scope(Some("openid phone email openid"))).unwrap();
        assert_eq!(granted, vec!["openid".to_string(), "email".to_string()]);

        assert_eq!(grant_scopes(nra, &[]).unwrap(), nra.scopes);
        assert!(matches!(
            grant_scopes(nra, &parse_scope(Some("phone"))),
            Err(SsoError::InvalidScope(_))
        ));
    }

    #[test]
    fn duplicate_subdomain_claims_are_rejected() {
        let mut registry = registry();
        let err = registry
            .insert(OAuthClient {
                client_id: "impostor".into(),
                name: "Impostor".into(),
                client_secret: None,
                redirect_uris: vec!["https://nra.example/cb".into()],
                post_logout_redirect_uris: vec![],
                scopes: vec!["openid".into()],
                trusted: false,
                subdomains: vec!["nra".into()],
            })
            .unwrap_err();
        assert!(matches!(err, SsoError::Config(_)));
    }

    #[test]
    fn registry_parses_from_json() {
        let json = r#"[{
            "client_id": "lands",
            "name": "Ministry of Lands",
            "client_secret": "s3cret",
            "redirect_uris": ["https://lands.wangov.sl/cb"],
            "scopes": ["openid", "profile"],
            "subdomains": ["lands"]
        }]"#;
        let clients: Vec<OAuthClient> = serde_json::from_str(json).unwrap();
        let registry = ClientRegistry::new(clients).unwrap();
        let lands = registry.for_subdomain("lands").unwrap();
        assert!(!lands.trusted);
        assert!(lands.post_logout_redirect_uris.is_empty());
    }
}
