//! One-time authorization codes.
//!
//! A code is handed to the browser on the redirect back to the client and
//! redeemed once at the token endpoint. Redemption removes the code before
//! any check runs, so a code is spent by its first use whether or not that
//! use succeeds.

use crate::errors::SsoError;
use crate::utils::{now, random_token};
use openidconnect::{PkceCodeChallenge, PkceCodeVerifier};
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Everything a code stands for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationGrant {
    pub client_id: String,
    pub redirect_uri: String,
    pub citizen_id: String,
    pub session_id: String,
    pub scopes: Vec<String>,
    pub nonce: Option<String>,
    /// S256 challenge; only S256 is accepted at the authorization endpoint.
    pub code_challenge: Option<String>,
    pub auth_time: i64,
}

#[derive(Debug, Clone)]
struct StoredGrant {
    grant: AuthorizationGrant,
    expires_at: i64,
}

/// Parameters presented alongside a code at the token endpoint.
#[derive(Debug, Clone, Copy)]
pub struct Redemption<'a> {
    pub client_id: &'a str,
    pub redirect_uri: Option<&'a str>,
    pub code_verifier: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct CodeStore {
    codes: Arc<RwLock<HashMap<String, StoredGrant>>>,
    ttl_secs: i64,
}

impl CodeStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            codes: Arc::new(RwLock::new(HashMap::new())),
            ttl_secs: ttl_secs as i64,
        }
    }

    /// Stores the grant under a fresh code and returns the code.
    pub async fn issue(&self, grant: AuthorizationGrant) -> String {
        let code = random_token();
        let stored = StoredGrant {
            grant,
            expires_at: now() + self.ttl_secs,
        };
        self.codes.write().await.insert(code.clone(), stored);
        code
    }

    /// Spends a code.
    pub async fn redeem(
        &self,
        code: &str,
        redemption: Redemption<'_>,
    ) -> Result<AuthorizationGrant, SsoError> {
        let stored = self
            .codes
            .write()
            .await
            .remove(code)
            .ok_or_else(|| SsoError::InvalidGrant("authorization code is invalid or already used".into()))?;

        if stored.expires_at <= now() {
            return Err(SsoError::InvalidGrant("authorization code expired".into()));
        }
        let grant = stored.grant;
        if grant.client_id != redemption.client_id {
            return Err(SsoError::InvalidGrant(
                "authorization code was issued to another client".into(),
            ));
        }
        if let Some(redirect_uri) = redemption.redirect_uri {
            if redirect_uri != grant.redirect_uri {
                return Err(SsoError::InvalidGrant("redirect_uri mismatch".into()));
            }
        }
        verify_pkce(grant.code_challenge.as_deref(), redemption.code_verifier)?;
        Ok(grant)
    }

    /// Drops expired codes; returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = now();
        let mut codes = self.codes.write().await;
        let before = codes.len();
        codes.retain(|_, stored| stored.expires_at > now);
        before - codes.len()
    }

    /// Drops every unredeemed code issued under an SSO session.
    pub async fn revoke_session(&self, session_id: &str) -> usize {
        let mut codes = self.codes.write().await;
        let before = codes.len();
        codes.retain(|_, stored| stored.grant.session_id != session_id);
        before - codes.len()
    }

    pub async fn len(&self) -> usize {
        self.codes.read().await.len()
    }
}

/// RFC 7636 section 4.1 verifier syntax.
fn is_valid_verifier(verifier: &str) -> bool {
    (43..=128).contains(&verifier.len())
        && verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
}

pub fn verify_pkce(challenge: Option<&str>, verifier: Option<&str>) -> Result<(), SsoError> {
    match (challenge, verifier) {
        (None, None) => Ok(()),
        (None, Some(_)) => Err(SsoError::InvalidGrant(
            "code_verifier sent for a code issued without PKCE".into(),
        )),
        (Some(_), None) => Err(SsoError::InvalidGrant("code_verifier is required".into())),
        (Some(challenge), Some(verifier)) => {
            if !is_valid_verifier(verifier) {
                return Err(SsoError::InvalidGrant("malformed code_verifier".into()));
            }
            let computed =
                PkceCodeChallenge::from_code_verifier_sha256(&PkceCodeVerifier::new(verifier.to_string()));
            if computed.as_str() == challenge {
                Ok(())
            } else {
                Err(SsoError::InvalidGrant("PKCE verification failed".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    // RFC 7636 appendix B
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCQaoeH_yA7hhO9TMEE9Hm7M";

    fn grant() -> AuthorizationGrant {
        AuthorizationGrant {
            client_id: "wangov-portal".into(),
            redirect_uri: "https://portal.wangov.sl/auth/callback".into(),
            citizen_id: "citizen-1".into(),
            session_id: "session-1".into(),
            scopes: vec!["openid".into(), "profile".into()],
            nonce: Some("n-0S6_WzA2Mj".into()),
            code_challenge: None,
            auth_time: now(),
        }
    }

    fn redemption<'a>() -> Redemption<'a> {
        Redemption {
            client_id: "wangov-portal",
            redirect_uri: Some("https://portal.wangov.sl/auth/callback"),
            code_verifier: None,
        }
    }

    #[tokio::test]
    async fn code_is_single_use() {
        let store = CodeStore::new(300);
        let code = store.issue(grant()).await;

        let redeemed = store.redeem(&code, redemption()).await.unwrap();
        assert_eq!(redeemed.citizen_id, "citizen-1");

        let again = store.redeem(&code, redemption()).await;
        assert!(matches!(again, Err(SsoError::InvalidGrant(_))));
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn failed_redemption_still_spends_the_code() {
        let store = CodeStore::new(300);
        let code = store.issue(grant()).await;

        let wrong_client = Redemption {
            client_id: "nra-portal",
            ..redemption()
        };
        assert!(store.redeem(&code, wrong_client).await.is_err());
        assert!(store.redeem(&code, redemption()).await.is_err());
    }

    #[tokio::test]
    async fn redirect_uri_must_match() {
        let store = CodeStore::new(300);
        let code = store.issue(grant()).await;
        let mismatched = Redemption {
            redirect_uri: Some("https://portal.wangov.sl/other"),
            ..redemption()
        };
        assert!(matches!(
            store.redeem(&code, mismatched).await,
            Err(SsoError::InvalidGrant(_))
        ));
    }

    #[tokio::test]
    async fn expired_codes_are_refused_and_purged() {
        let store = CodeStore::new(0);
        let code = store.issue(grant()).await;
        assert!(store.redeem(&code, redemption()).await.is_err());

        store.issue(grant()).await;
        store.issue(grant()).await;
        assert_eq!(store.purge_expired().await, 2);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn session_revocation_spends_its_codes() {
        let store = CodeStore::new(300);
        let code = store.issue(grant()).await;
        let other = store
            .issue(AuthorizationGrant {
                session_id: "session-2".into(),
                ..grant()
            })
            .await;

        assert_eq!(store.revoke_session("session-1").await, 1);
        assert!(matches!(
            store.redeem(&code, redemption()).await,
            Err(SsoError::InvalidGrant(_))
        ));
        assert!(store.redeem(&other, redemption()).await.is_ok());
    }

    #[tokio::test]
    async fn pkce_round_trip() {
        let store = CodeStore::new(300);
        let code = store
            .issue(AuthorizationGrant {
                code_challenge: Some(CHALLENGE.into()),
                ..grant()
            })
            .await;
        let with_verifier = Redemption {
            code_verifier: Some(VERIFIER),
            ..redemption()
        };
        assert!(store.redeem(&code, with_verifier).await.is_ok());
    }

    #[test]
    fn pkce_mismatches() {
        assert!(verify_pkce(Some(CHALLENGE), None).is_err());
        assert!(verify_pkce(None, Some(VERIFIER)).is_err());
        assert!(verify_pkce(Some(CHALLENGE), Some("too-short")).is_err());
        let other = "a".repeat(43);
        assert!(verify_pkce(Some(CHALLENGE), Some(&other)).is_err());
        assert!(verify_pkce(None, None).is_ok());
    }
}
