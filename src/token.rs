use crate::errors::SsoError;
use crate::utils::{now, random_token};
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    AccessToken,
    RefreshToken,
}

impl TokenKind {
    /// Parses an RFC 7009 / 7662 `token_type_hint`. Unknown hints are ignored.
    pub fn from_hint(hint: Option<&str>) -> Option<Self> {
        match hint {
            Some("access_token") => Some(TokenKind::AccessToken),
            Some("refresh_token") => Some(TokenKind::RefreshToken),
            _ => None,
        }
    }
}

/// What an opaque token stands for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenRecord {
    pub client_id: String,
    pub citizen_id: String,
    pub session_id: String,
    pub scopes: Vec<String>,
    pub auth_time: i64,
    pub issued_at: i64,
    pub expires_at: i64,
}

impl TokenRecord {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

/// The subject of a token pair.
#[derive(Debug, Clone)]
pub struct TokenSubject {
    pub client_id: String,
    pub citizen_id: String,
    pub session_id: String,
    pub scopes: Vec<String>,
    pub auth_time: i64,
}

#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    pub record: TokenRecord,
}

/// In-process store of opaque bearer and refresh tokens.
#[derive(Debug, Clone)]
pub struct TokenStore {
    access: Arc<RwLock<HashMap<String, TokenRecord>>>,
    refresh: Arc<RwLock<HashMap<String, TokenRecord>>>,
    access_ttl: u64,
    refresh_ttl: u64,
}

impl TokenStore {
    pub fn new(access_ttl: u64, refresh_ttl: u64) -> Self {
        Self {
            access: Arc::new(RwLock::new(HashMap::new())),
            refresh: Arc::new(RwLock::new(HashMap::new())),
            access_ttl,
            refresh_ttl,
        }
    }

    fn record(subject: &TokenSubject, issued_at: i64, ttl: u64) -> TokenRecord {
        TokenRecord {
            client_id: subject.client_id.clone(),
            citizen_id: subject.citizen_id.clone(),
            session_id: subject.session_id.clone(),
            scopes: subject.scopes.clone(),
            auth_time: subject.auth_time,
            issued_at,
            expires_at: issued_at.saturating_add(ttl as i64),
        }
    }

    /// Mints an access token and a refresh token for `subject`.
    pub async fn issue(&self, subject: &TokenSubject) -> IssuedTokens {
        let issued_at = now();
        let access_token = random_token();
        let refresh_token = random_token();
        let access_record = Self::record(subject, issued_at, self.access_ttl);

        self.access
            .write()
            .await
            .insert(access_token.clone(), access_record.clone());
        self.refresh.write().await.insert(
            refresh_token.clone(),
            Self::record(subject, issued_at, self.refresh_ttl),
        );

        IssuedTokens {
            access_token,
            refresh_token,
            expires_in: self.access_ttl,
            record: access_record,
        }
    }

    /// Resolves a bearer token presented at a protected endpoint.
    pub async fn lookup_access(&self, token: &str) -> Result<TokenRecord, SsoError> {
        let record = self
            .access
            .read()
            .await
            .get(token)
            .cloned()
            .ok_or_else(|| SsoError::InvalidToken("access token is invalid or revoked".into()))?;
        if record.is_expired(now()) {
            self.access.write().await.remove(token);
            return Err(SsoError::InvalidToken("access token expired".into()));
        }
        Ok(record)
    }

    /// Exchanges a refresh token for a new pair. The presented refresh token
    /// is retired whether or not the exchange succeeds; the requested scopes
    /// may only narrow the original grant.
    pub async fn rotate(
        &self,
        refresh_token: &str,
        client_id: &str,
        requested_scopes: &[String],
    ) -> Result<IssuedTokens, SsoError> {
        let record = self
            .refresh
            .write()
            .await
            .remove(refresh_token)
            .ok_or_else(|| SsoError::InvalidGrant("refresh token is invalid or revoked".into()))?;
        if record.is_expired(now()) {
            return Err(SsoError::InvalidGrant("refresh token expired".into()));
        }
        if record.client_id != client_id {
            return Err(SsoError::InvalidGrant(
                "refresh token was issued to another client".into(),
            ));
        }
        let scopes = if requested_scopes.is_empty() {
            record.scopes.clone()
        } else {
            if let Some(extra) = requested_scopes.iter().find(|s| !record.scopes.contains(s)) {
                return Err(SsoError::InvalidScope(format!(
                    "scope {extra} exceeds the original grant"
                )));
            }
            requested_scopes.to_vec()
        };
        let subject = TokenSubject {
            client_id: record.client_id,
            citizen_id: record.citizen_id,
            session_id: record.session_id,
            scopes,
            auth_time: record.auth_time,
        };
        Ok(self.issue(&subject).await)
    }

    /// Finds an active token of either kind, honouring the hint first.
    pub async fn find(
        &self,
        token: &str,
        hint: Option<TokenKind>,
    ) -> Option<(TokenKind, TokenRecord)> {
        let order = match hint {
            Some(TokenKind::RefreshToken) => [TokenKind::RefreshToken, TokenKind::AccessToken],
            _ => [TokenKind::AccessToken, TokenKind::RefreshToken],
        };
        let now = now();
        for kind in order {
            let found = self.table(kind).read().await.get(token).cloned();
            if let Some(record) = found {
                if record.is_expired(now) {
                    return None;
                }
                return Some((kind, record));
            }
        }
        None
    }

    fn table(&self, kind: TokenKind) -> &Arc<RwLock<HashMap<String, TokenRecord>>> {
        match kind {
            TokenKind::AccessToken => &self.access,
            TokenKind::RefreshToken => &self.refresh,
        }
    }

    /// Revokes a single token on behalf of `client_id`. Tokens owned by other
    /// clients are left alone. Returns whether anything was revoked.
    pub async fn revoke(&self, token: &str, client_id: &str, hint: Option<TokenKind>) -> bool {
        match self.find(token, hint).await {
            Some((kind, record)) if record.client_id == client_id => {
                self.table(kind).write().await.remove(token).is_some()
            }
            _ => false,
        }
    }

    /// Revokes every token issued under an SSO session.
    pub async fn revoke_session(&self, session_id: &str) -> usize {
        let mut removed = 0;
        for table in [&self.access, &self.refresh] {
            let mut tokens = table.write().await;
            let before = tokens.len();
            tokens.retain(|_, record| record.session_id != session_id);
            removed += before - tokens.len();
        }
        removed
    }

    pub async fn purge_expired(&self) -> usize {
        let now = now();
        let mut removed = 0;
        for table in [&self.access, &self.refresh] {
            let mut tokens = table.write().await;
            let before = tokens.len();
            tokens.retain(|_, record| !record.is_expired(now));
            removed += before - tokens.len();
        }
        removed
    }
}

/// RFC 6749 section 5.1 success body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

/// RFC 7662 introspection body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

impl IntrospectionResponse {
    pub fn inactive() -> Self {
        Self::default()
    }

    pub fn active(kind: TokenKind, record: &TokenRecord, issuer: &str) -> Self {
        Self {
            active: true,
            scope: Some(record.scopes.join(" ")),
            client_id: Some(record.client_id.clone()),
            token_type: Some(match kind {
                TokenKind::AccessToken => "Bearer".to_string(),
                TokenKind::RefreshToken => "refresh_token".to_string(),
            }),
            exp: Some(record.expires_at),
            iat: Some(record.issued_at),
            sub: Some(record.citizen_id.clone()),
            iss: Some(issuer.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(session: &str) -> TokenSubject {
        TokenSubject {
            client_id: "wangov-portal".into(),
            citizen_id: "citizen-1".into(),
            session_id: session.into(),
            scopes: vec!["openid".into(), "profile".into(), "email".into()],
            auth_time: now(),
        }
    }

    #[tokio::test]
    async fn issued_access_tokens_resolve() {
        let store = TokenStore::new(3600, 7200);
        let issued = store.issue(&subject("s1")).await;
        assert_eq!(issued.expires_in, 3600);
        assert_ne!(issued.access_token, issued.refresh_token);

        let record = store.lookup_access(&issued.access_token).await.unwrap();
        assert_eq!(record.citizen_id, "citizen-1");
        // a refresh token is not a bearer token
        assert!(store.lookup_access(&issued.refresh_token).await.is_err());
    }

    #[tokio::test]
    async fn expired_access_token_is_invalid() {
        let store = TokenStore::new(0, 0);
        let issued = store.issue(&subject("s1")).await;
        assert!(matches!(
            store.lookup_access(&issued.access_token).await,
            Err(SsoError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn refresh_rotates_and_retires_the_old_token() {
        let store = TokenStore::new(3600, 7200);
        let first = store.issue(&subject("s1")).await;

        let second = store
            .rotate(&first.refresh_token, "wangov-portal", &[])
            .await
            .unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);
        assert_eq!(second.record.scopes, first.record.scopes);

        assert!(matches!(
            store.rotate(&first.refresh_token, "wangov-portal", &[]).await,
            Err(SsoError::InvalidGrant(_))
        ));
    }

    #[tokio::test]
    async fn refresh_can_narrow_but_not_widen() {
        let store = TokenStore::new(3600, 7200);
        let first = store.issue(&subject("s1")).await;
        let narrowed = store
            .rotate(&first.refresh_token, "wangov-portal", &["openid".to_string()])
            .await
            .unwrap();
        assert_eq!(narrowed.record.scopes, vec!["openid".to_string()]);

        let widened = store
            .rotate(
                &narrowed.refresh_token,
                "wangov-portal",
                &["openid".to_string(), "email".to_string()],
            )
            .await;
        assert!(matches!(widened, Err(SsoError::InvalidScope(_))));
    }

    #[tokio::test]
    async fn refresh_by_another_client_fails() {
        let store = TokenStore::new(3600, 7200);
        let issued = store.issue(&subject("s1")).await;
        assert!(
            store
                .rotate(&issued.refresh_token, "nra-portal", &[])
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn revoke_respects_ownership() {
        let store = TokenStore::new(3600, 7200);
        let issued = store.issue(&subject("s1")).await;

        assert!(!store.revoke(&issued.access_token, "nra-portal", None).await);
        assert!(store.lookup_access(&issued.access_token).await.is_ok());

        assert!(
            store
                .revoke(
                    &issued.refresh_token,
                    "wangov-portal",
                    TokenKind::from_hint(Some("refresh_token"))
                )
                .await
        );
        assert!(store.find(&issued.refresh_token, None).await.is_none());
        assert!(store.revoke(&issued.access_token, "wangov-portal", None).await);
        assert!(store.lookup_access(&issued.access_token).await.is_err());
    }

    #[tokio::test]
    async fn session_logout_revokes_only_that_session() {
        let store = TokenStore::new(3600, 7200);
        let a = store.issue(&subject("s1")).await;
        let b = store.issue(&subject("s2")).await;

        assert_eq!(store.revoke_session("s1").await, 2);
        assert!(store.lookup_access(&a.access_token).await.is_err());
        assert!(store.lookup_access(&b.access_token).await.is_ok());
    }

    #[tokio::test]
    async fn introspection_reports_kind() {
        let store = TokenStore::new(3600, 7200);
        let issued = store.issue(&subject("s1")).await;
        let (kind, record) = store.find(&issued.refresh_token, None).await.unwrap();
        assert_eq!(kind, TokenKind::RefreshToken);
        let body = IntrospectionResponse::active(kind, &record, "http://localhost:8000");
        assert!(body.active);
        assert_eq!(body.scope.as_deref(), Some("openid profile email"));

        let inactive = serde_json::to_value(IntrospectionResponse::inactive()).unwrap();
        assert_eq!(inactive, serde_json::json!({ "active": false }));
    }

    #[tokio::test]
    async fn purge_drops_expired_tokens() {
        let store = TokenStore::new(0, 0);
        store.issue(&subject("s1")).await;
        assert_eq!(store.purge_expired().await, 2);
    }
}
