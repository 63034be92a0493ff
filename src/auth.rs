//! Request guards and cookie-backed session state.
//!
//! `SsoSession` is the browser's single sign-on session; `PendingAuthorization`
//! carries a validated `/authorize` request across the login and consent
//! pages. Both live in private (encrypted, authenticated) cookies, so the
//! session store is the user's own cookie jar. `BearerToken` and
//! `BasicCredentials` read the `Authorization` header.

use crate::SsoState;
use crate::errors::SsoError;
use crate::token::TokenRecord;
use crate::utils::now;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Url;
use rocket::Request;
use rocket::http::{Cookie, CookieJar, RawStr, SameSite, Status};
use rocket::request::{FromRequest, Outcome};
use serde::de::DeserializeOwned;
use serde_derive::{Deserialize, Serialize};

pub const SESSION_COOKIE: &str = "wangov_sso";
pub const PENDING_COOKIE: &str = "wangov_sso_pending";
pub const PENDING_TTL_SECS: i64 = 600;

fn write_private<T: serde::Serialize>(
    jar: &CookieJar<'_>,
    name: &'static str,
    value: &T,
    max_age_secs: i64,
    secure: bool,
) -> Result<(), SsoError> {
    let json = serde_json::to_string(value)?;
    let cookie = Cookie::build((name, json))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(rocket::time::Duration::seconds(max_age_secs));
    jar.add_private(cookie);
    Ok(())
}

fn read_private<T: DeserializeOwned>(jar: &CookieJar<'_>, name: &'static str) -> Option<T> {
    let cookie = jar.get_private(name)?;
    match serde_json::from_str::<T>(cookie.value()) {
        Ok(value) => Some(value),
        Err(err) => {
            log::warn!("discarding corrupt {} cookie: {}", name, err);
            jar.remove_private(Cookie::build(name).path("/"));
            None
        }
    }
}

/// The browser's SSO session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SsoSession {
    pub session_id: String,
    pub citizen_id: String,
    pub auth_time: i64,
    pub expires_at: i64,
}

impl SsoSession {
    pub fn new(citizen_id: impl Into<String>, ttl_secs: u64) -> Self {
        let auth_time = now();
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            citizen_id: citizen_id.into(),
            auth_time,
            expires_at: auth_time.saturating_add(ttl_secs as i64),
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }

    pub fn store(&self, jar: &CookieJar<'_>, secure: bool) -> Result<(), SsoError> {
        let remaining = (self.expires_at - now()).max(0);
        write_private(jar, SESSION_COOKIE, self, remaining, secure)
    }

    /// Reads the session; expired or corrupt cookies are removed.
    pub fn from_jar(jar: &CookieJar<'_>) -> Option<Self> {
        let session: SsoSession = read_private(jar, SESSION_COOKIE)?;
        if session.is_expired(now()) {
            Self::clear(jar);
            return None;
        }
        Some(session)
    }

    pub fn clear(jar: &CookieJar<'_>) {
        jar.remove_private(Cookie::build(SESSION_COOKIE).path("/"));
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for SsoSession {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match SsoSession::from_jar(req.cookies()) {
            Some(session) => Outcome::Success(session),
            None => Outcome::Forward(Status::Unauthorized),
        }
    }
}

/// A validated authorization request waiting on login or consent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingAuthorization {
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub created_at: i64,
}

impl PendingAuthorization {
    pub fn store(&self, jar: &CookieJar<'_>, secure: bool) -> Result<(), SsoError> {
        write_private(jar, PENDING_COOKIE, self, PENDING_TTL_SECS, secure)
    }

    pub fn peek(jar: &CookieJar<'_>) -> Option<Self> {
        let pending: PendingAuthorization = read_private(jar, PENDING_COOKIE)?;
        if pending.created_at + PENDING_TTL_SECS <= now() {
            Self::clear(jar);
            return None;
        }
        Some(pending)
    }

    /// Reads and removes the pending request.
    pub fn take(jar: &CookieJar<'_>) -> Option<Self> {
        let pending = Self::peek(jar);
        Self::clear(jar);
        pending
    }

    pub fn clear(jar: &CookieJar<'_>) {
        jar.remove_private(Cookie::build(PENDING_COOKIE).path("/"));
    }

    /// Where to send the browser with `params` appended to the client's
    /// redirect uri, carrying `state` back unchanged.
    pub fn redirect_with(&self, params: &[(&str, &str)]) -> Result<String, SsoError> {
        append_query(&self.redirect_uri, params, self.state.as_deref())
    }
}

/// Appends form-encoded parameters to `uri`, keeping any query it already has.
pub fn append_query(
    uri: &str,
    params: &[(&str, &str)],
    state: Option<&str>,
) -> Result<String, SsoError> {
    let mut url = Url::parse(uri)?;
    if params.is_empty() && state.is_none() {
        return Ok(uri.to_string());
    }
    {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in params {
            pairs.append_pair(key, value);
        }
        if let Some(state) = state {
            pairs.append_pair("state", state);
        }
    }
    Ok(url.into())
}

fn state_from<'r>(req: &'r Request<'_>) -> Result<&'r SsoState, SsoError> {
    req.rocket()
        .state::<SsoState>()
        .ok_or_else(|| SsoError::Custom("broker state is not managed".into()))
}

pub(crate) fn extract_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

/// A live access token from the `Authorization: Bearer` header.
#[derive(Debug, Clone)]
pub struct BearerToken {
    pub token: String,
    pub record: TokenRecord,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for BearerToken {
    type Error = SsoError;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let state = match state_from(req) {
            Ok(state) => state,
            Err(err) => return Outcome::Error((Status::InternalServerError, err)),
        };
        let token = match req.headers().get_one("Authorization").and_then(extract_bearer) {
            Some(token) => token.to_string(),
            None => {
                return Outcome::Error((
                    Status::Unauthorized,
                    SsoError::InvalidToken("missing bearer token".into()),
                ));
            }
        };
        match state.tokens.lookup_access(&token).await {
            Ok(record) => Outcome::Success(BearerToken { token, record }),
            Err(err) => {
                log::warn!("rejected bearer token: {}", err);
                Outcome::Error((Status::Unauthorized, err))
            }
        }
    }
}

/// Client credentials from an `Authorization: Basic` header (RFC 6749 2.3.1).
#[derive(Debug, Clone, PartialEq)]
pub struct BasicCredentials {
    pub client_id: String,
    pub client_secret: String,
}

pub(crate) fn parse_basic(header: &str) -> Option<BasicCredentials> {
    let (scheme, encoded) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    // both halves are form-urlencoded before being joined
    let client_id = RawStr::new(id).url_decode().ok()?.into_owned();
    let client_secret = RawStr::new(secret).url_decode().ok()?.into_owned();
    Some(BasicCredentials {
        client_id,
        client_secret,
    })
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for BasicCredentials {
    type Error = SsoError;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match req.headers().get_one("Authorization") {
            None => Outcome::Forward(Status::Unauthorized),
            Some(header) => match parse_basic(header) {
                Some(credentials) => Outcome::Success(credentials),
                None => Outcome::Error((
                    Status::Unauthorized,
                    SsoError::InvalidClient("malformed basic credentials".into()),
                )),
            },
        }
    }
}

/// Picks the client credentials from either the header or the form body;
/// presenting both is an error.
pub fn client_credentials(
    basic: Option<BasicCredentials>,
    form_client_id: Option<&str>,
    form_client_secret: Option<&str>,
) -> Result<(String, Option<String>), SsoError> {
    match basic {
        Some(basic) => {
            if form_client_secret.is_some() {
                return Err(SsoError::InvalidRequest(
                    "client credentials sent by more than one method".into(),
                ));
            }
            if form_client_id.is_some_and(|id| id != basic.client_id) {
                return Err(SsoError::InvalidClient("client_id mismatch".into()));
            }
            Ok((basic.client_id, Some(basic.client_secret)))
        }
        None => {
            let client_id = form_client_id
                .ok_or_else(|| SsoError::InvalidClient("client authentication required".into()))?;
            Ok((
                client_id.to_string(),
                form_client_secret.map(|s| s.to_string()),
            ))
        }
    }
}
