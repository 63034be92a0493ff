use super::DiscoveryDocument;
use super::forms::*;
use super::pages;
use crate::SsoState;
use crate::auth::{
    BasicCredentials, BearerToken, PendingAuthorization, SsoSession, append_query,
    client_credentials,
};
use crate::citizens::{self, Citizen};
use crate::claims::{CitizenClaims, IdTokenClaims, UserInfo};
use crate::clients::{OAuthClient, grant_scopes, join_scope, parse_scope};
use crate::errors::SsoError;
use crate::grants::{AuthorizationGrant, Redemption};
use crate::token::{IntrospectionResponse, IssuedTokens, TokenKind, TokenResponse, TokenSubject};
use crate::utils::now;
use openidconnect::core::CoreJsonWebKeySet;
use rocket::form::{Form, Lenient};
use rocket::http::{CookieJar, Status};
use rocket::response::{self, Redirect, Responder, Response, content::RawHtml};
use rocket::serde::json::Json;
use rocket::{Catcher, Request, Route, State, catch, catchers, get, post, routes};
use serde_derive::Serialize;
use serde_json::{Value, json};

////////////////////////////////////////////////////////////////////////////////
// Responses
////////////////////////////////////////////////////////////////////////////////

/// Outcome of a browser-facing endpoint.
#[derive(rocket::Responder)]
pub enum BrowserResponse {
    Redirect(Redirect),
    Page(RawHtml<String>),
    #[response(status = 400)]
    Invalid(RawHtml<String>),
    #[response(status = 401)]
    Unauthorized(RawHtml<String>),
}

impl BrowserResponse {
    fn redirect(url: String) -> Self {
        BrowserResponse::Redirect(Redirect::to(url))
    }

    fn invalid(message: &str) -> Self {
        BrowserResponse::Invalid(RawHtml(pages::error_page(message)))
    }
}

/// JSON that must not be cached (RFC 6749 section 5.1).
pub struct NoStore<T>(pub T);

impl<'r, T: serde::Serialize> Responder<'r, 'static> for NoStore<T> {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        Response::build_from(Json(self.0).respond_to(request)?)
            .raw_header("Cache-Control", "no-store")
            .raw_header("Pragma", "no-cache")
            .ok()
    }
}

/// Redirects an authorization error back to the client.
fn error_redirect(
    redirect_uri: &str,
    state: Option<&str>,
    err: &SsoError,
) -> Result<BrowserResponse, SsoError> {
    let body = err.body();
    let description = body.error_description.unwrap_or_default();
    let url = append_query(
        redirect_uri,
        &[("error", body.error), ("error_description", description.as_str())],
        state,
    )?;
    Ok(BrowserResponse::redirect(url))
}

////////////////////////////////////////////////////////////////////////////////
// Discovery
////////////////////////////////////////////////////////////////////////////////

/// OIDC Discovery endpoint
#[get("/.well-known/openid-configuration")]
pub fn discovery(state: &State<SsoState>) -> Json<DiscoveryDocument> {
    Json(state.discovery.clone())
}

/// Underscored alias still used by the WanGov portals.
#[get("/.well-known/openid_configuration")]
pub fn discovery_alias(state: &State<SsoState>) -> Json<DiscoveryDocument> {
    Json(state.discovery.clone())
}

#[get("/jwks")]
pub fn jwks(state: &State<SsoState>) -> Json<CoreJsonWebKeySet> {
    Json(state.signer.jwks())
}

#[get("/health")]
pub fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

////////////////////////////////////////////////////////////////////////////////
// Authorization
////////////////////////////////////////////////////////////////////////////////

/// Validates everything about an authorization request that is reported
/// by redirecting back to the client.
fn validate_authorization(
    client: &OAuthClient,
    redirect_uri: String,
    request: &AuthorizationRequest,
) -> Result<PendingAuthorization, SsoError> {
    match request.response_type.as_deref() {
        Some("code") => {}
        Some(other) => return Err(SsoError::UnsupportedResponseType(other.to_string())),
        None => return Err(SsoError::InvalidRequest("response_type is required".into())),
    }

    let scopes = grant_scopes(client, &parse_scope(request.scope.as_deref()))?;

    let code_challenge = match (
        request.code_challenge.as_deref(),
        request.code_challenge_method.as_deref(),
    ) {
        (None, None) => None,
        (Some(challenge), Some("S256")) => Some(challenge.to_string()),
        (Some(_), None) => {
            return Err(SsoError::InvalidRequest(
                "code_challenge_method is required".into(),
            ));
        }
        (None, Some(_)) => {
            return Err(SsoError::InvalidRequest(
                "code_challenge_method sent without code_challenge".into(),
            ));
        }
        (Some(_), Some(method)) => {
            return Err(SsoError::InvalidRequest(format!(
                "unsupported code_challenge_method: {method}"
            )));
        }
    };
    if client.is_public() && code_challenge.is_none() {
        return Err(SsoError::InvalidRequest(
            "public clients must use PKCE".into(),
        ));
    }

    Ok(PendingAuthorization {
        client_id: client.client_id.clone(),
        redirect_uri,
        scopes,
        state: request.state.clone(),
        nonce: request.nonce.clone(),
        code_challenge,
        created_at: now(),
    })
}

/// Issues a code for `pending` and returns the redirect carrying it.
async fn issue_code(
    state: &SsoState,
    pending: &PendingAuthorization,
    session: &SsoSession,
) -> Result<BrowserResponse, SsoError> {
    let code = state
        .codes
        .issue(AuthorizationGrant {
            client_id: pending.client_id.clone(),
            redirect_uri: pending.redirect_uri.clone(),
            citizen_id: session.citizen_id.clone(),
            session_id: session.session_id.clone(),
            scopes: pending.scopes.clone(),
            nonce: pending.nonce.clone(),
            code_challenge: pending.code_challenge.clone(),
            auth_time: session.auth_time,
        })
        .await;
    log::info!(
        "issued authorization code to {} for citizen {}",
        pending.client_id,
        session.citizen_id
    );
    Ok(BrowserResponse::redirect(
        pending.redirect_with(&[("code", code.as_str())])?,
    ))
}

/// Continues an authorization for a signed-in citizen: trusted clients get
/// their code, everyone else goes through the consent page.
async fn continue_authorization(
    state: &SsoState,
    jar: &CookieJar<'_>,
    client: &OAuthClient,
    pending: PendingAuthorization,
    session: &SsoSession,
    citizen: &Citizen,
) -> Result<BrowserResponse, SsoError> {
    if client.trusted {
        PendingAuthorization::clear(jar);
        return issue_code(state, &pending, session).await;
    }
    pending.store(jar, state.config.secure_cookies)?;
    Ok(BrowserResponse::Page(RawHtml(pages::consent_page(
        &client.name,
        &citizen.full_name(),
        &pending.scopes,
    ))))
}

/// Authorization endpoint
#[get("/authorize?<request..>")]
pub async fn authorize(
    request: AuthorizationRequest,
    session: Option<SsoSession>,
    jar: &CookieJar<'_>,
    state: &State<SsoState>,
) -> Result<BrowserResponse, SsoError> {
    let (client, redirect_uri) = match state
        .clients
        .resolve(request.client_id.as_deref(), request.redirect_uri.as_deref())
    {
        Ok(resolved) => resolved,
        Err(err) => {
            log::warn!("refusing authorization request: {}", err);
            return Ok(BrowserResponse::invalid(&err.to_string()));
        }
    };

    let pending = match validate_authorization(client, redirect_uri.clone(), &request) {
        Ok(pending) => pending,
        Err(err) => {
            log::warn!("authorization request from {} rejected: {}", client.client_id, err);
            return error_redirect(&redirect_uri, request.state.as_deref(), &err);
        }
    };

    let prompt = request.prompt.as_deref();
    let citizen = match (&session, prompt) {
        (Some(session), prompt) if prompt != Some("login") => {
            state.citizens.find_by_id(&session.citizen_id).await?
        }
        _ => None,
    };

    match (session, citizen) {
        (Some(session), Some(citizen)) => {
            if prompt == Some("none") && !client.trusted {
                return error_redirect(
                    &redirect_uri,
                    pending.state.as_deref(),
                    &SsoError::ConsentRequired,
                );
            }
            continue_authorization(state, jar, client, pending, &session, &citizen).await
        }
        _ if prompt == Some("none") => error_redirect(
            &redirect_uri,
            pending.state.as_deref(),
            &SsoError::LoginRequired,
        ),
        _ => {
            pending.store(jar, state.config.secure_cookies)?;
            Ok(BrowserResponse::Page(RawHtml(pages::login_page(
                Some(client.name.as_str()),
                None,
            ))))
        }
    }
}

#[get("/login")]
pub fn login_page(jar: &CookieJar<'_>, state: &State<SsoState>) -> RawHtml<String> {
    let client_name = PendingAuthorization::peek(jar)
        .and_then(|pending| state.clients.get(&pending.client_id).map(|c| c.name.clone()));
    RawHtml(pages::login_page(client_name.as_deref(), None))
}

#[post("/login", data = "<form>")]
pub async fn login(
    form: Form<Lenient<LoginForm>>,
    jar: &CookieJar<'_>,
    state: &State<SsoState>,
) -> Result<BrowserResponse, SsoError> {
    let form = form.into_inner().into_inner();
    let pending = PendingAuthorization::peek(jar);
    let client = pending
        .as_ref()
        .and_then(|pending| state.clients.get(&pending.client_id));

    let identifier = form.identifier.unwrap_or_default();
    let password = form.password.unwrap_or_default();
    let citizen =
        match citizens::authenticate(state.citizens.as_ref(), &identifier, &password).await {
            Ok(citizen) => citizen,
            Err(SsoError::InvalidCredentials) => {
                log::warn!("failed login attempt");
                return Ok(BrowserResponse::Unauthorized(RawHtml(pages::login_page(
                    client.map(|c| c.name.as_str()),
                    Some("Invalid NIN, email or password."),
                ))));
            }
            Err(err) => return Err(err),
        };

    let session = SsoSession::new(citizen.id.clone(), state.config.session_ttl_secs);
    session.store(jar, state.config.secure_cookies)?;
    log::info!("citizen {} signed in", citizen.id);

    match (pending, client) {
        (Some(pending), Some(client)) => {
            continue_authorization(state, jar, client, pending, &session, &citizen).await
        }
        (Some(pending), None) => {
            log::warn!("pending authorization names unknown client {}", pending.client_id);
            PendingAuthorization::clear(jar);
            Ok(BrowserResponse::invalid("The application you came from is no longer registered."))
        }
        (None, _) => Ok(BrowserResponse::redirect(
            state.config.post_login_redirect.clone(),
        )),
    }
}

#[post("/consent", data = "<form>")]
pub async fn consent(
    form: Form<Lenient<ConsentForm>>,
    session: Option<SsoSession>,
    jar: &CookieJar<'_>,
    state: &State<SsoState>,
) -> Result<BrowserResponse, SsoError> {
    let pending = match PendingAuthorization::take(jar) {
        Some(pending) => pending,
        None => return Ok(BrowserResponse::invalid("No sign-in request is pending.")),
    };
    let client = match state.clients.get(&pending.client_id) {
        Some(client) => client,
        None => return Ok(BrowserResponse::invalid("The application is no longer registered.")),
    };
    let session = match session {
        Some(session) => session,
        None => {
            pending.store(jar, state.config.secure_cookies)?;
            return Ok(BrowserResponse::Page(RawHtml(pages::login_page(
                Some(client.name.as_str()),
                Some("Your session has ended. Please sign in again."),
            ))));
        }
    };

    match form.into_inner().into_inner().decision.as_deref() {
        Some("approve") => {
            log::info!(
                "citizen {} approved {}",
                session.citizen_id,
                client.client_id
            );
            issue_code(state, &pending, &session).await
        }
        Some("deny") => {
            log::info!("citizen {} denied {}", session.citizen_id, client.client_id);
            error_redirect(
                &pending.redirect_uri,
                pending.state.as_deref(),
                &SsoError::AccessDenied,
            )
        }
        _ => error_redirect(
            &pending.redirect_uri,
            pending.state.as_deref(),
            &SsoError::InvalidRequest("decision must be approve or deny".into()),
        ),
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tokens
////////////////////////////////////////////////////////////////////////////////

fn authenticate_client<'s>(
    state: &'s SsoState,
    basic: Option<BasicCredentials>,
    client_id: Option<&str>,
    client_secret: Option<&str>,
) -> Result<&'s OAuthClient, SsoError> {
    let (client_id, secret) = client_credentials(basic, client_id, client_secret)?;
    state
        .clients
        .authenticate(&client_id, secret.as_deref())
        .inspect_err(|_| log::warn!("client authentication failed for {}", client_id))
}

async fn find_citizen(state: &SsoState, citizen_id: &str) -> Result<Citizen, SsoError> {
    state
        .citizens
        .find_by_id(citizen_id)
        .await?
        .ok_or_else(|| SsoError::InvalidGrant("citizen no longer exists".into()))
}

/// Signs an ID token for `issued` when `openid` was granted.
async fn id_token_for(
    state: &SsoState,
    issued: &IssuedTokens,
    nonce: Option<String>,
) -> Result<Option<String>, SsoError> {
    let record = &issued.record;
    if !record.scopes.iter().any(|s| s == "openid") {
        return Ok(None);
    }
    let citizen = find_citizen(state, &record.citizen_id).await?;
    let iat = now();
    let claims = IdTokenClaims {
        iss: state.config.base_url().to_string(),
        sub: citizen.id.clone(),
        aud: record.client_id.clone(),
        iat,
        exp: iat.saturating_add(state.config.id_token_ttl_secs as i64),
        auth_time: record.auth_time,
        jti: uuid::Uuid::new_v4().to_string(),
        nonce,
        claims: CitizenClaims::for_scopes(&citizen, &record.scopes),
    };
    Ok(Some(state.signer.sign(&claims)?))
}

async fn token_response(
    state: &SsoState,
    issued: IssuedTokens,
    nonce: Option<String>,
) -> Result<TokenResponse, SsoError> {
    let id_token = id_token_for(state, &issued, nonce).await?;
    log::info!(
        "issued tokens to {} for citizen {}",
        issued.record.client_id,
        issued.record.citizen_id
    );
    Ok(TokenResponse {
        access_token: issued.access_token,
        token_type: "Bearer".to_string(),
        expires_in: issued.expires_in,
        refresh_token: Some(issued.refresh_token),
        scope: join_scope(&issued.record.scopes),
        id_token,
    })
}

async fn exchange_code(
    state: &SsoState,
    client: &OAuthClient,
    request: &TokenRequest,
) -> Result<TokenResponse, SsoError> {
    let code = request
        .code
        .as_deref()
        .ok_or_else(|| SsoError::InvalidRequest("code is required".into()))?;
    let redemption = Redemption {
        client_id: &client.client_id,
        redirect_uri: request.redirect_uri.as_deref(),
        code_verifier: request.code_verifier.as_deref(),
    };
    let grant = state
        .codes
        .redeem(code, redemption)
        .await
        .inspect_err(|err| log::warn!("code redemption by {} failed: {}", client.client_id, err))?;
    if client.is_public() && grant.code_challenge.is_none() {
        return Err(SsoError::InvalidGrant(
            "public clients must use PKCE".into(),
        ));
    }

    let subject = TokenSubject {
        client_id: grant.client_id,
        citizen_id: grant.citizen_id,
        session_id: grant.session_id,
        scopes: grant.scopes,
        auth_time: grant.auth_time,
    };
    let issued = state.tokens.issue(&subject).await;
    token_response(state, issued, grant.nonce).await
}

async fn refresh(
    state: &SsoState,
    client: &OAuthClient,
    request: &TokenRequest,
) -> Result<TokenResponse, SsoError> {
    let refresh_token = request
        .refresh_token
        .as_deref()
        .ok_or_else(|| SsoError::InvalidRequest("refresh_token is required".into()))?;
    let scopes = parse_scope(request.scope.as_deref());
    let issued = state
        .tokens
        .rotate(refresh_token, &client.client_id, &scopes)
        .await
        .inspect_err(|err| log::warn!("refresh by {} failed: {}", client.client_id, err))?;
    token_response(state, issued, None).await
}

/// Token endpoint
#[post("/token", data = "<form>")]
pub async fn token(
    form: Form<Lenient<TokenRequest>>,
    basic: Option<BasicCredentials>,
    state: &State<SsoState>,
) -> Result<NoStore<TokenResponse>, SsoError> {
    let request = form.into_inner().into_inner();
    let client = authenticate_client(
        state,
        basic,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )?;
    let response = match request.grant_type.as_deref() {
        Some("authorization_code") => exchange_code(state, client, &request).await?,
        Some("refresh_token") => refresh(state, client, &request).await?,
        Some(other) => return Err(SsoError::UnsupportedGrantType(other.to_string())),
        None => return Err(SsoError::InvalidRequest("grant_type is required".into())),
    };
    Ok(NoStore(response))
}

async fn userinfo_for(bearer: BearerToken, state: &SsoState) -> Result<Json<UserInfo>, SsoError> {
    let record = bearer.record;
    let citizen = state
        .citizens
        .find_by_id(&record.citizen_id)
        .await?
        .ok_or_else(|| SsoError::InvalidToken("citizen no longer exists".into()))?;
    Ok(Json(UserInfo {
        sub: citizen.id.clone(),
        claims: CitizenClaims::for_scopes(&citizen, &record.scopes),
    }))
}

/// Userinfo endpoint
#[get("/userinfo")]
pub async fn userinfo(
    bearer: Result<BearerToken, SsoError>,
    state: &State<SsoState>,
) -> Result<Json<UserInfo>, SsoError> {
    userinfo_for(bearer?, state).await
}

#[post("/userinfo")]
pub async fn userinfo_post(
    bearer: Result<BearerToken, SsoError>,
    state: &State<SsoState>,
) -> Result<Json<UserInfo>, SsoError> {
    userinfo_for(bearer?, state).await
}

/// Introspection endpoint
#[post("/introspect", data = "<form>")]
pub async fn introspect(
    form: Form<Lenient<TokenTypeHintRequest>>,
    basic: Option<BasicCredentials>,
    state: &State<SsoState>,
) -> Result<NoStore<IntrospectionResponse>, SsoError> {
    let request = form.into_inner().into_inner();
    let client = authenticate_client(
        state,
        basic,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )?;
    let token = request
        .token
        .as_deref()
        .ok_or_else(|| SsoError::InvalidRequest("token is required".into()))?;
    let hint = TokenKind::from_hint(request.token_type_hint.as_deref());
    let response = match state.tokens.find(token, hint).await {
        Some((kind, record)) if record.client_id == client.client_id => {
            IntrospectionResponse::active(kind, &record, state.config.base_url())
        }
        _ => IntrospectionResponse::inactive(),
    };
    Ok(NoStore(response))
}

/// Revocation endpoint
#[post("/revoke", data = "<form>")]
pub async fn revoke(
    form: Form<Lenient<TokenTypeHintRequest>>,
    basic: Option<BasicCredentials>,
    state: &State<SsoState>,
) -> Result<Status, SsoError> {
    let request = form.into_inner().into_inner();
    let client = authenticate_client(
        state,
        basic,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )?;
    let token = request
        .token
        .as_deref()
        .ok_or_else(|| SsoError::InvalidRequest("token is required".into()))?;
    let hint = TokenKind::from_hint(request.token_type_hint.as_deref());
    if state.tokens.revoke(token, &client.client_id, hint).await {
        log::info!("{} revoked a token", client.client_id);
    }
    Ok(Status::Ok)
}

////////////////////////////////////////////////////////////////////////////////
// Logout
////////////////////////////////////////////////////////////////////////////////

/// Ends the SSO session and returns the client redirect uri to use, if one
/// was requested and is registered for the client.
async fn end_session(
    request: &EndSessionRequest,
    jar: &CookieJar<'_>,
    state: &SsoState,
) -> Option<String> {
    if let Some(session) = SsoSession::from_jar(jar) {
        let codes = state.codes.revoke_session(&session.session_id).await;
        let revoked = state.tokens.revoke_session(&session.session_id).await;
        log::info!(
            "citizen {} signed out, {} codes and {} tokens revoked",
            session.citizen_id,
            codes,
            revoked
        );
    }
    SsoSession::clear(jar);
    PendingAuthorization::clear(jar);

    let hinted = request.id_token_hint.as_deref().and_then(|hint| {
        state
            .signer
            .verify::<IdTokenClaims>(hint, state.config.base_url(), false)
            .inspect_err(|err| log::warn!("ignoring id_token_hint: {}", err))
            .ok()
            .map(|data| data.claims.aud)
    });
    let client_id = match (request.client_id.as_deref(), hinted.as_deref()) {
        (Some(id), Some(aud)) if id != aud => {
            log::warn!("logout client_id {} does not match id_token_hint", id);
            return None;
        }
        (Some(id), _) => id,
        (None, Some(aud)) => aud,
        (None, None) => return None,
    };

    let uri = request.post_logout_redirect_uri.as_deref()?;
    match state.clients.get(client_id) {
        Some(client) if client.allows_post_logout_redirect(uri) => Some(uri.to_string()),
        _ => {
            log::warn!("post_logout_redirect_uri is not registered for {}", client_id);
            None
        }
    }
}

/// Logout / End Session endpoint
#[get("/logout?<request..>")]
pub async fn logout(
    request: EndSessionRequest,
    jar: &CookieJar<'_>,
    state: &State<SsoState>,
) -> Result<BrowserResponse, SsoError> {
    match end_session(&request, jar, state).await {
        Some(uri) => Ok(BrowserResponse::redirect(append_query(
            &uri,
            &[],
            request.state.as_deref(),
        )?)),
        None => match &state.config.post_logout_redirect {
            Some(fallback) => Ok(BrowserResponse::redirect(fallback.clone())),
            None => Ok(BrowserResponse::Page(RawHtml(pages::signed_out_page()))),
        },
    }
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
    pub redirect_uri: Option<String>,
    pub state: Option<String>,
}

/// Logout for AJAX callers such as the WordPress plugin.
#[post("/logout", data = "<form>")]
pub async fn logout_post(
    form: Form<Lenient<EndSessionRequest>>,
    jar: &CookieJar<'_>,
    state: &State<SsoState>,
) -> NoStore<LogoutResponse> {
    let request = form.into_inner().into_inner();
    let redirect_uri = end_session(&request, jar, state)
        .await
        .or_else(|| state.config.post_logout_redirect.clone());
    NoStore(LogoutResponse {
        success: true,
        redirect_uri,
        state: request.state,
    })
}

////////////////////////////////////////////////////////////////////////////////
// Catchers
////////////////////////////////////////////////////////////////////////////////

#[catch(404)]
pub fn not_found(req: &Request<'_>) -> Json<Value> {
    Json(json!({
        "error": "not_found",
        "error_description": format!("no route for {} {}", req.method(), req.uri().path()),
    }))
}

#[catch(500)]
pub fn internal_error() -> Json<Value> {
    Json(json!({
        "error": "server_error",
        "error_description": "internal server error",
    }))
}

/// Anything else Rocket rejects before a handler runs, such as a body with the
/// wrong content type.
#[catch(default)]
pub fn default_catcher(status: Status, _req: &Request<'_>) -> Json<Value> {
    let error = if status.code >= 500 {
        "server_error"
    } else {
        "invalid_request"
    };
    Json(json!({
        "error": error,
        "error_description": format!("{} {}", status.code, status.reason_lossy()),
    }))
}

pub fn routes() -> Vec<Route> {
    routes![
        discovery,
        discovery_alias,
        jwks,
        health,
        authorize,
        login_page,
        login,
        consent,
        token,
        userinfo,
        userinfo_post,
        introspect,
        revoke,
        logout,
        logout_post,
    ]
}

pub fn catchers() -> Vec<Catcher> {
    catchers![not_found, internal_error, default_catcher]
}
