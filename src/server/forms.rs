//! Request parameters of the broker endpoints.
//!
//! Every field is optional so that missing parameters surface as OAuth
//! `invalid_request` errors instead of Rocket's default 422.
use rocket::FromForm;

/// Query of `GET /authorize`.
#[derive(Debug, Clone, Default, FromForm)]
pub struct AuthorizationRequest {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub prompt: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

#[derive(Debug, Clone, FromForm)]
pub struct LoginForm {
    pub identifier: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, FromForm)]
pub struct ConsentForm {
    pub decision: Option<String>,
}

/// Body of `POST /token`.
#[derive(Debug, Clone, Default, FromForm)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub code_verifier: Option<String>,
}

/// Body of `POST /introspect` and `POST /revoke`.
#[derive(Debug, Clone, FromForm)]
pub struct TokenTypeHintRequest {
    pub token: Option<String>,
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Query of `GET /logout`, or body of `POST /logout`.
#[derive(Debug, Clone, Default, FromForm)]
pub struct EndSessionRequest {
    pub id_token_hint: Option<String>,
    pub post_logout_redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub state: Option<String>,
}
