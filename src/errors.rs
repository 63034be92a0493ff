use rocket::Request;
use rocket::http::ContentType;
use rocket::http::Header;
use rocket::http::Status;
use rocket::response;
use serde_derive::Serialize;
use std::io::Cursor;
use thiserror::Error;

/// Errors raised by the broker.
///
/// Protocol errors map onto the RFC 6749 error codes through
/// [`SsoError::oauth_error_code`]; everything else is reported as `server_error`.
#[derive(Debug, Error)]
pub enum SsoError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    InvalidClient(String),
    #[error("{0}")]
    InvalidGrant(String),
    #[error("{0}")]
    UnauthorizedClient(String),
    #[error("unsupported grant type: {0}")]
    UnsupportedGrantType(String),
    #[error("unsupported response type: {0}")]
    UnsupportedResponseType(String),
    #[error("{0}")]
    InvalidScope(String),
    #[error("{0}")]
    InvalidToken(String),
    #[error("{0}")]
    InvalidRedirectUri(String),
    #[error("the resource owner denied the request")]
    AccessDenied,
    #[error("authentication is required")]
    LoginRequired,
    #[error("the citizen must approve this client first")]
    ConsentRequired,
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("configuration error: {0}")]
    Config(String),
    #[error("signing key error: {0}")]
    Key(String),
    #[error("password hashing error: {0}")]
    PasswordHash(String),
    #[error("citizen registry error: {0}")]
    Registry(String),

    #[error("IO Error: {0}")]
    IO(#[from] std::io::Error),
    #[error("JSON web token error: {0}")]
    JsonWebToken(#[from] jsonwebtoken::errors::Error),
    #[error("serde JSON error: {0}")]
    JSONErr(#[from] serde_json::Error),
    #[error("reqwest error: {0}")]
    RequestErr(#[from] reqwest::Error),
    #[error("url parsing error: {0}")]
    UrlErr(#[from] openidconnect::url::ParseError),
    #[error("PKCS8 error: {0}")]
    PKCS8Err(#[from] rsa::pkcs8::Error),
    #[error("PKCS1 error: {0}")]
    PKCS1Err(#[from] rsa::pkcs1::Error),
    #[error("RSA error: {0}")]
    RsaErr(#[from] rsa::Error),
    #[error("{0}")]
    Custom(String),
}

impl From<&str> for SsoError {
    fn from(val: &str) -> SsoError {
        SsoError::Custom(val.to_string())
    }
}

impl From<argon2::password_hash::Error> for SsoError {
    fn from(err: argon2::password_hash::Error) -> SsoError {
        SsoError::PasswordHash(err.to_string())
    }
}

impl From<tokio::task::JoinError> for SsoError {
    fn from(err: tokio::task::JoinError) -> SsoError {
        SsoError::Custom(format!("background task failed: {err}"))
    }
}

/// The RFC 6749 section 5.2 error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl SsoError {
    /// The OAuth 2.0 / OIDC error code for this error.
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            SsoError::InvalidRequest(_) | SsoError::InvalidRedirectUri(_) => "invalid_request",
            SsoError::InvalidClient(_) => "invalid_client",
            SsoError::InvalidGrant(_) => "invalid_grant",
            SsoError::UnauthorizedClient(_) => "unauthorized_client",
            SsoError::UnsupportedGrantType(_) => "unsupported_grant_type",
            SsoError::UnsupportedResponseType(_) => "unsupported_response_type",
            SsoError::InvalidScope(_) => "invalid_scope",
            SsoError::InvalidToken(_) => "invalid_token",
            SsoError::AccessDenied | SsoError::InvalidCredentials => "access_denied",
            SsoError::LoginRequired => "login_required",
            SsoError::ConsentRequired => "consent_required",
            _ => "server_error",
        }
    }

    pub fn status(&self) -> Status {
        match self {
            SsoError::InvalidClient(_) | SsoError::InvalidToken(_) => Status::Unauthorized,
            SsoError::InvalidCredentials => Status::Unauthorized,
            SsoError::AccessDenied => Status::Forbidden,
            SsoError::InvalidRequest(_)
            | SsoError::InvalidGrant(_)
            | SsoError::UnauthorizedClient(_)
            | SsoError::UnsupportedGrantType(_)
            | SsoError::UnsupportedResponseType(_)
            | SsoError::InvalidScope(_)
            | SsoError::InvalidRedirectUri(_)
            | SsoError::LoginRequired
            | SsoError::ConsentRequired => Status::BadRequest,
            _ => Status::InternalServerError,
        }
    }

    /// Whether the error is the client's fault and safe to describe to it.
    pub fn is_protocol_error(&self) -> bool {
        self.status() != Status::InternalServerError
    }

    pub fn body(&self) -> ErrorBody<'static> {
        // internal details stay in the log
        let description = if self.is_protocol_error() {
            Some(self.to_string())
        } else {
            Some("internal server error".to_string())
        };
        ErrorBody {
            error: self.oauth_error_code(),
            error_description: description,
        }
    }
}

impl<'r> response::Responder<'r, 'static> for SsoError {
    fn respond_to(self, _request: &'r Request<'_>) -> response::Result<'static> {
        if !self.is_protocol_error() {
            log::error!("request failed: {}", self);
        }
        let status = self.status();
        let body = serde_json::to_string(&self.body()).map_err(|_| Status::InternalServerError)?;

        let mut builder = response::Response::build();
        builder
            .status(status)
            .header(ContentType::JSON)
            .header(Header::new("Cache-Control", "no-store"))
            .header(Header::new("Pragma", "no-cache"));
        match &self {
            SsoError::InvalidToken(_) => {
                builder.header(Header::new(
                    "WWW-Authenticate",
                    "Bearer error=\"invalid_token\"",
                ));
            }
            SsoError::InvalidClient(_) => {
                builder.header(Header::new("WWW-Authenticate", "Basic realm=\"wangov-sso\""));
            }
            _ => {}
        }
        builder.sized_body(body.len(), Cursor::new(body)).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_keep_their_codes() {
        assert_eq!(
            SsoError::InvalidGrant("used".into()).oauth_error_code(),
            "invalid_grant"
        );
        assert_eq!(
            SsoError::InvalidClient("nope".into()).status(),
            Status::Unauthorized
        );
        assert_eq!(
            SsoError::UnsupportedGrantType("password".into()).status(),
            Status::BadRequest
        );
        assert_eq!(SsoError::LoginRequired.oauth_error_code(), "login_required");
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = SsoError::Key("bad pem at line 3".into());
        assert_eq!(err.status(), Status::InternalServerError);
        let body = err.body();
        assert_eq!(body.error, "server_error");
        assert_eq!(
            body.error_description.as_deref(),
            Some("internal server error")
        );
    }
}
