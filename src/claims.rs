//! Claims released about a citizen, for ID tokens and the userinfo endpoint.
use crate::citizens::Citizen;
use serde_derive::{Deserialize, Serialize};

/// Scope-dependent citizen claims.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CitizenClaims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nin_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number_verified: Option<bool>,
}

impl CitizenClaims {
    pub fn for_scopes(citizen: &Citizen, scopes: &[String]) -> Self {
        let granted = |scope: &str| scopes.iter().any(|s| s == scope);
        let mut claims = Self::default();
        if granted("profile") {
            claims.name = Some(citizen.full_name());
            claims.given_name = Some(citizen.first_name.clone());
            claims.family_name = Some(citizen.last_name.clone());
            claims.preferred_username = Some(citizen.nin.clone());
            claims.nin = Some(citizen.nin.clone());
            claims.nin_verified = Some(citizen.verified);
        }
        if granted("email") {
            if let Some(email) = &citizen.email {
                claims.email = Some(email.clone());
                claims.email_verified = Some(citizen.verified);
            }
        }
        if granted("phone") {
            if let Some(phone) = &citizen.phone {
                claims.phone_number = Some(phone.clone());
                claims.phone_number_verified = Some(citizen.verified);
            }
        }
        claims
    }
}

/// Body of the userinfo endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserInfo {
    pub sub: String,
    #[serde(flatten)]
    pub claims: CitizenClaims,
}

/// Claims of a signed ID token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub auth_time: i64,
    pub jti: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(flatten)]
    pub claims: CitizenClaims,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn citizen() -> Citizen {
        Citizen {
            id: "c0a8012e-0001-4000-8000-000000000001".into(),
            nin: "SL1990012345".into(),
            first_name: "Aminata".into(),
            last_name: "Kamara".into(),
            email: Some("aminata.kamara@example.sl".into()),
            phone: None,
            password_hash: String::new(),
            verified: true,
        }
    }

    fn scopes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn openid_alone_releases_only_the_subject() {
        let info = UserInfo {
            sub: "c0a8012e-0001-4000-8000-000000000001".into(),
            claims: CitizenClaims::for_scopes(&citizen(), &scopes(&["openid"])),
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "sub": "c0a8012e-0001-4000-8000-000000000001" })
        );
    }

    #[test]
    fn profile_and_email_claims() {
        let claims = CitizenClaims::for_scopes(&citizen(), &scopes(&["openid", "profile", "email", "phone"]));
        assert_eq!(claims.name.as_deref(), Some("Aminata Kamara"));
        assert_eq!(claims.nin.as_deref(), Some("SL1990012345"));
        assert_eq!(claims.nin_verified, Some(true));
        assert_eq!(claims.email.as_deref(), Some("aminata.kamara@example.sl"));
        // no phone on record
        assert_eq!(claims.phone_number, None);
        assert_eq!(claims.phone_number_verified, None);
    }
}
