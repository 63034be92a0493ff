//! Citizen identities.
//!
//! The national registry is the source of truth. [`RemoteCitizenStore`] talks
//! to it over HTTP and, in development, falls back to the mock citizens of
//! [`MemoryCitizenStore`] when the registry cannot be reached.

use crate::errors::SsoError;
use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use reqwest::StatusCode;
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citizen {
    pub id: String,
    /// National Identification Number.
    pub nin: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// argon2 PHC string
    #[serde(default, skip_serializing)]
    pub password_hash: String,
    #[serde(default)]
    pub verified: bool,
}

impl Citizen {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Matches a login identifier against the NIN or the email address.
    pub fn matches_identifier(&self, identifier: &str) -> bool {
        let identifier = identifier.trim();
        self.nin.eq_ignore_ascii_case(identifier)
            || self
                .email
                .as_deref()
                .is_some_and(|email| email.eq_ignore_ascii_case(identifier))
    }
}

pub fn hash_password(password: &str) -> Result<String, SsoError> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            log::warn!("stored password hash is malformed: {}", e);
            false
        }
    }
}

#[rocket::async_trait]
pub trait CitizenStore: Send + Sync {
    /// Lookup by NIN or email.
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Citizen>, SsoError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Citizen>, SsoError>;
}

/// Verifies a login attempt.
///
/// Unknown identifiers and wrong passwords produce the same error so the
/// login form does not reveal which NINs are registered.
pub async fn authenticate(
    store: &dyn CitizenStore,
    identifier: &str,
    password: &str,
) -> Result<Citizen, SsoError> {
    let identifier = identifier.trim();
    if identifier.is_empty() || password.is_empty() {
        return Err(SsoError::InvalidCredentials);
    }
    let citizen = store.find_by_identifier(identifier).await?;
    let hash = citizen.as_ref().map(|citizen| citizen.password_hash.clone());
    let password = password.to_string();
    // unknown identifiers still pay for one argon2 verification
    let valid = tokio::task::spawn_blocking(move || {
        verify_password(&password, hash.as_deref().unwrap_or_else(|| unknown_citizen_hash()))
    })
    .await?;
    match citizen {
        Some(citizen) if valid => Ok(citizen),
        _ => Err(SsoError::InvalidCredentials),
    }
}

fn unknown_citizen_hash() -> &'static str {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| {
        hash_password(&crate::utils::random_token()).unwrap_or_default()
    })
}

/// In-process citizen table.
#[derive(Debug, Clone, Default)]
pub struct MemoryCitizenStore {
    citizens: Arc<HashMap<String, Citizen>>,
}

impl MemoryCitizenStore {
    pub fn new(citizens: Vec<Citizen>) -> Self {
        Self {
            citizens: Arc::new(citizens.into_iter().map(|c| (c.id.clone(), c)).collect()),
        }
    }

    /// The development citizens. Every mock account uses the password
    /// `password123`.
    pub fn with_mock_citizens() -> Result<Self, SsoError> {
        let hash = hash_password("password123")?;
        let citizen = |id: &str, nin: &str, first: &str, last: &str, email: &str, phone: &str, verified: bool| Citizen {
            id: id.to_string(),
            nin: nin.to_string(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            email: Some(email.to_string()),
            phone: Some(phone.to_string()),
            password_hash: hash.clone(),
            verified,
        };
        Ok(Self::new(vec![
            citizen(
                "c0a8012e-0001-4000-8000-000000000001",
                "SL1990012345",
                "Aminata",
                "Kamara",
                "aminata.kamara@example.sl",
                "+23276123456",
                true,
            ),
            citizen(
                "c0a8012e-0002-4000-8000-000000000002",
                "SL1985067890",
                "Mohamed",
                "Sesay",
                "mohamed.sesay@example.sl",
                "+23277654321",
                true,
            ),
            citizen(
                "c0a8012e-0003-4000-8000-000000000003",
                "SL2001054321",
                "Fatmata",
                "Conteh",
                "fatmata.conteh@example.sl",
                "+23278987654",
                false,
            ),
        ]))
    }

    pub fn lookup_identifier(&self, identifier: &str) -> Option<Citizen> {
        self.citizens
            .values()
            .find(|c| c.matches_identifier(identifier))
            .cloned()
    }

    pub fn lookup_id(&self, id: &str) -> Option<Citizen> {
        self.citizens.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.citizens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.citizens.is_empty()
    }
}

#[rocket::async_trait]
impl CitizenStore for MemoryCitizenStore {
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Citizen>, SsoError> {
        Ok(self.lookup_identifier(identifier))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Citizen>, SsoError> {
        Ok(self.lookup_id(id))
    }
}

/// Client for the national citizen registry.
///
/// Lookups are `GET {base}/citizens/lookup?identifier=..` and
/// `GET {base}/citizens/{id}`; a 404 means no such citizen.
#[derive(Debug, Clone)]
pub struct RemoteCitizenStore {
    base_url: String,
    http: reqwest::Client,
    fallback: Option<MemoryCitizenStore>,
}

impl RemoteCitizenStore {
    pub fn new(base_url: &str, fallback: Option<MemoryCitizenStore>) -> Result<Self, SsoError> {
        let http = reqwest::ClientBuilder::new()
            // Following redirects opens the client up to SSRF vulnerabilities.
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            fallback,
        })
    }

    async fn fetch(&self, request: reqwest::RequestBuilder) -> Result<Option<Citizen>, reqwest::Error> {
        let response = request.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let citizen = response.error_for_status()?.json::<Citizen>().await?;
        Ok(Some(citizen))
    }

    /// Resolves a registry result, switching to the mock citizens when the
    /// registry is unreachable and a fallback is configured.
    fn with_fallback<F>(
        &self,
        result: Result<Option<Citizen>, reqwest::Error>,
        fallback: F,
    ) -> Result<Option<Citizen>, SsoError>
    where
        F: FnOnce(&MemoryCitizenStore) -> Option<Citizen>,
    {
        match result {
            Ok(found) => Ok(found),
            Err(err) if err.is_connect() || err.is_timeout() => match &self.fallback {
                Some(mock) => {
                    log::warn!(
                        "citizen registry at {} unreachable ({}), using mock citizens",
                        self.base_url,
                        err
                    );
                    Ok(fallback(mock))
                }
                None => Err(SsoError::Registry(err.to_string())),
            },
            Err(err) => Err(SsoError::Registry(err.to_string())),
        }
    }
}

#[rocket::async_trait]
impl CitizenStore for RemoteCitizenStore {
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Citizen>, SsoError> {
        let request = self
            .http
            .get(format!("{}/citizens/lookup", self.base_url))
            .query(&[("identifier", identifier)]);
        let result = self.fetch(request).await;
        self.with_fallback(result, |mock| mock.lookup_identifier(identifier))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Citizen>, SsoError> {
        let url = reqwest::Url::parse(&format!("{}/citizens/", self.base_url))?.join(id)?;
        let result = self.fetch(self.http.get(url)).await;
        self.with_fallback(result, |mock| mock.lookup_id(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hashes_verify() {
        let hash = hash_password("s3cret-pass").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("s3cret-pass", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("s3cret-pass", "not-a-phc-string"));
    }

    #[test]
    fn identifiers_match_nin_or_email() {
        let citizen = Citizen {
            id: "1".into(),
            nin: "SL1990012345".into(),
            first_name: "Aminata".into(),
            last_name: "Kamara".into(),
            email: Some("aminata.kamara@example.sl".into()),
            phone: None,
            password_hash: String::new(),
            verified: true,
        };
        assert!(citizen.matches_identifier("SL1990012345"));
        assert!(citizen.matches_identifier(" sl1990012345 "));
        assert!(citizen.matches_identifier("Aminata.Kamara@example.SL"));
        assert!(!citizen.matches_identifier("SL0000000000"));
        assert_eq!(citizen.full_name(), "Aminata Kamara");
    }

    #[test]
    fn password_hash_is_never_serialized() {
        let citizen = Citizen {
            id: "1".into(),
            nin: "SL1".into(),
            first_name: "A".into(),
            last_name: "B".into(),
            email: None,
            phone: None,
            password_hash: "$argon2id$secret".into(),
            verified: false,
        };
        let json = serde_json::to_string(&citizen).unwrap();
        assert!(!json.contains("argon2"));
    }

    #[test]
    fn unknown_citizens_verify_against_a_real_hash() {
        let hash = unknown_citizen_hash();
        assert!(hash.starts_with("$argon2"));
        assert!(PasswordHash::new(hash).is_ok());
        assert!(!verify_password("password123", hash));
        assert_eq!(hash, unknown_citizen_hash());
    }

    #[tokio::test]
    async fn mock_citizens_authenticate() {
        let store = MemoryCitizenStore::with_mock_citizens().unwrap();
        assert_eq!(store.len(), 3);

        let citizen = authenticate(&store, "SL1990012345", "password123")
            .await
            .unwrap();
        assert_eq!(citizen.first_name, "Aminata");

        let by_email = authenticate(&store, "mohamed.sesay@example.sl", "password123")
            .await
            .unwrap();
        assert_eq!(by_email.nin, "SL1985067890");

        assert!(matches!(
            authenticate(&store, "SL1990012345", "wrong").await,
            Err(SsoError::InvalidCredentials)
        ));
        assert!(matches!(
            authenticate(&store, "SL0000000000", "password123").await,
            Err(SsoError::InvalidCredentials)
        ));
        assert!(matches!(
            authenticate(&store, "", "").await,
            Err(SsoError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn unreachable_registry_falls_back_to_mock() {
        let mock = MemoryCitizenStore::with_mock_citizens().unwrap();
        // nothing listens on the discard port
        let store = RemoteCitizenStore::new("http://127.0.0.1:9", Some(mock)).unwrap();
        let found = store.find_by_identifier("SL1985067890").await.unwrap();
        assert_eq!(found.unwrap().first_name, "Mohamed");
        let by_id = store
            .find_by_id("c0a8012e-0001-4000-8000-000000000001")
            .await
            .unwrap();
        assert_eq!(by_id.unwrap().last_name, "Kamara");
    }

    #[tokio::test]
    async fn unreachable_registry_without_fallback_errors() {
        let store = RemoteCitizenStore::new("http://127.0.0.1:9", None).unwrap();
        assert!(matches!(
            store.find_by_identifier("SL1985067890").await,
            Err(SsoError::Registry(_))
        ));
    }
}
