/*!
WanGov single sign-on broker.

Portals of the WanGov platform send citizens here to sign in. The broker runs
the OAuth 2.0 authorization code flow (with PKCE for public clients), issues
opaque bearer and refresh tokens plus RS256 ID tokens, and serves OIDC
discovery, JWKS, userinfo, introspection, revocation and end-session.

```rust,no_run
use rocket::launch;
use wangov_sso::config::SsoConfig;

#[launch]
async fn rocket() -> _ {
    let config = SsoConfig::from_env().unwrap();
    wangov_sso::setup(rocket::build(), config).unwrap()
}
```
*/
pub mod auth;
pub mod citizens;
pub mod claims;
pub mod clients;
pub mod config;
pub mod errors;
pub mod grants;
pub mod server;
pub mod sign;
pub mod token;
pub mod utils;

use citizens::{CitizenStore, MemoryCitizenStore, RemoteCitizenStore};
use clients::ClientRegistry;
use config::SsoConfig;
use errors::SsoError;
use grants::CodeStore;
use rocket::fairing::AdHoc;
use rocket::{Build, Rocket};
use server::DiscoveryDocument;
use sign::OidcSigner;
use std::sync::Arc;
use std::time::Duration;
use token::TokenStore;

/// Everything the handlers share, managed by Rocket.
#[derive(Clone)]
pub struct SsoState {
    pub config: SsoConfig,
    pub clients: ClientRegistry,
    pub citizens: Arc<dyn CitizenStore>,
    pub codes: CodeStore,
    pub tokens: TokenStore,
    pub signer: OidcSigner,
    pub discovery: DiscoveryDocument,
}

impl SsoState {
    /// Loads keys, clients and the citizen store named by `config`.
    pub fn from_config(config: SsoConfig) -> Result<Self, SsoError> {
        let signer = match &config.signing_key_path {
            Some(path) => OidcSigner::from_config_path(path, config.key_id.clone())?,
            None => {
                log::warn!(
                    "no signing_key_path configured, ID tokens are signed with an ephemeral key"
                );
                OidcSigner::ephemeral(config.key_id.clone())?
            }
        };
        Self::with_signer(config, signer)
    }

    pub fn with_signer(config: SsoConfig, signer: OidcSigner) -> Result<Self, SsoError> {
        config.validate()?;

        let clients = match &config.clients_file {
            Some(path) => ClientRegistry::from_file(path)?,
            None => ClientRegistry::wangov_defaults(),
        };

        let mock = if config.allow_mock_citizens {
            Some(MemoryCitizenStore::with_mock_citizens()?)
        } else {
            None
        };
        let citizens: Arc<dyn CitizenStore> = match (&config.citizen_registry_url, mock) {
            (Some(url), mock) => Arc::new(RemoteCitizenStore::new(url, mock)?),
            (None, Some(mock)) => {
                log::warn!("no citizen registry configured, serving mock citizens");
                Arc::new(mock)
            }
            (None, None) => {
                return Err(SsoError::Config(
                    "citizen_registry_url is required when mock citizens are disabled".into(),
                ));
            }
        };

        Ok(Self {
            clients,
            citizens,
            codes: CodeStore::new(config.code_ttl_secs),
            tokens: TokenStore::new(config.access_token_ttl_secs, config.refresh_token_ttl_secs),
            signer,
            discovery: DiscoveryDocument::new(&config),
            config,
        })
    }

    /// Drops expired codes and tokens.
    pub async fn sweep(&self) {
        let codes = self.codes.purge_expired().await;
        let tokens = self.tokens.purge_expired().await;
        log::debug!("swept {} expired codes and {} expired tokens", codes, tokens);
    }
}

/// Reads `SsoConfig` from the `sso` table of the Rocket figment, or from
/// `WANGOV_SSO_*` variables when the table is absent.
pub fn load_config(rocket: &Rocket<Build>) -> Result<SsoConfig, SsoError> {
    match rocket.figment().extract_inner::<SsoConfig>("sso") {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(err) if err.missing() => SsoConfig::from_env(),
        Err(err) => Err(SsoError::Config(err.to_string())),
    }
}

fn sweeper() -> AdHoc {
    AdHoc::on_liftoff("SSO sweeper", |rocket| {
        Box::pin(async move {
            let Some(state) = rocket.state::<SsoState>().cloned() else {
                log::error!("SSO state is not managed, sweeper not started");
                return;
            };
            let period = Duration::from_secs(state.config.sweep_interval_secs);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    interval.tick().await;
                    state.sweep().await;
                }
            });
        })
    })
}

/// Mounts the broker onto `rocket`.
pub fn setup(rocket: Rocket<Build>, config: SsoConfig) -> Result<Rocket<Build>, SsoError> {
    Ok(attach(rocket, SsoState::from_config(config)?))
}

/// Like [`setup`] but with a caller-supplied signing key.
pub fn setup_with_signer(
    rocket: Rocket<Build>,
    config: SsoConfig,
    signer: OidcSigner,
) -> Result<Rocket<Build>, SsoError> {
    Ok(attach(rocket, SsoState::with_signer(config, signer)?))
}

fn attach(rocket: Rocket<Build>, state: SsoState) -> Rocket<Build> {
    log::info!(
        "SSO broker for {} with {} registered clients",
        state.config.issuer,
        state.clients.len()
    );
    rocket
        .manage(state)
        .mount("/", server::routes::routes())
        .register("/", server::routes::catchers())
        .attach(sweeper())
}

/// Builds the broker from the default Rocket figment.
pub fn build() -> Result<Rocket<Build>, SsoError> {
    let rocket = rocket::build();
    let config = load_config(&rocket)?;
    setup(rocket, config)
}
