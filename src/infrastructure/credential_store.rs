use crate::domain::models::OAuthToken;
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use std::sync::Mutex;

pub const ACCESS_TOKEN_ENV: &str = "SCHEDULE_SYNC_ACCESS_TOKEN";
const TOKEN_LEEWAY_SECONDS: i64 = 60;

pub trait CredentialStore: Send + Sync {
    fn load_token(&self) -> Result<Option<OAuthToken>, InfraError>;
}

/// OAuth token JSON stored in the OS keyring by whichever tool performed the
/// consent flow.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service_name: String,
    account_name: String,
}

impl KeyringCredentialStore {
    pub fn new(service_name: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            account_name: account_name.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, &self.account_name)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new("schedule-sync.google", "default")
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn load_token(&self) -> Result<Option<OAuthToken>, InfraError> {
        let payload = match self.entry()?.get_password() {
            Ok(value) => value,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(error) => return Err(InfraError::Credential(error.to_string())),
        };

        let token = serde_json::from_str::<OAuthToken>(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))?;
        Ok(Some(token))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    token: Mutex<Option<OAuthToken>>,
}

impl InMemoryCredentialStore {
    pub fn with_token(token: OAuthToken) -> Self {
        Self {
            token: Mutex::new(Some(token)),
        }
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn load_token(&self) -> Result<Option<OAuthToken>, InfraError> {
        let guard = self
            .token
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        Ok(guard.clone())
    }
}

pub fn resolve_access_token_from_env<S>(store: &S) -> Result<String, InfraError>
where
    S: CredentialStore + ?Sized,
{
    resolve_access_token(|key| std::env::var(key).ok(), store, Utc::now())
}

/// Environment override first, then a still-valid stored token.
pub fn resolve_access_token<F, S>(
    lookup: F,
    store: &S,
    now: DateTime<Utc>,
) -> Result<String, InfraError>
where
    F: Fn(&str) -> Option<String>,
    S: CredentialStore + ?Sized,
{
    if let Some(token) = lookup(ACCESS_TOKEN_ENV)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    {
        return Ok(token);
    }

    match store.load_token()? {
        Some(token) if token.is_valid_at(now, TOKEN_LEEWAY_SECONDS) => Ok(token.access_token),
        Some(token) => Err(InfraError::Credential(format!(
            "stored google token expired at {}; refresh it or set {ACCESS_TOKEN_ENV}",
            token.expires_at.to_rfc3339()
        ))),
        None => Err(InfraError::Credential(format!(
            "no google access token found; set {ACCESS_TOKEN_ENV} or store a token in the keyring"
        ))),
    }
}
