//! Credential storage for the signed-in session

use crate::error::Result;
use crate::storage::{CredentialStorage, MemoryStorage};
use crate::types::{AuthTokens, Role};
use std::sync::Arc;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const USER_ROLE_KEY: &str = "user_role";
pub const USERNAME_KEY: &str = "username";

const ALL_KEYS: [&str; 4] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_ROLE_KEY, USERNAME_KEY];

/// Token store persisting every mutation to durable storage
///
/// Cloning shares the same underlying storage.
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn CredentialStorage>,
}

impl TokenStore {
    /// Create a token store over the given storage
    pub fn new(storage: Arc<dyn CredentialStorage>) -> Self {
        Self { storage }
    }

    /// Create a non-persistent token store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// Get the credential pair, if both tokens are stored
    pub fn get(&self) -> Result<Option<AuthTokens>> {
        let access = self.access_token()?;
        let refresh = self.refresh_token()?;
        Ok(access
            .zip(refresh)
            .map(|(access_token, refresh_token)| AuthTokens {
                access_token,
                refresh_token,
            }))
    }

    /// Store a credential pair
    pub fn set(&self, tokens: &AuthTokens) -> Result<()> {
        self.storage.save(ACCESS_TOKEN_KEY, &tokens.access_token)?;
        self.storage.save(REFRESH_TOKEN_KEY, &tokens.refresh_token)
    }

    pub fn access_token(&self) -> Result<Option<String>> {
        self.storage.load(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Result<Option<String>> {
        self.storage.load(REFRESH_TOKEN_KEY)
    }

    /// Replace the access token after a successful refresh
    pub fn set_access_token(&self, token: &str) -> Result<()> {
        self.storage.save(ACCESS_TOKEN_KEY, token)
    }

    /// Replace the refresh token when the server rotates it
    pub fn set_refresh_token(&self, token: &str) -> Result<()> {
        self.storage.save(REFRESH_TOKEN_KEY, token)
    }

    /// Cache role tag and username for code that reads them without a session
    pub fn cache_identity(&self, role: Role, username: &str) -> Result<()> {
        self.storage.save(USER_ROLE_KEY, role.as_str())?;
        self.storage.save(USERNAME_KEY, username)
    }

    pub fn cached_role(&self) -> Result<Option<Role>> {
        Ok(self.storage.load(USER_ROLE_KEY)?.map(|tag| Role::from_tag(&tag)))
    }

    pub fn cached_username(&self) -> Result<Option<String>> {
        self.storage.load(USERNAME_KEY)
    }

    /// Remove tokens and cached identity in one storage operation
    pub fn clear(&self) -> Result<()> {
        self.storage.remove(&ALL_KEYS)
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::in_memory()
    }
}
