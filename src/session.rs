//! In-memory session of the signed-in user

use crate::auth_client::AuthClient;
use crate::error::{ClientError, Result};
use crate::router::{Navigator, LOGIN_PATH};
use crate::token_store::TokenStore;
use crate::types::{LoginCredentials, Role, UserIdentity};
use arc_swap::ArcSwapOption;
use std::sync::{Arc, MutexGuard, PoisonError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Session store
///
/// Holds the current user identity. The identity is swapped in and out as a
/// whole, so readers see either a complete user or none.
pub struct SessionStore {
    user: ArcSwapOption<UserIdentity>,
    token_store: TokenStore,
    navigator: Arc<dyn Navigator>,
    /// Serializes profile fetches while the session is empty
    hydration: Mutex<()>,
    /// Bumped by every logout; writes started under an older epoch are dropped
    epoch: std::sync::Mutex<u64>,
}

impl SessionStore {
    pub fn new(token_store: TokenStore, navigator: Arc<dyn Navigator>) -> Arc<Self> {
        Arc::new(Self {
            user: ArcSwapOption::empty(),
            token_store,
            navigator,
            hydration: Mutex::new(()),
            epoch: std::sync::Mutex::new(0),
        })
    }

    /// Current session epoch, to be read before starting a request whose
    /// result will be written back into the session
    pub fn epoch(&self) -> u64 {
        *self.lock_epoch()
    }

    fn lock_epoch(&self) -> MutexGuard<'_, u64> {
        self.epoch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `write` only if no logout happened since `epoch` was read
    ///
    /// The epoch stays locked while `write` runs, so a concurrent logout
    /// either lands before the check or clears what was written.
    pub fn write_if_current<T>(&self, epoch: u64, write: impl FnOnce() -> Result<T>) -> Result<T> {
        let current = self.lock_epoch();
        if *current != epoch {
            debug!(epoch, current = *current, "Dropping write from an ended session");
            return Err(ClientError::SessionExpired(
                "session ended while the request was in flight".to_string(),
            ));
        }
        write()
    }

    pub fn token_store(&self) -> &TokenStore {
        &self.token_store
    }

    pub fn user(&self) -> Option<Arc<UserIdentity>> {
        self.user.load_full()
    }

    pub fn role(&self) -> Option<Role> {
        self.user.load().as_ref().map(|user| user.role)
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.load().is_some()
    }

    pub fn is_student(&self) -> bool {
        self.role() == Some(Role::Student)
    }

    pub fn is_teacher(&self) -> bool {
        self.role() == Some(Role::Teacher)
    }

    pub fn is_admin(&self) -> bool {
        self.role() == Some(Role::Admin)
    }

    /// Populate the session from the profile endpoint
    ///
    /// Returns the cached user without a request when already populated. On
    /// failure the session stays empty and the error is returned; deciding
    /// whether to log out is up to the caller.
    pub async fn fetch_user(&self, client: &impl AuthClient) -> Result<Arc<UserIdentity>> {
        if let Some(user) = self.user() {
            return Ok(user);
        }

        let _guard = self.hydration.lock().await;
        // Another caller may have finished hydrating while we waited
        if let Some(user) = self.user() {
            return Ok(user);
        }

        let epoch = self.epoch();
        let user = match client.fetch_profile().await {
            Ok(user) => Arc::new(user),
            Err(e) => {
                warn!(error = %e, "Failed to fetch user profile");
                return Err(e);
            }
        };

        self.write_if_current(epoch, || {
            self.token_store.cache_identity(user.role, &user.username)?;
            self.user.store(Some(Arc::clone(&user)));
            Ok(())
        })?;
        debug!(username = %user.username, role = %user.role, "Session hydrated");

        Ok(user)
    }

    /// Exchange credentials for tokens and load the profile
    pub async fn login(
        &self,
        client: &impl AuthClient,
        credentials: &LoginCredentials,
    ) -> Result<Arc<UserIdentity>> {
        let epoch = self.epoch();
        let tokens = client.obtain_tokens(credentials).await?;
        self.write_if_current(epoch, || {
            self.token_store.set(&tokens)?;
            self.user.store(None);
            Ok(())
        })?;
        info!(username = %credentials.username, "Logged in");

        self.fetch_user(client).await
    }

    /// Swap in an identity returned by a profile update
    pub fn replace_user(&self, user: UserIdentity) -> Result<()> {
        self.token_store.cache_identity(user.role, &user.username)?;
        self.user.store(Some(Arc::new(user)));
        Ok(())
    }

    /// End the session
    ///
    /// Clears the user and every stored credential, then hard-navigates to
    /// the login page. Requests still in flight can no longer write back into
    /// the session. The navigation happens even when clearing storage fails;
    /// that failure is returned afterwards.
    pub fn logout(&self) -> Result<()> {
        let cleared = {
            let mut epoch = self.lock_epoch();
            *epoch += 1;
            self.user.store(None);
            self.token_store.clear()
        };
        if let Err(e) = &cleared {
            warn!(error = %e, "Failed to clear stored credentials");
        }
        info!("Logged out");
        self.navigator.hard_navigate(LOGIN_PATH);
        cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::router::Location;
    use crate::storage::FileStorage;
    use crate::types::AuthTokens;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct StaticProfile {
        user: Option<UserIdentity>,
        calls: AtomicUsize,
    }

    impl StaticProfile {
        fn new(user: Option<UserIdentity>) -> Self {
            Self {
                user,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl AuthClient for StaticProfile {
        async fn fetch_profile(&self) -> Result<UserIdentity> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.user
                .clone()
                .ok_or_else(|| ClientError::Authentication("token not valid".to_string()))
        }

        async fn obtain_tokens(&self, _credentials: &LoginCredentials) -> Result<AuthTokens> {
            Ok(AuthTokens {
                access_token: "a1".to_string(),
                refresh_token: "r1".to_string(),
            })
        }
    }

    /// Profile fetch that blocks until released
    struct GatedProfile {
        started: Notify,
        release: Notify,
    }

    impl AuthClient for GatedProfile {
        async fn fetch_profile(&self) -> Result<UserIdentity> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(teacher())
        }

        async fn obtain_tokens(&self, _credentials: &LoginCredentials) -> Result<AuthTokens> {
            Err(ClientError::Authentication("not used".to_string()))
        }
    }

    fn credentials() -> LoginCredentials {
        LoginCredentials {
            username: "zhang".to_string(),
            password: "secret".to_string(),
        }
    }

    fn teacher() -> UserIdentity {
        UserIdentity {
            id: 7,
            username: "zhang".to_string(),
            email: "zhang@example.com".to_string(),
            role: Role::Teacher,
        }
    }

    fn session() -> (Arc<SessionStore>, Arc<Location>) {
        let location = Location::new("/teacher/courses");
        let session = SessionStore::new(TokenStore::in_memory(), location.clone());
        (session, location)
    }

    #[tokio::test]
    async fn test_fetch_user_is_idempotent() {
        let (session, _) = session();
        let client = StaticProfile::new(Some(teacher()));

        session.fetch_user(&client).await.unwrap();
        session.fetch_user(&client).await.unwrap();

        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert!(session.is_teacher());
        assert!(!session.is_student());
        assert!(!session.is_admin());
        assert_eq!(
            session.token_store().cached_username().unwrap().as_deref(),
            Some("zhang")
        );
    }

    #[tokio::test]
    async fn test_fetch_user_failure_leaves_session_empty() {
        let (session, location) = session();
        let client = StaticProfile::new(None);

        assert!(session.fetch_user(&client).await.is_err());
        assert!(!session.is_authenticated());
        // No logout on its own
        assert_eq!(location.current(), "/teacher/courses");
    }

    #[tokio::test]
    async fn test_logout_clears_everything() {
        let (session, location) = session();
        let client = StaticProfile::new(Some(teacher()));

        session.login(&client, &credentials()).await.unwrap();
        assert!(session.is_authenticated());
        assert!(session.token_store().get().unwrap().is_some());

        session.logout().unwrap();

        assert!(!session.is_authenticated());
        assert!(session.token_store().get().unwrap().is_none());
        assert!(session.token_store().cached_role().unwrap().is_none());
        assert_eq!(location.current(), LOGIN_PATH);
    }

    #[tokio::test]
    async fn test_profile_arriving_after_logout_is_dropped() {
        let (session, location) = session();
        session
            .token_store()
            .set(&AuthTokens {
                access_token: "a1".to_string(),
                refresh_token: "r1".to_string(),
            })
            .unwrap();
        let client = GatedProfile {
            started: Notify::new(),
            release: Notify::new(),
        };

        let (fetched, ()) = tokio::join!(session.fetch_user(&client), async {
            client.started.notified().await;
            session.logout().unwrap();
            client.release.notify_one();
        });

        assert!(fetched.unwrap_err().is_session_expired());
        assert!(!session.is_authenticated());
        assert!(session.token_store().get().unwrap().is_none());
        assert!(session.token_store().cached_username().unwrap().is_none());
        assert_eq!(location.current(), LOGIN_PATH);
    }

    #[tokio::test]
    async fn test_login_with_unavailable_storage() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("missing").join("session.json"));
        let location = Location::new("/login");
        let session = SessionStore::new(TokenStore::new(Arc::new(storage)), location);
        let client = StaticProfile::new(Some(teacher()));

        let err = session.login(&client, &credentials()).await.unwrap_err();

        assert!(matches!(err, ClientError::Storage(_)));
        assert!(!session.is_authenticated());
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }
}
