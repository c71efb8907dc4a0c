//! Admin login, token verification and logout.

use adminsync_cache::QueryCache;
use adminsync_core::types::{AuthUser, LoginCredentials, LoginResponse};
use adminsync_core::{Change, ChangeKind, SyncError, SyncResult};

use crate::resource::ResourceClient;

pub const LOGIN_PATH: &str = "/admin/auth/login";
pub const VERIFY_PATH: &str = "/admin/auth/verify";
pub const LOGOUT_PATH: &str = "/admin/auth/logout";

#[derive(Debug, Clone)]
pub struct AuthService {
    client: ResourceClient,
    cache: QueryCache,
}

impl AuthService {
    pub fn new(client: ResourceClient, cache: QueryCache) -> Self {
        Self { client, cache }
    }

    pub fn is_authenticated(&self) -> bool {
        self.client.credentials().has_token()
    }

    /// Exchange credentials for a token, store it and re-arm the session
    /// guard.
    pub async fn login(&self, credentials: &LoginCredentials) -> SyncResult<AuthUser> {
        credentials.validate()?;

        let response: LoginResponse = self.client.post(LOGIN_PATH, Some(credentials)).await?;
        self.client
            .credentials()
            .store(&response.token)
            .map_err(|e| SyncError::client(format!("Failed to store credential: {}", e)))?;
        self.client.session().rearm();

        tracing::info!(user_id = %response.user.id, user_type = ?response.user.user_type, "Logged in");
        Ok(response.user)
    }

    /// The user behind the stored token, or `None` when there is no token or
    /// the server no longer accepts it. A rejected token is cleared.
    pub async fn verify(&self) -> SyncResult<Option<AuthUser>> {
        if !self.is_authenticated() {
            return Ok(None);
        }

        match self.client.get::<Option<AuthUser>, ()>(VERIFY_PATH, None).await {
            Ok(Some(user)) => Ok(Some(user)),
            Ok(None) => {
                tracing::warn!("Verify returned no user; clearing credential");
                self.forget_credential();
                Ok(None)
            }
            Err(err) => {
                tracing::info!(error = %err, "Stored credential did not verify; clearing it");
                self.forget_credential();
                Ok(None)
            }
        }
    }

    /// Tell the server (failures ignored), clear the credential and drop
    /// every cached read.
    pub async fn logout(&self) -> SyncResult<()> {
        if let Err(err) = self.client.post::<(), ()>(LOGOUT_PATH, None).await {
            tracing::debug!(error = %err, "Logout request failed; continuing");
        }
        self.forget_credential();
        let removed = self.cache.apply_change(&Change::new(ChangeKind::SessionEnded));
        tracing::info!(removed, "Logged out");
        Ok(())
    }

    fn forget_credential(&self) {
        if let Err(err) = self.client.credentials().clear() {
            tracing::error!(error = %err, "Failed to clear credential");
        }
    }
}
