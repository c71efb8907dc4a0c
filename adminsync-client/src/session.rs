//! Session invalidation on 401.
//!
//! A rejected credential is handled once, globally: the credential is
//! cleared, the navigator is sent to the login route and session listeners
//! (the cache clearer, typically) run. Further 401s are ignored until a new
//! credential is stored and the guard is re-armed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::credentials::CredentialStore;

/// Path prefix of the authentication endpoints. A 401 from these means bad
/// credentials, not an expired session.
pub const AUTH_PATH_PREFIX: &str = "/admin/auth/";

/// Where the embedding UI currently is, and how to send it to login.
pub trait Navigator: Send + Sync {
    fn current_route(&self) -> Option<String>;

    fn redirect_to_login(&self, login_route: &str);
}

/// Navigator for headless use: never on a route, redirects are logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNavigator;

impl Navigator for NoopNavigator {
    fn current_route(&self) -> Option<String> {
        None
    }

    fn redirect_to_login(&self, login_route: &str) {
        tracing::info!(login_route, "Session ended; no navigator attached");
    }
}

type SessionListener = Arc<dyn Fn() + Send + Sync>;

/// Path part of a route: query and fragment dropped, trailing `/` trimmed.
fn route_path(route: &str) -> &str {
    let end = route.find(['?', '#']).unwrap_or(route.len());
    let path = route[..end].trim_end_matches('/');
    if path.is_empty() {
        "/"
    } else {
        path
    }
}

pub struct SessionGuard {
    credentials: Arc<dyn CredentialStore>,
    navigator: Arc<dyn Navigator>,
    login_route: String,
    armed: AtomicBool,
    listeners: RwLock<Vec<SessionListener>>,
}

impl std::fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("login_route", &self.login_route)
            .field("armed", &self.is_armed())
            .finish_non_exhaustive()
    }
}

impl SessionGuard {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        navigator: Arc<dyn Navigator>,
        login_route: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            navigator,
            login_route: login_route.into(),
            armed: AtomicBool::new(true),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn login_route(&self) -> &str {
        &self.login_route
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Allow the next 401 to end the session again. Called after a new
    /// credential is stored.
    pub fn rearm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Run `listener` every time the session is invalidated.
    pub fn on_session_invalidated<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        match self.listeners.write() {
            Ok(mut listeners) => listeners.push(Arc::new(listener)),
            Err(poisoned) => poisoned.into_inner().push(Arc::new(listener)),
        }
    }

    /// Handle a 401 from `path`. Returns true when this call ended the
    /// session.
    pub fn handle_unauthorized(&self, path: &str) -> bool {
        if path.starts_with(AUTH_PATH_PREFIX) {
            tracing::debug!(path, "401 from auth endpoint; session left alone");
            return false;
        }
        let route = self.navigator.current_route();
        if route
            .as_deref()
            .is_some_and(|route| route_path(route) == route_path(&self.login_route))
        {
            tracing::debug!(path, "401 while on login route; session left alone");
            return false;
        }
        if self
            .armed
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        tracing::warn!(path, route = ?route, "Credential rejected; ending session");
        if let Err(err) = self.credentials.clear() {
            tracing::error!(error = %err, "Failed to clear credential");
        }
        self.navigator.redirect_to_login(&self.login_route);

        let listeners: Vec<SessionListener> = match self.listeners.read() {
            Ok(listeners) => listeners.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for listener in listeners {
            listener();
        }
        true
    }
}
