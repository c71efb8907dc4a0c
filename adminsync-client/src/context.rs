//! Explicitly constructed owner of the whole data layer.
//!
//! One [`SyncContext`] per signed-in dashboard session: it wires the
//! credential store, session guard, resource client, query cache, mutation
//! dispatcher and (optionally) the realtime manager together.

use std::sync::Arc;

use adminsync_cache::QueryCache;
use adminsync_core::{Change, ChangeKind, SyncError, SyncResult};
use tokio::sync::watch;

use crate::alerts::AlertFeed;
use crate::auth::AuthService;
use crate::config::{AdminSyncConfig, ConfigError};
use crate::credentials::{CredentialError, CredentialStore, FileCredentialStore, MemoryCredentialStore};
use crate::mutations::{Mutation, MutationDispatcher};
use crate::queries::Queries;
use crate::realtime::{
    install_cache_listener, spawn_realtime, RealtimeConfig, RealtimeHandle, RealtimeManager,
    Transport, WebSocketTransport,
};
use crate::resource::ResourceClient;
use crate::session::{Navigator, NoopNavigator, SessionGuard};

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Credential store error: {0}")]
    Credentials(#[from] CredentialError),
    #[error("Client error: {0}")]
    Client(#[from] SyncError),
}

pub struct SyncContextBuilder {
    config: AdminSyncConfig,
    credentials: Option<Arc<dyn CredentialStore>>,
    navigator: Option<Arc<dyn Navigator>>,
}

impl SyncContextBuilder {
    /// Use `store` instead of the one named by `credentials.token_path`.
    pub fn credentials(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    /// Validate the config and assemble the context. Must run inside a Tokio
    /// runtime: the cache sweeper is spawned here.
    pub fn build(self) -> Result<SyncContext, ContextError> {
        let config = self.config;
        config.validate()?;

        let credentials: Arc<dyn CredentialStore> = match (self.credentials, &config.credentials.token_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(FileCredentialStore::open(path)?),
            (None, None) => Arc::new(MemoryCredentialStore::new()),
        };
        let navigator = self.navigator.unwrap_or_else(|| Arc::new(NoopNavigator));

        let cache = QueryCache::new(config.cache_config());
        let session = Arc::new(SessionGuard::new(
            Arc::clone(&credentials),
            navigator,
            config.login_route.clone(),
        ));
        {
            let cache = cache.clone();
            session.on_session_invalidated(move || {
                cache.apply_change(&Change::new(ChangeKind::SessionEnded));
            });
        }

        let client = ResourceClient::new(&config, Arc::clone(&credentials), Arc::clone(&session))?;
        let queries = Queries::new(client.clone(), cache.clone(), config.retry_policy());
        let mutations = MutationDispatcher::new(client.clone(), cache.clone());
        let auth = AuthService::new(client.clone(), cache.clone());

        let (sweeper_shutdown, shutdown_rx) = watch::channel(false);
        cache.spawn_sweeper(shutdown_rx);

        tracing::info!(
            api_base_url = %client.base_url(),
            ws_enabled = config.ws_enabled,
            authenticated = credentials.has_token(),
            "Sync context ready"
        );

        Ok(SyncContext {
            config,
            credentials,
            session,
            client,
            cache,
            queries,
            mutations,
            auth,
            alerts: AlertFeed::new(),
            realtime: None,
            sweeper_shutdown,
        })
    }
}

pub struct SyncContext {
    config: AdminSyncConfig,
    credentials: Arc<dyn CredentialStore>,
    session: Arc<SessionGuard>,
    client: ResourceClient,
    cache: QueryCache,
    queries: Queries,
    mutations: MutationDispatcher,
    auth: AuthService,
    alerts: AlertFeed,
    realtime: Option<RealtimeHandle>,
    sweeper_shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("client", &self.client)
            .field("cache", &self.cache)
            .field("realtime", &self.realtime.as_ref().map(RealtimeHandle::state))
            .finish_non_exhaustive()
    }
}

impl SyncContext {
    pub fn builder(config: AdminSyncConfig) -> SyncContextBuilder {
        SyncContextBuilder {
            config,
            credentials: None,
            navigator: None,
        }
    }

    /// Context from the config file named by `--config` or
    /// `ADMINSYNC_CONFIG`, with default collaborators.
    pub fn from_env() -> Result<Self, ContextError> {
        Self::builder(AdminSyncConfig::load()?).build()
    }

    pub fn config(&self) -> &AdminSyncConfig {
        &self.config
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    pub fn session(&self) -> &Arc<SessionGuard> {
        &self.session
    }

    pub fn client(&self) -> &ResourceClient {
        &self.client
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn queries(&self) -> &Queries {
        &self.queries
    }

    pub fn mutations(&self) -> &MutationDispatcher {
        &self.mutations
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    pub fn alerts(&self) -> &AlertFeed {
        &self.alerts
    }

    pub fn realtime(&self) -> Option<&RealtimeHandle> {
        self.realtime.as_ref()
    }

    pub async fn mutate<M: Mutation>(&self, mutation: &M) -> SyncResult<M::Output> {
        self.mutations.mutate(mutation).await
    }

    /// Start the realtime manager over `transport`, with the cache listener
    /// and the alert feed attached. Replaces a manager started earlier.
    pub fn start_realtime<T>(&mut self, transport: T) -> RealtimeHandle
    where
        T: Transport + 'static,
    {
        let manager = RealtimeManager::new(
            transport,
            RealtimeConfig::from_config(&self.config),
            Arc::clone(&self.credentials),
        );
        let listeners = manager.listeners();
        install_cache_listener(&listeners, self.cache.clone());
        self.alerts.attach(&listeners);

        let handle = spawn_realtime(manager);
        if let Some(previous) = self.realtime.replace(handle.clone()) {
            let _ = previous.shutdown();
        }
        handle
    }

    /// [`start_realtime`](Self::start_realtime) over a WebSocket.
    pub fn start_websocket(&mut self) -> RealtimeHandle {
        self.start_realtime(WebSocketTransport::new())
    }

    /// Stop background work: the cache sweeper and the realtime manager.
    pub fn shutdown(&self) {
        let _ = self.sweeper_shutdown.send(true);
        if let Some(realtime) = &self.realtime {
            let _ = realtime.shutdown();
        }
        tracing::info!("Sync context shut down");
    }
}
