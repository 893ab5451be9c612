//! Client-side registry agent: the local cache of known instances

use crate::coordination::{CoordinationClient, WatchEvent};
use crate::paths;
use mesh_core::{InstanceSetStatus, InvocationContext, RuntimeInstance, ServiceInstanceSet};
use mesh_router::{select, DefaultPolicy, RouteTable};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

/// Per-service sync state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    /// Never synced.
    Unknown,
    /// Cache entry reflects the last successful sync.
    Synced,
    /// Watch connection dropped; entry may be outdated but stays
    /// authoritative until the next successful sync.
    Stale,
}

#[derive(Clone, Debug)]
pub struct ClientAgentConfig {
    /// What happens to candidates no routing rule matched, before any
    /// policy document has loaded.
    pub default_policy: DefaultPolicy,
}

impl Default for ClientAgentConfig {
    fn default() -> Self {
        Self {
            default_policy: DefaultPolicy::Admit,
        }
    }
}

/// Maintains the client-side cache of known instances per service,
/// refreshed from the master coordination cluster (with an optional
/// fallback cluster for instance lists) and filtered through the routing
/// engine before use.
///
/// Cache entries are whole-snapshot replacements: readers never observe a
/// partially filtered list.
pub struct ClientRegistryAgent {
    master: Arc<dyn CoordinationClient>,
    fallback: Option<Arc<dyn CoordinationClient>>,
    cache: RwLock<HashMap<String, Arc<ServiceInstanceSet>>>,
    states: RwLock<HashMap<String, SyncState>>,
    routes: RwLock<Arc<RouteTable>>,
    cookie_routes: RwLock<Arc<RouteTable>>,
}

impl ClientRegistryAgent {
    pub fn new(
        master: Arc<dyn CoordinationClient>,
        fallback: Option<Arc<dyn CoordinationClient>>,
        config: ClientAgentConfig,
    ) -> Self {
        let seed = Arc::new(RouteTable::empty(config.default_policy));
        Self {
            master,
            fallback,
            cache: RwLock::new(HashMap::new()),
            states: RwLock::new(HashMap::new()),
            routes: RwLock::new(Arc::clone(&seed)),
            cookie_routes: RwLock::new(seed),
        }
    }

    /// Connect the master cluster, and the fallback cluster if configured.
    pub async fn start(&self) -> crate::error::Result<()> {
        self.master.connect().await?;
        if let Some(fallback) = &self.fallback {
            fallback.connect().await?;
        }
        Ok(())
    }

    /// Idempotent; safe when `start` never completed.
    pub async fn stop(&self) {
        self.master.close().await;
        if let Some(fallback) = &self.fallback {
            fallback.close().await;
        }
    }

    /// Cached entry for a service, if any.
    pub async fn cached(&self, service: &str) -> Option<Arc<ServiceInstanceSet>> {
        self.cache.read().await.get(service).cloned()
    }

    pub async fn state(&self, service: &str) -> SyncState {
        self.states
            .read()
            .await
            .get(service)
            .copied()
            .unwrap_or(SyncState::Unknown)
    }

    /// Currently loaded routing rules.
    pub async fn routes(&self) -> Arc<RouteTable> {
        Arc::clone(&*self.routes.read().await)
    }

    /// Currently loaded cookie routing rules.
    pub async fn cookie_routes(&self) -> Arc<RouteTable> {
        Arc::clone(&*self.cookie_routes.read().await)
    }

    /// Ensure a service's instance list is cached, syncing it from the
    /// coordination service on first use.
    pub async fn sync(
        &self,
        service: &str,
        context: &InvocationContext,
    ) -> Option<Arc<ServiceInstanceSet>> {
        if let Some(cached) = self.cached(service).await {
            return Some(cached);
        }
        self.resync(service, context).await
    }

    /// Refresh a service's cache entry from the coordination service.
    ///
    /// Failures are treated as "no update": the previous entry, when one
    /// exists, stays authoritative.
    pub async fn resync(
        &self,
        service: &str,
        context: &InvocationContext,
    ) -> Option<Arc<ServiceInstanceSet>> {
        let raw = match self.fetch_instances(service).await {
            Some(instances) => instances,
            None => {
                info!("No instance list for {}; keeping previous entry", service);
                return self.cached(service).await;
            }
        };

        let table = self.routes().await;
        let eligible = select(context, &table, &raw);
        debug!(
            "Synced {}: {}/{} instances eligible",
            service,
            eligible.len(),
            raw.len()
        );

        let replacement = {
            let cache = self.cache.read().await;
            let snapshot = match cache.get(service) {
                Some(previous) => previous.with_instances(eligible, InstanceSetStatus::Active),
                None => ServiceInstanceSet::new(service)
                    .with_instances(eligible, InstanceSetStatus::Active),
            };
            Arc::new(snapshot)
        };

        self.cache
            .write()
            .await
            .insert(service.to_string(), Arc::clone(&replacement));
        self.states
            .write()
            .await
            .insert(service.to_string(), SyncState::Synced);
        Some(replacement)
    }

    /// Evict a service from the cache. Idempotent.
    pub async fn cancel_sync(&self, service: &str) {
        self.cache.write().await.remove(service);
        self.states.write().await.remove(service);
        debug!("Canceled sync for {}", service);
    }

    /// Raw config blob for a service key, from the master cluster only
    /// (the fallback cluster serves instance lists, never config).
    pub async fn get_config(&self, service_key: &str) -> Option<Vec<u8>> {
        match self.master.get_data(&paths::config_path(service_key)).await {
            Ok(data) => data,
            Err(err) => {
                warn!("Config fetch for {} failed: {}", service_key, err);
                None
            }
        }
    }

    /// Reload the routing-rule document for a service, replacing the
    /// whole table. A malformed document leaves the previous rules active.
    pub async fn reload_routes(&self, service: &str) {
        if let Some(table) = self.load_table(&paths::routes_path(service)).await {
            *self.routes.write().await = Arc::new(table);
            info!("Routing rules for {} reloaded", service);
        }
    }

    /// Same as [`Self::reload_routes`] for the cookie-rule document.
    pub async fn reload_cookie_rules(&self, service: &str) {
        if let Some(table) = self.load_table(&paths::cookie_rules_path(service)).await {
            *self.cookie_routes.write().await = Arc::new(table);
            info!("Cookie routing rules for {} reloaded", service);
        }
    }

    async fn load_table(&self, path: &str) -> Option<RouteTable> {
        let bytes = match self.master.get_data(path).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("No policy document at {}", path);
                return None;
            }
            Err(err) => {
                warn!("Policy fetch from {} failed: {}", path, err);
                return None;
            }
        };

        let document = match std::str::from_utf8(&bytes) {
            Ok(document) => document,
            Err(err) => {
                error!("Policy document at {} is not UTF-8: {}", path, err);
                return None;
            }
        };

        match RouteTable::from_json(document) {
            Ok(table) => Some(table),
            Err(err) => {
                // fatal to this load only; previous rules stay active
                error!("Policy document at {} rejected: {}", path, err);
                None
            }
        }
    }

    /// Mark every synced service stale after a watch disconnect.
    pub async fn mark_all_stale(&self) {
        let mut states = self.states.write().await;
        for state in states.values_mut() {
            if *state == SyncState::Synced {
                *state = SyncState::Stale;
            }
        }
    }

    /// React to one coordination-service watch event.
    pub async fn handle_event(&self, event: WatchEvent, context: &InvocationContext) {
        match event {
            WatchEvent::ChildrenChanged(path) => {
                if let Some(service) = paths::service_of_runtime_path(&path) {
                    let service = service.to_string();
                    if self.tracks(&service).await {
                        self.resync(&service, context).await;
                    }
                }
            }
            WatchEvent::NodeDeleted(path) => {
                if let Some(service) = paths::service_of_runtime_path(&path) {
                    let service = service.to_string();
                    if path == paths::runtime_service_path(&service) {
                        // the whole service vanished
                        self.cancel_sync(&service).await;
                    } else if self.tracks(&service).await {
                        self.resync(&service, context).await;
                    }
                }
            }
            WatchEvent::DataChanged(path) => {
                if let Some(service) = paths::service_of_routes_path(&path) {
                    self.reload_routes(&service.to_string()).await;
                } else if path.starts_with(paths::COOKIE_RULES_PATH) {
                    if let Some(service) = path.rsplit('/').next() {
                        self.reload_cookie_rules(&service.to_string()).await;
                    }
                }
            }
            WatchEvent::Disconnected => {
                warn!("Coordination connection lost; cache entries go stale");
                self.mark_all_stale().await;
            }
            WatchEvent::Reconnected => {
                let stale: Vec<String> = {
                    let states = self.states.read().await;
                    states
                        .iter()
                        .filter(|(_, state)| **state == SyncState::Stale)
                        .map(|(service, _)| service.clone())
                        .collect()
                };
                for service in stale {
                    self.resync(&service, context).await;
                }
            }
        }
    }

    /// Watch-thread loop: drives [`Self::handle_event`] until the event
    /// stream closes.
    pub async fn run(
        self: Arc<Self>,
        mut events: broadcast::Receiver<WatchEvent>,
        context: InvocationContext,
    ) {
        loop {
            match events.recv().await {
                Ok(event) => self.handle_event(event, &context).await,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Watch loop lagged, {} events dropped", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn tracks(&self, service: &str) -> bool {
        self.states.read().await.contains_key(service)
    }

    /// Raw instance list from the master cluster, falling back to the
    /// fallback cluster when the master has nothing for this service.
    async fn fetch_instances(&self, service: &str) -> Option<Vec<RuntimeInstance>> {
        let path = paths::runtime_service_path(service);

        match self.master.children(&path).await {
            Ok(Some(names)) => return Some(paths::parse_instance_nodes(service, &names)),
            Ok(None) => debug!("Master cluster has no node for {}", service),
            Err(err) => warn!("Master sync for {} failed: {}", service, err),
        }

        let fallback = self.fallback.as_ref()?;
        match fallback.children(&path).await {
            Ok(Some(names)) => Some(paths::parse_instance_nodes(service, &names)),
            Ok(None) => {
                debug!("Fallback cluster has no node for {}", service);
                None
            }
            Err(err) => {
                warn!("Fallback sync for {} failed: {}", service, err);
                None
            }
        }
    }
}
