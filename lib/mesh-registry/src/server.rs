//! Server-side registry agent: publishes this process's services

use crate::coordination::CoordinationClient;
use crate::error::RegistryError;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Well-known transaction-coordinator service, registered when global
/// transactions are enabled so leader election can pick one active
/// coordinator across a fleet.
pub const GLOBAL_TRANSACTION_SERVICE: &str = "GlobalTransactionService";
pub const GLOBAL_TRANSACTION_VERSION: &str = "1.0.0";

/// Process lifecycle states as seen by the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessStatus {
    Starting,
    Running,
    ShuttingDown,
    Down,
}

/// Shared, atomically updated lifecycle status for the owning process.
pub struct ProcessLifecycle {
    status: AtomicU8,
}

impl ProcessLifecycle {
    pub fn new() -> Self {
        Self {
            status: AtomicU8::new(ProcessStatus::Starting as u8),
        }
    }

    pub fn set(&self, status: ProcessStatus) {
        self.status.store(status as u8, Ordering::SeqCst);
    }

    pub fn get(&self) -> ProcessStatus {
        match self.status.load(Ordering::SeqCst) {
            0 => ProcessStatus::Starting,
            1 => ProcessStatus::Running,
            2 => ProcessStatus::ShuttingDown,
            _ => ProcessStatus::Down,
        }
    }
}

impl Default for ProcessLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// One locally hosted service, as derived from the process's
/// method-dispatch map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub name: String,
    pub version: String,
}

impl ServiceDefinition {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerAgentConfig {
    /// Address this process's instances are reachable at.
    pub host_ip: String,
    pub port: u16,
    /// Register the global transaction coordinator alongside local
    /// services.
    #[serde(default)]
    pub transactional_enabled: bool,
}

/// Payload stored on the ephemeral runtime node.
#[derive(Serialize)]
struct InstancePayload<'a> {
    host: &'a str,
    port: u16,
    version: &'a str,
}

/// Registers and withdraws this process's service instances and their
/// policy nodes in the coordination service.
///
/// Explicitly constructed and injected; multiple agents can coexist (for
/// tests or unusual topologies). Coordination failures are logged and
/// contained here, never propagated to dispatch code.
pub struct ServerRegistryAgent {
    master: Arc<dyn CoordinationClient>,
    /// Optional second cluster for cross-environment visibility in
    /// degraded deployments.
    master_fallback: Option<Arc<dyn CoordinationClient>>,
    config: ServerAgentConfig,
    lifecycle: Arc<ProcessLifecycle>,
    dispatch: RwLock<HashMap<String, ServiceDefinition>>,
    /// Per-service-name guards: registration and withdrawal of one name
    /// are serialized, distinct names proceed in parallel.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    started: AtomicBool,
}

impl ServerRegistryAgent {
    pub fn new(
        master: Arc<dyn CoordinationClient>,
        master_fallback: Option<Arc<dyn CoordinationClient>>,
        config: ServerAgentConfig,
        lifecycle: Arc<ProcessLifecycle>,
    ) -> Self {
        Self {
            master,
            master_fallback,
            config,
            lifecycle,
            dispatch: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Connect the master cluster, and the master-fallback cluster when
    /// configured.
    pub async fn start(&self) -> Result<(), RegistryError> {
        self.master.connect().await?;
        if let Some(fallback) = &self.master_fallback {
            fallback.connect().await?;
        }
        self.started.store(true, Ordering::SeqCst);
        info!("Server registry agent started");
        Ok(())
    }

    /// Idempotent; safe when `start` never completed.
    pub async fn stop(&self) {
        self.master.close().await;
        if let Some(fallback) = &self.master_fallback {
            fallback.close().await;
        }
        if self.started.swap(false, Ordering::SeqCst) {
            info!("Server registry agent stopped");
        }
    }

    /// Replace the dispatch map describing locally hosted services.
    pub async fn set_dispatch(&self, services: Vec<ServiceDefinition>) {
        let mut dispatch = self.dispatch.write().await;
        dispatch.clear();
        for service in services {
            dispatch.insert(service.name.clone(), service);
        }
    }

    pub async fn add_service(&self, service: ServiceDefinition) {
        self.dispatch
            .write()
            .await
            .insert(service.name.clone(), service);
    }

    /// Publish one service instance and its policy trees.
    ///
    /// A process that is shutting down refuses to re-register: that is a
    /// logged no-op, not an error.
    pub async fn register_service(&self, name: &str, version: &str) {
        match self.lifecycle.get() {
            ProcessStatus::ShuttingDown | ProcessStatus::Down => {
                warn!(
                    "Process is shutting down; skipping registration of {}:{}",
                    name, version
                );
                return;
            }
            _ => {}
        }

        let guard = self.name_lock(name).await;
        let _guard = guard.lock().await;

        let path =
            paths::runtime_instance_path(name, &self.config.host_ip, self.config.port, version);
        let payload = InstancePayload {
            host: &self.config.host_ip,
            port: self.config.port,
            version,
        };
        let payload = match serde_json::to_vec(&payload) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!("Instance payload for {} failed to serialize: {}", name, err);
                return;
            }
        };

        match self.master.create_ephemeral(&path, &payload).await {
            Ok(()) => info!("Registered service instance {}", path),
            Err(RegistryError::NodeExists(_)) => {
                debug!("Instance {} already registered", path)
            }
            Err(err) => {
                error!("Registration of {} failed: {}", path, err);
                return;
            }
        }

        // policy trees are persistent and shared; ignore-if-exists
        for policy_path in [
            paths::config_path(name),
            paths::routes_path(name),
            paths::cookie_rules_path(name),
            paths::freq_path(name),
        ] {
            if let Err(err) = self.master.create_persistent_if_absent(&policy_path).await {
                error!("Policy node {} creation failed: {}", policy_path, err);
            }
        }
    }

    /// Withdraw one service instance. Never blocks shutdown: failures are
    /// logged and swallowed.
    pub async fn unregister_service(&self, name: &str, version: &str) {
        let guard = self.name_lock(name).await;
        let _guard = guard.lock().await;

        let path =
            paths::runtime_instance_path(name, &self.config.host_ip, self.config.port, version);
        match self.master.delete(&path).await {
            Ok(()) => info!("Unregistered service instance {}", path),
            Err(RegistryError::NodeNotFound(_)) => {
                debug!("Instance {} was not registered", path)
            }
            Err(err) => error!("Unregistration of {} failed: {}", path, err),
        }
    }

    /// Register every locally hosted service, plus the transaction
    /// coordinator when global transactions are enabled.
    pub async fn register_all_services(&self) {
        let services: Vec<ServiceDefinition> =
            self.dispatch.read().await.values().cloned().collect();
        for service in &services {
            self.register_service(&service.name, &service.version).await;
        }

        if self.config.transactional_enabled {
            self.register_service(GLOBAL_TRANSACTION_SERVICE, GLOBAL_TRANSACTION_VERSION)
                .await;
        }
    }

    async fn name_lock(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}
