//! Runtime instance bookkeeping shared between the registry and routing

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One running, reachable copy of a service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInstance {
    pub ip: String,
    pub port: u16,
    pub version: Option<String>,
}

impl RuntimeInstance {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// Lifecycle of a cached instance set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceSetStatus {
    Created,
    Active,
    Canceled,
}

/// The known instances of one service, as cached by the registry.
///
/// Snapshots are logically immutable: a registry refresh builds a
/// replacement via [`ServiceInstanceSet::with_instances`] and swaps the
/// whole cache entry, so concurrent readers never observe a half-updated
/// list. The active-call counter is shared across replacements.
#[derive(Debug)]
pub struct ServiceInstanceSet {
    pub service_name: String,
    pub version: Option<String>,
    pub status: InstanceSetStatus,
    pub instances: Vec<RuntimeInstance>,
    active_count: Arc<AtomicU64>,
}

impl ServiceInstanceSet {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            version: None,
            status: InstanceSetStatus::Created,
            instances: Vec::new(),
            active_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Build a replacement snapshot with a new instance list, carrying the
    /// active-call counter over from this one.
    pub fn with_instances(
        &self,
        instances: Vec<RuntimeInstance>,
        status: InstanceSetStatus,
    ) -> Self {
        Self {
            service_name: self.service_name.clone(),
            version: self.version.clone(),
            status,
            instances,
            active_count: Arc::clone(&self.active_count),
        }
    }

    pub fn increment_active(&self) -> u64 {
        self.active_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrement the active-call counter, saturating at zero.
    pub fn decrement_active(&self) -> u64 {
        let mut current = self.active_count.load(Ordering::SeqCst);
        loop {
            let next = current.saturating_sub(1);
            match self.active_count.compare_exchange(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replacement_snapshot_keeps_counter() {
        let set = ServiceInstanceSet::new("OrderService");
        set.increment_active();
        set.increment_active();

        let replacement = set.with_instances(
            vec![RuntimeInstance::new("10.0.0.1", 9090)],
            InstanceSetStatus::Active,
        );
        assert_eq!(replacement.active_count(), 2);
        assert_eq!(replacement.instances.len(), 1);
        assert_eq!(replacement.status, InstanceSetStatus::Active);

        // the counter is shared, not copied
        replacement.increment_active();
        assert_eq!(set.active_count(), 3);
    }

    #[test]
    fn test_decrement_saturates_at_zero() {
        let set = ServiceInstanceSet::new("OrderService");
        assert_eq!(set.decrement_active(), 0);
        set.increment_active();
        assert_eq!(set.decrement_active(), 0);
        assert_eq!(set.decrement_active(), 0);
    }

    #[test]
    fn test_concurrent_increments() {
        let set = Arc::new(ServiceInstanceSet::new("OrderService"));
        let threads: Vec<_> = (0..32)
            .map(|_| {
                let set = Arc::clone(&set);
                std::thread::spawn(move || {
                    set.increment_active();
                })
            })
            .collect();
        for handle in threads {
            handle.join().unwrap();
        }
        assert_eq!(set.active_count(), 32);
    }
}
