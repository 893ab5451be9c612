//! Service registration and discovery over a coordination service
//!
//! This library provides:
//! - The coordination-service client seam and an in-memory tree for tests
//! - The well-known node layout for runtime instances and policy documents
//! - The client-side registry agent (instance cache + routing filter)
//! - The server-side registry agent (register/withdraw + policy trees)
//! - Leader election over ephemeral-sequential node ordering

pub mod client;
pub mod coordination;
pub mod election;
pub mod error;
pub mod memory;
pub mod paths;
pub mod server;

pub use client::{ClientAgentConfig, ClientRegistryAgent, SyncState};
pub use coordination::{CoordinationClient, WatchEvent};
pub use election::LeaderElection;
pub use error::RegistryError;
pub use memory::MemoryCoordination;
pub use server::{
    ProcessLifecycle, ProcessStatus, ServerAgentConfig, ServerRegistryAgent, ServiceDefinition,
};
