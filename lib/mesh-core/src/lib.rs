//! Core call-path types for the mesh RPC runtime
//!
//! This library provides:
//! - The binary call header and its tag-length-value wire codec
//! - Per-call invocation context consumed by routing
//! - Runtime instance bookkeeping shared with the registry
//! - The bidirectional filter chain every call traverses

pub mod codec;
pub mod context;
pub mod error;
pub mod filter;
pub mod header;
pub mod health;
pub mod instance;

pub use context::InvocationContext;
pub use error::{CallError, CodecError, Result};
pub use filter::{Filter, FilterAction, FilterChain, FilterContext};
pub use header::CallHeader;
pub use health::{HealthCheckFilter, HealthProbe};
pub use instance::{InstanceSetStatus, RuntimeInstance, ServiceInstanceSet};
