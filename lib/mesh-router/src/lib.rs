//! Rule-based traffic steering for the mesh RPC runtime
//!
//! This library provides:
//! - Condition patterns (exact, regex, wildcard) over call attributes
//! - Routing rules and rule tables loaded from policy documents
//! - The selection engine filtering candidate instances for a call

pub mod engine;
pub mod error;
pub mod pattern;
pub mod route;

pub use engine::select;
pub use error::PolicyError;
pub use pattern::Pattern;
pub use route::{Condition, DefaultPolicy, Route, RouteAction, RouteTable};
