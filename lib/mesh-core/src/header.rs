//! The fixed-schema call header carried by every request and response

use crate::error::{CallError, Result};
use std::collections::HashMap;

/// Binary call header exchanged on every RPC.
///
/// Only service name, method name and version name are mandatory for
/// dispatch; every other field is independently present or absent on the
/// wire. A partially filled header is legitimate while a call is still
/// traversing the pipeline, so [`CallHeader::validate`] runs only when a
/// caller explicitly asks for it, never inside the codec.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CallHeader {
    pub service_name: Option<String>,
    pub method_name: Option<String>,
    pub version_name: Option<String>,
    pub caller_mid: Option<String>,
    pub caller_ip: Option<String>,
    pub caller_port: Option<i32>,
    pub session_tid: Option<String>,
    pub user_ip: Option<String>,
    pub caller_tid: Option<String>,
    pub timeout: Option<i32>,
    pub resp_code: Option<String>,
    pub resp_message: Option<String>,
    pub callee_tid: Option<String>,
    pub callee_ip: Option<String>,
    pub operator_id: Option<i32>,
    pub callee_port: Option<i32>,
    pub user_id: Option<i64>,
    pub callee_mid: Option<String>,
    pub transaction_id: Option<i32>,
    pub transaction_sequence: Option<i32>,
    pub callee_time1: Option<i32>,
    pub callee_time2: Option<i32>,
    pub operator_name: Option<String>,
    pub customer_id: Option<i32>,
    pub customer_name: Option<String>,
    pub session_id: Option<String>,
    pub caller_from: Option<String>,
    /// Free-form cookies, always emitted on the wire (possibly empty).
    pub cookies: HashMap<String, String>,
}

impl CallHeader {
    /// Create a header carrying the three mandatory dispatch fields.
    pub fn new(
        service_name: impl Into<String>,
        method_name: impl Into<String>,
        version_name: impl Into<String>,
    ) -> Self {
        Self {
            service_name: Some(service_name.into()),
            method_name: Some(method_name.into()),
            version_name: Some(version_name.into()),
            ..Self::default()
        }
    }

    /// Check that the header is valid for dispatch.
    ///
    /// Fails with the first missing mandatory field; empty strings count
    /// as missing.
    pub fn validate(&self) -> Result<()> {
        if self.service_name.as_deref().unwrap_or("").is_empty() {
            return Err(CallError::RequiredFieldMissing("serviceName"));
        }
        if self.method_name.as_deref().unwrap_or("").is_empty() {
            return Err(CallError::RequiredFieldMissing("methodName"));
        }
        if self.version_name.as_deref().unwrap_or("").is_empty() {
            return Err(CallError::RequiredFieldMissing("versionName"));
        }
        Ok(())
    }
}
