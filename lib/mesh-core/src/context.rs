//! Per-call invocation context

/// Read-only identity snapshot for one call, created at call entry and
/// discarded at completion. Routing consumes it as input; the registry
/// never owns it.
#[derive(Clone, Debug, Default)]
pub struct InvocationContext {
    pub service_name: String,
    pub method_name: String,
    pub version_name: String,
    pub caller_mid: Option<String>,
    pub caller_ip: Option<String>,
    pub session_id: Option<String>,
}

impl InvocationContext {
    pub fn new(
        service_name: impl Into<String>,
        method_name: impl Into<String>,
        version_name: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            method_name: method_name.into(),
            version_name: version_name.into(),
            caller_mid: None,
            caller_ip: None,
            session_id: None,
        }
    }

    /// Look up a call attribute by its wire name, for rule evaluation.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        match name {
            "serviceName" => Some(self.service_name.as_str()),
            "methodName" => Some(self.method_name.as_str()),
            "versionName" => Some(self.version_name.as_str()),
            "callerMid" => self.caller_mid.as_deref(),
            "callerIp" => self.caller_ip.as_deref(),
            "sessionId" => self.session_id.as_deref(),
            _ => None,
        }
    }
}
