//! Well-known coordination-service node layout

use mesh_core::RuntimeInstance;
use tracing::warn;

/// Ephemeral runtime instance registrations live under here.
pub const RUNTIME_PATH: &str = "/runtime/services";
/// Service-level configuration blobs.
pub const CONFIG_PATH: &str = "/config";
/// Routing-rule documents.
pub const ROUTES_PATH: &str = "/routes";
/// Cookie-based routing-rule documents.
pub const COOKIE_RULES_PATH: &str = "/cookie-rules";
/// Rate-limit policy documents.
pub const FREQ_PATH: &str = "/freq";

pub fn runtime_service_path(service: &str) -> String {
    format!("{}/{}", RUNTIME_PATH, service)
}

pub fn runtime_instance_path(service: &str, host: &str, port: u16, version: &str) -> String {
    format!(
        "{}/{}",
        runtime_service_path(service),
        instance_node_name(host, port, version)
    )
}

/// Instance node name: `host:port:version`.
pub fn instance_node_name(host: &str, port: u16, version: &str) -> String {
    format!("{}:{}:{}", host, port, version)
}

pub fn config_path(service: &str) -> String {
    format!("{}/{}", CONFIG_PATH, service)
}

pub fn routes_path(service: &str) -> String {
    format!("{}/{}", ROUTES_PATH, service)
}

pub fn cookie_rules_path(service: &str) -> String {
    format!("{}/{}", COOKIE_RULES_PATH, service)
}

pub fn freq_path(service: &str) -> String {
    format!("{}/{}", FREQ_PATH, service)
}

/// The service name a runtime path points at, if it is one.
pub fn service_of_runtime_path(path: &str) -> Option<&str> {
    let rest = path.strip_prefix(RUNTIME_PATH)?.strip_prefix('/')?;
    let service = rest.split('/').next()?;
    if service.is_empty() {
        None
    } else {
        Some(service)
    }
}

/// The service name a routes path points at, if it is one.
pub fn service_of_routes_path(path: &str) -> Option<&str> {
    let rest = path.strip_prefix(ROUTES_PATH)?.strip_prefix('/')?;
    if rest.is_empty() || rest.contains('/') {
        None
    } else {
        Some(rest)
    }
}

/// Parse an instance node name back into a runtime instance. Unparseable
/// names are reported and skipped by callers.
pub fn parse_instance_node(name: &str) -> Option<RuntimeInstance> {
    let mut parts = name.splitn(3, ':');
    let host = parts.next()?;
    let port = parts.next()?.parse::<u16>().ok()?;
    let version = parts.next()?;
    if host.is_empty() {
        return None;
    }
    Some(RuntimeInstance::new(host, port).with_version(version))
}

/// Parse all children of a runtime service node, warning on junk.
pub fn parse_instance_nodes(service: &str, names: &[String]) -> Vec<RuntimeInstance> {
    names
        .iter()
        .filter_map(|name| {
            let parsed = parse_instance_node(name);
            if parsed.is_none() {
                warn!(
                    "Ignoring malformed instance node '{}' under {}",
                    name,
                    runtime_service_path(service)
                );
            }
            parsed
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_instance_path_layout() {
        assert_eq!(
            runtime_instance_path("OrderService", "10.0.0.8", 9090, "2.0"),
            "/runtime/services/OrderService/10.0.0.8:9090:2.0"
        );
    }

    #[test]
    fn test_parse_instance_node() {
        let instance = parse_instance_node("10.0.0.8:9090:2.0").unwrap();
        assert_eq!(instance.ip, "10.0.0.8");
        assert_eq!(instance.port, 9090);
        assert_eq!(instance.version.as_deref(), Some("2.0"));

        assert!(parse_instance_node("garbage").is_none());
        assert!(parse_instance_node("host:notaport:1.0").is_none());
        assert!(parse_instance_node(":9090:1.0").is_none());
    }

    #[test]
    fn test_service_extraction() {
        assert_eq!(
            service_of_runtime_path("/runtime/services/OrderService/10.0.0.8:9090:2.0"),
            Some("OrderService")
        );
        assert_eq!(
            service_of_runtime_path("/runtime/services/OrderService"),
            Some("OrderService")
        );
        assert_eq!(service_of_runtime_path("/config/OrderService"), None);

        assert_eq!(
            service_of_routes_path("/routes/OrderService"),
            Some("OrderService")
        );
        assert_eq!(service_of_routes_path("/routes"), None);
    }
}
