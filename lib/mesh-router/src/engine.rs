//! Selection engine: which candidate instances may serve a call

use crate::route::{DefaultPolicy, Condition, RouteAction, RouteTable};
use mesh_core::{InvocationContext, RuntimeInstance};
use std::net::{IpAddr, ToSocketAddrs};
use tracing::{debug, warn};

/// Filter a candidate set through a rule table for one call.
///
/// Rules are evaluated in declaration order; a candidate matches a rule
/// when every condition holds (conditions AND, rules OR) and the first
/// matching rule's action decides. Candidates matching no rule fall to
/// the table's default policy.
///
/// A candidate whose host cannot be resolved is dropped from the eligible
/// set without aborting the rest of the selection.
pub fn select(
    context: &InvocationContext,
    table: &RouteTable,
    candidates: &[RuntimeInstance],
) -> Vec<RuntimeInstance> {
    let mut eligible = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        let resolved = match resolve(&candidate.ip) {
            Ok(address) => address.to_string(),
            Err(error) => {
                warn!(
                    "Dropping instance {}:{}, host resolution failed: {}",
                    candidate.ip, candidate.port, error
                );
                continue;
            }
        };

        if admitted(context, table, candidate, &resolved) {
            eligible.push(candidate.clone());
        }
    }

    debug!(
        "Selected {}/{} instances for {}::{}",
        eligible.len(),
        candidates.len(),
        context.service_name,
        context.method_name
    );
    eligible
}

fn admitted(
    context: &InvocationContext,
    table: &RouteTable,
    candidate: &RuntimeInstance,
    resolved_ip: &str,
) -> bool {
    for route in &table.routes {
        let matches = route
            .conditions
            .iter()
            .all(|condition| condition_holds(condition, context, candidate, resolved_ip));
        if matches {
            return match route.action {
                RouteAction::Admit | RouteAction::Weight(_) => true,
                RouteAction::Deny => false,
            };
        }
    }
    table.default_policy == DefaultPolicy::Admit
}

fn condition_holds(
    condition: &Condition,
    context: &InvocationContext,
    candidate: &RuntimeInstance,
    resolved_ip: &str,
) -> bool {
    let value = attribute_value(condition.attribute.as_str(), context, candidate, resolved_ip);
    match value {
        Some(value) => condition.pattern.matches(&value),
        // a condition over an attribute this call does not carry cannot hold
        None => false,
    }
}

/// Resolve a condition attribute, call attributes first, then candidate
/// attributes (`ip` is the resolved address, not the raw host string).
fn attribute_value(
    name: &str,
    context: &InvocationContext,
    candidate: &RuntimeInstance,
    resolved_ip: &str,
) -> Option<String> {
    if let Some(value) = context.attribute(name) {
        return Some(value.to_string());
    }
    match name {
        "ip" => Some(resolved_ip.to_string()),
        "port" => Some(candidate.port.to_string()),
        "version" => candidate.version.clone(),
        _ => None,
    }
}

fn resolve(host: &str) -> std::io::Result<IpAddr> {
    if let Ok(address) = host.parse::<IpAddr>() {
        return Ok(address);
    }
    (host, 0)
        .to_socket_addrs()?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("no address for {}", host))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::Pattern;
    use crate::route::Route;

    fn candidates() -> Vec<RuntimeInstance> {
        vec![
            RuntimeInstance::new("10.0.0.1", 9090).with_version("1.0.0"),
            RuntimeInstance::new("10.0.0.2", 9090).with_version("1.0.0"),
            RuntimeInstance::new("10.0.0.3", 9091).with_version("2.0.0"),
        ]
    }

    fn rule(attribute: &str, pattern: Pattern, action: RouteAction) -> Route {
        Route {
            conditions: vec![Condition {
                attribute: attribute.to_string(),
                pattern,
            }],
            action,
        }
    }

    #[test]
    fn test_regex_rule_with_deny_default() {
        let table = RouteTable::new(
            vec![rule(
                "methodName",
                Pattern::regex("^get.*").unwrap(),
                RouteAction::Admit,
            )],
            DefaultPolicy::Deny,
        );

        let admitted = select(
            &InvocationContext::new("OrderService", "getOrder", "1.0.0"),
            &table,
            &candidates(),
        );
        assert_eq!(admitted.len(), 3);

        let rejected = select(
            &InvocationContext::new("OrderService", "placeOrder", "1.0.0"),
            &table,
            &candidates(),
        );
        assert!(rejected.is_empty());
    }

    #[test]
    fn test_fail_open_retains_unmatched_candidates() {
        // the single rule only covers version 2.0.0 instances
        let table = RouteTable::new(
            vec![rule("version", Pattern::exact("2.0.0"), RouteAction::Deny)],
            DefaultPolicy::Admit,
        );

        let eligible = select(
            &InvocationContext::new("OrderService", "getOrder", "1.0.0"),
            &table,
            &candidates(),
        );
        let ips: Vec<&str> = eligible.iter().map(|i| i.ip.as_str()).collect();
        assert_eq!(ips, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn test_zero_condition_rule_matches_everything() {
        let table = RouteTable::new(
            vec![Route {
                conditions: Vec::new(),
                action: RouteAction::Deny,
            }],
            DefaultPolicy::Admit,
        );

        let eligible = select(
            &InvocationContext::new("OrderService", "getOrder", "1.0.0"),
            &table,
            &candidates(),
        );
        assert!(eligible.is_empty());
    }

    #[test]
    fn test_first_matching_rule_decides() {
        let table = RouteTable::new(
            vec![
                rule("ip", Pattern::exact("10.0.0.2"), RouteAction::Deny),
                rule("ip", Pattern::Wildcard, RouteAction::Admit),
            ],
            DefaultPolicy::Deny,
        );

        let eligible = select(
            &InvocationContext::new("OrderService", "getOrder", "1.0.0"),
            &table,
            &candidates(),
        );
        let ips: Vec<&str> = eligible.iter().map(|i| i.ip.as_str()).collect();
        assert_eq!(ips, vec!["10.0.0.1", "10.0.0.3"]);
    }

    #[test]
    fn test_all_conditions_of_a_rule_must_hold() {
        let table = RouteTable::new(
            vec![Route {
                conditions: vec![
                    Condition {
                        attribute: "methodName".to_string(),
                        pattern: Pattern::exact("getOrder"),
                    },
                    Condition {
                        attribute: "version".to_string(),
                        pattern: Pattern::exact("2.0.0"),
                    },
                ],
                action: RouteAction::Admit,
            }],
            DefaultPolicy::Deny,
        );

        let eligible = select(
            &InvocationContext::new("OrderService", "getOrder", "1.0.0"),
            &table,
            &candidates(),
        );
        let ips: Vec<&str> = eligible.iter().map(|i| i.ip.as_str()).collect();
        assert_eq!(ips, vec!["10.0.0.3"]);
    }

    #[test]
    fn test_resolution_failure_drops_only_that_instance() {
        let mut all = candidates();
        all.push(RuntimeInstance::new("host.invalid", 9090));

        let eligible = select(
            &InvocationContext::new("OrderService", "getOrder", "1.0.0"),
            &RouteTable::empty(DefaultPolicy::Admit),
            &all,
        );
        assert_eq!(eligible.len(), 3);
        assert!(eligible.iter().all(|i| i.ip != "host.invalid"));
    }

    #[test]
    fn test_weight_action_admits() {
        let table = RouteTable::new(
            vec![rule("methodName", Pattern::Wildcard, RouteAction::Weight(5))],
            DefaultPolicy::Deny,
        );

        let eligible = select(
            &InvocationContext::new("OrderService", "getOrder", "1.0.0"),
            &table,
            &candidates(),
        );
        assert_eq!(eligible.len(), 3);
    }
}
