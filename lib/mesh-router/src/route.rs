//! Routing rules and the policy-document loader
//!
//! Rule tables are immutable once built. A change notification from the
//! coordination service replaces the whole table; nothing is ever patched
//! in place, so no call observes a partially updated rule set.

use crate::error::PolicyError;
use crate::pattern::Pattern;
use serde::Deserialize;

/// One condition: a pattern applied to a named attribute of the call or
/// of the candidate instance.
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub attribute: String,
    pub pattern: Pattern,
}

/// What a matching rule does with a candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteAction {
    Admit,
    Deny,
    /// Admit with a load-balancing weight.
    Weight(u32),
}

/// An ordered list of AND'd conditions plus an action. A rule with zero
/// conditions matches everything.
#[derive(Clone, Debug, PartialEq)]
pub struct Route {
    pub conditions: Vec<Condition>,
    pub action: RouteAction,
}

/// What happens to a candidate no rule matched.
///
/// The original system left this ambiguous between its server-side and
/// client-side rule contexts, so it is an explicit knob here. Fail-open
/// (admit) is the default: an incomplete policy must not strand callers
/// with zero usable instances.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultPolicy {
    #[default]
    Admit,
    Deny,
}

/// An immutable, ordered rule set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RouteTable {
    pub routes: Vec<Route>,
    pub default_policy: DefaultPolicy,
}

impl RouteTable {
    pub fn new(routes: Vec<Route>, default_policy: DefaultPolicy) -> Self {
        Self {
            routes,
            default_policy,
        }
    }

    /// A table with no rules; every candidate falls to the default policy.
    pub fn empty(default_policy: DefaultPolicy) -> Self {
        Self {
            routes: Vec::new(),
            default_policy,
        }
    }

    /// Parse a routing-rule document as distributed through the policy
    /// nodes. Regexes compile here; any failure is fatal to this load and
    /// the caller keeps its previous table.
    pub fn from_json(document: &str) -> Result<Self, PolicyError> {
        let spec: RouteDocument = serde_json::from_str(document)?;

        let mut routes = Vec::with_capacity(spec.routes.len());
        for route in spec.routes {
            let mut conditions = Vec::with_capacity(route.conditions.len());
            for condition in route.conditions {
                let pattern = match condition.pattern {
                    PatternSpec::Exact { value } => Pattern::exact(value),
                    PatternSpec::Regex { expr } => Pattern::regex(&expr)?,
                    PatternSpec::Wildcard => Pattern::Wildcard,
                };
                conditions.push(Condition {
                    attribute: condition.attribute,
                    pattern,
                });
            }
            routes.push(Route {
                conditions,
                action: route.action.into(),
            });
        }

        Ok(Self {
            routes,
            default_policy: spec.default_policy,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RouteDocument {
    #[serde(default)]
    default_policy: DefaultPolicy,
    #[serde(default)]
    routes: Vec<RouteSpec>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RouteSpec {
    #[serde(default, rename = "match")]
    conditions: Vec<ConditionSpec>,
    action: ActionSpec,
}

#[derive(Deserialize)]
struct ConditionSpec {
    attribute: String,
    #[serde(flatten)]
    pattern: PatternSpec,
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum PatternSpec {
    Exact { value: String },
    Regex { expr: String },
    Wildcard,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ActionSpec {
    Named(NamedAction),
    Weighted { weight: u32 },
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum NamedAction {
    Admit,
    Deny,
}

impl From<ActionSpec> for RouteAction {
    fn from(spec: ActionSpec) -> Self {
        match spec {
            ActionSpec::Named(NamedAction::Admit) => RouteAction::Admit,
            ActionSpec::Named(NamedAction::Deny) => RouteAction::Deny,
            ActionSpec::Weighted { weight } => RouteAction::Weight(weight),
        }
    }
}
