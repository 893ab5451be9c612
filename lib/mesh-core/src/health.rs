//! Built-in diagnostic filter answering the reserved health probe

use crate::error::Result;
use crate::filter::{Filter, FilterAction, FilterContext};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Reserved diagnostic method name. Calls using it never reach the stages
/// behind the health-check filter.
pub const ECHO_METHOD: &str = "echo";

/// Call attribute carrying the serialized health report.
pub const HEALTH_REPORT_ATTRIBUTE: &str = "health-report";

/// Call attribute carrying the probe's arrival timestamp (epoch millis).
pub const REQUEST_TIMESTAMP_ATTRIBUTE: &str = "request-timestamp";

/// Source of process-health facts for the echo probe.
pub trait HealthProbe: Send + Sync {
    /// One-line dispatcher thread-pool occupancy summary.
    fn dispatcher_snapshot(&self) -> String;

    /// Health-report facts keyed by name.
    fn report(&self) -> HashMap<String, String>;
}

/// Filter that intercepts the reserved `echo` method, gathers process
/// health and service identity, stashes them as a call attribute and
/// jumps straight to the response path. All other calls pass through.
pub struct HealthCheckFilter {
    probe: Arc<dyn HealthProbe>,
    /// Trailing stages (business dispatch and friends) to drop when
    /// short-circuiting.
    skip_tail: usize,
}

impl HealthCheckFilter {
    pub fn new(probe: Arc<dyn HealthProbe>, skip_tail: usize) -> Self {
        Self { probe, skip_tail }
    }
}

#[async_trait::async_trait]
impl Filter for HealthCheckFilter {
    fn name(&self) -> &'static str {
        "HealthCheckFilter"
    }

    async fn on_entry(&self, context: &FilterContext) -> Result<FilterAction> {
        if context.header.method_name.as_deref() != Some(ECHO_METHOD) {
            return Ok(FilterAction::Forward);
        }

        let mut report = self.probe.report();
        report.insert(
            "service".to_string(),
            context
                .header
                .service_name
                .clone()
                .unwrap_or_default(),
        );
        report.insert("dispatcher".to_string(), self.probe.dispatcher_snapshot());

        context.set_attribute(HEALTH_REPORT_ATTRIBUTE, serde_json::to_string(&report)?);
        context.set_attribute(REQUEST_TIMESTAMP_ATTRIBUTE, epoch_millis().to_string());

        debug!("Answered echo probe with {} health facts", report.len());
        Ok(FilterAction::SkipTail(self.skip_tail))
    }
}

fn epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterChain;
    use crate::header::CallHeader;
    use std::sync::Mutex;

    struct FakeProbe;

    impl HealthProbe for FakeProbe {
        fn dispatcher_snapshot(&self) -> String {
            "pool 4/16, queue 0".to_string()
        }

        fn report(&self) -> HashMap<String, String> {
            let mut facts = HashMap::new();
            facts.insert("status".to_string(), "GREEN".to_string());
            facts
        }
    }

    struct Dispatch {
        hits: Arc<Mutex<u32>>,
    }

    #[async_trait::async_trait]
    impl Filter for Dispatch {
        fn name(&self) -> &'static str {
            "Dispatch"
        }

        async fn on_entry(&self, _context: &FilterContext) -> Result<FilterAction> {
            *self.hits.lock().unwrap() += 1;
            Ok(FilterAction::Forward)
        }
    }

    fn chain(hits: &Arc<Mutex<u32>>) -> FilterChain {
        FilterChain::new(vec![
            Arc::new(HealthCheckFilter::new(Arc::new(FakeProbe), 1)),
            Arc::new(Dispatch {
                hits: Arc::clone(hits),
            }),
        ])
    }

    #[tokio::test]
    async fn test_echo_probe_bypasses_dispatch() {
        let hits = Arc::new(Mutex::new(0));
        let context =
            FilterContext::from_header(CallHeader::new("UserService", ECHO_METHOD, "1.0.0"));

        chain(&hits).dispatch(&context).await.unwrap();

        assert_eq!(*hits.lock().unwrap(), 0);
        let blob = context.get_attribute(HEALTH_REPORT_ATTRIBUTE).unwrap();
        let report: HashMap<String, String> = serde_json::from_str(&blob).unwrap();
        assert_eq!(report.get("service").map(String::as_str), Some("UserService"));
        assert_eq!(report.get("status").map(String::as_str), Some("GREEN"));
        assert!(report.contains_key("dispatcher"));
        assert!(context.get_attribute(REQUEST_TIMESTAMP_ATTRIBUTE).is_some());
    }

    #[tokio::test]
    async fn test_other_methods_pass_through() {
        let hits = Arc::new(Mutex::new(0));
        let context =
            FilterContext::from_header(CallHeader::new("UserService", "getOrder", "1.0.0"));

        chain(&hits).dispatch(&context).await.unwrap();

        assert_eq!(*hits.lock().unwrap(), 1);
        assert_eq!(context.get_attribute(HEALTH_REPORT_ATTRIBUTE), None);
    }
}
