//! Ordered, bidirectional interceptor chain for call processing
//!
//! Every call traverses the chain forward (entry hooks, stage 0 to N) and
//! then backward (exit hooks, reverse order). A stage can short-circuit a
//! call by skipping a fixed number of trailing stages, which jumps the
//! call straight onto the response path without visiting business
//! dispatch.

use crate::error::{CallError, Result};
use crate::header::CallHeader;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Context passed through the filter chain for one call.
#[derive(Clone)]
pub struct FilterContext {
    /// Decoded call header; possibly partial while the call is in flight.
    pub header: CallHeader,
    /// Call-scoped attributes stashed by stages.
    attributes: Arc<Mutex<HashMap<String, String>>>,
}

impl FilterContext {
    pub fn from_header(header: CallHeader) -> Self {
        Self {
            header,
            attributes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn get_attribute(&self, key: &str) -> Option<String> {
        self.attributes
            .lock()
            .ok()
            .and_then(|attrs| attrs.get(key).cloned())
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut attrs) = self.attributes.lock() {
            attrs.insert(key.into(), value.into());
        }
    }
}

/// What a stage wants done after its entry hook ran.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterAction {
    /// Continue to the next stage.
    Forward,
    /// Stop forward traversal and exit through the chain with the given
    /// number of trailing stages dropped.
    SkipTail(usize),
}

/// A pipeline stage with an entry and an exit hook.
#[async_trait::async_trait]
pub trait Filter: Send + Sync {
    /// Stage name for logging.
    fn name(&self) -> &'static str {
        "UnnamedFilter"
    }

    /// Called while the call travels request-bound.
    async fn on_entry(&self, _context: &FilterContext) -> Result<FilterAction> {
        Ok(FilterAction::Forward)
    }

    /// Called while the call travels response-bound.
    async fn on_exit(&self, _context: &FilterContext) -> Result<()> {
        Ok(())
    }
}

/// An immutable index-range view over a shared stage list.
///
/// All views of one chain share the same underlying stage array;
/// "shrinking" a chain builds a fresh view and never mutates the
/// original, so concurrent calls over the same stages cannot interfere.
#[derive(Clone)]
pub struct FilterChain {
    stages: Arc<[Arc<dyn Filter>]>,
    start: usize,
    end: usize,
}

impl FilterChain {
    pub fn new(stages: Vec<Arc<dyn Filter>>) -> Self {
        let end = stages.len();
        Self {
            stages: stages.into(),
            start: 0,
            end,
        }
    }

    /// Number of active stages in this view.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A fresh view with the last `k` stages dropped.
    pub fn truncate_tail(&self, k: usize) -> FilterChain {
        FilterChain {
            stages: Arc::clone(&self.stages),
            start: self.start,
            end: self.end - k.min(self.len()),
        }
    }

    /// Drive one call through the chain: entry hooks forward, then exit
    /// hooks in reverse.
    ///
    /// A stage returning [`FilterAction::SkipTail`] ends forward traversal
    /// and exits through the truncated view, so skipped stages see neither
    /// hook. A stage error aborts forward traversal, runs the exit hooks
    /// from that stage backwards and then surfaces to the caller.
    pub async fn dispatch(&self, context: &FilterContext) -> Result<()> {
        for index in self.start..self.end {
            let stage = &self.stages[index];
            debug!("Entering filter {}", stage.name());
            match stage.on_entry(context).await {
                Ok(FilterAction::Forward) => {}
                Ok(FilterAction::SkipTail(k)) => {
                    debug!(
                        "Filter {} short-circuited, skipping {} trailing stages",
                        stage.name(),
                        k
                    );
                    return self.truncate_tail(k).on_exit(context).await;
                }
                Err(error) => {
                    self.exit_from(context, index + 1).await?;
                    return Err(error);
                }
            }
        }
        self.on_exit(context).await
    }

    /// Run the exit hooks of every stage in this view, in reverse order.
    pub async fn on_exit(&self, context: &FilterContext) -> Result<()> {
        self.exit_from(context, self.end).await
    }

    /// Exit hooks for stages `start..upper`, newest first.
    async fn exit_from(&self, context: &FilterContext, upper: usize) -> Result<()> {
        for index in (self.start..upper).rev() {
            let stage = &self.stages[index];
            debug!("Exiting filter {}", stage.name());
            stage.on_exit(context).await?;
        }
        Ok(())
    }
}

/// Convenience for aborting a call from inside a stage.
pub fn abort(filter: &'static str, message: impl Into<String>) -> CallError {
    CallError::FilterAborted {
        filter,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy)]
    enum Behavior {
        Forward,
        SkipTail(usize),
        Fail,
    }

    struct RecordingFilter {
        label: &'static str,
        behavior: Behavior,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingFilter {
        fn stage(
            label: &'static str,
            behavior: Behavior,
            log: &Arc<Mutex<Vec<String>>>,
        ) -> Arc<dyn Filter> {
            Arc::new(Self {
                label,
                behavior,
                log: Arc::clone(log),
            })
        }
    }

    #[async_trait::async_trait]
    impl Filter for RecordingFilter {
        fn name(&self) -> &'static str {
            self.label
        }

        async fn on_entry(&self, _context: &FilterContext) -> Result<FilterAction> {
            self.log.lock().unwrap().push(format!("entry:{}", self.label));
            match self.behavior {
                Behavior::Forward => Ok(FilterAction::Forward),
                Behavior::SkipTail(k) => Ok(FilterAction::SkipTail(k)),
                Behavior::Fail => Err(abort(self.label, "boom")),
            }
        }

        async fn on_exit(&self, _context: &FilterContext) -> Result<()> {
            self.log.lock().unwrap().push(format!("exit:{}", self.label));
            Ok(())
        }
    }

    fn context() -> FilterContext {
        FilterContext::from_header(CallHeader::new("UserService", "getOrder", "1.0.0"))
    }

    #[tokio::test]
    async fn test_full_traversal_runs_exits_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = FilterChain::new(vec![
            RecordingFilter::stage("a", Behavior::Forward, &log),
            RecordingFilter::stage("b", Behavior::Forward, &log),
            RecordingFilter::stage("c", Behavior::Forward, &log),
        ]);

        chain.dispatch(&context()).await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["entry:a", "entry:b", "entry:c", "exit:c", "exit:b", "exit:a"]
        );
    }

    #[tokio::test]
    async fn test_skip_tail_runs_len_minus_k_exits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = FilterChain::new(vec![
            RecordingFilter::stage("a", Behavior::Forward, &log),
            RecordingFilter::stage("b", Behavior::SkipTail(2), &log),
            RecordingFilter::stage("c", Behavior::Forward, &log),
            RecordingFilter::stage("d", Behavior::Forward, &log),
        ]);

        chain.dispatch(&context()).await.unwrap();
        // stages c and d see neither hook; exactly len-k exit hooks run
        assert_eq!(
            *log.lock().unwrap(),
            vec!["entry:a", "entry:b", "exit:b", "exit:a"]
        );
    }

    #[tokio::test]
    async fn test_entry_error_unwinds_from_current_stage() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = FilterChain::new(vec![
            RecordingFilter::stage("a", Behavior::Forward, &log),
            RecordingFilter::stage("b", Behavior::Fail, &log),
            RecordingFilter::stage("c", Behavior::Forward, &log),
        ]);

        let result = chain.dispatch(&context()).await;
        assert!(matches!(result, Err(CallError::FilterAborted { .. })));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["entry:a", "entry:b", "exit:b", "exit:a"]
        );
    }

    #[tokio::test]
    async fn test_truncation_is_a_view_not_a_mutation() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = FilterChain::new(vec![
            RecordingFilter::stage("a", Behavior::Forward, &log),
            RecordingFilter::stage("b", Behavior::Forward, &log),
            RecordingFilter::stage("c", Behavior::Forward, &log),
        ]);

        let truncated = chain.truncate_tail(2);
        assert_eq!(truncated.len(), 1);
        assert_eq!(chain.len(), 3);

        // over-truncation saturates instead of panicking
        assert_eq!(chain.truncate_tail(10).len(), 0);

        truncated.on_exit(&context()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["exit:a"]);
    }

    #[test]
    fn test_context_attributes() {
        let ctx = context();
        ctx.set_attribute("k", "v");
        assert_eq!(ctx.get_attribute("k"), Some("v".to_string()));
        assert_eq!(ctx.get_attribute("missing"), None);
    }
}
