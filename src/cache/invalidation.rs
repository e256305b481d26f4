//! Post-mutation tag invalidation.
//!
//! A completed mutation invalidates, in order: the mutated model's list tag,
//! one entity tag per affected row, then the list tag of every related model.
//! Each tag goes through an [`InvalidationChain`]: strategies are tried in
//! sequence until one succeeds. Failures never reach the mutation's caller.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::keys::{dedup_tags, entity_tag, list_tag};
use super::policy::PolicyResolver;
use super::relations::RelationExpander;
use crate::value::Value;

pub const METRIC_INVALIDATION_TOTAL: &str = "relcache_invalidation_total";
pub const METRIC_INVALIDATION_FAILED_TOTAL: &str = "relcache_invalidation_failed_total";
pub const METRIC_INVALIDATION_MS: &str = "relcache_invalidation_ms";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidationError {
    #[error("invalidation primitive is unavailable in this context")]
    Unavailable,
    #[error("invalidation failed: {0}")]
    Failed(String),
}

/// How long a stale entry may keep being served while it revalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevalidateWindow {
    /// Largest window the store supports.
    Max,
    Seconds(u32),
}

impl fmt::Display for RevalidateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Max => f.write_str("max"),
            Self::Seconds(seconds) => write!(f, "{seconds}s"),
        }
    }
}

/// The two invalidation primitives a store may expose.
#[async_trait]
pub trait TagInvalidator: Send + Sync {
    /// Drop entries for `tag` now, within the current request.
    async fn invalidate_immediate(&self, tag: &str) -> Result<(), InvalidationError>;

    /// Mark entries for `tag` stale; they revalidate within `window`.
    async fn invalidate_eventually(
        &self,
        tag: &str,
        window: RevalidateWindow,
    ) -> Result<(), InvalidationError>;
}

/// One way of invalidating a tag.
#[async_trait]
pub trait InvalidationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn invalidate(&self, tag: &str) -> Result<(), InvalidationError>;
}

pub struct ImmediateInvalidation {
    target: Arc<dyn TagInvalidator>,
}

impl ImmediateInvalidation {
    pub fn new(target: Arc<dyn TagInvalidator>) -> Self {
        Self { target }
    }
}

#[async_trait]
impl InvalidationStrategy for ImmediateInvalidation {
    fn name(&self) -> &'static str {
        "immediate"
    }

    async fn invalidate(&self, tag: &str) -> Result<(), InvalidationError> {
        self.target.invalidate_immediate(tag).await
    }
}

pub struct EventualInvalidation {
    target: Arc<dyn TagInvalidator>,
    window: RevalidateWindow,
}

impl EventualInvalidation {
    pub fn new(target: Arc<dyn TagInvalidator>, window: RevalidateWindow) -> Self {
        Self { target, window }
    }
}

#[async_trait]
impl InvalidationStrategy for EventualInvalidation {
    fn name(&self) -> &'static str {
        "eventual"
    }

    async fn invalidate(&self, tag: &str) -> Result<(), InvalidationError> {
        self.target.invalidate_eventually(tag, self.window).await
    }
}

/// Ordered invalidation strategies, tried until one succeeds.
#[derive(Default)]
pub struct InvalidationChain {
    strategies: Vec<Box<dyn InvalidationStrategy>>,
}

impl InvalidationChain {
    pub fn new(strategies: Vec<Box<dyn InvalidationStrategy>>) -> Self {
        Self { strategies }
    }

    /// Immediate invalidation, falling back to stale-while-revalidate with
    /// the maximal window.
    pub fn two_tier(target: Arc<dyn TagInvalidator>) -> Self {
        Self::new(vec![
            Box::new(ImmediateInvalidation::new(Arc::clone(&target))),
            Box::new(EventualInvalidation::new(target, RevalidateWindow::Max)),
        ])
    }

    /// A chain with no strategies; every tag is reported as failed.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Invalidate `tag`. Returns false when every strategy failed.
    pub async fn invalidate(&self, tag: &str) -> bool {
        for strategy in &self.strategies {
            match strategy.invalidate(tag).await {
                Ok(()) => {
                    counter!(METRIC_INVALIDATION_TOTAL, "strategy" => strategy.name())
                        .increment(1);
                    return true;
                }
                Err(err) => {
                    debug!(
                        tag,
                        strategy = strategy.name(),
                        error = %err,
                        "Invalidation strategy failed"
                    );
                }
            }
        }

        warn!(
            tag,
            strategies = self.strategies.len(),
            "All invalidation strategies failed; cached data may be stale"
        );
        counter!(METRIC_INVALIDATION_FAILED_TOTAL).increment(1);
        false
    }
}

/// Outcome of one post-mutation invalidation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    /// Tags invalidated, in issue order.
    pub invalidated: Vec<String>,
    /// Tags every strategy failed for.
    pub failed: Vec<String>,
}

impl InvalidationReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of tags attempted.
    pub fn attempted(&self) -> usize {
        self.invalidated.len() + self.failed.len()
    }
}

/// Ordered tags a mutation of `model` invalidates, given its affected rows.
///
/// An excluded model contributes no tags of its own; related non-excluded
/// models are still widened.
pub fn plan_mutation_tags(policy: &PolicyResolver, model: &str, rows: &[Value]) -> Vec<String> {
    let mut tags = Vec::new();
    if !policy.is_excluded(model) {
        tags.push(list_tag(model));
        tags.extend(rows.iter().filter_map(Value::row_id).map(|id| entity_tag(model, &id)));
    }
    tags.extend(RelationExpander::new(policy).write_tags(model));
    dedup_tags(tags)
}

/// Runs the post-mutation invalidation pass.
pub struct MutationInvalidator {
    policy: Arc<PolicyResolver>,
    chain: Arc<InvalidationChain>,
}

impl MutationInvalidator {
    pub fn new(policy: Arc<PolicyResolver>, chain: Arc<InvalidationChain>) -> Self {
        Self { policy, chain }
    }

    pub fn chain(&self) -> &InvalidationChain {
        &self.chain
    }

    /// Invalidate everything a committed mutation of `model` may have
    /// affected. `load_rows` is only awaited for non-excluded models; if it
    /// fails, the entity step is skipped.
    pub async fn on_mutation<F, Fut, E>(&self, model: &str, load_rows: F) -> InvalidationReport
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Vec<Value>, E>> + Send,
        E: fmt::Display + Send,
    {
        let started_at = Instant::now();
        let mut report = InvalidationReport::default();
        let mut issued = HashSet::new();

        if self.policy.is_excluded(model) {
            debug!(model, "Mutated model is excluded; widening to related models only");
        } else {
            self.issue(list_tag(model), &mut issued, &mut report).await;

            match load_rows().await {
                Ok(rows) => {
                    for id in rows.iter().filter_map(Value::row_id) {
                        self.issue(entity_tag(model, &id), &mut issued, &mut report)
                            .await;
                    }
                }
                Err(err) => {
                    warn!(model, error = %err, "Row loader failed; skipping entity invalidation");
                }
            }
        }

        for tag in RelationExpander::new(&self.policy).write_tags(model) {
            self.issue(tag, &mut issued, &mut report).await;
        }

        histogram!(METRIC_INVALIDATION_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        info!(
            model,
            invalidated = report.invalidated.len(),
            failed = report.failed.len(),
            "Mutation invalidation complete"
        );
        report
    }

    async fn issue(
        &self,
        tag: String,
        issued: &mut HashSet<String>,
        report: &mut InvalidationReport,
    ) {
        if !issued.insert(tag.clone()) {
            return;
        }
        if self.chain.invalidate(&tag).await {
            report.invalidated.push(tag);
        } else {
            report.failed.push(tag);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::cache::config::CacheOptions;
    use crate::schema::{ModelDescriptor, Schema};

    /// Records calls; primitives fail according to its flags.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        immediate_unavailable: bool,
        eventual_failing: bool,
    }

    impl Recorder {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait]
    impl TagInvalidator for Recorder {
        async fn invalidate_immediate(&self, tag: &str) -> Result<(), InvalidationError> {
            self.calls.lock().expect("calls lock").push(format!("now:{tag}"));
            if self.immediate_unavailable {
                return Err(InvalidationError::Unavailable);
            }
            Ok(())
        }

        async fn invalidate_eventually(
            &self,
            tag: &str,
            window: RevalidateWindow,
        ) -> Result<(), InvalidationError> {
            self.calls
                .lock()
                .expect("calls lock")
                .push(format!("swr:{window}:{tag}"));
            if self.eventual_failing {
                return Err(InvalidationError::Failed("backend down".to_string()));
            }
            Ok(())
        }
    }

    fn policy(options: CacheOptions) -> Arc<PolicyResolver> {
        let schema = Schema::new([
            ModelDescriptor::new("User")
                .relation_many("posts", "Post")
                .relation_many("comments", "Comment"),
            ModelDescriptor::new("Post").relation("author", "User"),
            ModelDescriptor::new("Comment").relation("author", "User"),
        ])
        .expect("valid schema");
        Arc::new(PolicyResolver::new(Arc::new(schema), options))
    }

    fn rows(ids: &[&str]) -> Vec<Value> {
        ids.iter()
            .map(|id| Value::map([("id", Value::from(*id))]))
            .collect()
    }

    #[tokio::test]
    async fn chain_falls_back_to_eventual() {
        let recorder = Arc::new(Recorder {
            immediate_unavailable: true,
            ..Recorder::default()
        });
        let chain = InvalidationChain::two_tier(recorder.clone());

        assert!(chain.invalidate("post:list").await);
        assert_eq!(recorder.calls(), ["now:post:list", "swr:max:post:list"]);
    }

    #[tokio::test]
    async fn chain_reports_total_failure() {
        let recorder = Arc::new(Recorder {
            immediate_unavailable: true,
            eventual_failing: true,
            ..Recorder::default()
        });
        let chain = InvalidationChain::two_tier(recorder);

        assert!(!chain.invalidate("post:list").await);
        assert!(!InvalidationChain::empty().invalidate("post:list").await);
    }

    #[tokio::test]
    async fn mutation_invalidates_in_order() {
        let recorder = Arc::new(Recorder::default());
        let invalidator = MutationInvalidator::new(
            policy(CacheOptions::default()),
            Arc::new(InvalidationChain::two_tier(recorder.clone())),
        );

        let report = invalidator
            .on_mutation("User", || async { Ok::<_, String>(rows(&["1", "2", "1"])) })
            .await;

        assert_eq!(
            report.invalidated,
            ["user:list", "user:1", "user:2", "post:list", "comment:list"]
        );
        assert!(report.is_clean());
        assert_eq!(recorder.calls().len(), 5);
    }

    #[tokio::test]
    async fn loader_failure_skips_entities_only() {
        let recorder = Arc::new(Recorder::default());
        let invalidator = MutationInvalidator::new(
            policy(CacheOptions::default()),
            Arc::new(InvalidationChain::two_tier(recorder)),
        );

        let report = invalidator
            .on_mutation("User", || async { Err::<Vec<Value>, _>("connection reset") })
            .await;

        assert_eq!(report.invalidated, ["user:list", "post:list", "comment:list"]);
    }

    #[tokio::test]
    async fn excluded_model_never_loads_rows() {
        let recorder = Arc::new(Recorder::default());
        let invalidator = MutationInvalidator::new(
            policy(CacheOptions::default().exclude_model("User").exclude_model("Comment")),
            Arc::new(InvalidationChain::two_tier(recorder)),
        );

        let loaded = AtomicBool::new(false);
        let flag = &loaded;
        let report = invalidator
            .on_mutation("User", || async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<_, String>(rows(&["1"]))
            })
            .await;

        assert!(!loaded.load(Ordering::SeqCst));
        assert_eq!(report.invalidated, ["post:list"]);
    }

    #[tokio::test]
    async fn failures_are_reported_not_raised() {
        let recorder = Arc::new(Recorder {
            immediate_unavailable: true,
            eventual_failing: true,
            ..Recorder::default()
        });
        let invalidator = MutationInvalidator::new(
            policy(CacheOptions::default()),
            Arc::new(InvalidationChain::two_tier(recorder)),
        );

        let report = invalidator
            .on_mutation("Post", || async { Ok::<_, String>(rows(&["9"])) })
            .await;

        assert!(report.invalidated.is_empty());
        assert_eq!(report.failed, ["post:list", "post:9", "user:list"]);
        assert_eq!(report.attempted(), 3);
    }

    #[test]
    fn planned_tags_match_mutation_order() {
        let policy = policy(CacheOptions::default());
        assert_eq!(
            plan_mutation_tags(&policy, "User", &rows(&["7"])),
            ["user:list", "user:7", "post:list", "comment:list"]
        );
        assert_eq!(plan_mutation_tags(&policy, "Ghost", &[]), ["ghost:list"]);
    }
}
