//! Read-path interception.
//!
//! Excluded models and non-read operations go straight to the executor.
//! Reads of cacheable models are planned (key, tags, ttl), served through
//! the store's compute-if-absent, and thawed so hits and misses return the
//! same shape. Executor errors always reach the caller unchanged.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::FutureExt;
use metrics::counter;
use serde_json::Value as JsonValue;
use tracing::{debug, instrument, warn};

use super::codec::Codec;
use super::keys::{CacheKey, dedup_tags, id_from_args};
use super::lock::mutex_lock;
use super::operation::Operation;
use super::policy::PolicyResolver;
use super::relations::RelationExpander;
use super::store::{CacheStore, StoreError, StoreOptions};
use crate::value::Value;

pub const METRIC_READ_HIT_TOTAL: &str = "relcache_read_hit_total";
pub const METRIC_READ_MISS_TOTAL: &str = "relcache_read_miss_total";
pub const METRIC_READ_BYPASS_TOTAL: &str = "relcache_read_bypass_total";
pub const METRIC_STORE_FALLBACK_TOTAL: &str = "relcache_store_fallback_total";

const SOURCE: &str = "cache::interceptor";

/// The underlying data operation.
#[async_trait]
pub trait Executor: Send + Sync {
    type Error: Send;

    async fn proceed(&self, args: Option<&JsonValue>) -> Result<Value, Self::Error>;
}

/// Identity of the calling session, when one exists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    pub id: Option<String>,
}

impl AuthContext {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

/// One intercepted call.
#[derive(Debug, Clone)]
pub struct QueryContext<'a> {
    pub model: &'a str,
    pub operation: Operation,
    pub args: Option<&'a JsonValue>,
    pub auth: Option<&'a AuthContext>,
}

impl<'a> QueryContext<'a> {
    pub fn new(model: &'a str, operation: impl Into<Operation>) -> Self {
        Self {
            model,
            operation: operation.into(),
            args: None,
            auth: None,
        }
    }

    pub fn with_args(mut self, args: &'a JsonValue) -> Self {
        self.args = Some(args);
        self
    }

    pub fn with_auth(mut self, auth: &'a AuthContext) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn caller_id(&self) -> Option<&str> {
        self.auth.and_then(|auth| auth.id.as_deref())
    }
}

/// Key and store options for one cacheable read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPlan {
    pub key: CacheKey,
    pub options: StoreOptions,
}

/// What the compute closure observed while the store ran it.
struct ComputeSlot<E> {
    value: Option<JsonValue>,
    error: Option<E>,
}

impl<E> Default for ComputeSlot<E> {
    fn default() -> Self {
        Self {
            value: None,
            error: None,
        }
    }
}

pub struct QueryInterceptor {
    policy: Arc<PolicyResolver>,
    codec: Codec,
    store: Option<Arc<dyn CacheStore>>,
}

impl QueryInterceptor {
    pub fn new(
        policy: Arc<PolicyResolver>,
        codec: Codec,
        store: Option<Arc<dyn CacheStore>>,
    ) -> Self {
        Self {
            policy,
            codec,
            store,
        }
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Key, tags and ttl for a cacheable read; `None` when the call passes
    /// through.
    pub fn plan(&self, ctx: &QueryContext<'_>) -> Option<ReadPlan> {
        if self.policy.is_excluded(ctx.model) || !ctx.operation.is_read() {
            return None;
        }

        let id = id_from_args(ctx.args);
        let own = self.policy.tags_for(ctx.model, id.as_deref());
        let related = RelationExpander::new(&self.policy).read_tags(ctx.model, ctx.args);

        Some(ReadPlan {
            key: CacheKey::generate(ctx.model, ctx.operation.as_str(), ctx.args, ctx.caller_id()),
            options: StoreOptions {
                ttl_seconds: self.policy.revalidate_seconds(ctx.model),
                tags: dedup_tags(own.into_iter().chain(related)),
            },
        })
    }

    #[instrument(skip_all, fields(model = ctx.model, operation = %ctx.operation))]
    pub async fn intercept<X>(
        &self,
        ctx: &QueryContext<'_>,
        executor: &X,
    ) -> Result<Value, X::Error>
    where
        X: Executor + ?Sized,
    {
        let Some(plan) = self.plan(ctx) else {
            let reason = if ctx.operation.is_read() { "excluded" } else { "not_read" };
            counter!(METRIC_READ_BYPASS_TOTAL, "reason" => reason).increment(1);
            return executor.proceed(ctx.args).await;
        };

        if self.policy.options().debug_logging {
            debug!(
                key = %plan.key,
                tags = ?plan.options.tags,
                ttl_seconds = plan.options.ttl_seconds,
                "Cache read planned"
            );
        }

        let Some(store) = &self.store else {
            debug!("No cache store configured; executing directly");
            counter!(METRIC_STORE_FALLBACK_TOTAL, "reason" => "no_store").increment(1);
            return self.uncached(ctx, executor).await;
        };

        let slot = Mutex::new(ComputeSlot::<X::Error>::default());
        let compute = async {
            match executor.proceed(ctx.args).await {
                Ok(value) => {
                    let frozen = self.codec.freeze(&value);
                    mutex_lock(&slot, SOURCE, "record_value").value = Some(frozen.clone());
                    Ok(frozen)
                }
                Err(err) => {
                    mutex_lock(&slot, SOURCE, "record_error").error = Some(err);
                    Err(StoreError::ComputeAborted)
                }
            }
        }
        .boxed();

        let outcome = store.get_or_compute(&plan.key, &plan.options, compute).await;
        let (computed, executor_err) = {
            let mut slot = mutex_lock(&slot, SOURCE, "read_slot");
            (slot.value.take(), slot.error.take())
        };

        if let Some(err) = executor_err {
            return Err(err);
        }

        match outcome {
            Ok(frozen) => {
                let hit = computed.is_none();
                let metric = if hit {
                    METRIC_READ_HIT_TOTAL
                } else {
                    METRIC_READ_MISS_TOTAL
                };
                counter!(metric).increment(1);
                if self.policy.options().debug_logging {
                    debug!(key = %plan.key, hit, "Cache read served");
                }
                Ok(self.codec.thaw(frozen, ctx.model))
            }
            Err(err) => {
                counter!(METRIC_STORE_FALLBACK_TOTAL, "reason" => "store_error").increment(1);
                if let Some(frozen) = computed {
                    warn!(
                        key = %plan.key,
                        error = %err,
                        "Cache store failed after compute; returning computed value"
                    );
                    return Ok(self.codec.thaw(frozen, ctx.model));
                }
                warn!(key = %plan.key, error = %err, "Cache store unavailable; executing directly");
                self.uncached(ctx, executor).await
            }
        }
    }

    /// Direct execution, still round-tripped through the codec so the shape
    /// matches the cached path.
    async fn uncached<X>(&self, ctx: &QueryContext<'_>, executor: &X) -> Result<Value, X::Error>
    where
        X: Executor + ?Sized,
    {
        let value = executor.proceed(ctx.args).await?;
        Ok(self.codec.thaw(self.codec.freeze(&value), ctx.model))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::cache::config::CacheOptions;
    use crate::schema::{ModelDescriptor, ScalarKind, Schema};

    struct Rows {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Executor for Rows {
        type Error = String;

        async fn proceed(&self, _args: Option<&JsonValue>) -> Result<Value, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Value::List(vec![Value::map([("id", "1")])]))
        }
    }

    fn interceptor(options: CacheOptions) -> QueryInterceptor {
        let schema = Arc::new(
            Schema::new([
                ModelDescriptor::new("Post")
                    .scalar("id", ScalarKind::String)
                    .relation("author", "User"),
                ModelDescriptor::new("User").scalar("id", ScalarKind::String),
                ModelDescriptor::new("Session").exclude(),
            ])
            .expect("valid schema"),
        );
        let policy = Arc::new(PolicyResolver::new(Arc::clone(&schema), options));
        QueryInterceptor::new(policy, Codec::new(schema), None)
    }

    #[test]
    fn plan_collects_key_tags_and_ttl() {
        let interceptor = interceptor(CacheOptions::default());
        let args = json!({ "where": { "id": "p1" }, "include": { "author": true } });
        let auth = AuthContext::user("u9");
        let ctx = QueryContext::new("Post", "findUnique")
            .with_args(&args)
            .with_auth(&auth);

        let plan = interceptor.plan(&ctx).expect("cacheable read");
        assert_eq!(plan.key.base(), "user:u9:post:findUnique");
        assert_eq!(plan.options.tags, ["post:list", "post:p1", "user:list"]);
        assert_eq!(plan.options.ttl_seconds, 3_600);
    }

    #[test]
    fn plan_without_relations_is_own_list_only() {
        let interceptor = interceptor(CacheOptions::default());
        let args = json!({});
        let ctx = QueryContext::new("Post", "findMany").with_args(&args);

        let plan = interceptor.plan(&ctx).expect("cacheable read");
        assert_eq!(plan.options.tags, ["post:list"]);
    }

    #[test]
    fn writes_excluded_and_unknown_operations_are_not_planned() {
        let interceptor = interceptor(CacheOptions::default().exclude_model("User"));

        assert!(interceptor.plan(&QueryContext::new("Post", "update")).is_none());
        assert!(interceptor.plan(&QueryContext::new("Post", "executeRaw")).is_none());
        assert!(interceptor.plan(&QueryContext::new("Session", "findMany")).is_none());
        assert!(interceptor.plan(&QueryContext::new("User", "findMany")).is_none());
    }

    #[test]
    fn anonymous_auth_has_no_caller() {
        let auth = AuthContext::anonymous();
        let ctx = QueryContext::new("Post", "findMany").with_auth(&auth);
        assert_eq!(ctx.caller_id(), None);
    }

    #[tokio::test]
    async fn missing_store_executes_directly() {
        let interceptor = interceptor(CacheOptions::default());
        let rows = Rows {
            calls: AtomicUsize::new(0),
        };

        let value = interceptor
            .intercept(&QueryContext::new("Post", "findMany"), &rows)
            .await
            .expect("direct read");

        assert_eq!(value, Value::List(vec![Value::map([("id", "1")])]));
        assert_eq!(rows.calls.load(Ordering::SeqCst), 1);
        assert!(!interceptor.has_store());
    }
}
