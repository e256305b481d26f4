//! Relation-aware cache layer.
//!
//! [`CacheLayer`] sits between an ORM-style executor and a tag-addressed
//! cache store. It exposes two hooks:
//!
//! - [`CacheLayer::intercept`] wraps every query; reads of cacheable models
//!   go through the store, everything else passes straight through.
//! - [`CacheLayer::after_mutation`] runs after a committed write and
//!   invalidates the mutated model's tags and those of related models.
//!
//! ```ignore
//! let layer = CacheLayer::builder(schema)
//!     .options(CacheOptions::default().exclude_model("Session"))
//!     .memory_store(Arc::new(MemoryStore::new()))
//!     .build();
//! let posts = layer.intercept(&QueryContext::new("Post", "findMany"), &executor).await?;
//! ```

pub mod codec;
pub mod config;
pub mod interceptor;
pub mod invalidation;
pub mod keys;
mod lock;
pub mod operation;
pub mod policy;
pub mod registry;
pub mod relations;
pub mod store;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

pub use codec::{Codec, DecimalSupport, RustDecimal};
pub use config::{CacheOptions, LifeProfile, TagGenerator};
pub use interceptor::{AuthContext, Executor, QueryContext, QueryInterceptor, ReadPlan};
pub use invalidation::{
    InvalidationChain, InvalidationError, InvalidationReport, InvalidationStrategy,
    MutationInvalidator, RevalidateWindow, TagInvalidator,
};
pub use keys::{CacheKey, entity_tag, id_from_args, list_tag};
pub use operation::Operation;
pub use policy::{CachePolicy, PolicyResolver};
pub use registry::TagRegistry;
pub use relations::RelationExpander;
pub use store::{CacheStore, ComputeFuture, MemoryStore, StoreError, StoreOptions};

use crate::schema::Schema;
use crate::value::Value;

/// Decimal restoration chosen at build time.
enum DecimalChoice {
    Default,
    Disabled,
    Custom(Arc<dyn DecimalSupport>),
}

pub struct CacheLayerBuilder {
    schema: Arc<Schema>,
    options: CacheOptions,
    store: Option<Arc<dyn CacheStore>>,
    chain: Option<InvalidationChain>,
    decimal: DecimalChoice,
}

impl CacheLayerBuilder {
    pub fn options(mut self, options: CacheOptions) -> Self {
        self.options = options;
        self
    }

    /// Store used for reads. Without one, reads execute directly.
    pub fn store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Invalidate through `target` with the immediate / eventual fallback.
    pub fn invalidator(mut self, target: Arc<dyn TagInvalidator>) -> Self {
        self.chain = Some(InvalidationChain::two_tier(target));
        self
    }

    pub fn invalidation_chain(mut self, chain: InvalidationChain) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Use one in-process store for both reads and invalidation.
    pub fn memory_store(self, store: Arc<MemoryStore>) -> Self {
        self.store(store.clone()).invalidator(store)
    }

    pub fn decimal_support(mut self, support: Arc<dyn DecimalSupport>) -> Self {
        self.decimal = DecimalChoice::Custom(support);
        self
    }

    pub fn without_decimal_support(mut self) -> Self {
        self.decimal = DecimalChoice::Disabled;
        self
    }

    pub fn build(self) -> CacheLayer {
        let policy = Arc::new(PolicyResolver::new(Arc::clone(&self.schema), self.options));
        let codec = match self.decimal {
            DecimalChoice::Default => Codec::new(self.schema),
            DecimalChoice::Disabled => Codec::without_decimal_support(self.schema),
            DecimalChoice::Custom(support) => Codec::with_decimal_support(self.schema, support),
        };
        let chain = Arc::new(self.chain.unwrap_or_else(InvalidationChain::empty));

        CacheLayer {
            interceptor: QueryInterceptor::new(Arc::clone(&policy), codec, self.store),
            invalidator: MutationInvalidator::new(Arc::clone(&policy), chain),
            policy,
        }
    }
}

/// The plugin surface a host installs.
pub struct CacheLayer {
    policy: Arc<PolicyResolver>,
    interceptor: QueryInterceptor,
    invalidator: MutationInvalidator,
}

impl CacheLayer {
    pub fn builder(schema: Arc<Schema>) -> CacheLayerBuilder {
        CacheLayerBuilder {
            schema,
            options: CacheOptions::default(),
            store: None,
            chain: None,
            decimal: DecimalChoice::Default,
        }
    }

    pub fn policy(&self) -> &PolicyResolver {
        &self.policy
    }

    pub fn codec(&self) -> &Codec {
        self.interceptor.codec()
    }

    /// Read plan for `ctx`, or `None` when the call would pass through.
    pub fn plan(&self, ctx: &QueryContext<'_>) -> Option<ReadPlan> {
        self.interceptor.plan(ctx)
    }

    /// Read/write interception hook.
    pub async fn intercept<X>(
        &self,
        ctx: &QueryContext<'_>,
        executor: &X,
    ) -> Result<Value, X::Error>
    where
        X: Executor + ?Sized,
    {
        self.interceptor.intercept(ctx, executor).await
    }

    /// Post-mutation hook. Never fails; see [`InvalidationReport`].
    pub async fn after_mutation<F, Fut, E>(&self, model: &str, load_rows: F) -> InvalidationReport
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Vec<Value>, E>> + Send,
        E: fmt::Display + Send,
    {
        self.invalidator.on_mutation(model, load_rows).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::schema::ModelDescriptor;

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::new([
                ModelDescriptor::new("Post").relation("author", "User"),
                ModelDescriptor::new("User").relation_many("posts", "Post"),
            ])
            .expect("valid schema"),
        )
    }

    #[test]
    fn builder_defaults() {
        let layer = CacheLayer::builder(schema()).build();
        assert!(layer.codec().has_decimal_support());
        assert_eq!(layer.policy().life_for("Post"), "hours");
    }

    #[test]
    fn builder_applies_options() {
        let layer = CacheLayer::builder(schema())
            .options(CacheOptions::default().with_default_life_profile(LifeProfile::Weeks))
            .without_decimal_support()
            .build();

        assert!(!layer.codec().has_decimal_support());
        let args = json!({ "include": { "author": true } });
        let plan = layer
            .plan(&QueryContext::new("Post", "findMany").with_args(&args))
            .expect("cacheable");
        assert_eq!(plan.options.ttl_seconds, 604_800);
        assert_eq!(plan.options.tags, ["post:list", "user:list"]);
    }

    #[tokio::test]
    async fn missing_invalidator_reports_failures() {
        let layer = CacheLayer::builder(schema()).build();
        let report = layer
            .after_mutation("Post", || async { Ok::<_, String>(Vec::new()) })
            .await;

        assert!(report.invalidated.is_empty());
        assert_eq!(report.failed, ["post:list", "user:list"]);
    }
}
