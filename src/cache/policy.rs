//! Per-model cache policy: exclusion, tags, and revalidation window.
//!
//! Model attributes are folded into a typed [`ModelPolicy`] table once at
//! construction; calls only consult the table and the host options.

use std::collections::HashMap;
use std::sync::Arc;

use super::config::{CacheOptions, LifeProfile};
use super::keys::{entity_tag, list_tag};
use crate::schema::Schema;

/// Policy applied to one read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    pub excluded: bool,
    pub tags: Vec<String>,
    pub revalidate_seconds: u32,
}

#[derive(Debug, Clone)]
struct ModelPolicy {
    excluded: bool,
    tags: Option<Vec<String>>,
    life: Option<String>,
    revalidate_seconds: u32,
}

pub struct PolicyResolver {
    schema: Arc<Schema>,
    options: CacheOptions,
    models: HashMap<String, ModelPolicy>,
}

impl PolicyResolver {
    pub fn new(schema: Arc<Schema>, options: CacheOptions) -> Self {
        let default_seconds = options.default_life_profile.seconds();
        let models = schema
            .models()
            .map(|model| {
                let attributes = &model.attributes;
                let policy = ModelPolicy {
                    excluded: attributes.exclude || options.excluded_models.contains(&model.name),
                    tags: attributes.tags.clone(),
                    life: attributes.life.clone(),
                    revalidate_seconds: attributes
                        .life
                        .as_deref()
                        .map_or(default_seconds, LifeProfile::seconds_for),
                };
                (model.name.clone(), policy)
            })
            .collect();

        Self {
            schema,
            options,
            models,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// True when the model is listed in the options or carries the
    /// exclusion attribute.
    pub fn is_excluded(&self, model: &str) -> bool {
        match self.models.get(model) {
            Some(policy) => policy.excluded,
            None => self.options.excluded_models.contains(model),
        }
    }

    /// Tags for a read of `model`, optionally narrowed to one row.
    pub fn tags_for(&self, model: &str, id: Option<&str>) -> Vec<String> {
        if let Some(generator) = &self.options.custom_tag_generator {
            return generator(model, id);
        }

        let mut tags = match self.models.get(model).and_then(|policy| policy.tags.as_ref()) {
            Some(custom) => custom.clone(),
            None => vec![list_tag(model)],
        };
        if let Some(id) = id {
            tags.push(entity_tag(model, id));
        }
        tags
    }

    /// Life profile name in effect for `model`.
    pub fn life_for(&self, model: &str) -> &str {
        self.models
            .get(model)
            .and_then(|policy| policy.life.as_deref())
            .unwrap_or(self.options.default_life_profile.as_str())
    }

    pub fn revalidate_seconds(&self, model: &str) -> u32 {
        self.models.get(model).map_or_else(
            || self.options.default_life_profile.seconds(),
            |policy| policy.revalidate_seconds,
        )
    }

    pub fn resolve(&self, model: &str, id: Option<&str>) -> CachePolicy {
        CachePolicy {
            excluded: self.is_excluded(model),
            tags: self.tags_for(model, id),
            revalidate_seconds: self.revalidate_seconds(model),
        }
    }
}
