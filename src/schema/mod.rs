//! Read-only model metadata.
//!
//! A [`Schema`] is the set of model descriptors the cache layer consults for
//! field kinds, relation edges, and per-model cache attributes. It is loaded
//! once (see [`loader`]) and shared immutably for the process lifetime.

pub mod loader;

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub use loader::SchemaError;

/// Field descriptors of one model, in declaration order.
pub type FieldMap = IndexMap<String, FieldDescriptor>;

static EMPTY_FIELDS: Lazy<FieldMap> = Lazy::new(IndexMap::new);
static DEFAULT_ATTRIBUTES: ModelAttributes = ModelAttributes {
    exclude: false,
    tags: None,
    life: None,
};

/// Scalar column types understood by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    String,
    Int,
    BigInt,
    Float,
    Decimal,
    Boolean,
    DateTime,
    Json,
    Bytes,
    Enum,
}

impl ScalarKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::BigInt => "bigint",
            Self::Float => "float",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::DateTime => "datetime",
            Self::Json => "json",
            Self::Bytes => "bytes",
            Self::Enum => "enum",
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScalarKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "string" => Ok(Self::String),
            "int" => Ok(Self::Int),
            "bigint" => Ok(Self::BigInt),
            "float" => Ok(Self::Float),
            "decimal" => Ok(Self::Decimal),
            "boolean" | "bool" => Ok(Self::Boolean),
            "datetime" => Ok(Self::DateTime),
            "json" => Ok(Self::Json),
            "bytes" => Ok(Self::Bytes),
            "enum" => Ok(Self::Enum),
            _ => Err(value.to_string()),
        }
    }
}

/// Directed reference from a relation field to another model.
///
/// Edges are only traversed; they carry no ownership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationEdge {
    /// Target model name.
    pub model: String,
    /// Relation name shared with the opposite edge, when declared.
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Scalar(ScalarKind),
    Relation(RelationEdge),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    /// Whether the field holds a list (to-many relation or scalar list).
    pub list: bool,
}

impl FieldDescriptor {
    pub fn scalar(name: impl Into<String>, kind: ScalarKind) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Scalar(kind),
            list: false,
        }
    }

    pub fn relation(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Relation(RelationEdge {
                model: model.into(),
                name: None,
            }),
            list: false,
        }
    }

    /// Mark the field as a list.
    pub fn many(mut self) -> Self {
        self.list = true;
        self
    }

    /// Attach the relation name shared with the opposite edge.
    pub fn named(mut self, relation_name: impl Into<String>) -> Self {
        if let FieldKind::Relation(edge) = &mut self.kind {
            edge.name = Some(relation_name.into());
        }
        self
    }

    pub fn is_relation(&self) -> bool {
        matches!(self.kind, FieldKind::Relation(_))
    }

    pub fn related_model(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Relation(edge) => Some(edge.model.as_str()),
            FieldKind::Scalar(_) => None,
        }
    }

    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self.kind {
            FieldKind::Scalar(kind) => Some(kind),
            FieldKind::Relation(_) => None,
        }
    }
}

/// Cache attributes declared on a model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelAttributes {
    /// The model is never cached.
    pub exclude: bool,
    /// Custom tags replacing the default `model:list` tag.
    pub tags: Option<Vec<String>>,
    /// Life profile name overriding the configured default.
    pub life: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub name: String,
    fields: FieldMap,
    pub attributes: ModelAttributes,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: IndexMap::new(),
            attributes: ModelAttributes::default(),
        }
    }

    /// Add a field. A later field with the same name replaces the earlier one.
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }

    pub fn scalar(self, name: impl Into<String>, kind: ScalarKind) -> Self {
        self.field(FieldDescriptor::scalar(name, kind))
    }

    pub fn relation(self, name: impl Into<String>, model: impl Into<String>) -> Self {
        self.field(FieldDescriptor::relation(name, model))
    }

    pub fn relation_many(self, name: impl Into<String>, model: impl Into<String>) -> Self {
        self.field(FieldDescriptor::relation(name, model).many())
    }

    pub fn exclude(mut self) -> Self {
        self.attributes.exclude = true;
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn life(mut self, profile: impl Into<String>) -> Self {
        self.attributes.life = Some(profile.into());
        self
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn relations(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.values().filter(|field| field.is_relation())
    }
}

/// The full, validated set of model descriptors.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    models: IndexMap<String, ModelDescriptor>,
}

impl Schema {
    /// Build a schema, checking that model names are unique and that every
    /// relation targets a declared model.
    pub fn new(models: impl IntoIterator<Item = ModelDescriptor>) -> Result<Self, SchemaError> {
        let mut map = IndexMap::new();
        for model in models {
            if map.contains_key(&model.name) {
                return Err(SchemaError::DuplicateModel { model: model.name });
            }
            map.insert(model.name.clone(), model);
        }

        for model in map.values() {
            for field in model.relations() {
                if let Some(target) = field.related_model()
                    && !map.contains_key(target)
                {
                    return Err(SchemaError::UnknownRelationTarget {
                        model: model.name.clone(),
                        field: field.name.clone(),
                        target: target.to_string(),
                    });
                }
            }
        }

        Ok(Self { models: map })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn model(&self, name: &str) -> Option<&ModelDescriptor> {
        self.models.get(name)
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Fields of `model`; empty for an unknown model.
    pub fn fields_of(&self, model: &str) -> &FieldMap {
        self.models
            .get(model)
            .map_or(&*EMPTY_FIELDS, ModelDescriptor::fields)
    }

    /// Cache attributes of `model`; defaults for an unknown model.
    pub fn attributes_of(&self, model: &str) -> &ModelAttributes {
        self.models
            .get(model)
            .map_or(&DEFAULT_ATTRIBUTES, |descriptor| &descriptor.attributes)
    }

    pub fn field(&self, model: &str, field: &str) -> Option<&FieldDescriptor> {
        self.fields_of(model).get(field)
    }
}
