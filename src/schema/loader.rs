//! Schema loading from TOML documents.
//!
//! ```toml
//! [[models]]
//! name = "Post"
//!
//! [models.attributes]
//! life = "days"
//!
//! [[models.fields]]
//! name = "createdAt"
//! type = "datetime"
//!
//! [[models.fields]]
//! name = "author"
//! type = "relation"
//! model = "User"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use super::{FieldDescriptor, ModelDescriptor, ScalarKind, Schema};

const RELATION_TYPE: &str = "relation";

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read schema file `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse schema document: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("model `{model}` is declared more than once")]
    DuplicateModel { model: String },
    #[error("model `{model}` declares field `{field}` more than once")]
    DuplicateField { model: String, field: String },
    #[error("field `{model}.{field}` has unknown type `{kind}`")]
    UnknownFieldType {
        model: String,
        field: String,
        kind: String,
    },
    #[error("relation field `{model}.{field}` does not name its target model")]
    MissingRelationTarget { model: String, field: String },
    #[error("relation field `{model}.{field}` references unknown model `{target}`")]
    UnknownRelationTarget {
        model: String,
        field: String,
        target: String,
    },
}

#[derive(Debug, Deserialize)]
struct RawSchema {
    #[serde(default)]
    models: Vec<RawModel>,
}

#[derive(Debug, Deserialize)]
struct RawModel {
    name: String,
    #[serde(default)]
    fields: Vec<RawField>,
    #[serde(default)]
    attributes: RawAttributes,
}

#[derive(Debug, Deserialize)]
struct RawField {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    model: Option<String>,
    relation: Option<String>,
    #[serde(default)]
    list: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawAttributes {
    exclude: bool,
    tags: Option<Vec<String>>,
    life: Option<String>,
}

impl Schema {
    /// Parse and validate a schema document.
    pub fn from_toml_str(source: &str) -> Result<Self, SchemaError> {
        let raw: RawSchema = toml::from_str(source)?;
        let models = raw
            .models
            .into_iter()
            .map(build_model)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(models)
    }

    /// Read a schema document from disk.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SchemaError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let schema = Self::from_toml_str(&source)?;
        debug!(path = %path.display(), models = schema.len(), "Schema loaded");
        Ok(schema)
    }
}

fn build_model(raw: RawModel) -> Result<ModelDescriptor, SchemaError> {
    let mut seen = HashSet::new();
    let mut model = ModelDescriptor::new(raw.name);

    for field in raw.fields {
        if !seen.insert(field.name.clone()) {
            return Err(SchemaError::DuplicateField {
                model: model.name,
                field: field.name,
            });
        }
        let descriptor = build_field(&model.name, field)?;
        model = model.field(descriptor);
    }

    model.attributes.exclude = raw.attributes.exclude;
    model.attributes.tags = raw.attributes.tags;
    model.attributes.life = raw.attributes.life;
    Ok(model)
}

fn build_field(model: &str, raw: RawField) -> Result<FieldDescriptor, SchemaError> {
    let descriptor = if raw.kind.eq_ignore_ascii_case(RELATION_TYPE) {
        let Some(target) = raw.model else {
            return Err(SchemaError::MissingRelationTarget {
                model: model.to_string(),
                field: raw.name,
            });
        };
        let field = FieldDescriptor::relation(raw.name, target);
        match raw.relation {
            Some(name) => field.named(name),
            None => field,
        }
    } else {
        let kind = raw
            .kind
            .parse::<ScalarKind>()
            .map_err(|kind| SchemaError::UnknownFieldType {
                model: model.to_string(),
                field: raw.name.clone(),
                kind,
            })?;
        FieldDescriptor::scalar(raw.name, kind)
    };

    Ok(if raw.list { descriptor.many() } else { descriptor })
}
