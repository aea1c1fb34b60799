//! Schema registry and per-type field metadata
//!
//! A [`SchemaRegistry`] is the external authority on which record types exist
//! and how their fields are laid out. The [`SchemaCache`] sits in front of it
//! and materializes one immutable [`TypeDescriptor`] per type, populated on
//! first access and never touched again for the rest of the run.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Schema not found for type '{0}'")]
    NotFound(String),

    #[error("Failed to read schema file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse schema definition: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Type '{type_name}' field '{field}' references unknown type '{target}'")]
    UnknownTarget {
        type_name: String,
        field: String,
        target: String,
    },
}

/// How a single field of a record is normalized.
///
/// The variant is fixed by the schema, matched exhaustively by the
/// normalizer, and never inferred from the shape of a raw value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// Raw value passed through unchanged
    Scalar,
    /// Ordered sequence of raw values passed through unchanged
    ScalarArray,
    /// Sub-record of the target type, stored by identifier
    Reference { target: String },
    /// Ordered sequence of sub-records of the target type
    ReferenceArray { target: String },
}

/// Immutable per-type field metadata, built once per run
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub name: String,
    /// Field name to kind, in deterministic (sorted) order
    pub fields: Vec<(String, FieldKind)>,
}

/// External authority on record types and root types
pub trait SchemaRegistry {
    /// Field layout for a type, or `None` if the registry has no such type
    fn field_layout(&self, type_name: &str) -> Option<Vec<(String, FieldKind)>>;

    /// Type names that may appear at the root of a run
    fn root_types(&self) -> Vec<String>;
}

/// Caches one [`TypeDescriptor`] per type name so the registry is consulted
/// at most once per type, not once per record.
pub struct SchemaCache<R> {
    registry: R,
    cache: HashMap<String, Arc<TypeDescriptor>>,
}

impl<R: SchemaRegistry> SchemaCache<R> {
    pub fn new(registry: R) -> Self {
        Self {
            registry,
            cache: HashMap::new(),
        }
    }

    /// Descriptor for `type_name`, populating the cache on first access.
    ///
    /// An unknown type is fatal to the run.
    pub fn get(&mut self, type_name: &str) -> Result<Arc<TypeDescriptor>, SchemaError> {
        if let Some(descriptor) = self.cache.get(type_name) {
            return Ok(Arc::clone(descriptor));
        }
        let fields = self
            .registry
            .field_layout(type_name)
            .ok_or_else(|| SchemaError::NotFound(type_name.to_string()))?;
        let descriptor = Arc::new(TypeDescriptor {
            name: type_name.to_string(),
            fields,
        });
        self.cache
            .insert(type_name.to_string(), Arc::clone(&descriptor));
        Ok(descriptor)
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }
}

/// One field entry in a declarative schema file
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum FieldSpec {
    Scalar,
    ScalarArray,
    Reference { target: String },
    ReferenceArray { target: String },
}

impl FieldSpec {
    fn to_kind(&self) -> FieldKind {
        match self {
            FieldSpec::Scalar => FieldKind::Scalar,
            FieldSpec::ScalarArray => FieldKind::ScalarArray,
            FieldSpec::Reference { target } => FieldKind::Reference {
                target: target.clone(),
            },
            FieldSpec::ReferenceArray { target } => FieldKind::ReferenceArray {
                target: target.clone(),
            },
        }
    }

    fn target(&self) -> Option<&str> {
        match self {
            FieldSpec::Scalar | FieldSpec::ScalarArray => None,
            FieldSpec::Reference { target } | FieldSpec::ReferenceArray { target } => Some(target),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    root_types: Vec<String>,
    types: BTreeMap<String, BTreeMap<String, FieldSpec>>,
}

/// [`SchemaRegistry`] backed by a declarative JSON schema file
#[derive(Debug, Clone)]
pub struct StaticRegistry {
    file: SchemaFile,
}

impl StaticRegistry {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| SchemaError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, SchemaError> {
        let file: SchemaFile = serde_json::from_str(contents)?;
        Self::validated(file)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, SchemaError> {
        let file: SchemaFile = serde_json::from_value(value)?;
        Self::validated(file)
    }

    /// Every reference target must itself be a declared type.
    fn validated(file: SchemaFile) -> Result<Self, SchemaError> {
        for (type_name, fields) in &file.types {
            for (field, spec) in fields {
                if let Some(target) = spec.target() {
                    if !file.types.contains_key(target) {
                        return Err(SchemaError::UnknownTarget {
                            type_name: type_name.clone(),
                            field: field.clone(),
                            target: target.to_string(),
                        });
                    }
                }
            }
        }
        Ok(Self { file })
    }
}

impl SchemaRegistry for StaticRegistry {
    fn field_layout(&self, type_name: &str) -> Option<Vec<(String, FieldKind)>> {
        self.file.types.get(type_name).map(|fields| {
            fields
                .iter()
                .map(|(name, spec)| (name.clone(), spec.to_kind()))
                .collect()
        })
    }

    fn root_types(&self) -> Vec<String> {
        self.file.root_types.clone()
    }
}
