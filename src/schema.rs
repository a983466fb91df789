use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to read schema document {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid schema document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Type \"{0}\" is declared more than once")]
    DuplicateType(String),
    #[error("Field \"{owner}.{field}\" refers to unknown type \"{target}\"")]
    UnknownTarget {
        owner: String,
        field: String,
        target: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Scalar,
    Enum,
    Object,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    String,
    Int,
    BigInt,
    Float,
    Decimal,
    Boolean,
    DateTime,
    Json,
}

impl ScalarType {
    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "String" => Some(ScalarType::String),
            "Int" => Some(ScalarType::Int),
            "BigInt" => Some(ScalarType::BigInt),
            "Float" => Some(ScalarType::Float),
            "Decimal" => Some(ScalarType::Decimal),
            "Boolean" => Some(ScalarType::Boolean),
            "DateTime" => Some(ScalarType::DateTime),
            "Json" => Some(ScalarType::Json),
            _ => None,
        }
    }

    /// Types that support `gt`/`gte`/`lt`/`lte`.
    pub fn is_comparable(self) -> bool {
        matches!(
            self,
            ScalarType::Int
                | ScalarType::BigInt
                | ScalarType::Float
                | ScalarType::Decimal
                | ScalarType::DateTime
        )
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ScalarType::Int | ScalarType::BigInt | ScalarType::Float | ScalarType::Decimal
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    /// Scalar type name, enum name, or related model/composite type name.
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub is_list: bool,
    #[serde(default)]
    pub relation_name: Option<String>,
}

impl FieldDescriptor {
    /// `None` for enum and object fields.
    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self.kind {
            FieldKind::Scalar => ScalarType::from_type_name(&self.type_name),
            _ => None,
        }
    }

    pub fn is_relation(&self) -> bool {
        self.kind == FieldKind::Object && self.relation_name.is_some()
    }

    pub fn related_type(&self) -> Option<&str> {
        match self.kind {
            FieldKind::Object => Some(&self.type_name),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, FieldKind::Scalar | FieldKind::Enum)
    }

    /// Non-list String scalars and enums can take a free-text search.
    pub fn is_searchable(&self) -> bool {
        match self.kind {
            FieldKind::Enum => true,
            FieldKind::Scalar => self.type_name == "String" && !self.is_list,
            FieldKind::Object => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TypeDocument {
    name: String,
    #[serde(default)]
    fields: Vec<FieldDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
struct EnumDocument {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SchemaDocument {
    #[serde(default)]
    models: Vec<TypeDocument>,
    #[serde(default)]
    types: Vec<TypeDocument>,
    #[serde(default)]
    enums: Vec<EnumDocument>,
}

/// Read-only field metadata for every model and composite type.
///
/// Built once at startup and shared behind an `Arc`; lookups never mutate.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    models: HashMap<String, Vec<FieldDescriptor>>,
    composites: HashMap<String, Vec<FieldDescriptor>>,
    enums: HashSet<String>,
}

impl SchemaRegistry {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, SchemaError> {
        let document: SchemaDocument = serde_json::from_str(raw)?;
        Self::from_document(document)
    }

    fn from_document(document: SchemaDocument) -> Result<Self, SchemaError> {
        let mut seen = HashSet::new();
        let mut registry = SchemaRegistry::default();

        for model in document.models {
            if !seen.insert(model.name.clone()) {
                return Err(SchemaError::DuplicateType(model.name));
            }
            registry.models.insert(model.name, model.fields);
        }
        for composite in document.types {
            if !seen.insert(composite.name.clone()) {
                return Err(SchemaError::DuplicateType(composite.name));
            }
            registry.composites.insert(composite.name, composite.fields);
        }
        for en in document.enums {
            if !seen.insert(en.name.clone()) {
                return Err(SchemaError::DuplicateType(en.name));
            }
            registry.enums.insert(en.name);
        }

        registry.check_targets()?;
        tracing::debug!(
            models = registry.models.len(),
            composites = registry.composites.len(),
            enums = registry.enums.len(),
            "Schema registry built"
        );
        Ok(registry)
    }

    fn check_targets(&self) -> Result<(), SchemaError> {
        for (owner, fields) in self.models.iter().chain(self.composites.iter()) {
            for field in fields {
                let known = match field.kind {
                    FieldKind::Object => {
                        self.models.contains_key(&field.type_name)
                            || self.composites.contains_key(&field.type_name)
                    }
                    FieldKind::Enum => self.enums.contains(&field.type_name),
                    FieldKind::Scalar => true,
                };
                if !known {
                    return Err(SchemaError::UnknownTarget {
                        owner: owner.clone(),
                        field: field.name.clone(),
                        target: field.type_name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Models are searched before composite types; both share one namespace.
    pub fn get_field_meta(&self, type_name: &str, field: &str) -> Option<&FieldDescriptor> {
        self.models
            .get(type_name)
            .or_else(|| self.composites.get(type_name))
            .and_then(|fields| fields.iter().find(|f| f.name == field))
    }

    pub fn has_model(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn model_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.models.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
pub(crate) fn bundled_schema() -> SchemaRegistry {
    SchemaRegistry::from_json_str(include_str!("../schema/schema.json"))
        .expect("bundled schema document must parse")
}
