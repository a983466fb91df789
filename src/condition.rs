use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::coercion::{parse_value, CoercionOptions, FilterValue};
use crate::error::QueryBuildError;
use crate::filter::{group_filters, FilterOperator, ParsedFilter};
use crate::schema::{FieldDescriptor, ScalarType, SchemaRegistry};

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Equals(FilterValue),
    Not(FilterValue),
    Gt(FilterValue),
    Gte(FilterValue),
    Lt(FilterValue),
    Lte(FilterValue),
    StartsWith { value: FilterValue, insensitive: bool },
    EndsWith { value: FilterValue, insensitive: bool },
    Contains { value: FilterValue, insensitive: bool },
    Has(FilterValue),
}

impl Predicate {
    fn to_json(&self) -> Value {
        let keyed = |key: &str, value: &FilterValue| {
            let mut map = Map::new();
            map.insert(key.to_string(), value.to_json());
            Value::Object(map)
        };
        let text = |key: &str, value: &FilterValue, insensitive: bool| {
            let mut map = Map::new();
            map.insert(key.to_string(), value.to_json());
            if insensitive {
                map.insert("mode".to_string(), json!("insensitive"));
            }
            Value::Object(map)
        };

        match self {
            Predicate::Equals(value) => value.to_json(),
            Predicate::Not(value) => keyed("not", value),
            Predicate::Gt(value) => keyed("gt", value),
            Predicate::Gte(value) => keyed("gte", value),
            Predicate::Lt(value) => keyed("lt", value),
            Predicate::Lte(value) => keyed("lte", value),
            Predicate::StartsWith { value, insensitive } => text("startsWith", value, *insensitive),
            Predicate::EndsWith { value, insensitive } => text("endsWith", value, *insensitive),
            Predicate::Contains { value, insensitive } => text("contains", value, *insensitive),
            Predicate::Has(value) => keyed("has", value),
        }
    }
}

/// How a nested condition is attached to the field that leads to it.
#[derive(Debug, Clone, PartialEq)]
pub enum Scope {
    /// Relation: the nested condition sits directly under the field.
    Relation(Box<Condition>),
    /// Composite type: the nested condition is wrapped in `is`.
    Is(Box<Condition>),
}

impl Scope {
    fn to_json(&self) -> Value {
        match self {
            Scope::Relation(inner) => inner.to_json(),
            Scope::Is(inner) => json!({ "is": inner.to_json() }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Not(Box<Condition>),
    Field { field: String, predicate: Predicate },
    /// To-one relation or single composite.
    Nested { field: String, scope: Scope },
    /// List relation or list composite: at least one element matches.
    Some { field: String, scope: Scope },
}

fn single_key(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

impl Condition {
    pub fn field(field: &str, predicate: Predicate) -> Self {
        Condition::Field {
            field: field.to_string(),
            predicate,
        }
    }

    /// Wraps `inner` in the container dictated by the descriptor of `field`.
    pub fn wrap(field: &FieldDescriptor, inner: Condition) -> Self {
        let scope = if field.is_relation() {
            Scope::Relation(Box::new(inner))
        } else {
            Scope::Is(Box::new(inner))
        };
        if field.is_list {
            Condition::Some {
                field: field.name.clone(),
                scope,
            }
        } else {
            Condition::Nested {
                field: field.name.clone(),
                scope,
            }
        }
    }

    /// Lowers the tree into the data store's where-input shape.
    pub fn to_json(&self) -> Value {
        match self {
            Condition::And(items) => {
                single_key("AND", Value::Array(items.iter().map(Condition::to_json).collect()))
            }
            Condition::Or(items) => {
                single_key("OR", Value::Array(items.iter().map(Condition::to_json).collect()))
            }
            Condition::Not(inner) => single_key("NOT", inner.to_json()),
            Condition::Field { field, predicate } => single_key(field, predicate.to_json()),
            Condition::Nested { field, scope } => single_key(field, scope.to_json()),
            Condition::Some { field, scope } => {
                single_key(field, single_key("some", scope.to_json()))
            }
        }
    }
}

/// Translates filter and search parameters into condition trees for one schema.
#[derive(Debug, Clone)]
pub struct ConditionBuilder {
    pub(crate) schema: Arc<SchemaRegistry>,
    options: CoercionOptions,
}

impl ConditionBuilder {
    pub fn new(schema: Arc<SchemaRegistry>, options: CoercionOptions) -> Self {
        Self { schema, options }
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    pub(crate) fn field_meta(
        &self,
        type_name: &str,
        field: &str,
    ) -> Result<&FieldDescriptor, QueryBuildError> {
        self.schema
            .get_field_meta(type_name, field)
            .ok_or_else(|| QueryBuildError::UnknownField {
                model: type_name.to_string(),
                field: field.to_string(),
            })
    }

    /// Builds the condition for one parsed filter by walking `path` through the schema.
    ///
    /// `Ok(None)` means the clause should be omitted, not that nothing matches.
    pub fn build_condition(
        &self,
        type_name: &str,
        path: &[&str],
        parsed: &ParsedFilter,
    ) -> Result<Option<Condition>, QueryBuildError> {
        let Some((head, rest)) = path.split_first() else {
            return Ok(None);
        };
        let meta = self.field_meta(type_name, head)?;

        if rest.is_empty() {
            if !meta.is_terminal() {
                return Err(QueryBuildError::NotScalar(head.to_string()));
            }
            return self.terminal_condition(meta, parsed).map(Some);
        }

        let Some(next_type) = meta.related_type() else {
            return Err(QueryBuildError::NotTraversable(head.to_string()));
        };
        let nested = self.build_condition(next_type, rest, parsed)?;
        Ok(nested.map(|inner| Condition::wrap(meta, inner)))
    }

    fn terminal_condition(
        &self,
        meta: &FieldDescriptor,
        parsed: &ParsedFilter,
    ) -> Result<Condition, QueryBuildError> {
        let name = meta.name.as_str();
        tracing::trace!(field = name, operator = parsed.operator.as_str(), "Terminal predicate");

        if parsed.is_null {
            return Ok(Condition::field(name, Predicate::Equals(FilterValue::Null)));
        }

        if parsed.is_range {
            if let (Some(start), Some(end)) = (&parsed.range_start, &parsed.range_end) {
                let start = parse_value(meta, start, &self.options)?;
                let end = parse_value(meta, end, &self.options)?;
                return Ok(Condition::And(vec![
                    Condition::field(name, Predicate::Gte(start)),
                    Condition::field(name, Predicate::Lte(end)),
                ]));
            }
        }

        let value = parse_value(meta, &parsed.value, &self.options)?;

        if meta.is_list {
            // Every other operator on a list field is read as membership.
            let has = Condition::field(name, Predicate::Has(value));
            return Ok(match parsed.operator {
                FilterOperator::Not => Condition::Not(Box::new(has)),
                _ => has,
            });
        }

        let scalar = meta.scalar_type();
        let predicate = match (parsed.operator, scalar) {
            (FilterOperator::Not, _) => Predicate::Not(value),
            (FilterOperator::StartsWith, Some(s)) if s == ScalarType::String => {
                Predicate::StartsWith { value, insensitive: true }
            }
            (FilterOperator::EndsWith, Some(s)) if s == ScalarType::String => {
                Predicate::EndsWith { value, insensitive: true }
            }
            (FilterOperator::Contains, Some(s)) if s == ScalarType::String => {
                Predicate::Contains { value, insensitive: true }
            }
            (FilterOperator::Gt, Some(s)) if s.is_comparable() => Predicate::Gt(value),
            (FilterOperator::Gte, Some(s)) if s.is_comparable() => Predicate::Gte(value),
            (FilterOperator::Lt, Some(s)) if s.is_comparable() => Predicate::Lt(value),
            (FilterOperator::Lte, Some(s)) if s.is_comparable() => Predicate::Lte(value),
            _ => Predicate::Equals(value),
        };

        Ok(Condition::field(name, predicate))
    }

    /// Parses a comma-separated filter parameter into AND-ed conditions.
    ///
    /// Several filters on the same field path are OR-ed together.
    pub fn build_filter_conditions(
        &self,
        model: &str,
        filter_param: Option<&str>,
    ) -> Result<Vec<Condition>, QueryBuildError> {
        let Some(filter_param) = filter_param.filter(|f| !f.trim().is_empty()) else {
            return Ok(Vec::new());
        };
        if !self.schema.has_model(model) {
            return Err(QueryBuildError::UnknownModel(model.to_string()));
        }

        let groups = group_filters(filter_param)?;
        let mut conditions = Vec::with_capacity(groups.len());

        for group in groups {
            let path: Vec<&str> = group.field.split('.').collect();
            let built: Result<Vec<Condition>, QueryBuildError> = group
                .filters
                .iter()
                .map(|parsed| self.build_condition(model, &path, parsed))
                .filter_map(Result::transpose)
                .collect();

            let mut built = built.map_err(|source| {
                tracing::warn!(
                    model = model,
                    field = %group.field,
                    error = %source,
                    "Failed to build filter condition"
                );
                QueryBuildError::Filter {
                    field: group.field.clone(),
                    expression: group.expressions.join(","),
                    source: Box::new(source),
                }
            })?;

            match built.len() {
                0 => {}
                1 => conditions.extend(built.pop()),
                _ => conditions.push(Condition::Or(built)),
            }
        }

        tracing::debug!(model = model, count = conditions.len(), "Built filter conditions");
        Ok(conditions)
    }
}
