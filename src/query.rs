use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::condition::Condition;
use crate::error::QueryBuildError;
use crate::schema::SchemaRegistry;

const IDENTIFIER_FIELD: &str = "id";
const UNASSIGNED_GROUP: &str = "unassigned";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

impl FromStr for SortOrder {
    type Err = QueryBuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(QueryBuildError::InvalidParameter {
                name: "order".to_string(),
                reason: format!("expected \"asc\" or \"desc\", got \"{}\"", other),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SortSpec {
    /// Sort by the identifier field.
    Default,
    Field(String),
    /// Multi-field specification passed through as given, e.g. `{"createdAt":"desc"}`.
    Multi(Map<String, Value>),
}

impl SortSpec {
    pub fn parse(sort: Option<&str>) -> Result<Self, QueryBuildError> {
        let Some(sort) = sort.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(SortSpec::Default);
        };
        if !sort.starts_with('{') {
            return Ok(SortSpec::Field(sort.to_string()));
        }
        match serde_json::from_str::<Value>(sort) {
            Ok(Value::Object(map)) => Ok(SortSpec::Multi(map)),
            Ok(_) => Err(QueryBuildError::InvalidSort(format!(
                "\"{}\" is not a JSON object",
                sort
            ))),
            Err(e) => Err(QueryBuildError::InvalidSort(e.to_string())),
        }
    }

    pub fn to_order_by(&self, order: SortOrder) -> Value {
        let single = |field: &str| {
            let mut map = Map::new();
            map.insert(field.to_string(), Value::String(order.as_str().to_string()));
            Value::Object(map)
        };
        match self {
            SortSpec::Default => single(IDENTIFIER_FIELD),
            SortSpec::Field(field) => single(field),
            SortSpec::Multi(map) => Value::Object(map.clone()),
        }
    }
}

/// Checks every sort key against the schema. Relation keys may nest one
/// object per hop, e.g. `{"person":{"createdAt":"asc"}}`.
pub fn validate_sort(
    schema: &SchemaRegistry,
    model: &str,
    sort: &SortSpec,
) -> Result<(), QueryBuildError> {
    match sort {
        SortSpec::Default => Ok(()),
        SortSpec::Field(field) => validate_sort_key(schema, model, field, None),
        SortSpec::Multi(map) => map
            .iter()
            .try_for_each(|(field, value)| validate_sort_key(schema, model, field, Some(value))),
    }
}

fn validate_sort_key(
    schema: &SchemaRegistry,
    type_name: &str,
    field: &str,
    value: Option<&Value>,
) -> Result<(), QueryBuildError> {
    let meta = schema
        .get_field_meta(type_name, field)
        .ok_or_else(|| QueryBuildError::UnknownField {
            model: type_name.to_string(),
            field: field.to_string(),
        })?;

    match value {
        None => {
            if meta.is_terminal() && !meta.is_list {
                Ok(())
            } else {
                Err(QueryBuildError::NotScalar(field.to_string()))
            }
        }
        Some(Value::String(direction)) => {
            if !meta.is_terminal() || meta.is_list {
                return Err(QueryBuildError::NotScalar(field.to_string()));
            }
            direction.parse::<SortOrder>().map(|_| ()).map_err(|_| {
                QueryBuildError::InvalidSort(format!(
                    "direction for \"{}\" must be \"asc\" or \"desc\"",
                    field
                ))
            })
        }
        Some(Value::Object(nested)) => {
            let next_type = meta
                .related_type()
                .ok_or_else(|| QueryBuildError::NotTraversable(field.to_string()))?;
            nested
                .iter()
                .try_for_each(|(key, value)| validate_sort_key(schema, next_type, key, Some(value)))
        }
        Some(other) => Err(QueryBuildError::InvalidSort(format!(
            "unsupported value {} for \"{}\"",
            other, field
        ))),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionNode {
    Include,
    Select(BTreeMap<String, SelectionNode>),
}

impl Serialize for SelectionNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SelectionNode::Include => serializer.serialize_bool(true),
            SelectionNode::Select(children) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("select", children)?;
                map.end()
            }
        }
    }
}

/// Projection tree; serializes to `{"id": true, "rel": {"select": {...}}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Selection {
    fields: BTreeMap<String, SelectionNode>,
}

impl Selection {
    fn with_identifier() -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(IDENTIFIER_FIELD.to_string(), SelectionNode::Include);
        Self { fields }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn insert_selection_path(map: &mut BTreeMap<String, SelectionNode>, parts: &[&str]) {
    let Some((head, rest)) = parts.split_first() else {
        return;
    };
    if rest.is_empty() {
        map.insert(head.to_string(), SelectionNode::Include);
        return;
    }
    let entry = map
        .entry(head.to_string())
        .or_insert_with(|| SelectionNode::Select(BTreeMap::new()));
    // A plain inclusion already selects the whole field.
    if let SelectionNode::Select(children) = entry {
        insert_selection_path(children, rest);
    }
}

/// Builds the projection for a comma-separated, dot-nested field list.
///
/// Returns `None` when no fields were requested. The identifier is always selected.
/// Blank items are skipped; an item with an empty segment (`a..b`) is rejected.
pub fn get_nested_fields(fields: Option<&str>) -> Result<Option<Selection>, QueryBuildError> {
    let Some(fields) = fields.map(str::trim).filter(|f| !f.is_empty()) else {
        return Ok(None);
    };
    let mut selection = Selection::with_identifier();

    for item in fields.split(',').map(str::trim).filter(|item| !item.is_empty()) {
        let parts: Vec<&str> = item.split('.').map(str::trim).collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(QueryBuildError::InvalidParameter {
                name: "fields".to_string(),
                reason: format!("\"{}\" contains an empty path segment", item),
            });
        }
        insert_selection_path(&mut selection.fields, &parts);
    }

    Ok(Some(selection))
}

/// Resolves every projected path against the schema.
pub fn validate_selection(
    schema: &SchemaRegistry,
    model: &str,
    selection: &Selection,
) -> Result<(), QueryBuildError> {
    validate_selection_nodes(schema, model, &selection.fields)
}

fn validate_selection_nodes(
    schema: &SchemaRegistry,
    type_name: &str,
    nodes: &BTreeMap<String, SelectionNode>,
) -> Result<(), QueryBuildError> {
    nodes.iter().try_for_each(|(field, node)| {
        let meta = schema
            .get_field_meta(type_name, field)
            .ok_or_else(|| QueryBuildError::UnknownField {
                model: type_name.to_string(),
                field: field.to_string(),
            })?;
        match node {
            SelectionNode::Include => Ok(()),
            SelectionNode::Select(children) => {
                let next_type = meta
                    .related_type()
                    .ok_or_else(|| QueryBuildError::NotTraversable(field.to_string()))?;
                validate_selection_nodes(schema, next_type, children)
            }
        }
    })
}

/// The where-input for one list call: base conditions merged at the top,
/// search terms OR-ed, filters AND-ed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereClause {
    pub base: Vec<Condition>,
    pub search: Vec<Condition>,
    pub filters: Vec<Condition>,
}

impl WhereClause {
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        for condition in &self.base {
            if let Value::Object(entries) = condition.to_json() {
                map.extend(entries);
            }
        }
        if !self.search.is_empty() {
            map.insert(
                "OR".to_string(),
                Value::Array(self.search.iter().map(Condition::to_json).collect()),
            );
        }
        if !self.filters.is_empty() {
            map.insert(
                "AND".to_string(),
                Value::Array(self.filters.iter().map(Condition::to_json).collect()),
            );
        }
        Value::Object(map)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    #[serde(rename = "where")]
    pub where_clause: Value,
    pub skip: u64,
    pub take: u64,
    pub order_by: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select: Option<Selection>,
}

impl QuerySpec {
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

pub fn build_find_many_query(
    where_clause: &WhereClause,
    skip: u64,
    limit: u64,
    order: SortOrder,
    sort: Option<&str>,
    fields: Option<&str>,
) -> Result<QuerySpec, QueryBuildError> {
    let sort = SortSpec::parse(sort)?;
    Ok(QuerySpec {
        where_clause: where_clause.to_json(),
        skip,
        take: limit,
        order_by: sort.to_order_by(order),
        select: get_nested_fields(fields)?,
    })
}

fn group_key(record: &Value, path: &str) -> String {
    let value = path
        .split('.')
        .try_fold(record, |current, segment| current.get(segment));
    match value {
        None | Some(Value::Null) => UNASSIGNED_GROUP.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Buckets records by the value at a dotted path; first-seen key order.
pub fn group_data_by_field(records: Vec<Value>, path: &str) -> Map<String, Value> {
    let mut groups = Map::new();
    for record in records {
        let key = group_key(&record, path);
        if let Some(Value::Array(items)) = groups.get_mut(&key) {
            items.push(record);
        } else {
            groups.insert(key, Value::Array(vec![record]));
        }
    }
    groups
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

pub fn build_pagination(total: u64, page: u64, limit: u64) -> Pagination {
    let total_pages = if limit == 0 { 0 } else { total.div_ceil(limit) };
    Pagination {
        total,
        page,
        limit,
        total_pages,
        has_next_page: page < total_pages,
        has_prev_page: page > 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coercion::FilterValue;
    use crate::condition::Predicate;
    use crate::schema::bundled_schema;
    use serde_json::json;

    #[test]
    fn test_nested_fields_always_include_id() {
        let selection = get_nested_fields(Some("personalInfo.firstName,email")).unwrap().unwrap();
        assert_eq!(
            selection.to_json(),
            json!({
                "id": true,
                "email": true,
                "personalInfo": {"select": {"firstName": true}}
            })
        );
    }

    #[test]
    fn test_deep_nested_fields_merge() {
        let selection =
            get_nested_fields(Some("person.personalInfo.firstName, person.personalInfo.lastName,person.kycStatus"))
                .unwrap()
                .unwrap();
        assert_eq!(
            selection.to_json(),
            json!({
                "id": true,
                "person": {"select": {
                    "kycStatus": true,
                    "personalInfo": {"select": {"firstName": true, "lastName": true}}
                }}
            })
        );
    }

    #[test]
    fn test_plain_inclusion_wins_over_nested_selection() {
        let expected = json!({"id": true, "person": true});
        assert_eq!(
            get_nested_fields(Some("person,person.kycStatus")).unwrap().unwrap().to_json(),
            expected
        );
        assert_eq!(
            get_nested_fields(Some("person.kycStatus,person")).unwrap().unwrap().to_json(),
            expected
        );
    }

    #[test]
    fn test_blank_field_items_are_skipped() {
        assert_eq!(
            get_nested_fields(Some("email,, ,")).unwrap().unwrap().to_json(),
            json!({"id": true, "email": true})
        );
        assert_eq!(get_nested_fields(Some("  ")).unwrap(), None);
        assert_eq!(get_nested_fields(None).unwrap(), None);
    }

    #[test]
    fn test_empty_path_segment_is_rejected() {
        for fields in ["email,a..b", "person.", ".email"] {
            assert!(
                matches!(
                    get_nested_fields(Some(fields)),
                    Err(QueryBuildError::InvalidParameter { ref name, .. }) if name == "fields"
                ),
                "{}",
                fields
            );
        }
    }

    #[test]
    fn test_selection_resolves_against_schema() {
        let schema = bundled_schema();
        let check = |fields: &str| {
            let selection = get_nested_fields(Some(fields)).unwrap().unwrap();
            validate_selection(&schema, "User", &selection)
        };

        assert_eq!(check("userName,person.personalInfo.firstName,person.contactInfo.address.city"), Ok(()));
        assert_eq!(check("person"), Ok(()));
        assert_eq!(
            check("bogusField"),
            Err(QueryBuildError::UnknownField {
                model: "User".to_string(),
                field: "bogusField".to_string(),
            })
        );
        assert_eq!(
            check("person.noSuchThing"),
            Err(QueryBuildError::UnknownField {
                model: "Person".to_string(),
                field: "noSuchThing".to_string(),
            })
        );
        assert_eq!(
            check("userName.length"),
            Err(QueryBuildError::NotTraversable("userName".to_string()))
        );
    }

    #[test]
    fn test_selection_is_byte_identical_across_calls() {
        let fields = Some("userName,person.personalInfo.lastName,email,person.kycStatus");
        let first = serde_json::to_string(&get_nested_fields(fields).unwrap()).unwrap();
        let second = serde_json::to_string(&get_nested_fields(fields).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_sort_spec_parsing() {
        assert_eq!(SortSpec::parse(None).unwrap(), SortSpec::Default);
        assert_eq!(SortSpec::parse(Some(" ")).unwrap(), SortSpec::Default);
        assert_eq!(
            SortSpec::parse(Some("createdAt")).unwrap(),
            SortSpec::Field("createdAt".to_string())
        );
        let multi = SortSpec::parse(Some(r#"{"createdAt":"desc","userName":"asc"}"#)).unwrap();
        assert_eq!(
            multi.to_order_by(SortOrder::Asc),
            json!({"createdAt": "desc", "userName": "asc"})
        );
    }

    #[test]
    fn test_invalid_sort_json() {
        assert!(matches!(
            SortSpec::parse(Some("{createdAt:desc")),
            Err(QueryBuildError::InvalidSort(_))
        ));
    }

    #[test]
    fn test_order_by_defaults_to_identifier() {
        assert_eq!(SortSpec::Default.to_order_by(SortOrder::Desc), json!({"id": "desc"}));
        assert_eq!(
            SortSpec::Field("userName".to_string()).to_order_by(SortOrder::Asc),
            json!({"userName": "asc"})
        );
    }

    #[test]
    fn test_validate_sort_against_schema() {
        let schema = bundled_schema();
        let parse = |s: &str| SortSpec::parse(Some(s)).unwrap();

        assert!(validate_sort(&schema, "User", &parse("createdAt")).is_ok());
        assert!(validate_sort(&schema, "User", &parse(r#"{"person":{"kycStatus":"asc"}}"#)).is_ok());
        assert!(matches!(
            validate_sort(&schema, "User", &parse("password2")),
            Err(QueryBuildError::UnknownField { .. })
        ));
        assert!(matches!(
            validate_sort(&schema, "User", &parse(r#"{"userName":"sideways"}"#)),
            Err(QueryBuildError::InvalidSort(_))
        ));
        assert!(matches!(
            validate_sort(&schema, "User", &parse("person")),
            Err(QueryBuildError::NotScalar(_))
        ));
        assert!(matches!(
            validate_sort(&schema, "User", &parse(r#"{"email":{"x":"asc"}}"#)),
            Err(QueryBuildError::NotTraversable(_))
        ));
    }

    #[test]
    fn test_sort_order_from_str() {
        assert_eq!("ASC".parse::<SortOrder>().unwrap(), SortOrder::Asc);
        assert_eq!("desc".parse::<SortOrder>().unwrap(), SortOrder::Desc);
        assert!(matches!(
            "up".parse::<SortOrder>(),
            Err(QueryBuildError::InvalidParameter { name, .. }) if name == "order"
        ));
    }

    #[test]
    fn test_where_clause_shape() {
        let clause = WhereClause {
            base: vec![Condition::field("isDeleted", Predicate::Equals(FilterValue::Bool(false)))],
            search: vec![Condition::field(
                "userName",
                Predicate::Contains {
                    value: FilterValue::String("jo".to_string()),
                    insensitive: true,
                },
            )],
            filters: vec![Condition::field(
                "status",
                Predicate::Equals(FilterValue::String("active".to_string())),
            )],
        };
        assert_eq!(
            clause.to_json(),
            json!({
                "isDeleted": false,
                "OR": [{"userName": {"contains": "jo", "mode": "insensitive"}}],
                "AND": [{"status": "active"}]
            })
        );
        assert_eq!(WhereClause::default().to_json(), json!({}));
    }

    #[test]
    fn test_build_find_many_query() {
        let clause = WhereClause {
            base: vec![Condition::field("isDeleted", Predicate::Equals(FilterValue::Bool(false)))],
            ..Default::default()
        };
        let spec = build_find_many_query(&clause, 20, 10, SortOrder::Desc, None, Some("email")).unwrap();
        assert_eq!(
            spec.to_json(),
            json!({
                "where": {"isDeleted": false},
                "skip": 20,
                "take": 10,
                "orderBy": {"id": "desc"},
                "select": {"id": true, "email": true}
            })
        );

        let spec = build_find_many_query(&clause, 0, 5, SortOrder::Asc, Some("userName"), None).unwrap();
        let json = spec.to_json();
        assert_eq!(json["orderBy"], json!({"userName": "asc"}));
        assert!(json.get("select").is_none());
    }

    #[test]
    fn test_group_data_by_field() {
        let records = vec![
            json!({"id": "1", "type": "ALERT", "user": {"role": "admin"}}),
            json!({"id": "2", "type": null, "user": {"role": "viewer"}}),
            json!({"id": "3", "type": "INFO"}),
            json!({"id": "4", "type": "ALERT"}),
        ];

        let by_type = group_data_by_field(records.clone(), "type");
        let keys: Vec<&str> = by_type.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["ALERT", "unassigned", "INFO"]);
        assert_eq!(by_type["ALERT"].as_array().unwrap().len(), 2);

        let by_role = group_data_by_field(records, "user.role");
        assert_eq!(by_role["admin"][0]["id"], json!("1"));
        assert_eq!(by_role["unassigned"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_group_key_stringifies_scalars() {
        let records = vec![json!({"isRead": true}), json!({"isRead": false}), json!({"isRead": true})];
        let groups = group_data_by_field(records, "isRead");
        assert_eq!(groups["true"].as_array().unwrap().len(), 2);
        assert_eq!(groups["false"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_build_pagination() {
        assert_eq!(
            serde_json::to_value(build_pagination(45, 2, 10)).unwrap(),
            json!({
                "total": 45,
                "page": 2,
                "limit": 10,
                "totalPages": 5,
                "hasNextPage": true,
                "hasPrevPage": true
            })
        );
        let last = build_pagination(45, 5, 10);
        assert!(!last.has_next_page);
        let empty = build_pagination(0, 1, 10);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next_page);
        assert!(!empty.has_prev_page);
    }
}
