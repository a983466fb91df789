use crate::error::QueryBuildError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Equals,
    Gt,
    Gte,
    Lt,
    Lte,
    Not,
    StartsWith,
    EndsWith,
    Contains,
    Range,
}

impl FilterOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            FilterOperator::Equals => "equals",
            FilterOperator::Gt => "gt",
            FilterOperator::Gte => "gte",
            FilterOperator::Lt => "lt",
            FilterOperator::Lte => "lte",
            FilterOperator::Not => "not",
            FilterOperator::StartsWith => "startsWith",
            FilterOperator::EndsWith => "endsWith",
            FilterOperator::Contains => "contains",
            FilterOperator::Range => "range",
        }
    }
}

// Scan order matters: the first symbol present in the expression wins.
const MULTI_CHAR_OPERATORS: &[(&str, FilterOperator)] =
    &[(">=", FilterOperator::Gte), ("<=", FilterOperator::Lte)];

const SINGLE_CHAR_OPERATORS: &[(&str, FilterOperator)] = &[
    (">", FilterOperator::Gt),
    ("<", FilterOperator::Lt),
    ("!", FilterOperator::Not),
    ("^", FilterOperator::StartsWith),
    ("$", FilterOperator::EndsWith),
    ("~", FilterOperator::Contains),
];

const OPERATOR_SYMBOLS: &[char] = &[':', '>', '<', '!', '^', '$', '~'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilter {
    pub field: String,
    pub operator: FilterOperator,
    pub value: String,
    pub is_null: bool,
    pub is_range: bool,
    pub range_start: Option<String>,
    pub range_end: Option<String>,
}

/// All filters that target one field path, in the order they appeared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterGroup {
    pub field: String,
    pub expressions: Vec<String>,
    pub filters: Vec<ParsedFilter>,
}

pub fn is_null_literal(value: &str) -> bool {
    value.eq_ignore_ascii_case("null") || value.eq_ignore_ascii_case("undefined")
}

fn is_plain_number(s: &str) -> bool {
    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (s, None),
    };
    let digits = |p: &str| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit());
    digits(int_part) && frac_part.map_or(true, digits)
}

fn parse_range(expr: &str) -> Option<ParsedFilter> {
    let (field, rest) = expr.split_once(':')?;
    if field.is_empty() || field.contains(OPERATOR_SYMBOLS) {
        return None;
    }
    let (start, end) = rest.split_once('-')?;
    if !is_plain_number(start) || !is_plain_number(end) {
        return None;
    }
    Some(ParsedFilter {
        field: field.trim().to_string(),
        operator: FilterOperator::Range,
        value: String::new(),
        is_null: false,
        is_range: true,
        range_start: Some(start.to_string()),
        range_end: Some(end.to_string()),
    })
}

fn invalid(expr: &str, reason: &str) -> QueryBuildError {
    QueryBuildError::InvalidFilterExpression {
        expression: expr.to_string(),
        reason: reason.to_string(),
    }
}

fn check_field_path(expr: &str, field: &str) -> Result<(), QueryBuildError> {
    if field.is_empty() {
        return Err(invalid(expr, "missing field name"));
    }
    if field.split('.').any(|segment| segment.trim().is_empty()) {
        return Err(invalid(expr, "empty segment in field path"));
    }
    Ok(())
}

/// Parses one `field<op>value` item of the filter DSL.
///
/// Supported syntax:
/// - `field:value`   exact match, `field:null` null check
/// - `field>value`, `field>=value`, `field<value`, `field<=value`
/// - `field!value`   not equals
/// - `field^value`, `field$value`, `field~value` starts/ends with, contains
/// - `field:100-500` inclusive numeric range
pub fn parse_filter_expression(expr: &str) -> Result<ParsedFilter, QueryBuildError> {
    if let Some(range) = parse_range(expr) {
        check_field_path(expr, &range.field)?;
        return Ok(range);
    }

    let (symbol, operator) = MULTI_CHAR_OPERATORS
        .iter()
        .chain(SINGLE_CHAR_OPERATORS)
        .find(|(symbol, _)| expr.contains(symbol))
        .copied()
        .unwrap_or((":", FilterOperator::Equals));
    let (field, value) = expr
        .split_once(symbol)
        .ok_or_else(|| invalid(expr, "missing operator"))?;

    let field = field.trim();
    check_field_path(expr, field)?;

    let value = value.trim();
    Ok(ParsedFilter {
        field: field.to_string(),
        operator,
        value: value.to_string(),
        is_null: is_null_literal(value),
        is_range: false,
        range_start: None,
        range_end: None,
    })
}

/// Splits the raw `filter` parameter into trimmed, non-empty items.
///
/// There is no escaping, so a value can never contain a comma.
pub fn split_filter_items(filter_param: &str) -> Vec<&str> {
    filter_param
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .collect()
}

/// Parses every item and groups them by field path, first-seen order.
pub fn group_filters(filter_param: &str) -> Result<Vec<FilterGroup>, QueryBuildError> {
    let mut groups: Vec<FilterGroup> = Vec::new();

    for item in split_filter_items(filter_param) {
        let parsed = parse_filter_expression(item)?;
        match groups.iter_mut().find(|g| g.field == parsed.field) {
            Some(group) => {
                group.expressions.push(item.to_string());
                group.filters.push(parsed);
            }
            None => groups.push(FilterGroup {
                field: parsed.field.clone(),
                expressions: vec![item.to_string()],
                filters: vec![parsed],
            }),
        }
    }

    Ok(groups)
}
