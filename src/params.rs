use serde::Deserialize;

use crate::error::QueryBuildError;
use crate::query::SortOrder;

const DEFAULT_PAGE: u64 = 1;
const DEFAULT_LIMIT: u64 = 10;

/// Raw list parameters as they arrive on the query string.
///
/// Everything is kept as text so bad values surface as `InvalidParameter`
/// instead of an extractor rejection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub fields: Option<String>,
    pub query: Option<String>,
    pub filter: Option<String>,
    pub document: Option<String>,
    pub pagination: Option<String>,
    pub count: Option<String>,
    pub group_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedParams {
    pub page: u64,
    pub limit: u64,
    pub skip: u64,
    pub order: SortOrder,
    pub sort: Option<String>,
    pub fields: Option<String>,
    pub query: Option<String>,
    pub filter: Option<String>,
    pub document: bool,
    pub pagination: bool,
    pub count: bool,
    pub group_by: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AggregateParams {
    pub op: Option<String>,
    pub field: Option<String>,
    pub filter: Option<String>,
}

fn invalid(name: &str, reason: impl Into<String>) -> QueryBuildError {
    QueryBuildError::InvalidParameter {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn non_blank(raw: &Option<String>) -> Option<&str> {
    raw.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn text(raw: &Option<String>) -> Option<String> {
    non_blank(raw).map(str::to_string)
}

/// Drops blank values but keeps surrounding whitespace of the rest.
fn verbatim(raw: &Option<String>) -> Option<String> {
    non_blank(raw).and(raw.clone())
}

fn parse_positive(name: &str, raw: &Option<String>, default: u64) -> Result<u64, QueryBuildError> {
    let Some(raw) = non_blank(raw) else {
        return Ok(default);
    };
    match raw.parse::<u64>() {
        Ok(0) => Err(invalid(name, "must be at least 1")),
        Ok(n) => Ok(n),
        Err(_) => Err(invalid(name, format!("\"{}\" is not a positive integer", raw))),
    }
}

fn parse_toggle(name: &str, raw: &Option<String>, default: bool) -> Result<bool, QueryBuildError> {
    let Some(raw) = non_blank(raw) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(invalid(name, format!("expected \"true\" or \"false\", got \"{}\"", raw))),
    }
}

impl ListParams {
    pub fn validate(&self, max_limit: u64) -> Result<ValidatedParams, QueryBuildError> {
        let page = parse_positive("page", &self.page, DEFAULT_PAGE)?;
        let limit = parse_positive("limit", &self.limit, DEFAULT_LIMIT.min(max_limit))?;
        if limit > max_limit {
            return Err(invalid("limit", format!("must not exceed {}", max_limit)));
        }
        let order = match non_blank(&self.order) {
            Some(raw) => raw.parse()?,
            None => SortOrder::default(),
        };
        let skip = (page - 1)
            .checked_mul(limit)
            .ok_or_else(|| invalid("page", "is out of range"))?;

        Ok(ValidatedParams {
            page,
            limit,
            skip,
            order,
            sort: text(&self.sort),
            fields: text(&self.fields),
            query: verbatim(&self.query),
            filter: text(&self.filter),
            document: parse_toggle("document", &self.document, true)?,
            pagination: parse_toggle("pagination", &self.pagination, true)?,
            count: parse_toggle("count", &self.count, false)?,
            group_by: text(&self.group_by),
        })
    }
}
