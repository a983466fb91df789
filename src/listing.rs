use serde_json::{json, Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::condition::ConditionBuilder;
use crate::entity::Entity;
use crate::error::QueryBuildError;
use crate::params::{AggregateParams, ValidatedParams};
use crate::query::{
    build_find_many_query, build_pagination, group_data_by_field, validate_selection,
    validate_sort, QuerySpec, SortSpec, WhereClause,
};
use crate::repository::{Repository, RepositoryError};
use crate::schema::{ScalarType, SchemaRegistry};

#[derive(Error, Debug)]
pub enum ListingError {
    #[error(transparent)]
    Query(#[from] QueryBuildError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateOp {
    /// Store-native aggregate key, e.g. `_sum`.
    pub fn key(self) -> &'static str {
        match self {
            AggregateOp::Sum => "_sum",
            AggregateOp::Avg => "_avg",
            AggregateOp::Min => "_min",
            AggregateOp::Max => "_max",
        }
    }

    fn accepts(self, scalar: ScalarType) -> bool {
        match self {
            AggregateOp::Sum | AggregateOp::Avg => scalar.is_numeric(),
            AggregateOp::Min | AggregateOp::Max => scalar.is_comparable(),
        }
    }
}

impl FromStr for AggregateOp {
    type Err = QueryBuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(AggregateOp::Sum),
            "avg" => Ok(AggregateOp::Avg),
            "min" => Ok(AggregateOp::Min),
            "max" => Ok(AggregateOp::Max),
            _ => Err(QueryBuildError::UnsupportedAggregate(format!(
                "unknown operation \"{}\"",
                s
            ))),
        }
    }
}

/// Turns validated list parameters into store queries and shapes the response.
#[derive(Clone)]
pub struct ListingService {
    builder: ConditionBuilder,
    repository: Option<Arc<dyn Repository>>,
    strict_sort: bool,
}

impl ListingService {
    pub fn new(
        builder: ConditionBuilder,
        repository: Option<Arc<dyn Repository>>,
        strict_sort: bool,
    ) -> Self {
        Self {
            builder,
            repository,
            strict_sort,
        }
    }

    pub fn schema(&self) -> &SchemaRegistry {
        self.builder.schema()
    }

    pub fn has_repository(&self) -> bool {
        self.repository.is_some()
    }

    fn repository(&self) -> Result<&Arc<dyn Repository>, RepositoryError> {
        self.repository.as_ref().ok_or(RepositoryError::NotConfigured)
    }

    fn where_clause(
        &self,
        entity: Entity,
        query: Option<&str>,
        filter: Option<&str>,
    ) -> Result<WhereClause, QueryBuildError> {
        let model = entity.model_name();
        Ok(WhereClause {
            base: entity.base_conditions(),
            search: self
                .builder
                .build_search_conditions(model, query, entity.search_fields())?,
            filters: self.builder.build_filter_conditions(model, filter)?,
        })
    }

    /// Builds the find-many query without touching the store.
    pub fn plan(&self, entity: Entity, params: &ValidatedParams) -> Result<QuerySpec, QueryBuildError> {
        if self.strict_sort {
            let sort = SortSpec::parse(params.sort.as_deref())?;
            validate_sort(self.builder.schema(), entity.model_name(), &sort)?;
        }

        let where_clause = self.where_clause(entity, params.query.as_deref(), params.filter.as_deref())?;
        let spec = build_find_many_query(
            &where_clause,
            params.skip,
            params.limit,
            params.order,
            params.sort.as_deref(),
            params.fields.as_deref(),
        )?;
        if let Some(selection) = &spec.select {
            validate_selection(self.builder.schema(), entity.model_name(), selection)?;
        }
        Ok(spec)
    }

    pub async fn list(&self, entity: Entity, params: &ValidatedParams) -> Result<Value, ListingError> {
        tracing::info!(
            entity = %entity,
            page = params.page,
            limit = params.limit,
            query = ?params.query,
            filter = ?params.filter,
            group_by = ?params.group_by,
            "Listing records"
        );

        let spec = self.plan(entity, params)?;
        let repository = self.repository()?;
        let count_args = json!({ "where": spec.where_clause });

        let find = async {
            if params.document {
                repository.find_many(entity, spec.to_json()).await
            } else {
                Ok(Vec::new())
            }
        };
        let count = async {
            if params.count || params.pagination {
                repository.count(entity, count_args).await.map(Some)
            } else {
                Ok(None)
            }
        };
        let (records, total) = tokio::try_join!(find, count)?;

        tracing::info!(entity = %entity, records = records.len(), total = ?total, "Retrieved records");

        let mut body = Map::new();
        if params.document {
            let data = match &params.group_by {
                Some(path) => Value::Object(group_data_by_field(records, path)),
                None => Value::Array(records),
            };
            body.insert(entity.collection_key().to_string(), data);
        }
        let total = total.unwrap_or_default();
        if params.count {
            body.insert("count".to_string(), json!(total));
        }
        if params.pagination {
            body.insert(
                "pagination".to_string(),
                json!(build_pagination(total, params.page, params.limit)),
            );
        }
        if let Some(path) = &params.group_by {
            body.insert("groupedBy".to_string(), json!(path));
        }

        Ok(Value::Object(body))
    }

    pub async fn aggregate(&self, entity: Entity, params: &AggregateParams) -> Result<Value, ListingError> {
        let op: AggregateOp = params
            .op
            .as_deref()
            .ok_or_else(|| QueryBuildError::InvalidParameter {
                name: "op".to_string(),
                reason: "is required".to_string(),
            })?
            .parse()?;
        let field = params
            .field
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .ok_or_else(|| QueryBuildError::InvalidParameter {
                name: "field".to_string(),
                reason: "is required".to_string(),
            })?;

        let model = entity.model_name();
        let meta = self
            .builder
            .schema()
            .get_field_meta(model, field)
            .ok_or_else(|| QueryBuildError::UnknownField {
                model: model.to_string(),
                field: field.to_string(),
            })?;
        let supported = !meta.is_list && meta.scalar_type().is_some_and(|s| op.accepts(s));
        if !supported {
            return Err(QueryBuildError::UnsupportedAggregate(format!(
                "{} over field \"{}\" of type {}",
                op.key(),
                field,
                meta.type_name
            ))
            .into());
        }

        let where_clause = self.where_clause(entity, None, params.filter.as_deref())?;
        let mut selector = Map::new();
        selector.insert(field.to_string(), Value::Bool(true));
        let mut args = Map::new();
        args.insert("where".to_string(), where_clause.to_json());
        args.insert(op.key().to_string(), Value::Object(selector));

        tracing::info!(entity = %entity, op = op.key(), field = field, "Aggregating");
        let result = self.repository()?.aggregate(entity, Value::Object(args)).await?;
        let value = result
            .get(op.key())
            .and_then(|bucket| bucket.get(field))
            .cloned()
            .unwrap_or(Value::Null);

        Ok(json!({
            "op": op.key().trim_start_matches('_'),
            "field": field,
            "value": value,
        }))
    }
}
