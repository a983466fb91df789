use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryBuildError {
    #[error("Model \"{0}\" not found in schema")]
    UnknownModel(String),
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),
    #[error("Field \"{field}\" not found in model \"{model}\"")]
    UnknownField { model: String, field: String },
    #[error("Field \"{0}\" is not a scalar or enum type")]
    NotScalar(String),
    #[error("Field \"{0}\" cannot be traversed (not an object type)")]
    NotTraversable(String),
    #[error("Invalid {expected} value: \"{value}\" for field \"{field}\"")]
    TypeCoercion {
        field: String,
        value: String,
        expected: &'static str,
    },
    #[error("Invalid filter expression \"{expression}\": {reason}")]
    InvalidFilterExpression { expression: String, reason: String },
    #[error("Invalid fields found for model \"{model}\": {}. Fields must be scalar String or enum types.", .fields.join(", "))]
    InvalidSearchFields { model: String, fields: Vec<String> },
    #[error("No valid scalar String or enum fields found for model \"{model}\" among provided fields: {}", .fields.join(", "))]
    NoValidSearchField { model: String, fields: Vec<String> },
    #[error("Invalid sort: {0}")]
    InvalidSort(String),
    #[error("Invalid query parameter \"{name}\": {reason}")]
    InvalidParameter { name: String, reason: String },
    #[error("Unsupported aggregate: {0}")]
    UnsupportedAggregate(String),
    #[error("Error building filter for field \"{field}\" ({expression}): {source}")]
    Filter {
        field: String,
        expression: String,
        #[source]
        source: Box<QueryBuildError>,
    },
}

impl QueryBuildError {
    /// Unwraps `Filter` context down to the error that caused it.
    pub fn root_cause(&self) -> &QueryBuildError {
        match self {
            QueryBuildError::Filter { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Client-facing hint shown next to the error message.
    pub fn reasoning(&self) -> &'static str {
        match self.root_cause() {
            QueryBuildError::UnknownModel(_) | QueryBuildError::UnknownEntity(_) =>
                "The requested resource is not part of the schema.",
            QueryBuildError::UnknownField { .. } =>
                "Every field referenced by filter, search, sort or fields must exist on the model.",
            QueryBuildError::NotScalar(_) =>
                "Filters must end on a scalar or enum field. Add the nested field name, e.g. personalInfo.firstName.",
            QueryBuildError::NotTraversable(_) =>
                "Only relation or composite fields can be followed by a dotted path.",
            QueryBuildError::TypeCoercion { .. } =>
                "The filter value does not match the field's declared type.",
            QueryBuildError::InvalidFilterExpression { .. } =>
                "Filters use field<op>value with one of : > >= < <= ! ^ $ ~ and are separated by commas.",
            QueryBuildError::InvalidSearchFields { .. } | QueryBuildError::NoValidSearchField { .. } =>
                "Search is only supported on String or enum fields.",
            QueryBuildError::InvalidSort(_) =>
                "Sort must be a field name or a JSON object such as {\"createdAt\":\"desc\"}.",
            QueryBuildError::InvalidParameter { .. } =>
                "Check page, limit, order, fields and the boolean toggles.",
            QueryBuildError::UnsupportedAggregate(_) =>
                "Aggregates support sum, avg, min and max over numeric fields.",
            QueryBuildError::Filter { .. } => "The filter could not be built.",
        }
    }
}
