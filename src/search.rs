use crate::coercion::FilterValue;
use crate::condition::{Condition, ConditionBuilder, Predicate};
use crate::error::QueryBuildError;
use crate::schema::FieldKind;

impl ConditionBuilder {
    /// True when `path` ends on a non-list String scalar or an enum,
    /// hopping only through relation or composite fields.
    pub fn validate_search_path(&self, type_name: &str, path: &[&str]) -> bool {
        let Some((head, rest)) = path.split_first() else {
            return false;
        };
        let Some(meta) = self.schema.get_field_meta(type_name, head) else {
            return false;
        };

        if rest.is_empty() {
            return meta.is_searchable();
        }
        match (meta.kind, meta.related_type()) {
            (FieldKind::Object, Some(next_type)) => self.validate_search_path(next_type, rest),
            _ => false,
        }
    }

    fn search_condition(&self, type_name: &str, path: &[&str], term: &str) -> Option<Condition> {
        let (head, rest) = path.split_first()?;
        let meta = self.schema.get_field_meta(type_name, head)?;

        if rest.is_empty() {
            return meta.is_searchable().then(|| {
                Condition::field(
                    head,
                    Predicate::Contains {
                        value: FilterValue::String(term.to_string()),
                        insensitive: true,
                    },
                )
            });
        }

        let next_type = meta.related_type()?;
        let nested = self.search_condition(next_type, rest, term)?;
        Some(Condition::wrap(meta, nested))
    }

    /// One case-insensitive `contains` per whitelisted field, meant to be OR-ed.
    ///
    /// A missing term or an empty whitelist yields no conditions. Any field that
    /// is not a String/enum terminal fails the whole call.
    pub fn build_search_conditions(
        &self,
        model: &str,
        term: Option<&str>,
        fields: &[&str],
    ) -> Result<Vec<Condition>, QueryBuildError> {
        let Some(term) = term.filter(|t| !t.is_empty()) else {
            return Ok(Vec::new());
        };
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        if !self.schema.has_model(model) {
            return Err(QueryBuildError::UnknownModel(model.to_string()));
        }

        let mut conditions = Vec::new();
        let mut invalid_fields = Vec::new();

        for field in fields {
            let path: Vec<&str> = field.split('.').collect();
            if !self.validate_search_path(model, &path) {
                invalid_fields.push(field.to_string());
                continue;
            }
            if let Some(condition) = self.search_condition(model, &path, term) {
                conditions.push(condition);
            }
        }

        if !invalid_fields.is_empty() {
            tracing::warn!(model = model, fields = ?invalid_fields, "Rejected search fields");
            return Err(QueryBuildError::InvalidSearchFields {
                model: model.to_string(),
                fields: invalid_fields,
            });
        }
        if conditions.is_empty() {
            return Err(QueryBuildError::NoValidSearchField {
                model: model.to_string(),
                fields: fields.iter().map(|f| f.to_string()).collect(),
            });
        }

        Ok(conditions)
    }
}
