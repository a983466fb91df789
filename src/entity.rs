use std::fmt;
use std::str::FromStr;

use crate::coercion::FilterValue;
use crate::condition::{Condition, Predicate};
use crate::error::QueryBuildError;

/// Every queryable entity of the institutional backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    User,
    Person,
    Role,
    Organization,
    Notification,
    Metrics,
    SystemLog,
    AuditLog,
    ActivityLog,
}

impl Entity {
    pub const ALL: [Entity; 9] = [
        Entity::User,
        Entity::Person,
        Entity::Role,
        Entity::Organization,
        Entity::Notification,
        Entity::Metrics,
        Entity::SystemLog,
        Entity::AuditLog,
        Entity::ActivityLog,
    ];

    /// Name of the model in the schema document.
    pub fn model_name(self) -> &'static str {
        match self {
            Entity::User => "User",
            Entity::Person => "Person",
            Entity::Role => "Role",
            Entity::Organization => "Organization",
            Entity::Notification => "Notification",
            Entity::Metrics => "Metrics",
            Entity::SystemLog => "SystemLog",
            Entity::AuditLog => "AuditLog",
            Entity::ActivityLog => "ActivityLog",
        }
    }

    /// URL path segment, e.g. `/system-logs`.
    pub fn segment(self) -> &'static str {
        match self {
            Entity::User => "users",
            Entity::Person => "persons",
            Entity::Role => "roles",
            Entity::Organization => "organizations",
            Entity::Notification => "notifications",
            Entity::Metrics => "metrics",
            Entity::SystemLog => "system-logs",
            Entity::AuditLog => "audit-logs",
            Entity::ActivityLog => "activity-logs",
        }
    }

    /// Key under which list results are returned.
    pub fn collection_key(self) -> &'static str {
        match self {
            Entity::User => "users",
            Entity::Person => "person",
            Entity::Role => "roles",
            Entity::Organization => "organizations",
            Entity::Notification => "notifications",
            Entity::Metrics => "metrics",
            Entity::SystemLog => "systemLogs",
            Entity::AuditLog => "auditLogs",
            Entity::ActivityLog => "activityLogs",
        }
    }

    /// Fields the free-text `query` parameter is matched against.
    pub fn search_fields(self) -> &'static [&'static str] {
        match self {
            Entity::User => &["userName"],
            Entity::Person => &[
                "personalInfo.firstName",
                "personalInfo.lastName",
                "personalInfo.middleName",
            ],
            Entity::Role => &["name", "description"],
            Entity::Organization => &["name", "description", "code"],
            Entity::Notification | Entity::Metrics => &["name", "description", "type"],
            Entity::SystemLog => &["id", "description", "type"],
            Entity::AuditLog => &["description", "type", "severity"],
            Entity::ActivityLog => &["action", "description", "page.title"],
        }
    }

    fn soft_deleted(self) -> bool {
        matches!(
            self,
            Entity::User
                | Entity::Role
                | Entity::Organization
                | Entity::Notification
                | Entity::Metrics
                | Entity::SystemLog
        )
    }

    /// Conditions every list and aggregate call starts from.
    pub fn base_conditions(self) -> Vec<Condition> {
        if self.soft_deleted() {
            vec![Condition::field(
                "isDeleted",
                Predicate::Equals(FilterValue::Bool(false)),
            )]
        } else {
            Vec::new()
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.model_name())
    }
}

impl FromStr for Entity {
    type Err = QueryBuildError;

    /// Accepts the URL segment, the collection key or the model name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Entity::ALL
            .into_iter()
            .find(|e| e.segment() == s || e.collection_key() == s || e.model_name() == s)
            .ok_or_else(|| QueryBuildError::UnknownEntity(s.to_string()))
    }
}
