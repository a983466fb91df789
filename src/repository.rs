use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

use crate::entity::Entity;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("No data store is configured")]
    NotConfigured,
    #[error("Data store request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Data store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Data store response for {action} on {model} has no \"data\" member")]
    MissingData { model: String, action: String },
    #[error("Unexpected data store payload for {action} on {model}: expected {expected}")]
    UnexpectedPayload {
        model: String,
        action: String,
        expected: &'static str,
    },
}

/// The verbs the list and aggregate endpoints need from persistence.
///
/// Arguments are the store-native JSON args (`where`, `skip`, `take`, ...).
#[async_trait]
pub trait Repository: Send + Sync {
    async fn count(&self, entity: Entity, args: Value) -> Result<u64, RepositoryError>;

    async fn find_many(&self, entity: Entity, args: Value) -> Result<Vec<Value>, RepositoryError>;

    async fn aggregate(&self, entity: Entity, args: Value) -> Result<Value, RepositoryError>;
}

/// Talks to a data-store bridge that accepts `{model, action, args}` and
/// answers `{data}`.
pub struct HttpRepository {
    client: reqwest::Client,
    url: String,
}

impl HttpRepository {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RepositoryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn call(&self, entity: Entity, action: &str, args: Value) -> Result<Value, RepositoryError> {
        let model = entity.model_name();
        tracing::debug!(model = model, action = action, "Forwarding to data store");

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&json!({
                "model": model,
                "action": action,
                "args": args,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(model = model, action = action, status = status.as_u16(), "Data store error");
            return Err(RepositoryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut body: Value = response.json().await?;
        body.get_mut("data")
            .map(Value::take)
            .ok_or_else(|| RepositoryError::MissingData {
                model: model.to_string(),
                action: action.to_string(),
            })
    }

    fn unexpected(entity: Entity, action: &str, expected: &'static str) -> RepositoryError {
        RepositoryError::UnexpectedPayload {
            model: entity.model_name().to_string(),
            action: action.to_string(),
            expected,
        }
    }
}

#[async_trait]
impl Repository for HttpRepository {
    async fn count(&self, entity: Entity, args: Value) -> Result<u64, RepositoryError> {
        self.call(entity, "count", args)
            .await?
            .as_u64()
            .ok_or_else(|| Self::unexpected(entity, "count", "a non-negative integer"))
    }

    async fn find_many(&self, entity: Entity, args: Value) -> Result<Vec<Value>, RepositoryError> {
        match self.call(entity, "findMany", args).await? {
            Value::Array(records) => Ok(records),
            _ => Err(Self::unexpected(entity, "findMany", "an array of records")),
        }
    }

    async fn aggregate(&self, entity: Entity, args: Value) -> Result<Value, RepositoryError> {
        self.call(entity, "aggregate", args).await
    }
}
