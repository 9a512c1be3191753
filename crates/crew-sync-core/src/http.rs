//! Backend over the hosted store's REST dialect.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crew_sync_config::SyncConfig;

use crate::backend::{Backend, BackendError, ErrorBody, Predicate, RemoteWrite, Row, Select, WriteAction};

const REST_PATH: &str = "rest/v1";
const HEALTH_PATH: &str = "auth/v1/health";

/// HTTP client for `{base_url}/rest/v1/{table}` endpoints
#[derive(Debug, Clone)]
pub struct RestBackend {
    /// HTTP client for API requests
    client: reqwest::Client,
    base_url: String,
    /// Public API key, sent as `apikey` and as the default bearer token
    api_key: String,
    /// Signed-in user's token, when present
    access_token: Option<String>,
}

impl RestBackend {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            access_token: None,
        }
    }

    /// Build a backend from configuration; `None` when URL or key is missing.
    pub fn from_config(config: &SyncConfig) -> Result<Option<Self>, BackendError> {
        let (Some(url), Some(key)) = (&config.backend_url, &config.anon_key) else {
            return Ok(None);
        };

        let mut backend = Self::new(url.as_str(), key.as_str());
        if let Some(secs) = config.request_timeout_secs {
            backend = backend.with_timeout(Duration::from_secs(secs))?;
        }
        Ok(Some(backend))
    }

    /// Apply a per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, BackendError> {
        self.client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    /// Authenticate requests as a signed-in user
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        self.client
            .request(method, format!("{}/{}", self.base_url, path))
            .header("apikey", &self.api_key)
            .bearer_auth(bearer)
    }

    fn table_request(&self, method: Method, table: &str) -> RequestBuilder {
        self.request(method, &format!("{}/{}", REST_PATH, table))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, BackendError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str::<ErrorBody>(&text).unwrap_or_else(|_| ErrorBody {
            message: Some(if text.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                text
            }),
            ..ErrorBody::default()
        });
        Err(BackendError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Quote list members that would otherwise break the `in.(...)` syntax.
fn list_member(value: &Value) -> String {
    let raw = scalar(value);
    if raw.contains(|c: char| matches!(c, ',' | '(' | ')' | '"' | '\\') || c.is_whitespace()) {
        format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        raw
    }
}

/// Render a predicate as a `column=op.value` query pair.
fn filter_param(predicate: &Predicate) -> (String, String) {
    let value = match predicate {
        Predicate::Eq { value: Value::Null, .. } => "is.null".to_string(),
        Predicate::Neq { value: Value::Null, .. } => "not.is.null".to_string(),
        Predicate::Eq { value, .. } => format!("eq.{}", scalar(value)),
        Predicate::Neq { value, .. } => format!("neq.{}", scalar(value)),
        Predicate::In { values, .. } => format!(
            "in.({})",
            values.iter().map(list_member).collect::<Vec<_>>().join(",")
        ),
    };
    (predicate.column().to_string(), value)
}

fn select_params(query: &Select) -> Vec<(String, String)> {
    let columns = query
        .columns
        .as_ref()
        .map(|columns| columns.join(","))
        .unwrap_or_else(|| "*".to_string());

    let mut params = vec![("select".to_string(), columns)];
    params.extend(query.filters.iter().map(filter_param));
    if let Some(order) = &query.order {
        let direction = if order.ascending { "asc" } else { "desc" };
        params.push(("order".to_string(), format!("{}.{}", order.column, direction)));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

#[async_trait]
impl Backend for RestBackend {
    async fn select(&self, query: &Select) -> Result<Vec<Row>, BackendError> {
        let builder = self
            .table_request(Method::GET, &query.table)
            .query(&select_params(query));
        let response = self.send(builder).await?;
        Ok(response.json::<Vec<Row>>().await?)
    }

    async fn execute(&self, write: &RemoteWrite) -> Result<(), BackendError> {
        debug!("{} on {}", write.action.name(), write.table);

        let filters: Vec<(String, String)> = write.filters.iter().map(filter_param).collect();
        let builder = match &write.action {
            WriteAction::Insert { rows } => self
                .table_request(Method::POST, &write.table)
                .header("Prefer", "return=minimal")
                .json(rows),
            WriteAction::Upsert { rows, on_conflict } => {
                let mut builder = self
                    .table_request(Method::POST, &write.table)
                    .header("Prefer", "resolution=merge-duplicates,return=minimal")
                    .json(rows);
                if let Some(target) = on_conflict {
                    builder = builder.query(&[("on_conflict", target)]);
                }
                builder
            }
            WriteAction::Update { changes } => self
                .table_request(Method::PATCH, &write.table)
                .header("Prefer", "return=minimal")
                .query(&filters)
                .json(changes),
            WriteAction::Delete => self
                .table_request(Method::DELETE, &write.table)
                .header("Prefer", "return=minimal")
                .query(&filters),
        };

        self.send(builder).await?;
        Ok(())
    }

    async fn check_session(&self) -> Result<(), BackendError> {
        self.send(self.request(Method::GET, HEALTH_PATH)).await?;
        Ok(())
    }
}
