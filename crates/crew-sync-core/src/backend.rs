//! The remote relational store, seen through one narrow trait.
//!
//! Sync operations compile into [`RemoteWrite`] values before they reach a
//! [`Backend`]. Keeping the write as data makes the tenant predicate visible
//! to tests and lets a queued operation be replayed without any reference to
//! the caller that created it.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

/// One row as exchanged with the backend.
pub type Row = serde_json::Map<String, Value>;

/// Row predicate of a read or write.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq { column: String, value: Value },
    Neq { column: String, value: Value },
    In { column: String, values: Vec<Value> },
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn neq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Neq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn is_in<I, V>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Predicate::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn column(&self) -> &str {
        match self {
            Predicate::Eq { column, .. }
            | Predicate::Neq { column, .. }
            | Predicate::In { column, .. } => column,
        }
    }
}

/// What a write does to the rows its predicates select.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteAction {
    Insert { rows: Vec<Row> },
    Upsert {
        rows: Vec<Row>,
        on_conflict: Option<String>,
    },
    Update { changes: Row },
    Delete,
}

impl WriteAction {
    pub fn name(&self) -> &'static str {
        match self {
            WriteAction::Insert { .. } => "insert",
            WriteAction::Upsert { .. } => "upsert",
            WriteAction::Update { .. } => "update",
            WriteAction::Delete => "delete",
        }
    }
}

/// A fully scoped write against one table.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteWrite {
    pub table: String,
    pub action: WriteAction,
    pub filters: Vec<Predicate>,
}

impl RemoteWrite {
    /// Whether the write carries `column = value` among its predicates.
    pub fn has_eq(&self, column: &str, value: &str) -> bool {
        self.filters.iter().any(|p| {
            matches!(p, Predicate::Eq { column: c, value: Value::String(v) } if c == column && v == value)
        })
    }
}

/// Sort order of a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A read against one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: String,
    /// `None` selects every column
    pub columns: Option<Vec<String>>,
    pub filters: Vec<Predicate>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Select {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: None,
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.into(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Error payload as reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl ErrorBody {
    /// Message, details and hint joined for pattern matching.
    pub fn text(&self) -> String {
        [&self.message, &self.details, &self.hint]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.text()),
            None => write!(f, "{}", self.text()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("backend rejected request (status {status}): {body}")]
    Rejected { status: u16, body: ErrorBody },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn rejected(status: u16, code: Option<&str>, message: &str) -> Self {
        BackendError::Rejected {
            status,
            body: ErrorBody {
                code: code.map(str::to_string),
                message: Some(message.to_string()),
                ..ErrorBody::default()
            },
        }
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

/// Closed classification of backend errors relevant to schema detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    MissingColumn,
    MissingTable,
    Other,
}

const UNDEFINED_COLUMN: &str = "42703";
const UNDEFINED_TABLE: &str = "42P01";

fn missing_column_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)column .* does not exist").expect("valid regex"))
}

fn missing_table_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)relation .* does not exist").expect("valid regex"))
}

/// Classify a backend error by its Postgres code, falling back to the
/// message text when the code is absent.
pub fn classify(error: &BackendError) -> ErrorClass {
    let BackendError::Rejected { body, .. } = error else {
        return ErrorClass::Other;
    };

    match body.code.as_deref() {
        Some(UNDEFINED_COLUMN) => return ErrorClass::MissingColumn,
        Some(UNDEFINED_TABLE) => return ErrorClass::MissingTable,
        _ => {}
    }

    let text = body.text();
    if missing_column_pattern().is_match(&text) {
        ErrorClass::MissingColumn
    } else if missing_table_pattern().is_match(&text) {
        ErrorClass::MissingTable
    } else {
        ErrorClass::Other
    }
}

/// Remote relational store with row-level predicates.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Read rows matching `query`.
    async fn select(&self, query: &Select) -> Result<Vec<Row>, BackendError>;

    /// Apply one write.
    async fn execute(&self, write: &RemoteWrite) -> Result<(), BackendError>;

    /// Lightweight session probe used as a connectivity check.
    async fn check_session(&self) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_code() {
        let column = BackendError::rejected(400, Some("42703"), "whatever");
        let table = BackendError::rejected(404, Some("42P01"), "whatever");

        assert_eq!(classify(&column), ErrorClass::MissingColumn);
        assert_eq!(classify(&table), ErrorClass::MissingTable);
    }

    #[test]
    fn test_classify_by_message() {
        let column = BackendError::rejected(400, None, "Column notes.event_id does not exist");
        let table = BackendError::Rejected {
            status: 404,
            body: ErrorBody {
                details: Some("relation \"public.notes\" does not exist".to_string()),
                ..ErrorBody::default()
            },
        };

        assert_eq!(classify(&column), ErrorClass::MissingColumn);
        assert_eq!(classify(&table), ErrorClass::MissingTable);
    }

    #[test]
    fn test_classify_other() {
        assert_eq!(
            classify(&BackendError::rejected(500, Some("XX000"), "internal error")),
            ErrorClass::Other
        );
        assert_eq!(
            classify(&BackendError::Transport("connection reset".to_string())),
            ErrorClass::Other
        );
    }

    #[test]
    fn test_error_body_display() {
        let body = ErrorBody {
            code: Some("23505".to_string()),
            message: Some("duplicate key".to_string()),
            hint: Some("use upsert".to_string()),
            ..ErrorBody::default()
        };
        assert_eq!(body.to_string(), "[23505] duplicate key use upsert");
    }

    #[test]
    fn test_remote_write_has_eq() {
        let write = RemoteWrite {
            table: "notes".to_string(),
            action: WriteAction::Delete,
            filters: vec![Predicate::eq("event_id", "evt-1"), Predicate::eq("id", "n-1")],
        };

        assert!(write.has_eq("event_id", "evt-1"));
        assert!(!write.has_eq("event_id", "evt-2"));
    }
}
