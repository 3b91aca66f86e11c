use serde::{Deserialize, Serialize};

/// A single result row: column name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// A prepared query plus its bound positional parameters.
///
/// Parameters bind to `?` placeholders in order. JSON booleans bind as
/// integers, arrays and objects bind as their JSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub query: String,
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
}

impl Statement {
    /// Prepare a statement with no parameters bound yet.
    pub fn prepare(query: impl Into<String>) -> Self {
        Statement {
            query: query.into(),
            params: Vec::new(),
        }
    }

    /// Bind positional parameters, replacing any previously bound ones.
    pub fn bind<I, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<serde_json::Value>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }
}

/// Metadata reported by a completed `run()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMeta {
    /// Row id of the last inserted row, when the statement inserted one.
    pub last_row_id: Option<i64>,
    /// Number of rows changed by the statement.
    pub changes: u64,
}

/// Result of a mutating statement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    pub meta: RunMeta,
}

impl RunResult {
    pub fn new(last_row_id: Option<i64>, changes: u64) -> Self {
        RunResult {
            success: true,
            meta: RunMeta {
                last_row_id,
                changes,
            },
        }
    }
}
