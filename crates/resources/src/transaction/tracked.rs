//! The statement-recording decorator handed to every unit of work.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use tether_storage::{Row, RunResult, Statement, StatementGateway, StorageError};

use super::synthesis::synthesize_rollback;
use crate::clock::now_rfc3339;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Active,
    RollingBack,
    RolledBack,
    RollbackFailed,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Run,
    First,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Success,
    Failed,
}

/// One statement executed through a [`TrackedGateway`].
#[derive(Debug, Clone, Serialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub query: String,
    pub params: Vec<serde_json::Value>,
    pub timestamp: String,
    pub status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// An entry replayed when a transaction rolls back.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum RollbackOperation {
    /// Synthesized `DELETE ... WHERE rowid = ?` for a tracked insert.
    #[serde(rename = "rollback_delete")]
    Delete {
        table: String,
        row_id: i64,
        statement: Statement,
    },
    /// Caller-supplied undo registered with its forward statement.
    #[serde(rename = "rollback_compensate")]
    Compensate {
        description: String,
        statement: Statement,
    },
    /// A change that cannot be undone. Reported, never executed.
    #[serde(rename = "rollback_warning")]
    Warning {
        description: String,
        recommendation: Option<String>,
        query: String,
    },
}

pub(crate) struct TransactionState {
    pub(crate) id: String,
    pub(crate) started: Instant,
    pub(crate) start_time: String,
    pub(crate) status: TransactionStatus,
    pub(crate) operations: Vec<Operation>,
    /// Newest first, so iteration order is reverse execution order.
    pub(crate) rollback_ops: VecDeque<RollbackOperation>,
    pub(crate) force_rolled_back: bool,
    pub(crate) forced_outcome: Option<super::RollbackOutcome>,
}

impl TransactionState {
    pub(crate) fn new(id: String) -> Self {
        TransactionState {
            id,
            started: Instant::now(),
            start_time: now_rfc3339(),
            status: TransactionStatus::Active,
            operations: Vec::new(),
            rollback_ops: VecDeque::new(),
            force_rolled_back: false,
            forced_outcome: None,
        }
    }
}

pub(crate) type SharedState = Arc<Mutex<TransactionState>>;

pub(crate) fn lock(state: &SharedState) -> MutexGuard<'_, TransactionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A [`StatementGateway`] that records every statement of one transaction
/// and collects the rollback operations for it.
///
/// Cloning is cheap; clones share the same transaction record.
#[derive(Clone)]
pub struct TrackedGateway {
    inner: Arc<dyn StatementGateway>,
    state: SharedState,
}

impl TrackedGateway {
    pub(crate) fn new(inner: Arc<dyn StatementGateway>, state: SharedState) -> Self {
        TrackedGateway { inner, state }
    }

    pub fn transaction_id(&self) -> String {
        lock(&self.state).id.clone()
    }

    pub fn start_time(&self) -> String {
        lock(&self.state).start_time.clone()
    }

    pub fn operations(&self) -> Vec<Operation> {
        lock(&self.state).operations.clone()
    }

    /// Pending rollback entries, newest first.
    pub fn rollback_operations(&self) -> Vec<RollbackOperation> {
        lock(&self.state).rollback_ops.iter().cloned().collect()
    }

    /// Run `forward` and, if it succeeds, register `undo` as its exact
    /// reversal instead of synthesizing one.
    pub async fn run_with_undo(
        &self,
        forward: &Statement,
        undo: Statement,
        description: impl Into<String>,
    ) -> Result<RunResult, StorageError> {
        let result = self.inner.run(forward).await;
        match &result {
            Ok(res) => {
                self.record(OperationKind::Run, forward, Ok(run_summary(res)));
                self.push_rollback(RollbackOperation::Compensate {
                    description: description.into(),
                    statement: undo,
                });
            }
            Err(e) => self.record(OperationKind::Run, forward, Err(e.to_string())),
        }
        result
    }

    fn record(
        &self,
        kind: OperationKind,
        statement: &Statement,
        outcome: Result<serde_json::Value, String>,
    ) {
        let (status, result, error) = match outcome {
            Ok(v) => (OperationStatus::Success, Some(v), None),
            Err(e) => (OperationStatus::Failed, None, Some(e)),
        };
        lock(&self.state).operations.push(Operation {
            kind,
            query: statement.query.clone(),
            params: statement.params.clone(),
            timestamp: now_rfc3339(),
            status,
            result,
            error,
        });
    }

    fn push_rollback(&self, op: RollbackOperation) {
        lock(&self.state).rollback_ops.push_front(op);
    }
}

fn run_summary(res: &RunResult) -> serde_json::Value {
    serde_json::json!({
        "success": res.success,
        "last_row_id": res.meta.last_row_id,
        "changes": res.meta.changes,
    })
}

#[async_trait]
impl StatementGateway for TrackedGateway {
    async fn run(&self, statement: &Statement) -> Result<RunResult, StorageError> {
        let result = self.inner.run(statement).await;
        match &result {
            Ok(res) => {
                self.record(OperationKind::Run, statement, Ok(run_summary(res)));
                if let Some(op) = synthesize_rollback(statement, res) {
                    self.push_rollback(op);
                }
            }
            Err(e) => self.record(OperationKind::Run, statement, Err(e.to_string())),
        }
        result
    }

    async fn first(&self, statement: &Statement) -> Result<Option<Row>, StorageError> {
        let result = self.inner.first(statement).await;
        let outcome = match &result {
            Ok(row) => Ok(serde_json::json!({ "found": row.is_some() })),
            Err(e) => Err(e.to_string()),
        };
        self.record(OperationKind::First, statement, outcome);
        result
    }

    async fn all(&self, statement: &Statement) -> Result<Vec<Row>, StorageError> {
        let result = self.inner.all(statement).await;
        let outcome = match &result {
            Ok(rows) => Ok(serde_json::json!({ "rows": rows.len() })),
            Err(e) => Err(e.to_string()),
        };
        self.record(OperationKind::All, statement, outcome);
        result
    }
}
