//! Error taxonomy shared by every service, plus the bounded in-process
//! error log.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Serialize;
use tether_storage::StorageError;

use crate::clock::now_rfc3339;
use crate::resource::ResourceAssignment;
use crate::transaction::RollbackOutcome;

/// A failure inside [`TransactionManager::execute_transaction`]
/// after rollback has been attempted.
///
/// [`TransactionManager::execute_transaction`]: crate::TransactionManager::execute_transaction
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("transaction {transaction_id} failed after {retry_count} retries: {message}")]
pub struct TransactionError {
    pub transaction_id: String,
    /// Message of the error that aborted the unit of work.
    pub message: String,
    pub rollback: RollbackOutcome,
    pub retry_count: u32,
    /// Wall time from the first attempt to the final failure.
    pub duration_ms: u64,
}

/// All errors returned by the resource services.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    /// Bad input shape or value. Never retried.
    #[error("{message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// A referenced project, resource or transaction is missing or inactive.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Uniqueness or primary-assignment violation.
    #[error("{message}")]
    Conflict {
        message: String,
        existing: Option<Box<ResourceAssignment>>,
    },

    /// Failure inside a transaction, with its rollback outcome.
    #[error(transparent)]
    Transaction(Box<TransactionError>),

    /// Unexpected internal or storage failure.
    #[error("system error: {0}")]
    System(String),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation {
            message: message.into(),
            field: None,
        }
    }

    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        ServiceError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        ServiceError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Stable machine-readable code for the error's taxonomy class.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Validation { .. } => "VALIDATION_ERROR",
            ServiceError::NotFound { .. } => "RESOURCE_NOT_FOUND",
            ServiceError::Conflict { .. } => "CONFLICT",
            ServiceError::Transaction(_) => "TRANSACTION_ERROR",
            ServiceError::System(_) => "SYSTEM_ERROR",
        }
    }

    /// Errors raised by a unit of work from its own checks, as opposed to
    /// infrastructure failures. These keep their class through a transaction.
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            ServiceError::Validation { .. }
                | ServiceError::NotFound { .. }
                | ServiceError::Conflict { .. }
        )
    }

    pub fn recovery_options(&self) -> Vec<String> {
        let opts: &[&str] = match self {
            ServiceError::Validation { .. } => &[
                "Correct the highlighted input and retry",
                "Check allowed values for enumerated fields",
            ],
            ServiceError::NotFound { .. } => &[
                "Verify the identifier is correct",
                "Check that the resource is active or enabled",
                "List available resources for the project",
            ],
            ServiceError::Conflict { .. } => &[
                "Update the existing assignment instead",
                "Unassign the existing resource first",
                "Import with conflict resolution 'skip' or 'overwrite'",
            ],
            ServiceError::Transaction(t) if t.rollback.success => &[
                "Retry the operation",
                "No partial changes were left behind",
            ],
            ServiceError::Transaction(_) => &[
                "Inspect rollback warnings and errors for partial changes",
                "Retry the operation once the data has been checked",
            ],
            ServiceError::System(_) => &[
                "Retry the operation",
                "Check storage availability and logs",
            ],
        };
        opts.iter().map(|s| s.to_string()).collect()
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            code: self.code().to_string(),
            message: self.to_string(),
            recovery_options: self.recovery_options(),
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(e: StorageError) -> Self {
        ServiceError::System(e.to_string())
    }
}

impl From<TransactionError> for ServiceError {
    fn from(e: TransactionError) -> Self {
        ServiceError::Transaction(Box::new(e))
    }
}

/// Caller-facing rendering of a [`ServiceError`].
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
    pub recovery_options: Vec<String>,
}

// ──────────────────────────────────────────────
// ErrorLog
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub code: String,
    pub message: String,
    /// The operation that failed, e.g. `"assign_resource"`.
    pub context: String,
    pub timestamp: String,
}

/// Fixed-capacity log of recent service errors. Oldest entries are evicted
/// first. Process-local and not durable.
#[derive(Debug)]
pub struct ErrorLog {
    capacity: usize,
    entries: Mutex<VecDeque<ErrorRecord>>,
}

impl ErrorLog {
    pub fn new(capacity: usize) -> Self {
        ErrorLog {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, error: &ServiceError, context: &str) {
        let record = ErrorRecord {
            code: error.code().to_string(),
            message: error.to_string(),
            context: context.to_string(),
            timestamp: now_rfc3339(),
        };
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(record);
    }

    /// Snapshot of the log, oldest first.
    pub fn recent(&self) -> Vec<ErrorRecord> {
        self.entries
            .lock()
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
