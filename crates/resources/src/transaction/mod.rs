//! Application-level transactions over a single-statement gateway.
//!
//! The gateway has no `BEGIN`/`COMMIT`, so a "transaction" here is a unit of
//! work whose statements are recorded as they run. When the unit fails or
//! overruns its timeout, the recorded rollback operations are replayed in
//! reverse order. Inserts are undone exactly; updates and deletes are undone
//! only when the caller registered an undo with
//! [`TrackedGateway::run_with_undo`], and are otherwise reported as
//! warnings.
//!
//! Failures whose message looks transient (locked database, timeout,
//! connection trouble) re-run the whole unit immediately with a fresh
//! transaction id, up to `max_retries` times.

mod synthesis;
mod tracked;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use tether_storage::StatementGateway;
use tracing::{debug, error, info, warn};

pub use tracked::{
    Operation, OperationKind, OperationStatus, RollbackOperation, TrackedGateway,
    TransactionStatus,
};

use crate::error::{ServiceError, TransactionError};
use tracked::{lock, SharedState, TransactionState};

/// Message fragments (matched case-insensitively) that mark an error as
/// transient and the transaction as worth re-running.
pub const RETRYABLE_PATTERNS: [&str; 5] = [
    "database is locked",
    "timeout",
    "connection",
    "network",
    "temporary",
];

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Per-call transaction settings.
#[derive(Debug, Clone)]
pub struct TransactionOptions {
    /// Id for the first attempt. Retries always get fresh ids.
    pub transaction_id: Option<String>,
    pub timeout: Duration,
    /// Retries already consumed before this call.
    pub retry_count: u32,
    pub max_retries: u32,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        TransactionOptions {
            transaction_id: None,
            timeout: DEFAULT_TIMEOUT,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// What happened while replaying rollback operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackOutcome {
    /// True when no executable rollback operation failed. Warnings do not
    /// count as failures.
    pub success: bool,
    pub operations_rolled_back: usize,
    pub operations_failed: usize,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl RollbackOutcome {
    fn absorb(&mut self, other: RollbackOutcome) {
        self.operations_rolled_back += other.operations_rolled_back;
        self.operations_failed += other.operations_failed;
        self.warnings.extend(other.warnings);
        self.errors.extend(other.errors);
        self.success = self.operations_failed == 0;
    }
}

/// Observability view of an in-flight transaction.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveTransaction {
    pub id: String,
    pub status: TransactionStatus,
    pub start_time: String,
    pub duration_ms: u64,
    pub operation_count: usize,
}

/// True if `message` matches one of [`RETRYABLE_PATTERNS`].
pub fn is_retryable(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p))
}

fn new_transaction_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("tx_{}_{}", millis, suffix.to_lowercase())
}

/// Runs units of work against a gateway with tracking, timeout, rollback
/// and retry.
pub struct TransactionManager {
    gateway: Arc<dyn StatementGateway>,
    defaults: TransactionOptions,
    active: Mutex<HashMap<String, SharedState>>,
}

impl TransactionManager {
    pub fn new(gateway: Arc<dyn StatementGateway>) -> Self {
        Self::with_defaults(gateway, TransactionOptions::default())
    }

    pub fn with_defaults(gateway: Arc<dyn StatementGateway>, defaults: TransactionOptions) -> Self {
        TransactionManager {
            gateway,
            defaults,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Default options for a new transaction, as configured.
    pub fn options(&self) -> TransactionOptions {
        self.defaults.clone()
    }

    /// [`execute_transaction`](Self::execute_transaction) with the configured defaults.
    pub async fn execute<T, F, Fut>(&self, work: F) -> Result<T, ServiceError>
    where
        F: Fn(TrackedGateway) -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        self.execute_transaction(self.options(), work).await
    }

    /// Run `work` as one transaction.
    ///
    /// `work` receives a [`TrackedGateway`] and is invoked once per attempt.
    /// On failure the attempt's rollback operations are replayed, then:
    ///
    /// - validation, not-found and conflict errors are returned unchanged
    ///   when the rollback succeeded, and as [`ServiceError::Transaction`]
    ///   when it did not;
    /// - transient errors are retried while `retry_count < max_retries`;
    /// - anything else is returned as [`ServiceError::Transaction`].
    pub async fn execute_transaction<T, F, Fut>(
        &self,
        options: TransactionOptions,
        work: F,
    ) -> Result<T, ServiceError>
    where
        F: Fn(TrackedGateway) -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let started = Instant::now();
        let mut retry_count = options.retry_count;
        let mut requested_id = options.transaction_id.clone();

        loop {
            let id = requested_id.take().unwrap_or_else(new_transaction_id);
            let state: SharedState = Arc::new(Mutex::new(TransactionState::new(id.clone())));
            self.registry().insert(id.clone(), state.clone());
            debug!(target: "tether::transaction", transaction_id = %id, retry_count, "transaction started");

            let tracked = TrackedGateway::new(self.gateway.clone(), state.clone());
            let outcome = tokio::time::timeout(options.timeout, work(tracked)).await;
            let forced = lock(&state).force_rolled_back;

            let failure = match outcome {
                Ok(Ok(value)) if !forced => {
                    let operations = {
                        let mut s = lock(&state);
                        s.status = TransactionStatus::Completed;
                        s.operations.len()
                    };
                    self.registry().remove(&id);
                    debug!(
                        target: "tether::transaction",
                        transaction_id = %id,
                        operations,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "transaction completed"
                    );
                    return Ok(value);
                }
                Ok(Ok(_)) => ServiceError::System(format!("transaction {id} was force rolled back")),
                Ok(Err(e)) => e,
                Err(_) => ServiceError::System(format!(
                    "transaction timeout after {}ms",
                    options.timeout.as_millis()
                )),
            };

            let rollback = self.rollback(&state).await;
            self.registry().remove(&id);

            if failure.is_domain() && rollback.success {
                debug!(
                    target: "tether::transaction",
                    transaction_id = %id,
                    code = failure.code(),
                    error = %failure,
                    rolled_back = rollback.operations_rolled_back,
                    "transaction aborted by unit of work"
                );
                return Err(failure);
            }

            // A domain failure whose rollback failed is reported with the
            // rollback outcome attached and is never retried.
            let message = failure.to_string();
            if !failure.is_domain() && is_retryable(&message) && retry_count < options.max_retries {
                retry_count += 1;
                warn!(
                    target: "tether::transaction",
                    transaction_id = %id,
                    retry_count,
                    max_retries = options.max_retries,
                    error = %message,
                    "retrying transaction"
                );
                continue;
            }

            error!(
                target: "tether::transaction",
                transaction_id = %id,
                retry_count,
                code = failure.code(),
                error = %message,
                rollback_success = rollback.success,
                rollback_errors = ?rollback.errors,
                rollback_warnings = rollback.warnings.len(),
                "transaction failed"
            );
            return Err(TransactionError {
                transaction_id: id,
                message,
                rollback,
                retry_count,
                duration_ms: started.elapsed().as_millis() as u64,
            }
            .into());
        }
    }

    /// Transactions currently in flight, ordered by id.
    pub fn active_transactions(&self) -> Vec<ActiveTransaction> {
        let states: Vec<SharedState> = self.registry().values().cloned().collect();
        let mut out: Vec<ActiveTransaction> = states
            .iter()
            .map(|st| {
                let s = lock(st);
                ActiveTransaction {
                    id: s.id.clone(),
                    status: s.status,
                    start_time: s.start_time.clone(),
                    duration_ms: s.started.elapsed().as_millis() as u64,
                    operation_count: s.operations.len(),
                }
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Replay the rollback operations of an in-flight transaction now.
    ///
    /// A statement that is already executing is not interrupted. When the
    /// unit of work finishes it fails instead of completing, and anything
    /// it ran after this call is rolled back then.
    pub async fn force_rollback(&self, transaction_id: &str) -> Result<RollbackOutcome, ServiceError> {
        let state = self
            .registry()
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| ServiceError::not_found("transaction", transaction_id))?;

        {
            let mut s = lock(&state);
            if s.force_rolled_back {
                return Err(ServiceError::Conflict {
                    message: format!("transaction {transaction_id} was already force rolled back"),
                    existing: None,
                });
            }
            s.force_rolled_back = true;
        }

        info!(target: "tether::transaction", transaction_id, "force rollback requested");
        let outcome = self.rollback(&state).await;
        lock(&state).forced_outcome = Some(outcome.clone());
        Ok(outcome)
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, SharedState>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn rollback(&self, state: &SharedState) -> RollbackOutcome {
        let (id, ops) = {
            let mut s = lock(state);
            s.status = TransactionStatus::RollingBack;
            (s.id.clone(), std::mem::take(&mut s.rollback_ops))
        };

        let mut outcome = RollbackOutcome::default();
        for op in ops {
            match op {
                RollbackOperation::Delete {
                    table,
                    row_id,
                    statement,
                } => match self.gateway.run(&statement).await {
                    Ok(_) => outcome.operations_rolled_back += 1,
                    Err(e) => {
                        outcome.operations_failed += 1;
                        outcome
                            .errors
                            .push(format!("failed to delete row {row_id} from {table}: {e}"));
                    }
                },
                RollbackOperation::Compensate {
                    description,
                    statement,
                } => match self.gateway.run(&statement).await {
                    Ok(_) => outcome.operations_rolled_back += 1,
                    Err(e) => {
                        outcome.operations_failed += 1;
                        outcome.errors.push(format!("failed to {description}: {e}"));
                    }
                },
                RollbackOperation::Warning {
                    description,
                    recommendation,
                    ..
                } => outcome.warnings.push(match recommendation {
                    Some(r) => format!("{description}. {r}"),
                    None => description,
                }),
            }
        }
        outcome.success = outcome.operations_failed == 0;

        let mut s = lock(state);
        s.status = if outcome.success {
            TransactionStatus::RolledBack
        } else {
            TransactionStatus::RollbackFailed
        };
        if let Some(mut prior) = s.forced_outcome.take() {
            prior.absorb(outcome);
            outcome = prior;
        }
        drop(s);

        debug!(
            target: "tether::transaction",
            transaction_id = %id,
            rolled_back = outcome.operations_rolled_back,
            failed = outcome.operations_failed,
            warnings = outcome.warnings.len(),
            "rollback finished"
        );
        outcome
    }
}
