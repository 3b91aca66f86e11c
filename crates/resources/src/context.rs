//! The process-wide service context.

use std::sync::Arc;

use tether_storage::StatementGateway;

use crate::config::TetherConfig;
use crate::error::{ErrorLog, ServiceError};
use crate::transaction::TransactionManager;

/// Everything the services share: the gateway, the transaction manager,
/// the error log and the loaded configuration.
///
/// Built once at startup and handed to every service as an `Arc`.
pub struct ServiceContext {
    pub gateway: Arc<dyn StatementGateway>,
    pub transactions: TransactionManager,
    pub errors: ErrorLog,
    pub config: TetherConfig,
}

impl ServiceContext {
    pub fn new(gateway: Arc<dyn StatementGateway>, config: TetherConfig) -> Arc<Self> {
        let transactions =
            TransactionManager::with_defaults(gateway.clone(), config.transactions.options());
        Arc::new(ServiceContext {
            gateway,
            transactions,
            errors: ErrorLog::new(config.errors.log_capacity),
            config,
        })
    }

    /// A context with default configuration.
    pub fn with_gateway(gateway: Arc<dyn StatementGateway>) -> Arc<Self> {
        Self::new(gateway, TetherConfig::default())
    }

    /// Log `error` and append it to the error log. Returns the error so
    /// callers can write `Err(ctx.report(e, "op"))`.
    pub fn report(&self, error: ServiceError, context: &str) -> ServiceError {
        if error.is_domain() {
            tracing::info!(
                target: "tether::service",
                operation = context,
                code = error.code(),
                error = %error,
                "request rejected"
            );
        } else {
            tracing::error!(
                target: "tether::service",
                operation = context,
                code = error.code(),
                error = %error,
                "request failed"
            );
        }
        self.errors.record(&error, context);
        error
    }

    /// Pass `result` through, reporting its error if any.
    pub fn track<T>(&self, result: Result<T, ServiceError>, context: &str) -> Result<T, ServiceError> {
        result.map_err(|e| self.report(e, context))
    }
}
