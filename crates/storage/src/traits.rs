use async_trait::async_trait;

use crate::error::StorageError;
use crate::statement::{Row, RunResult, Statement};

/// The statement-execution interface Tether runs on.
///
/// A `StatementGateway` executes exactly one statement per call. There is no
/// `BEGIN`/`COMMIT`: grouping statements into a unit of work, and undoing
/// them on failure, is the job of the transaction manager layered on top.
///
/// ## Call shapes
///
/// - `run()` executes a mutating statement and reports the last inserted
///   row id plus the number of changed rows.
/// - `first()` returns the first result row, or `None` for an empty result.
/// - `all()` returns every result row in backend order.
///
/// Callers normally go through [`GatewayExt::prepare`], which gives the
/// familiar `prepare(sql).bind(params).run()` chain.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` so a single gateway can be shared
/// by concurrent units of work.
#[async_trait]
pub trait StatementGateway: Send + Sync {
    /// Execute a mutating statement.
    async fn run(&self, statement: &Statement) -> Result<RunResult, StorageError>;

    /// Execute a query and return its first row, if any.
    async fn first(&self, statement: &Statement) -> Result<Option<Row>, StorageError>;

    /// Execute a query and return all rows.
    async fn all(&self, statement: &Statement) -> Result<Vec<Row>, StorageError>;
}

/// `prepare(sql)` entry point available on every gateway.
pub trait GatewayExt: StatementGateway {
    fn prepare(&self, query: &str) -> Prepared<'_, Self> {
        Prepared {
            gateway: self,
            statement: Statement::prepare(query),
        }
    }
}

impl<G: StatementGateway + ?Sized> GatewayExt for G {}

/// A statement bound to the gateway that will execute it.
pub struct Prepared<'g, G: ?Sized> {
    gateway: &'g G,
    statement: Statement,
}

impl<'g, G: StatementGateway + ?Sized> Prepared<'g, G> {
    pub fn bind<I, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<serde_json::Value>,
    {
        self.statement = self.statement.bind(params);
        self
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    pub async fn run(self) -> Result<RunResult, StorageError> {
        self.gateway.run(&self.statement).await
    }

    pub async fn first(self) -> Result<Option<Row>, StorageError> {
        self.gateway.first(&self.statement).await
    }

    pub async fn all(self) -> Result<Vec<Row>, StorageError> {
        self.gateway.all(&self.statement).await
    }
}
