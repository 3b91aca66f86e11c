pub mod conformance;
mod error;
#[cfg(feature = "sqlite")]
mod sqlite;
mod statement;
mod traits;

pub use error::StorageError;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteGateway;
pub use statement::{Row, RunMeta, RunResult, Statement};
pub use traits::{GatewayExt, Prepared, StatementGateway};
