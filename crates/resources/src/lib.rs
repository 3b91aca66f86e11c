//! Transactional resource management for Tether.
//!
//! Projects get agents, rules and hooks assigned to them. The storage
//! gateway runs one statement at a time with no native transactions, so the
//! [`TransactionManager`] groups statements into units of work and undoes
//! them on failure. [`ResourceAssignmentService`] and [`ImportPlanner`] build
//! on it; [`DependencyResolver`] and [`Validator`] check resource sets
//! before they are imported or exported.
//!
//! All services share one [`ServiceContext`], built at startup:
//!
//! ```ignore
//! let gateway = Arc::new(SqliteGateway::open("tether.db")?);
//! apply_schema(gateway.as_ref()).await?;
//! let ctx = ServiceContext::new(gateway, TetherConfig::load_or_default(path)?);
//! let assignments = ResourceAssignmentService::new(ctx.clone());
//! assignments.assign_resource(1, "agent", "a1", AssignOptions::default()).await?;
//! ```

pub mod assignment;
pub mod catalog;
mod clock;
pub mod config;
pub mod context;
pub mod dependency;
pub mod error;
pub mod import;
pub mod resource;
pub mod schema;
pub mod transaction;
pub mod validator;

pub use assignment::{AssignOptions, AssignmentUpdate, ResourceAssignmentService};
pub use catalog::{load_catalog, Catalog, CatalogCounts};
pub use config::{ConfigError, TetherConfig};
pub use context::ServiceContext;
pub use dependency::{
    analyze_dependencies, DependencyEdge, DependencyResolver, DependencyValidation,
    MissingDependency,
};
pub use error::{ErrorLog, ErrorRecord, ErrorReport, ServiceError, TransactionError};
pub use import::{
    compatibility_score, ConflictResolution, ImportItem, ImportOptions, ImportPlanner,
    ImportPreview, ImportResult, ImportSummary, PreviewOptions, ResourcePreview,
};
pub use resource::{Project, ResourceAssignment, ResourceKey, ResourceSummary, ResourceType};
pub use schema::apply_schema;
pub use transaction::{
    is_retryable, ActiveTransaction, RollbackOperation, RollbackOutcome, TrackedGateway,
    TransactionManager, TransactionOptions, TransactionStatus,
};
pub use validator::{
    validate_resource_definition, ExportResource, ExportValidation, ValidationReport, Validator,
};
