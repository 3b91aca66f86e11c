//! Behavioural checks every `StatementGateway` backend must satisfy.
//!
//! Each check gets its own freshly opened gateway from a caller-supplied
//! factory and records a [`TestResult`] instead of panicking, so one call
//! reports every broken behaviour at once. Checks are grouped by the
//! submodule that defines them: `run`, `query`, `error` and `concurrent`.
//!
//! ```ignore
//! let report = tether_storage::conformance::run_conformance_suite(|| async {
//!     tether_storage::SqliteGateway::open_in_memory().unwrap()
//! })
//! .await;
//! assert_eq!(report.failed, 0, "{report}");
//! ```

mod concurrent;
mod error;
mod query;
mod run;

use std::fmt;
use std::future::Future;

use crate::traits::GatewayExt;
use crate::StatementGateway;

/// Outcome of one check, keyed by `category/name`.
#[derive(Debug, Clone)]
pub struct TestResult {
    pub category: String,
    pub name: String,
    pub passed: bool,
    /// Set only when `passed` is false.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Every [`TestResult`] from one run, with pass and fail tallies.
/// `Display` prints a summary line followed by each failure.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Runs every check, calling `factory` once per check for an empty gateway.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: StatementGateway + 'static,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(run::run_run_tests(&factory).await);
    results.extend(query::run_query_tests(&factory).await);
    results.extend(error::run_error_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

const CREATE_ITEMS: &str = "CREATE TABLE conformance_items (\
     id INTEGER PRIMARY KEY AUTOINCREMENT, \
     name TEXT NOT NULL UNIQUE, \
     score INTEGER, \
     note TEXT)";

/// Build a fresh gateway with the `conformance_items` table created.
async fn fresh<S, F, Fut>(factory: &F) -> Result<S, String>
where
    S: StatementGateway,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let gw = factory().await;
    gw.prepare(CREATE_ITEMS)
        .run()
        .await
        .map_err(|e| format!("create table: {e}"))?;
    Ok(gw)
}

async fn insert_item<S: StatementGateway + ?Sized>(
    gw: &S,
    name: &str,
    score: i64,
) -> Result<crate::RunResult, String> {
    gw.prepare("INSERT INTO conformance_items (name, score) VALUES (?, ?)")
        .bind([serde_json::json!(name), serde_json::json!(score)])
        .run()
        .await
        .map_err(|e| format!("insert {name}: {e}"))
}

async fn count_items<S: StatementGateway + ?Sized>(gw: &S) -> Result<i64, String> {
    let row = gw
        .prepare("SELECT COUNT(*) AS n FROM conformance_items")
        .first()
        .await
        .map_err(|e| format!("count: {e}"))?
        .ok_or_else(|| "count returned no row".to_string())?;
    row.get("n")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| format!("count column missing or not an integer: {row:?}"))
}
