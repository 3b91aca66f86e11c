//! Config loading, log setup and the database-backed service context
//! shared by every subcommand.

use std::path::Path;
use std::process;
use std::sync::Arc;

use tether_resources::{apply_schema, ServiceContext, ServiceError, TetherConfig};
use tether_storage::SqliteGateway;
use tracing_subscriber::EnvFilter;

use crate::{exit_with, report_error, OutputFormat};

/// Default filter when neither `[log] filter` nor `RUST_LOG` is set.
const DEFAULT_LOG_FILTER: &str = "warn";

pub(crate) struct Session {
    pub(crate) ctx: Arc<ServiceContext>,
    pub(crate) output: OutputFormat,
    pub(crate) quiet: bool,
}

/// Load `path`, falling back to defaults when the file does not exist.
pub(crate) fn load_config(path: &Path, output: OutputFormat, quiet: bool) -> TetherConfig {
    match TetherConfig::load_or_default(path) {
        Ok(config) => config,
        Err(e) => {
            report_error(&e.to_string(), output, quiet);
            process::exit(1);
        }
    }
}

/// Install a stderr subscriber. `RUST_LOG` wins over the config filter.
pub(crate) fn init_tracing(config: &TetherConfig) {
    let filter = EnvFilter::try_from_default_env()
        .ok()
        .or_else(|| {
            config
                .log
                .filter
                .as_deref()
                .and_then(|f| EnvFilter::try_new(f).ok())
        })
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER));

    // A second subscriber can only come from a test harness; keep the first.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

impl Session {
    /// Open the database (`--db` over `[database] path`) and apply the schema.
    pub(crate) async fn open(
        db: Option<&Path>,
        config: TetherConfig,
        output: OutputFormat,
        quiet: bool,
    ) -> Session {
        let path = db.unwrap_or(&config.database.path).to_path_buf();
        let gateway = match SqliteGateway::open(&path) {
            Ok(g) => Arc::new(g),
            Err(e) => {
                let msg = format!("could not open database '{}': {}", path.display(), e);
                report_error(&msg, output, quiet);
                process::exit(1);
            }
        };
        if let Err(e) = apply_schema(gateway.as_ref()).await {
            exit_with(&e, output, quiet);
        }
        tracing::debug!(target: "tether::cli", db = %path.display(), "database ready");

        let ctx = ServiceContext::new(gateway, config);
        Session {
            ctx,
            output,
            quiet,
        }
    }

    /// Unwrap a service result or exit with its report.
    pub(crate) fn expect_ok<T>(&self, result: Result<T, ServiceError>) -> T {
        match result {
            Ok(value) => value,
            Err(e) => exit_with(&e, self.output, self.quiet),
        }
    }

    pub(crate) fn fail(&self, msg: &str) -> ! {
        report_error(msg, self.output, self.quiet);
        process::exit(1);
    }

    /// Read and parse a JSON file, exiting on failure.
    pub(crate) fn read_json<T: serde::de::DeserializeOwned>(&self, path: &Path) -> T {
        let content = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => self.fail(&format!("error reading file '{}': {}", path.display(), e)),
        };
        match serde_json::from_str(&content) {
            Ok(v) => v,
            Err(e) => self.fail(&format!("error parsing JSON in '{}': {}", path.display(), e)),
        }
    }

    pub(crate) fn json(&self) -> bool {
        self.output == OutputFormat::Json
    }

    /// Print a text line unless `--quiet`.
    pub(crate) fn say(&self, line: &str) {
        if !self.quiet {
            println!("{}", line);
        }
    }
}
