mod commands;
mod session;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tether_resources::{ConflictResolution, ServiceError};

use crate::session::Session;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Tether project resource manager.
#[derive(Parser)]
#[command(name = "tether", version, about = "Tether project resource manager")]
struct Cli {
    /// SQLite database file (overrides `[database] path`)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Configuration file
    #[arg(long, global = true, default_value = "tether.toml")]
    config: PathBuf,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the schema, optionally seeding it from a catalog JSON file
    Init {
        /// Catalog of projects, resources and dependencies
        #[arg(long)]
        seed: Option<PathBuf>,
    },

    /// Assign a resource to a project
    Assign {
        project: i64,
        /// agent, rule or hook
        resource_type: String,
        resource_id: String,
        /// Make this the project's primary resource of its kind
        #[arg(long)]
        primary: bool,
        /// Position in the project's list (default: after the last)
        #[arg(long)]
        order: Option<i64>,
        /// JSON object of per-project overrides
        #[arg(long)]
        overrides: Option<String>,
        /// Who made the assignment
        #[arg(long)]
        by: Option<String>,
        /// Why the resource was assigned
        #[arg(long)]
        reason: Option<String>,
    },

    /// Remove a resource from a project
    Unassign {
        project: i64,
        resource_type: String,
        resource_id: String,
    },

    /// Change an existing assignment
    Update {
        project: i64,
        resource_type: String,
        resource_id: String,
        /// Set or clear the primary flag
        #[arg(long)]
        primary: Option<bool>,
        #[arg(long)]
        order: Option<i64>,
        /// JSON object of per-project overrides
        #[arg(long)]
        overrides: Option<String>,
        #[arg(long)]
        reason: Option<String>,
    },

    /// List a project's assignments
    List {
        project: i64,
        /// Only this kind of resource
        #[arg(long = "type")]
        resource_type: Option<String>,
    },

    /// List active resources not yet assigned to a project
    Available {
        project: i64,
        #[arg(long = "type")]
        resource_type: Option<String>,
    },

    /// Import resources listed in a JSON file into a project
    Import {
        project: i64,
        /// JSON array of {resource_type, resource_id, is_primary?, ...}
        file: PathBuf,
        /// What to do with resources that are already assigned
        #[arg(long, default_value = "skip")]
        conflict: ConflictResolution,
        /// Do not record dependencies of imported resources
        #[arg(long)]
        no_deps: bool,
        #[arg(long)]
        by: Option<String>,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Show what an import would do without writing anything
    Preview {
        project: i64,
        file: PathBuf,
        /// Leave dependency lists out of the report
        #[arg(long)]
        no_deps: bool,
        /// Skip compatibility scoring
        #[arg(long)]
        no_scores: bool,
    },

    /// Show a resource's explicit and inferred dependencies
    Deps {
        resource_type: String,
        resource_id: String,
    },

    /// Validate a resource definition from a JSON file
    Validate {
        resource_type: String,
        file: PathBuf,
    },

    /// Check whether a project's assigned resources can be exported
    ExportCheck { project: i64 },
}

fn main() {
    let cli = Cli::parse();

    let config = session::load_config(&cli.config, cli.output, cli.quiet);
    session::init_tracing(&config);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            report_error(&format!("failed to create tokio runtime: {}", e), cli.output, cli.quiet);
            process::exit(1);
        }
    };

    let output = cli.output;
    let quiet = cli.quiet;
    rt.block_on(async move {
        let session = Session::open(cli.db.as_deref(), config, output, quiet).await;
        dispatch(&session, cli.command).await;
    });
}

async fn dispatch(session: &Session, command: Commands) {
    match command {
        Commands::Init { seed } => commands::init::cmd_init(session, seed.as_deref()).await,
        Commands::Assign {
            project,
            resource_type,
            resource_id,
            primary,
            order,
            overrides,
            by,
            reason,
        } => {
            commands::assign::cmd_assign(
                session,
                commands::assign::AssignArgs {
                    project,
                    resource_type: &resource_type,
                    resource_id: &resource_id,
                    primary,
                    order,
                    overrides: overrides.as_deref(),
                    by,
                    reason,
                },
            )
            .await;
        }
        Commands::Unassign {
            project,
            resource_type,
            resource_id,
        } => commands::assign::cmd_unassign(session, project, &resource_type, &resource_id).await,
        Commands::Update {
            project,
            resource_type,
            resource_id,
            primary,
            order,
            overrides,
            reason,
        } => {
            commands::assign::cmd_update(
                session,
                project,
                &resource_type,
                &resource_id,
                commands::assign::UpdateArgs {
                    primary,
                    order,
                    overrides: overrides.as_deref(),
                    reason,
                },
            )
            .await;
        }
        Commands::List {
            project,
            resource_type,
        } => commands::assign::cmd_list(session, project, resource_type.as_deref()).await,
        Commands::Available {
            project,
            resource_type,
        } => commands::assign::cmd_available(session, project, resource_type.as_deref()).await,
        Commands::Import {
            project,
            file,
            conflict,
            no_deps,
            by,
            reason,
        } => {
            commands::import::cmd_import(session, project, &file, conflict, !no_deps, by, reason)
                .await;
        }
        Commands::Preview {
            project,
            file,
            no_deps,
            no_scores,
        } => commands::import::cmd_preview(session, project, &file, !no_deps, !no_scores).await,
        Commands::Deps {
            resource_type,
            resource_id,
        } => commands::check::cmd_deps(session, &resource_type, &resource_id).await,
        Commands::Validate {
            resource_type,
            file,
        } => commands::check::cmd_validate(session, &resource_type, &file),
        Commands::ExportCheck { project } => commands::check::cmd_export_check(session, project).await,
    }
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}

/// Print a service failure with its code and recovery options, then exit 1.
pub(crate) fn exit_with(err: &ServiceError, output: OutputFormat, quiet: bool) -> ! {
    if !quiet {
        let report = err.report();
        match output {
            OutputFormat::Text => {
                eprintln!("error [{}]: {}", report.code, report.message);
                for option in &report.recovery_options {
                    eprintln!("  - {}", option);
                }
            }
            OutputFormat::Json => {
                eprintln!("{}", serde_json::json!({ "error": report }));
            }
        }
    }
    process::exit(1);
}

/// Print `value` as pretty JSON on stdout.
pub(crate) fn print_json<T: Serialize>(value: &T) {
    let pretty = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\": \"serialization error: {}\"}}", e));
    println!("{}", pretty);
}
