//! Binary entry point for the codetrail CLI.
//!
//! ## Usage
//!
//! ```bash
//! # Merge storage dumps into the project's index database
//! codetrail index build/dumps/
//!
//! # Show counters and stored indexing errors
//! codetrail stats
//! codetrail errors
//!
//! # Drop everything located in a file before re-indexing it
//! codetrail purge src/main.cpp
//! ```

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use signal_hook::consts::SIGINT;
use tracing::info;

use codetrail::dump::{discover_dumps, load_dump};
use codetrail::pipeline::IndexingRun;
use codetrail_core::config::{CliOverrides, ResolvedConfig};
use codetrail_core::error::{CodetrailError, OutputErrorCode};
use codetrail_core::output::{
    emit_response, ClearResponse, ErrorResponse, ErrorsResponse, IndexResponse, PurgeResponse,
    StatsResponse, SCHEMA_VERSION,
};
use codetrail_core::sqlite::{SqliteIndexStorage, StorageMode};
use codetrail_core::storage::LockedStorage;

// ============================================================================
// CLI Structure
// ============================================================================

/// Merge code index fragments into a persistent index database.
///
/// All output is JSON on stdout; logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "codetrail", version, about = "Merge code index fragments into a SQLite index")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

/// Global arguments shared by all subcommands.
#[derive(Parser, Debug)]
struct GlobalArgs {
    /// Project root holding codetrail.toml (default: current directory).
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    /// Index database path (overrides codetrail.toml and CODETRAIL_DB).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log level for tracing output.
    #[arg(long, global = true, value_enum, default_value = "warn")]
    log_level: LogLevel,

    /// Log line format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,
}

/// Log level for tracing output.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Merge storage dumps (*.json files or directories of them) into the index.
    ///
    /// Ctrl-C stops taking new dumps; what was already loaded is still
    /// written to the database and the response reports `interrupted`.
    Index {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Producer threads (overrides codetrail.toml and CODETRAIL_THREADS).
        #[arg(long)]
        threads: Option<usize>,
        /// Pending storages before producers wait.
        #[arg(long)]
        max_pending: Option<usize>,
        /// Wipe the database before indexing.
        #[arg(long)]
        clear: bool,
    },
    /// Print database counters.
    Stats,
    /// Print stored indexing errors.
    Errors,
    /// Remove everything located in the given files, plus their errors.
    Purge {
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Remove all content from the database.
    Clear,
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.global.log_level, cli.global.log_format);

    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let error_code = OutputErrorCode::from(&err);
            let response = ErrorResponse::from_error(&err);

            // Errors go to stdout as JSON like every other response.
            let _ = emit_response(&response, &mut io::stdout());
            let _ = io::stdout().flush();

            ExitCode::from(error_code.code())
        }
    }
}

/// Initialize tracing subscriber. `RUST_LOG` wins over `--log-level`.
fn init_tracing(level: LogLevel, format: LogFormat) {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_tracing_level().to_string()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn execute(cli: Cli) -> Result<(), CodetrailError> {
    match cli.command {
        Command::Index {
            paths,
            threads,
            max_pending,
            clear,
        } => emit(&run_index(&cli.global, &paths, threads, max_pending, clear)?),
        Command::Stats => emit(&run_stats(&cli.global)?),
        Command::Errors => emit(&run_errors(&cli.global)?),
        Command::Purge { files } => emit(&run_purge(&cli.global, &files)?),
        Command::Clear => emit(&run_clear(&cli.global)?),
    }
}

fn emit<T: Serialize>(response: &T) -> Result<(), CodetrailError> {
    emit_response(response, &mut io::stdout()).map_err(|e| CodetrailError::internal(e.to_string()))?;
    let _ = io::stdout().flush();
    Ok(())
}

// ============================================================================
// Command Executors
// ============================================================================

fn resolve_config(
    global: &GlobalArgs,
    overrides: CliOverrides,
) -> Result<ResolvedConfig, CodetrailError> {
    let project_root = match &global.project {
        Some(root) => root.clone(),
        None => std::env::current_dir()
            .map_err(|e| CodetrailError::internal(format!("failed to get current directory: {}", e)))?,
    };
    let overrides = CliOverrides {
        database: global.db.clone(),
        ..overrides
    };
    Ok(ResolvedConfig::resolve(&project_root, &overrides)?)
}

/// Open an existing database; commands other than `index` never create one.
fn open_existing(path: &Path, mode: StorageMode) -> Result<SqliteIndexStorage, CodetrailError> {
    if !path.exists() {
        return Err(CodetrailError::not_found(path.display().to_string()));
    }
    Ok(SqliteIndexStorage::open(path, mode)?)
}

fn run_index(
    global: &GlobalArgs,
    paths: &[PathBuf],
    threads: Option<usize>,
    max_pending: Option<usize>,
    clear: bool,
) -> Result<IndexResponse, CodetrailError> {
    let config = resolve_config(
        global,
        CliOverrides {
            threads,
            max_pending_storages: max_pending,
            ..CliOverrides::default()
        },
    )?;
    let dumps = discover_dumps(paths)?;

    let db_path = config.database.value.clone();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            CodetrailError::internal(format!("failed to create {}: {}", parent.display(), e))
        })?;
    }

    let mode = if clear {
        StorageMode::READ_WRITE | StorageMode::CLEAR
    } else {
        StorageMode::READ_WRITE
    };
    let mut storage = SqliteIndexStorage::open(&db_path, mode)?;
    let rebuilt = storage.was_rebuilt();
    if let Some(settings) = &config.project_settings {
        storage.set_project_settings_text(settings)?;
    }
    // Lookup indices only slow the bulk insert down.
    storage.set_mode(StorageMode::WRITE)?;

    let destination = LockedStorage::new(storage);
    let run = IndexingRun::new(config.threads.value, config.max_pending_storages.value);
    install_interrupt_handler(&run)?;
    let report = run.run(&dumps, |path: &PathBuf| load_dump(path), &destination)?;

    let mut storage = destination.into_inner();
    storage.set_mode(StorageMode::READ_WRITE)?;
    let stats = storage.get_stats()?;
    info!(database = %db_path.display(), nodes = stats.node_count, "index updated");

    Ok(IndexResponse {
        status: "ok".to_string(),
        schema_version: SCHEMA_VERSION.to_string(),
        database: db_path.display().to_string(),
        rebuilt,
        units_total: report.units_total,
        units_indexed: report.units_indexed,
        units_failed: report.units_failed,
        interrupted: report.interrupted,
        merges: report.merges,
        merging: report.merging,
        injection: report.injection,
        storage: stats,
    })
}

/// Route Ctrl-C to the run's interrupt flag. Units already produced are
/// still injected; files of units cut short are marked incomplete.
fn install_interrupt_handler(run: &IndexingRun) -> Result<(), CodetrailError> {
    signal_hook::flag::register(SIGINT, run.interrupt_handle())
        .map_err(|e| CodetrailError::internal(format!("failed to install SIGINT handler: {}", e)))?;
    Ok(())
}

fn run_stats(global: &GlobalArgs) -> Result<StatsResponse, CodetrailError> {
    let config = resolve_config(global, CliOverrides::default())?;
    let storage = open_existing(&config.database.value, StorageMode::READ)?;
    Ok(StatsResponse::new(
        config.database.value.display().to_string(),
        SqliteIndexStorage::get_static_version(),
        storage.get_stats()?,
    ))
}

fn run_errors(global: &GlobalArgs) -> Result<ErrorsResponse, CodetrailError> {
    let config = resolve_config(global, CliOverrides::default())?;
    let storage = open_existing(&config.database.value, StorageMode::READ)?;
    Ok(ErrorsResponse::new(
        config.database.value.display().to_string(),
        storage.get_errors()?,
    ))
}

fn run_purge(global: &GlobalArgs, files: &[String]) -> Result<PurgeResponse, CodetrailError> {
    let config = resolve_config(global, CliOverrides::default())?;
    let mut storage = open_existing(&config.database.value, StorageMode::READ_WRITE)?;

    let mut file_ids = Vec::new();
    let mut purged = Vec::new();
    let mut not_found = Vec::new();
    for path in files {
        match storage.get_file_by_path(path)? {
            Some(file) => {
                file_ids.push(file.id);
                purged.push(path.clone());
            }
            None => not_found.push(path.clone()),
        }
    }

    storage.remove_elements_with_location_in_files(&file_ids)?;
    // The file records go too, so a re-index starts from fresh flags.
    storage.remove_elements(&file_ids)?;
    let errors_removed = storage.remove_errors_in_files(files)?;

    Ok(PurgeResponse::new(
        config.database.value.display().to_string(),
        purged,
        not_found,
        errors_removed,
    ))
}

fn run_clear(global: &GlobalArgs) -> Result<ClearResponse, CodetrailError> {
    let config = resolve_config(global, CliOverrides::default())?;
    let mut storage = open_existing(&config.database.value, StorageMode::WRITE)?;
    storage.clear()?;
    Ok(ClearResponse::new(config.database.value.display().to_string()))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use codetrail::dump::write_dump;
    use codetrail_core::intermediate::IntermediateStorage;
    use codetrail_core::types::{
        ErrorRecord, File, LocationKind, Node, NodeKind, Occurrence, SourceLocation,
    };
    use tempfile::TempDir;

    fn global_for(project: &Path) -> GlobalArgs {
        GlobalArgs {
            project: Some(project.to_path_buf()),
            db: Some(project.join("index.sqlite")),
            log_level: LogLevel::Warn,
            log_format: LogFormat::Text,
        }
    }

    /// A dump for `path` defining `symbol`, with one non-fatal error.
    fn write_unit(dir: &Path, path: &str, symbol: &str) {
        let mut storage = IntermediateStorage::new();
        let file = storage.add_node(&Node::new(NodeKind::File, path));
        storage.add_file(&File::new(file, path).with_line_count(3));
        let node = storage.add_node(&Node::new(NodeKind::Function, symbol));
        let location =
            storage.add_source_location(&SourceLocation::new(file, (1, 1), (1, 5), LocationKind::Token));
        storage.add_occurrence(Occurrence::new(node, location));
        storage.add_error(&ErrorRecord::new("unused", path).with_location(path, 2, 1));
        write_dump(&storage, &dir.join(format!("{}.json", symbol))).unwrap();
    }

    mod parse_tests {
        use super::*;

        #[test]
        fn index_takes_paths_and_flags() {
            let cli = Cli::try_parse_from([
                "codetrail",
                "--db",
                "x.sqlite",
                "index",
                "dumps",
                "more.json",
                "--threads",
                "3",
                "--clear",
            ])
            .unwrap();
            assert_eq!(cli.global.db, Some(PathBuf::from("x.sqlite")));
            match cli.command {
                Command::Index {
                    paths,
                    threads,
                    max_pending,
                    clear,
                } => {
                    assert_eq!(paths.len(), 2);
                    assert_eq!(threads, Some(3));
                    assert_eq!(max_pending, None);
                    assert!(clear);
                }
                other => panic!("unexpected command {:?}", other),
            }
        }

        #[test]
        fn index_requires_a_path() {
            assert!(Cli::try_parse_from(["codetrail", "index"]).is_err());
            assert!(Cli::try_parse_from(["codetrail", "purge"]).is_err());
        }

        #[test]
        fn global_flags_after_subcommand() {
            let cli =
                Cli::try_parse_from(["codetrail", "stats", "--log-level", "debug", "--log-format", "json"])
                    .unwrap();
            assert!(matches!(cli.global.log_level, LogLevel::Debug));
            assert_eq!(cli.global.log_format, LogFormat::Json);
        }

        #[test]
        fn log_levels_convert() {
            assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
            assert_eq!(LogLevel::Warn.to_tracing_level(), tracing::Level::WARN);
            assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        }
    }

    mod command_tests {
        use super::*;

        #[cfg(unix)]
        #[test]
        fn sigint_interrupts_the_run() {
            use std::sync::atomic::Ordering;

            let run = IndexingRun::new(1, 4);
            install_interrupt_handler(&run).unwrap();
            assert!(!run.interrupt_handle().load(Ordering::SeqCst));

            signal_hook::low_level::raise(SIGINT).unwrap();
            assert!(run.interrupt_handle().load(Ordering::SeqCst));
        }

        #[test]
        fn index_then_stats() {
            let project = TempDir::new().unwrap();
            let dumps = project.path().join("dumps");
            std::fs::create_dir(&dumps).unwrap();
            write_unit(&dumps, "a.cpp", "alpha");
            write_unit(&dumps, "b.cpp", "beta");
            let global = global_for(project.path());

            let response = run_index(&global, &[dumps], Some(2), None, false).unwrap();
            assert_eq!(response.units_total, 2);
            assert_eq!(response.units_indexed, 2);
            assert!(!response.rebuilt);
            assert_eq!(response.storage.file_count, 2);
            assert_eq!(response.storage.node_count, 4);
            assert_eq!(response.storage.error_count, 2);

            let stats = run_stats(&global).unwrap();
            assert_eq!(stats.stats, response.storage);
            assert_eq!(run_errors(&global).unwrap().count, 2);
        }

        #[test]
        fn purge_then_reindex() {
            let project = TempDir::new().unwrap();
            write_unit(project.path(), "a.cpp", "alpha");
            let global = global_for(project.path());
            let dump = project.path().join("alpha.json");

            run_index(&global, std::slice::from_ref(&dump), None, None, false).unwrap();
            let purge =
                run_purge(&global, &["a.cpp".to_string(), "missing.cpp".to_string()]).unwrap();
            assert_eq!(purge.files_purged, vec!["a.cpp"]);
            assert_eq!(purge.files_not_found, vec!["missing.cpp"]);
            assert_eq!(purge.errors_removed, 1);
            assert_eq!(run_stats(&global).unwrap().stats.node_count, 0);

            let again = run_index(&global, &[dump], None, None, false).unwrap();
            assert_eq!(again.storage.node_count, 2);
        }

        #[test]
        fn stats_without_database_is_not_found() {
            let project = TempDir::new().unwrap();
            let err = run_stats(&global_for(project.path())).unwrap_err();
            assert_eq!(OutputErrorCode::from(&err), OutputErrorCode::NotFound);
        }

        #[test]
        fn clear_empties_database() {
            let project = TempDir::new().unwrap();
            write_unit(project.path(), "a.cpp", "alpha");
            let global = global_for(project.path());
            run_index(&global, &[project.path().join("alpha.json")], None, None, false).unwrap();

            run_clear(&global).unwrap();
            let stats = run_stats(&global).unwrap().stats;
            assert_eq!(stats.node_count, 0);
            assert_eq!(stats.error_count, 0);
        }
    }
}
