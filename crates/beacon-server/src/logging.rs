//! Logging setup for the server.
//!
//! - **Production**: JSON logs to daily files + compact logs to stdout
//! - **Development**: Pretty logs to stdout with span events

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// File name prefix for rolled log files.
const LOG_FILE_PREFIX: &str = "beacon";

// Dropping a guard stops its writer thread.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDOUT_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize logging.
///
/// The filter comes from `RUST_LOG`, then `BEACON_LOG_LEVEL`, then `info`.
///
/// # Production Mode
///
/// - Logs to daily files in `log_dir`, or `/var/log/beacon/` when unset
/// - Also logs to stdout for the service manager
/// - JSON format in files, compact without ANSI colors on stdout
///
/// # Development Mode
///
/// - Pretty stdout with span open/close events
///
/// # Errors
///
/// Returns an error if the filter cannot be parsed or the log directory
/// cannot be created.
pub fn init(is_production: bool, log_dir: Option<&Path>) -> anyhow::Result<()> {
    let env_filter = build_filter(std::env::var("BEACON_LOG_LEVEL").ok().as_deref())?;

    if is_production {
        let dir = log_dir.map_or_else(default_log_directory, Path::to_path_buf);
        init_production(env_filter, &dir)?;
    } else {
        init_development(env_filter);
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise `level`, otherwise `info`.
fn build_filter(level: Option<&str>) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    Ok(EnvFilter::try_new(level.unwrap_or("info"))?)
}

fn init_production(env_filter: EnvFilter, log_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_PREFIX);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
    let (non_blocking_stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_stdout)
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);
    Ok(())
}

fn init_development(env_filter: EnvFilter) {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}

fn default_log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/beacon")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "beacon")
            .map(|dirs| dirs.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("./logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_directory_is_named_for_beacon() {
        let dir = default_log_directory();
        assert!(dir.to_string_lossy().contains("beacon") || dir.ends_with("logs"));
    }

    #[test]
    fn test_build_filter_accepts_level_directives() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert!(build_filter(Some("beacon_core=debug,warn")).is_ok());
        assert!(build_filter(None).is_ok());
    }
}
