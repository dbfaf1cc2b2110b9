//! Logging initialization and configuration.
//!
//! Two setups, picked by `logging.production`:
//! - **Production**: JSON lines to daily files, compact plain stdout for journald
//! - **Development**: pretty stdout with span open/close events

use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::Context;
use footfall_core::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable overriding the configured log level.
pub const LOG_LEVEL_ENV: &str = "FOOTFALL_LOG_LEVEL";

const LOG_FILE_PREFIX: &str = "footfall";

/// Flush guards for the non-blocking writers.
/// Dropping one loses whatever is still buffered, so they live until exit.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDOUT_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize the global subscriber.
///
/// The filter is taken from `RUST_LOG` when set, otherwise from
/// `FOOTFALL_LOG_LEVEL`, otherwise from `logging.level`.
///
/// # Production Mode
///
/// - Daily files `footfall.<date>.log` under `logging.directory`
///   (`/var/log/footfall/` on Linux by default), keeping `logging.retained_files`
/// - JSON lines with thread ids and source locations in the files
/// - Compact stdout without ANSI colors for the systemd journal
///
/// # Development Mode
///
/// - Pretty stdout only, with span events so link and request spans show up
///
/// # Errors
///
/// Returns an error if the filter does not parse or the log directory
/// cannot be created.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = resolve_level(std::env::var(LOG_LEVEL_ENV).ok(), &config.level);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&level))
        .with_context(|| format!("invalid log filter '{level}'"))?;

    if config.production {
        init_production(env_filter, config)
    } else {
        init_development(env_filter);
        Ok(())
    }
}

fn resolve_level(from_env: Option<String>, configured: &str) -> String {
    from_env
        .filter(|level| !level.trim().is_empty())
        .unwrap_or_else(|| configured.to_string())
}

fn init_production(env_filter: EnvFilter, config: &LoggingConfig) -> anyhow::Result<()> {
    let log_dir = resolve_directory(config);
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("cannot create log directory {}", log_dir.display()))?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(config.retained_files)
        .build(&log_dir)
        .with_context(|| format!("cannot open log files in {}", log_dir.display()))?;
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    // journald adds its own timestamps
    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .without_time()
        .with_writer(stdout_writer)
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);

    tracing::info!(
        directory = %log_dir.display(),
        retained = config.retained_files,
        "File logging enabled"
    );
    Ok(())
}

fn init_development(env_filter: EnvFilter) {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}

fn resolve_directory(config: &LoggingConfig) -> PathBuf {
    config.directory.clone().unwrap_or_else(log_directory)
}

/// Platform default for `logging.directory`.
fn log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/footfall")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "footfall")
            .map(|dirs| dirs.data_dir().join("logs"))
            .unwrap_or_else(|| PathBuf::from("./logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directory_is_valid_path() {
        let dir = log_directory();
        assert!(dir.ends_with("footfall") || dir.ends_with("logs"));
    }

    #[test]
    fn test_configured_directory_overrides_default() {
        let mut config = LoggingConfig::default();
        assert_eq!(resolve_directory(&config), log_directory());

        config.directory = Some(PathBuf::from("/srv/footfall/logs"));
        assert_eq!(resolve_directory(&config), PathBuf::from("/srv/footfall/logs"));
    }

    #[test]
    fn test_env_level_wins_over_config() {
        assert_eq!(resolve_level(Some("debug".into()), "info"), "debug");
        assert_eq!(resolve_level(None, "warn"), "warn");
        // Blank means unset.
        assert_eq!(resolve_level(Some("  ".into()), "warn"), "warn");
    }

    #[test]
    fn test_configured_levels_parse_as_filters() {
        for level in ["trace", "debug", "info", "warn", "error", "footfall_core=debug,info"] {
            assert!(EnvFilter::try_new(level).is_ok(), "{level}");
        }
    }
}
