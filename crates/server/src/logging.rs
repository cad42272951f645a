//! Structured logging to `<data_dir>/logs/server.log`.
//!
//! Every line carries the run id through the request span built in
//! [`crate::routes`], so one process's requests can be pulled out of a log
//! that spans restarts.

use std::path::Path;

use clap::ValueEnum;
use ring::rand::{SecureRandom, SystemRandom};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use assessment_protocol::log_filter;

const DEFAULT_FILTER: &str = "info,tower_http=warn,hyper=warn";
const LOG_FILE: &str = "server.log";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

pub struct LoggingHandle {
    pub run_id: String,
    /// Dropping this flushes and stops the background writer.
    pub guard: WorkerGuard,
}

pub fn init_logging(log_dir: &Path, format: LogFormat) -> anyhow::Result<LoggingHandle> {
    std::fs::create_dir_all(log_dir)?;

    let resolved = log_filter::from_env(DEFAULT_FILTER);
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, LOG_FILE));

    let json = (format == LogFormat::Json).then(|| {
        fmt::layer()
            .with_writer(writer.clone())
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
    });
    let pretty = (format == LogFormat::Pretty).then(|| {
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .pretty()
    });

    tracing_subscriber::registry()
        .with(resolved.filter)
        .with(json)
        .with(pretty)
        .init();

    let run_id = new_run_id()?;
    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        run_id = %run_id,
        log_path = %log_dir.join(LOG_FILE).display(),
        format = ?format,
        filter = %resolved.directive,
    );

    Ok(LoggingHandle { run_id, guard })
}

/// 64 random bits as hex.
fn new_run_id() -> anyhow::Result<String> {
    let mut bytes = [0u8; 8];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| anyhow::anyhow!("system random source unavailable"))?;
    Ok(bytes.iter().map(|b| format!("{b:02x}")).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_are_distinct_hex() {
        let a = new_run_id().unwrap();
        let b = new_run_id().unwrap();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
