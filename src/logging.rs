//! Subscriber setup for the `mailshot` binary.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt, Layer,
};

use crate::error::MailError;

/// Environment variable that overrides the level chosen by `-v`/`-q`.
pub const LOG_ENV: &str = "MAILSHOT_LOG";

/// Level for a verbosity count (`-q` = -1, default 0, each `-v` +1).
pub fn level_for(verbosity: i8) -> LevelFilter {
    match verbosity {
        i8::MIN..=-1 => LevelFilter::WARN,
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

fn parse_level(level: &str) -> Option<LevelFilter> {
    match level.to_ascii_lowercase().as_str() {
        "off" => Some(LevelFilter::OFF),
        "error" => Some(LevelFilter::ERROR),
        "warn" => Some(LevelFilter::WARN),
        "info" => Some(LevelFilter::INFO),
        "debug" => Some(LevelFilter::DEBUG),
        "trace" => Some(LevelFilter::TRACE),
        _ => None,
    }
}

/// Install the global subscriber: a compact stderr layer and, when
/// `log_file` is given, a plain-text layer appending to that file.
///
/// Only `mailshot` events are shown below TRACE.
pub fn init(verbosity: i8, log_file: Option<&Path>) -> Result<(), MailError> {
    let level = std::env::var(LOG_ENV)
        .ok()
        .and_then(|value| parse_level(&value))
        .unwrap_or_else(|| level_for(verbosity));

    let ours = move |metadata: &tracing::Metadata<'_>| {
        level == LevelFilter::TRACE || metadata.target().starts_with("mailshot")
    };

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| MailError::Io(format!("cannot open log file {}: {}", path.display(), e)))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                    .with_writer(Mutex::new(file))
                    .with_filter(level)
                    .with_filter(FilterFn::new(ours)),
            )
        }
        None => None,
    };

    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(false)
                .with_line_number(false)
                .with_target(false)
                .compact()
                .with_ansi(true)
                .with_writer(std::io::stderr)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .with_filter(level)
                .with_filter(FilterFn::new(ours)),
        )
        .with(file_layer)
        .try_init()
        .map_err(|e| MailError::Configuration(format!("logging already initialised: {}", e)))
}
