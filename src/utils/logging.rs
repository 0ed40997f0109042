//! Tracing subscriber setup for the `medchat` binary.
//!
//! `RUST_LOG` wins over `logging.level`. Events go to stderr unless
//! `logging.file` is set, which keeps stdout free for chat replies.

use std::sync::Arc;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};
use crate::error::Result;

fn filter_for(cfg: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level))
}

fn writer_for(cfg: &LoggingConfig) -> Result<BoxMakeWriter> {
    Ok(match &cfg.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    })
}

/// Install the global subscriber. Call once, before the first event.
///
/// # Errors
/// Returns an error if `logging.file` cannot be opened for appending.
pub fn init_logging(cfg: &LoggingConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter_for(cfg))
        .with_writer(writer_for(cfg)?);

    match cfg.format {
        LogFormat::Json => builder.json().with_current_span(true).init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Component => builder.compact().with_target(true).init(),
    }
    Ok(())
}
