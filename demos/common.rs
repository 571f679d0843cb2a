//! Shared setup for the demo programs.

use std::num::ParseIntError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Logs to stderr, filtered by `RUST_LOG` (default `info`).
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Flag raised on Ctrl+C.
pub fn termination_flag() -> Result<Arc<AtomicBool>> {
    let term = Arc::new(AtomicBool::new(false));
    let handler_term = term.clone();
    ctrlc::set_handler(move || handler_term.store(true, Ordering::SeqCst))?;
    Ok(term)
}

/// Accepts `0x88dc` or `88dc`.
pub fn parse_ethertype(s: &str) -> std::result::Result<u16, ParseIntError> {
    u16::from_str_radix(s.trim_start_matches("0x"), 16)
}
