//! Diagnostic and debug-trace output.
//!
//! Diagnostics meant for the operator go to stderr; the full debug trace,
//! including every pipeline phase transition, goes to the kernel log file
//! for post-mortem inspection.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::Layer as _;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Install the global subscriber: stderr at INFO (DEBUG with `verbose`) and
/// a DEBUG trace appended to `log_file`.
pub fn init(log_file: &Path, verbose: bool) -> io::Result<()> {
	let file = OpenOptions::new().create(true).append(true).open(log_file)?;
	let stderr_level = if verbose {
		LevelFilter::DEBUG
	} else {
		LevelFilter::INFO
	};
	tracing_subscriber::registry()
		.with(
			fmt::layer()
				.with_writer(io::stderr)
				.with_filter(stderr_level),
		)
		.with(
			fmt::layer()
				.with_writer(Arc::new(file))
				.with_ansi(false)
				.with_filter(LevelFilter::DEBUG),
		)
		.try_init()
		.map_err(io::Error::other)
}
