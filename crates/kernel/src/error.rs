//! Error taxonomy of the kernel pipeline.
//!
//! Only the variants of [`Error`] terminate the process; recoverable
//! conditions (a peer vanishing before result delivery, a missing size or
//! runtime entry) are logged at their site and never surface here.

use std::io;
use std::process::ExitStatus;

use benchkernel_proto::addr::AddrError;
use benchkernel_proto::descriptor::DescriptorError;

/// A convenient alias for `Result` with `E` = [`enum@Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Fatal kernel errors. All of them map to exit code 1.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// A peer broke the registration protocol. Misconfiguration must never
	/// pass silently.
	#[error("protocol violation: {0}")]
	Protocol(#[from] Violation),
	/// The compiler could not be spawned at all.
	#[error("failed to start compiler {program:?}: {source}")]
	CompilerSpawn {
		/// The program that failed to spawn.
		program: String,
		/// The underlying spawn error.
		source: io::Error,
	},
	/// The compiler exited before binding its plugin socket.
	#[error("compiler failed on startup: {0}")]
	CompilerStartup(ExitStatus),
	/// The compiler exited non-zero after running. The whole compilation
	/// unit is failed, with no per-function retry.
	#[error("compiler failed: {0}")]
	CompilerFailed(ExitStatus),
	/// An external profiling tool exited non-zero.
	#[error("{tool} failed: {status}")]
	Tool {
		/// Tool name, e.g. `nm` or `gprof`.
		tool: &'static str,
		/// Its exit status.
		status: ExitStatus,
	},
	/// The compiler sent a query that is not valid UTF-8.
	#[error("compiler sent a malformed query: {0}")]
	Query(std::str::Utf8Error),
	/// The benchmark descriptor is missing or unusable.
	#[error("benchmark descriptor: {0}")]
	Descriptor(#[from] DescriptorError),
	/// Required configuration is missing or inconsistent.
	#[error("configuration: {0}")]
	Config(String),
	/// A termination or interrupt signal aborted the pipeline.
	#[error("interrupted")]
	Interrupted,
	/// Endpoint or filesystem errors underneath the pipeline.
	#[error(transparent)]
	Io(#[from] io::Error),
}

/// Fatal peer protocol violations, reported with enough detail to spot the
/// misconfigured environment.
#[derive(Debug, thiserror::Error)]
pub enum Violation {
	/// The sender bound no abstract name, so it can never receive results.
	#[error("registration from an unnamed or non-abstract sender address")]
	UnnamedSender,
	/// The sender's name does not match the address grammar.
	#[error("sender address does not parse: {0}")]
	Malformed(#[from] AddrError),
	/// The peer targets a different benchmark.
	#[error("wrong benchmark name: expected {expected:?}, got {got:?}")]
	BenchName {
		/// This kernel's benchmark name.
		expected: String,
		/// The name carried by the peer address.
		got: String,
	},
	/// The peer targets a different kernel instance.
	#[error("wrong instance number: expected {expected}, got {got}")]
	Instance {
		/// This kernel's instance number.
		expected: u32,
		/// The instance carried by the peer address.
		got: u32,
	},
	/// The peer registered for a symbol the benchmark does not declare.
	#[error("unknown function token {token:?}")]
	UnknownFunction {
		/// The offending token.
		token: String,
	},
}
