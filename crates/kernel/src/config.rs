//! Command-line and environment configuration.
//!
//! The kernel expects every file needed to build and run the benchmark to
//! already sit in the working directory, prepared by whoever launched it.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use benchkernel_proto::addr::KernelIdentity;
use benchkernel_proto::wire;

use crate::error::{Error, Result};

/// Environment variable naming the cross compiler driver.
pub const COMPILER_ENV: &str = "AARCH_GCC";

/// Environment variable holding the binutils name prefix, e.g. `aarch64-linux-gnu-`.
pub const TOOL_PREFIX_ENV: &str = "AARCH_PREFIX";

/// Descriptor file enumerating the benchmark's legal function symbols.
pub const DESCRIPTOR_FILE: &str = "benchmark_info.txt";

/// How long the registry waits for the first registration of a cycle.
pub const FIRST_REGISTRATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Idle window after which the registration snapshot is frozen.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "benchkernel")]
#[command(about = "Benchmark kernel bridging a phase-reorder compiler to learning environments")]
pub struct Args {
	/// Benchmark name; shapes every socket name (`<name>:backend_<instance>`).
	#[arg(short = 'n', long = "name")]
	pub bench_name: String,

	/// Instance number of this kernel.
	#[arg(short = 'i', long = "instance-num")]
	pub instance: u32,

	/// Arguments to pass to the benchmark when running it; repeat the flag
	/// for multiple run variants.
	#[arg(short = 'r', long = "run")]
	pub run_string: Vec<String>,

	/// Additional arguments to pass to the compiler (whitespace-separated).
	#[arg(short = 'b', long = "build", default_value = "")]
	pub build_string: String,

	/// Feature payload ceiling, in KiB.
	#[arg(short = 'e', long = "embedding-length", default_value_t = wire::DEFAULT_EMBED_MULTIPLIER)]
	pub embed_multiplier: usize,

	/// Number of instrumented runs per run variant when profiling runtimes.
	#[arg(long = "repeats", default_value_t = 1)]
	pub bench_repeats: u32,

	/// Path to the phase reorder plugin shared object.
	#[arg(short = 'p', long = "plugin", default_value = "plugin")]
	pub plugin_path: PathBuf,

	/// Do not drain the compiler's default-policy feature payload after a
	/// "no decision" reply.
	#[arg(long = "skip-default-payload")]
	pub skip_default_payload: bool,

	/// Debug trace destination.
	#[arg(long = "log-file", default_value = "kernel.log")]
	pub log_file: PathBuf,

	/// Raise stderr diagnostics to the debug level.
	#[arg(short = 'v', long = "verbose")]
	pub verbose: bool,
}

/// Resolved kernel configuration.
#[derive(Debug, Clone)]
pub struct KernelConfig {
	/// Benchmark name and instance number.
	pub identity: KernelIdentity,
	/// Run-argument variants; always at least one (possibly empty) entry.
	pub run_variants: Vec<String>,
	/// Extra compiler arguments.
	pub build_args: Vec<String>,
	/// Feature payload ceiling multiplier (KiB units).
	pub embed_multiplier: usize,
	/// Instrumented repeats per run variant.
	pub bench_repeats: u32,
	/// Phase reorder plugin path.
	pub plugin_path: PathBuf,
	/// Skip draining default-policy feature payloads.
	pub skip_default_payload: bool,
	/// Compiler driver, from [`COMPILER_ENV`].
	pub compiler: String,
	/// Binutils name prefix, from [`TOOL_PREFIX_ENV`].
	pub tool_prefix: String,
	/// Whether instrumented runs may be reniced.
	pub can_renice: bool,
	/// First-registration wait per cycle.
	pub first_wait: Duration,
	/// Registration settle window.
	pub settle_wait: Duration,
}

impl KernelConfig {
	/// Resolve the full configuration from parsed arguments plus environment.
	pub fn from_args(args: &Args) -> Result<Self> {
		let compiler = env::var(COMPILER_ENV)
			.map_err(|_| Error::Config(format!("{COMPILER_ENV} is not set")))?;
		let tool_prefix = env::var(TOOL_PREFIX_ENV).unwrap_or_default();
		let run_variants = if args.run_string.is_empty() {
			vec![String::new()]
		} else {
			args.run_string.clone()
		};
		Ok(Self {
			identity: KernelIdentity {
				bench_name: args.bench_name.clone(),
				instance: args.instance,
			},
			run_variants,
			build_args: args.build_string.split_whitespace().map(str::to_owned).collect(),
			embed_multiplier: args.embed_multiplier,
			bench_repeats: args.bench_repeats,
			plugin_path: args.plugin_path.clone(),
			skip_default_payload: args.skip_default_payload,
			compiler,
			tool_prefix,
			can_renice: can_renice(),
			first_wait: FIRST_REGISTRATION_TIMEOUT,
			settle_wait: SETTLE_TIMEOUT,
		})
	}
}

/// Whether this process may renice benchmark runs: membership in the `nice`
/// group grants passwordless `sudo renice` on the profiling hosts.
fn can_renice() -> bool {
	let Ok(groups) = nix::unistd::getgroups() else {
		return false;
	};
	groups.iter().any(|gid| {
		nix::unistd::Group::from_gid(*gid)
			.ok()
			.flatten()
			.is_some_and(|group| group.name == "nice")
	})
}
