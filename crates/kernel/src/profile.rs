//! Code-size and runtime profile collection.
//!
//! The size pass parses a symbol-size dump of the plain binary. The runtime
//! pass executes the instrumented binary under the emulator for every
//! repeat and run variant, merges the sample files into one accumulated
//! profile, and parses the resulting flat-profile report. Both passes block
//! on their external tools on purpose: nothing else useful can run while
//! they do.

use std::collections::HashMap;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use benchkernel_proto::addr::AddrCodec;

use crate::config::KernelConfig;
use crate::error::{Error, Result};
use crate::registry::ActiveFuncs;

/// Output of the plain build.
pub const PLAIN_BINARY: &str = "main.elf";

/// Output of the instrumented build.
pub const INSTRUMENTED_BINARY: &str = "pg_main.elf";

const SYMTAB_FILE: &str = "symtab";
const GMON_OUT: &str = "gmon.out";
const GMON_SUM: &str = "gmon.sum";

/// Emulator command prefix for running cross-built binaries.
const EMULATOR: &[&str] = &["qemu-aarch64", "-L", "/usr/aarch64-linux-gnu"];

/// Lines of column headers before flat-profile data rows.
const FLAT_PROFILE_HEADER_LINES: usize = 5;

/// Per-token code size in bytes.
pub type SizeTable = HashMap<String, i32>;

/// Per-token `(runtime_percent, runtime_seconds)`.
pub type RuntimeTable = HashMap<String, (f64, f64)>;

/// Extracts size and runtime tables for the current cycle.
pub struct ProfileCollector<'a> {
	config: &'a KernelConfig,
	codec: &'a AddrCodec,
}

impl<'a> ProfileCollector<'a> {
	/// Create a collector bound to the kernel configuration.
	#[must_use]
	pub fn new(config: &'a KernelConfig, codec: &'a AddrCodec) -> Self {
		Self { config, codec }
	}

	fn tool(&self, name: &str) -> String {
		format!("{}{name}", self.config.tool_prefix)
	}

	/// Size pass: symbol-size dump over the plain binary.
	pub async fn collect_sizes(&self) -> Result<SizeTable> {
		let output = Command::new(self.tool("nm"))
			.args(["--print-size", "--size-sort", "--radix=d", PLAIN_BINARY])
			.output()
			.await?;
		if !output.status.success() {
			return Err(Error::Tool {
				tool: "nm",
				status: output.status,
			});
		}
		Ok(parse_size_report(
			&String::from_utf8_lossy(&output.stdout),
			self.codec,
		))
	}

	/// Runtime pass: emulated instrumented runs, merged into one profile.
	pub async fn collect_runtimes(&self, active: &ActiveFuncs) -> Result<RuntimeTable> {
		self.dump_symtab().await?;
		let mut sum_exists = false;
		for _ in 0..self.config.bench_repeats {
			for variant in &self.config.run_variants {
				self.run_instrumented(variant).await?;
				self.merge_samples(sum_exists).await?;
				sum_exists = true;
			}
		}

		let report = Command::new(self.tool("gprof"))
			.args(["-bp", "--no-demangle", INSTRUMENTED_BINARY, GMON_SUM])
			.output()
			.await?;
		// The sample files are stale the moment the report exists; drop them
		// whether or not it parses.
		let _ = std::fs::remove_file(GMON_OUT);
		let _ = std::fs::remove_file(GMON_SUM);
		if !report.status.success() {
			return Err(Error::Tool {
				tool: "gprof",
				status: report.status,
			});
		}
		Ok(parse_flat_profile(
			&String::from_utf8_lossy(&report.stdout),
			active,
			self.codec,
		))
	}

	/// Symbol table used by the sample merge to attribute addresses.
	async fn dump_symtab(&self) -> Result<()> {
		let output = Command::new(self.tool("nm"))
			.args([
				"--extern-only",
				"--defined-only",
				"-v",
				"--print-file-name",
				INSTRUMENTED_BINARY,
			])
			.output()
			.await?;
		if !output.status.success() {
			return Err(Error::Tool {
				tool: "nm",
				status: output.status,
			});
		}
		std::fs::write(SYMTAB_FILE, &output.stdout)?;
		Ok(())
	}

	/// One emulated run of the instrumented binary. The benchmark's own
	/// exit status is deliberately ignored; only its `gmon.out` matters.
	async fn run_instrumented(&self, variant: &str) -> Result<()> {
		let mut command = Command::new(EMULATOR[0]);
		command.args(&EMULATOR[1..]);
		command.arg(format!("./{INSTRUMENTED_BINARY}"));
		command.args(variant.split_whitespace());
		command.stdout(Stdio::null()).stderr(Stdio::null());
		let mut child = command.spawn()?;
		if self.config.can_renice
			&& let Some(pid) = child.id()
		{
			let _ = Command::new("sudo")
				.args(["renice", "-n", "0", &pid.to_string()])
				.status()
				.await;
		}
		let status = child.wait().await?;
		debug!(%variant, %status, "instrumented run finished");
		Ok(())
	}

	async fn merge_samples(&self, sum_exists: bool) -> Result<()> {
		let mut command = Command::new(self.tool("gprof"));
		command.args(["-s", "-Ssymtab", INSTRUMENTED_BINARY, GMON_OUT]);
		if sum_exists {
			command.arg(GMON_SUM);
		}
		let status = command.status().await?;
		if !status.success() {
			return Err(Error::Tool {
				tool: "gprof",
				status,
			});
		}
		Ok(())
	}
}

/// Parse `nm --print-size` output: `address size type name`, decimal radix.
/// Only text (code) symbols land in the table.
fn parse_size_report(report: &str, codec: &AddrCodec) -> SizeTable {
	let mut sizes = SizeTable::new();
	for line in report.lines() {
		let fields: Vec<&str> = line.split_whitespace().collect();
		let &[_, size, kind, name] = fields.as_slice() else {
			continue;
		};
		if !kind.eq_ignore_ascii_case("t") {
			continue;
		}
		let Ok(size) = size.parse::<i32>() else {
			warn!(%line, "unparsable size row");
			continue;
		};
		sizes.insert(codec.encode(name), size);
	}
	sizes
}

/// Parse a brief flat profile: `%time cumulative self [calls ...] name`.
///
/// A report with no accumulated time at all zero-fills every active
/// function instead of omitting them.
fn parse_flat_profile(report: &str, active: &ActiveFuncs, codec: &AddrCodec) -> RuntimeTable {
	let mut runtimes = RuntimeTable::new();
	if report.lines().any(|line| line.trim() == "no time accumulated") {
		for token in active.keys() {
			runtimes.insert(token.clone(), (0.0, 0.0));
		}
		return runtimes;
	}
	for line in report.lines().skip(FLAT_PROFILE_HEADER_LINES) {
		let fields: Vec<&str> = line.split_whitespace().collect();
		if fields.len() < 4 {
			continue;
		}
		let (percent, seconds, name) = (fields[0], fields[2], fields[fields.len() - 1]);
		let (Ok(percent), Ok(seconds)) = (percent.parse::<f64>(), seconds.parse::<f64>()) else {
			warn!(%line, "unparsable flat profile row");
			continue;
		};
		runtimes.insert(codec.encode(name), (percent, seconds));
	}
	runtimes
}
