//! Benchmark descriptor parsing.
//!
//! The descriptor (`benchmark_info.txt` in the working directory) declares
//! every legal function symbol of the benchmark and, optionally, the subset
//! known to accumulate measurable runtime:
//!
//! ```text
//! long_functions:
//! hot_loop
//! functions:
//! hot_loop
//! helper
//! ```

/// Parsed benchmark descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchDescriptor {
	/// Every legal function symbol, in declared order.
	pub functions: Vec<String>,
	/// Symbols worth an instrumented run, when declared.
	long: Option<Vec<String>>,
}

impl BenchDescriptor {
	/// Parse descriptor text.
	///
	/// The `functions:` section is mandatory and must list at least one
	/// symbol. A `long_functions:` section is honored only ahead of
	/// `functions:`; when absent, every function counts as long-running.
	pub fn parse(text: &str) -> Result<Self, DescriptorError> {
		let lines: Vec<&str> = text.lines().map(str::trim).collect();
		let functions_at = lines
			.iter()
			.position(|line| *line == "functions:")
			.ok_or(DescriptorError::MissingFunctions)?;
		let functions: Vec<String> = lines[functions_at + 1..]
			.iter()
			.filter(|line| !line.is_empty())
			.map(|line| (*line).to_owned())
			.collect();
		if functions.is_empty() {
			return Err(DescriptorError::NoSymbols);
		}
		let long = lines
			.iter()
			.position(|line| *line == "long_functions:")
			.filter(|at| *at < functions_at)
			.map(|at| {
				lines[at + 1..functions_at]
					.iter()
					.filter(|line| !line.is_empty())
					.map(|line| (*line).to_owned())
					.collect()
			});
		Ok(Self { functions, long })
	}

	/// The long-running subset, falling back to every declared function.
	#[must_use]
	pub fn long_functions(&self) -> &[String] {
		self.long.as_deref().unwrap_or(&self.functions)
	}
}

/// Failures while parsing a benchmark descriptor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
	/// No `functions:` section present.
	#[error("descriptor is missing its `functions:` section")]
	MissingFunctions,
	/// The `functions:` section lists no symbols.
	#[error("descriptor declares no function symbols")]
	NoSymbols,
}
