//! Benchmark kernel binary.
//!
//! Expects its working directory to contain everything the benchmark build
//! and run need, including `benchmark_info.txt`. Exits 0 only when no
//! learning environment remains reachable; any fatal condition exits 1.

use std::process::ExitCode;

use clap::Parser as _;
use tracing::error;

// Library-only dependencies; referenced so the binary target passes the
// workspace unused-dependency lint.
use nix as _;
use thiserror as _;
use tracing_subscriber as _;

use benchkernel::config::{Args, DESCRIPTOR_FILE, KernelConfig};
use benchkernel::runloop::Kernel;
use benchkernel::{logging, Result};
use benchkernel_proto::descriptor::BenchDescriptor;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
	let args = Args::parse();
	if let Err(error) = logging::init(&args.log_file, args.verbose) {
		eprintln!("failed to set up logging: {error}");
		return ExitCode::FAILURE;
	}
	match run(&args).await {
		Ok(()) => ExitCode::SUCCESS,
		Err(error) => {
			error!(%error, "kernel failed");
			ExitCode::FAILURE
		}
	}
}

async fn run(args: &Args) -> Result<()> {
	let config = KernelConfig::from_args(args)?;
	let text = std::fs::read_to_string(DESCRIPTOR_FILE)?;
	let descriptor = BenchDescriptor::parse(&text)?;
	let mut kernel = Kernel::new(config, &descriptor)?;
	kernel.run().await
}
