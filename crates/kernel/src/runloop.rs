//! Kernel loop: pipeline sequencing, signal handling, final cleanup.
//!
//! The loop owns both communication endpoints for the process lifetime and
//! repeats the six-phase pipeline until no peer remains. Every way a run
//! can end converges on one cleanup routine: a bounded wait on any live
//! compiler child, then removal of either the scratch working directory or
//! just the bridge socket.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Child;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, error, info, warn};

use benchkernel_proto::addr::{self, AddrCodec};
use benchkernel_proto::descriptor::BenchDescriptor;

use crate::bridge::{BuildMode, CompilerBridge};
use crate::config::KernelConfig;
use crate::dispatch;
use crate::endpoint::DatagramEndpoint;
use crate::error::{Error, Result};
use crate::profile::{ProfileCollector, RuntimeTable};
use crate::registry::{ActiveFuncs, EnvironmentRegistry, Gathered};

/// Bound on the teardown wait for a still-running compiler.
const COMPILER_TEARDOWN_WAIT: Duration = Duration::from_secs(30);

/// Working directories under these roots belong to the kernel and are
/// removed wholesale on exit.
const SCRATCH_ROOTS: &[&str] = &["/tmp", "/run"];

/// The long-lived kernel instance.
pub struct Kernel {
	config: KernelConfig,
	codec: AddrCodec,
	registry: EnvironmentRegistry,
	env_endpoint: DatagramEndpoint,
	gcc_endpoint: DatagramEndpoint,
	kernel_socket: PathBuf,
	plugin_socket: PathBuf,
	long_functions: HashSet<String>,
	/// At most one compiler subprocess exists at any instant.
	compiler: Option<Child>,
	/// Latest frozen decision map, kept for the post-mortem dump.
	last_active: ActiveFuncs,
}

impl Kernel {
	/// Bind both endpoints and freeze the symbol universe.
	pub fn new(config: KernelConfig, descriptor: &BenchDescriptor) -> Result<Self> {
		let codec = AddrCodec::new(config.identity.clone());
		let symbols: Vec<String> = descriptor
			.functions
			.iter()
			.map(|name| codec.encode(name))
			.collect();
		let long_functions = descriptor
			.long_functions()
			.iter()
			.map(|name| codec.encode(name))
			.collect();
		let registry = EnvironmentRegistry::new(
			config.identity.clone(),
			symbols,
			config.first_wait,
			config.settle_wait,
		);
		let pid = std::process::id();
		let kernel_socket = PathBuf::from(addr::kernel_socket_name(pid));
		let plugin_socket = PathBuf::from(addr::plugin_socket_name(pid));
		let gcc_endpoint = DatagramEndpoint::bind_path(&kernel_socket)?;
		let env_endpoint = DatagramEndpoint::bind_abstract(&config.identity.backend_name())?;
		debug!(backend = %config.identity.backend_name(), bridge = %kernel_socket.display(), "endpoints bound");
		Ok(Self {
			config,
			codec,
			registry,
			env_endpoint,
			gcc_endpoint,
			kernel_socket,
			plugin_socket,
			long_functions,
			compiler: None,
			last_active: ActiveFuncs::new(),
		})
	}

	/// Run the pipeline until no peer remains, a fatal error occurs, or a
	/// signal arrives. Cleanup runs on every one of those paths.
	pub async fn run(&mut self) -> Result<()> {
		let mut interrupt = signal(SignalKind::interrupt())?;
		let mut terminate = signal(SignalKind::terminate())?;
		let result = tokio::select! {
			result = self.pipeline() => result,
			_ = interrupt.recv() => {
				info!("interrupt received, aborting");
				Err(Error::Interrupted)
			}
			_ = terminate.recv() => {
				info!("termination requested");
				Err(Error::Interrupted)
			}
		};
		if let Err(error) = &result {
			// Post-mortem aid: which decisions were in flight when it died.
			error!(%error, pass_lists = ?self.last_active, "kernel terminating");
		}
		self.cleanup().await;
		result
	}

	async fn pipeline(&mut self) -> Result<()> {
		loop {
			debug!("compilation cycle");
			let active = match self.registry.gather(&self.env_endpoint).await? {
				Gathered::Active(active) => active,
				Gathered::NoPeers => {
					info!("no environments remain, shutting down");
					return Ok(());
				}
			};
			self.last_active = active.clone();

			let bridge = CompilerBridge::new(
				&self.config,
				&self.gcc_endpoint,
				&self.codec,
				&self.kernel_socket,
				&self.plugin_socket,
			);
			let collector = ProfileCollector::new(&self.config, &self.codec);

			let embeddings = bridge
				.run(&mut self.compiler, BuildMode::Plain, &active)
				.await?;
			debug!("compiled for size");
			let sizes = collector.collect_sizes().await?;
			debug!(symbols = sizes.len(), "collected sizes");

			// Instrumented profiling is worth it only when at least one
			// active function is known to accumulate runtime.
			let runtimes = if active
				.keys()
				.any(|token| self.long_functions.contains(token))
			{
				bridge
					.run(&mut self.compiler, BuildMode::Instrumented, &active)
					.await?;
				debug!("compiled instrumented");
				let runtimes = collector.collect_runtimes(&active).await?;
				debug!(symbols = runtimes.len(), "collected runtimes");
				runtimes
			} else {
				RuntimeTable::new()
			};

			let delivered = dispatch::send_results(
				&self.env_endpoint,
				&self.config.identity,
				&active,
				&embeddings,
				&sizes,
				&runtimes,
				&mut self.registry,
			)
			.await;
			debug!(delivered, "sent profiles");
		}
	}

	/// The single cleanup routine shared by every exit path.
	async fn cleanup(&mut self) {
		if let Some(child) = self.compiler.as_mut() {
			debug!("waiting for the compiler to settle");
			match tokio::time::timeout(COMPILER_TEARDOWN_WAIT, child.wait()).await {
				Ok(Ok(status)) => debug!(%status, "compiler exited"),
				Ok(Err(error)) => warn!(%error, "could not wait on the compiler"),
				Err(_elapsed) => warn!("compiler still running after the teardown wait"),
			}
		}
		self.compiler = None;

		match std::env::current_dir() {
			Ok(cwd) if in_scratch(&cwd) => {
				debug!(dir = %cwd.display(), "removing scratch working directory");
				if let Err(error) = std::fs::remove_dir_all(&cwd) {
					warn!(%error, "scratch directory removal failed");
				}
			}
			_ => {
				let _ = std::fs::remove_file(&self.kernel_socket);
			}
		}
	}
}

fn in_scratch(cwd: &Path) -> bool {
	SCRATCH_ROOTS.iter().any(|root| cwd.starts_with(root))
}
