//! Compiler subprocess bridge.
//!
//! Drives exactly one compilation pass: spawn the compiler with the plugin
//! arguments, wait for the plugin's socket to appear while watching for an
//! early exit, then relay pass lists and capture feature payloads one
//! outstanding query at a time until the compiler exits. The spawned child
//! is parked in a slot owned by the kernel loop, so the final cleanup can
//! still wait on it when the pass is abandoned halfway.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::process::{Child, Command};
use tokio::time::{Duration, sleep};
use tracing::{debug, error};

use benchkernel_proto::addr::AddrCodec;
use benchkernel_proto::wire;

use crate::config::KernelConfig;
use crate::endpoint::DatagramEndpoint;
use crate::error::{Error, Result};
use crate::profile;
use crate::registry::ActiveFuncs;

/// How often subprocess liveness is checked while waiting for readiness.
const READY_POLL: Duration = Duration::from_millis(10);

/// Which of the two per-cycle builds to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
	/// Regular optimized build, measured for code size.
	Plain,
	/// `-pg` build executed under the emulator for runtime profiling.
	Instrumented,
}

impl BuildMode {
	fn output(self) -> &'static str {
		match self {
			Self::Plain => profile::PLAIN_BINARY,
			Self::Instrumented => profile::INSTRUMENTED_BINARY,
		}
	}
}

/// Feature payloads captured during one pass, keyed by encoded token.
pub type Embeddings = HashMap<String, Vec<u8>>;

/// Bridge between the kernel and one compiler subprocess.
pub struct CompilerBridge<'a> {
	endpoint: &'a DatagramEndpoint,
	codec: &'a AddrCodec,
	program: String,
	base_args: Vec<String>,
	plugin_socket: PathBuf,
	embed_multiplier: usize,
	skip_default_payload: bool,
}

impl<'a> CompilerBridge<'a> {
	/// Build a bridge from the kernel configuration.
	#[must_use]
	pub fn new(
		config: &KernelConfig,
		endpoint: &'a DatagramEndpoint,
		codec: &'a AddrCodec,
		kernel_socket: &Path,
		plugin_socket: &Path,
	) -> Self {
		let postfix = std::process::id();
		let mut base_args = vec![
			format!("-fplugin={}", config.plugin_path.display()),
			"-O2".to_owned(),
			"-fplugin-arg-plugin-dyn_replace=learning".to_owned(),
			format!("-fplugin-arg-plugin-remote_socket={}", kernel_socket.display()),
			format!("-fplugin-arg-plugin-socket_postfix={postfix}"),
		];
		base_args.extend(config.build_args.iter().cloned());
		Self {
			endpoint,
			codec,
			program: config.compiler.clone(),
			base_args,
			plugin_socket: plugin_socket.to_path_buf(),
			embed_multiplier: config.embed_multiplier,
			skip_default_payload: config.skip_default_payload,
		}
	}

	/// Bridge toward an arbitrary command standing in for the compiler.
	#[must_use]
	pub fn with_command(
		endpoint: &'a DatagramEndpoint,
		codec: &'a AddrCodec,
		program: impl Into<String>,
		base_args: Vec<String>,
		plugin_socket: PathBuf,
		embed_multiplier: usize,
		skip_default_payload: bool,
	) -> Self {
		Self {
			endpoint,
			codec,
			program: program.into(),
			base_args,
			plugin_socket,
			embed_multiplier,
			skip_default_payload,
		}
	}

	/// Run one compilation pass. The child lives in `slot` for the whole
	/// pass; on success the slot is emptied again, on failure the child (or
	/// its corpse) stays there for the kernel's bounded teardown wait.
	pub async fn run(
		&self,
		slot: &mut Option<Child>,
		mode: BuildMode,
		active: &ActiveFuncs,
	) -> Result<Embeddings> {
		let child = slot.insert(self.spawn(mode)?);
		self.await_ready(child).await?;
		let embeddings = self.exchange(child, active).await?;
		*slot = None;
		Ok(embeddings)
	}

	fn spawn(&self, mode: BuildMode) -> Result<Child> {
		let mut command = Command::new(&self.program);
		command.args(&self.base_args);
		if mode == BuildMode::Instrumented {
			command.arg("-pg");
		}
		command.arg("-o").arg(mode.output());
		command.kill_on_drop(true);
		debug!(?mode, program = %self.program, "starting compiler");
		command.spawn().map_err(|source| Error::CompilerSpawn {
			program: self.program.clone(),
			source,
		})
	}

	/// Readiness handshake: the plugin announces itself by binding its
	/// socket path. An exit before that, whatever the status, is fatal.
	async fn await_ready(&self, child: &mut Child) -> Result<()> {
		loop {
			if self.plugin_socket.exists() {
				return Ok(());
			}
			if let Some(status) = child.try_wait()? {
				error!(%status, "compiler exited before binding its socket");
				return Err(Error::CompilerStartup(status));
			}
			sleep(READY_POLL).await;
		}
	}

	async fn exchange(
		&self,
		child: &mut Child,
		active: &ActiveFuncs,
	) -> Result<Embeddings> {
		let mut embeddings = Embeddings::new();
		let mut query = vec![0u8; wire::QUERY_MAX];
		let mut payload = vec![0u8; wire::EMBED_UNIT * self.embed_multiplier];
		loop {
			tokio::select! {
				status = child.wait() => {
					return finished(status?).map(|()| embeddings);
				}
				received = self.endpoint.recv_from(&mut query) => {
					let (len, _) = received?;
					let fun_name =
						std::str::from_utf8(&query[..len]).map_err(Error::Query)?;
					let token = self.codec.encode(fun_name);
					if let Some(pass_list) = active.get(&token) {
						debug!(%token, "sending pass list");
						self.endpoint
							.send_to_path(pass_list, &self.plugin_socket)
							.await?;
						match self.recv_payload(child, &mut payload).await? {
							Some(len) => {
								debug!(%token, len, "captured feature payload");
								embeddings.insert(token, payload[..len].to_vec());
							}
							None => return Ok(embeddings),
						}
					} else {
						debug!(%token, "no pass list, default policy");
						self.endpoint
							.send_to_path(&wire::NO_DECISION, &self.plugin_socket)
							.await?;
						if !self.skip_default_payload
							&& self.recv_payload(child, &mut payload).await?.is_none()
						{
							return Ok(embeddings);
						}
					}
				}
			}
		}
	}

	/// Wait for one feature payload, still watching for compiler exit so a
	/// crash mid-protocol cannot hang the kernel. `None` means the compiler
	/// finished cleanly instead of sending.
	async fn recv_payload(&self, child: &mut Child, buf: &mut [u8]) -> Result<Option<usize>> {
		tokio::select! {
			status = child.wait() => {
				finished(status?).map(|()| None)
			}
			received = self.endpoint.recv_from(buf) => {
				let (len, _) = received?;
				Ok(Some(len))
			}
		}
	}
}

fn finished(status: std::process::ExitStatus) -> Result<()> {
	if status.success() {
		debug!("compiler exited cleanly");
		Ok(())
	} else {
		error!(%status, "compiler failed");
		Err(Error::CompilerFailed(status))
	}
}
