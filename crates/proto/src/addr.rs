//! Bounded-length address encoding and the peer address grammar.
//!
//! Every function symbol that crosses an addressing boundary is first pushed
//! through [`AddrCodec::encode`], which guarantees the composed socket name
//! `<benchmark>:<token>_<instance>` fits the 108-byte `sun_path` limit.
//! Encoding is one-directional: a hashed token cannot be mapped back to its
//! symbol, and two distinct over-budget names may in principle collide.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use sha2::{Digest as _, Sha256};

/// Hard length limit of a UNIX socket name, including the composed address.
pub const SUN_PATH_MAX: usize = 108;

/// Hard length limit of a function token on its own.
pub const TOKEN_MAX: usize = 100;

/// Identity of one kernel process: benchmark name plus instance number.
///
/// Both fields participate in every socket name this kernel binds or
/// addresses, so two kernels for the same benchmark can coexist on a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelIdentity {
	/// Benchmark name, as passed on the command line.
	pub bench_name: String,
	/// Instance number of this kernel.
	pub instance: u32,
}

impl KernelIdentity {
	/// Abstract socket name the kernel binds for peer registrations.
	#[must_use]
	pub fn backend_name(&self) -> String {
		format!("{}:backend_{}", self.bench_name, self.instance)
	}

	/// Canonical abstract socket name of the peer owning `token`.
	#[must_use]
	pub fn peer_name(&self, token: &str) -> String {
		format!("{}:{}_{}", self.bench_name, token, self.instance)
	}
}

/// Filesystem socket name the kernel binds toward the compiler plugin.
#[must_use]
pub fn kernel_socket_name(pid: u32) -> String {
	format!("kernel{pid}.soc")
}

/// Filesystem socket name the compiler plugin binds toward the kernel.
#[must_use]
pub fn plugin_socket_name(pid: u32) -> String {
	format!("gcc_plugin{pid}.soc")
}

/// Deterministic mapping from function symbols to addressing-safe tokens.
#[derive(Debug, Clone)]
pub struct AddrCodec {
	identity: KernelIdentity,
}

impl AddrCodec {
	/// Create a codec whose length budget is derived from `identity`.
	#[must_use]
	pub fn new(identity: KernelIdentity) -> Self {
		Self { identity }
	}

	/// Encode a function symbol into a token usable inside a socket name.
	///
	/// Anything after the first `.` is a compiler clone-numbering artifact
	/// and is stripped. Names that fit both the per-token limit and the
	/// remaining `sun_path` budget pass through unchanged; longer names are
	/// replaced by the URL-safe base64 of their SHA-256 digest (44 chars).
	#[must_use]
	pub fn encode(&self, fun_name: &str) -> String {
		let base = match fun_name.split_once('.') {
			Some((head, _)) => head,
			None => fun_name,
		};
		let overhead =
			self.identity.bench_name.len() + self.identity.instance.to_string().len() + 2;
		let budget = SUN_PATH_MAX.saturating_sub(overhead);
		if base.len() > budget || base.len() > TOKEN_MAX {
			URL_SAFE.encode(Sha256::digest(base.as_bytes()))
		} else {
			base.to_owned()
		}
	}
}

/// A parsed peer address: the typed form of `<benchmark>:<token>_<instance>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddr {
	/// Benchmark name the peer believes it belongs to.
	pub bench_name: String,
	/// Encoded function token the peer is registered for.
	pub fun_token: String,
	/// Kernel instance number the peer targets.
	pub instance: u32,
}

impl PeerAddr {
	/// Parse a socket name against the peer address grammar.
	///
	/// The benchmark name is everything before the last `:`, the instance is
	/// the digits after the last `_`, the token is what sits between. Empty
	/// fields and non-numeric instances are rejected.
	pub fn parse(name: &str) -> Result<Self, AddrError> {
		let (bench_name, rest) = name
			.rsplit_once(':')
			.ok_or_else(|| AddrError::Malformed(name.to_owned()))?;
		let (fun_token, instance) = rest
			.rsplit_once('_')
			.ok_or_else(|| AddrError::Malformed(name.to_owned()))?;
		if bench_name.is_empty() || fun_token.is_empty() {
			return Err(AddrError::Malformed(name.to_owned()));
		}
		let instance = instance
			.parse::<u32>()
			.map_err(|_| AddrError::BadInstance(name.to_owned()))?;
		Ok(Self {
			bench_name: bench_name.to_owned(),
			fun_token: fun_token.to_owned(),
			instance,
		})
	}
}

/// Violations of the peer address grammar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddrError {
	/// The name does not split into `<benchmark>:<token>_<instance>`.
	#[error("address {0:?} does not match <benchmark>:<token>_<instance>")]
	Malformed(String),
	/// The instance field is not a decimal number.
	#[error("address {0:?} has a non-numeric instance field")]
	BadInstance(String),
}
