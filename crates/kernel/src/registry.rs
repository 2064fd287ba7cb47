//! Per-cycle peer registration and cross-cycle liveness tracking.
//!
//! Each cycle runs the registration state machine
//! `WAITING_FIRST -> COLLECTING -> CLOSED`: wait up to a minute for the
//! first registration, then keep draining until a quiet settle window, then
//! freeze the snapshot. When the first wait times out with nothing
//! received, the liveness prober decides between "peers still exist, keep
//! waiting" and "nobody is left, shut down".

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use benchkernel_proto::addr::{KernelIdentity, PeerAddr};
use benchkernel_proto::wire;

use crate::endpoint::{DatagramEndpoint, abstract_name};
use crate::error::{Result, Violation};

/// Frozen per-cycle snapshot: encoded function token to pass list bytes.
pub type ActiveFuncs = HashMap<String, Vec<u8>>;

/// Liveness of one known peer, carried across cycle boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
	/// Registered this cycle or a previous one.
	Responsive,
	/// Idle, but its endpoint still accepted a probe.
	Unresponsive,
	/// Its endpoint refused delivery.
	Gone,
}

/// Outcome of one gathering pass.
#[derive(Debug)]
pub enum Gathered {
	/// At least one peer registered; the snapshot is frozen.
	Active(ActiveFuncs),
	/// Every probe failed: no peer remains anywhere.
	NoPeers,
}

/// Collects and validates registrations into per-cycle snapshots.
pub struct EnvironmentRegistry {
	identity: KernelIdentity,
	/// Known symbol tokens in the benchmark's declared order.
	symbols: Vec<String>,
	symbol_set: HashSet<String>,
	/// Peer liveness, the only state that may outlive a cycle.
	peers: HashMap<String, PeerState>,
	first_wait: Duration,
	settle_wait: Duration,
}

impl EnvironmentRegistry {
	/// Create a registry for `symbols` (already encoded, declared order).
	#[must_use]
	pub fn new(
		identity: KernelIdentity,
		symbols: Vec<String>,
		first_wait: Duration,
		settle_wait: Duration,
	) -> Self {
		let symbol_set = symbols.iter().cloned().collect();
		Self {
			identity,
			symbols,
			symbol_set,
			peers: HashMap::new(),
			first_wait,
			settle_wait,
		}
	}

	/// Run one gathering pass on the registration endpoint.
	pub async fn gather(&mut self, endpoint: &DatagramEndpoint) -> Result<Gathered> {
		let mut buf = vec![0u8; wire::PASS_LIST_MAX];
		loop {
			let mut active = ActiveFuncs::new();
			match timeout(self.first_wait, endpoint.recv_from(&mut buf)).await {
				Ok(received) => {
					let (len, from) = received?;
					self.admit(&mut active, &buf[..len], &from)?;
					debug!("got first environment");
					while let Ok(received) =
						timeout(self.settle_wait, endpoint.recv_from(&mut buf)).await
					{
						let (len, from) = received?;
						self.admit(&mut active, &buf[..len], &from)?;
					}
					debug!(count = active.len(), "registration snapshot frozen");
					return Ok(Gathered::Active(active));
				}
				Err(_elapsed) => {
					debug!("no registrations within the first-wait window, probing");
					if !self.probe_for_peers(endpoint).await {
						return Ok(Gathered::NoPeers);
					}
				}
			}
		}
	}

	/// Validate one registration and fold it into the cycle snapshot.
	fn admit(
		&mut self,
		active: &mut ActiveFuncs,
		pass_list: &[u8],
		from: &std::os::unix::net::SocketAddr,
	) -> Result<()> {
		let name = abstract_name(from).ok_or(Violation::UnnamedSender)?;
		let name = std::str::from_utf8(name).map_err(|_| Violation::UnnamedSender)?;
		let parsed = PeerAddr::parse(name).map_err(Violation::Malformed)?;
		self.validate(&parsed)?;
		if active
			.insert(parsed.fun_token.clone(), pass_list.to_vec())
			.is_some()
		{
			// Either a peer re-sent its list or two over-budget names hash
			// to the same token; the newest pass list wins.
			warn!(token = %parsed.fun_token, "duplicate registration in one cycle, keeping the newest pass list");
		}
		self.peers.insert(parsed.fun_token, PeerState::Responsive);
		Ok(())
	}

	fn validate(&self, parsed: &PeerAddr) -> Result<(), Violation> {
		if parsed.bench_name != self.identity.bench_name {
			return Err(Violation::BenchName {
				expected: self.identity.bench_name.clone(),
				got: parsed.bench_name.clone(),
			});
		}
		if parsed.instance != self.identity.instance {
			return Err(Violation::Instance {
				expected: self.identity.instance,
				got: parsed.instance,
			});
		}
		if !self.symbol_set.contains(&parsed.fun_token) {
			return Err(Violation::UnknownFunction {
				token: parsed.fun_token.clone(),
			});
		}
		Ok(())
	}

	/// Probe every known token's canonical address in declared order,
	/// stopping at the first deliverable probe. Returns whether any peer
	/// still exists.
	async fn probe_for_peers(&mut self, endpoint: &DatagramEndpoint) -> bool {
		for token in &self.symbols {
			match endpoint
				.send_to_abstract(&[], &self.identity.peer_name(token))
				.await
			{
				Ok(_) => {
					debug!(%token, "an idle environment still listens");
					self.peers.insert(token.clone(), PeerState::Unresponsive);
					return true;
				}
				Err(error) => {
					debug!(%token, %error, "probe refused");
					self.peers.insert(token.clone(), PeerState::Gone);
				}
			}
		}
		debug!("every probe failed, no environments remain");
		false
	}

	/// Record that result delivery to `token` failed.
	pub fn mark_gone(&mut self, token: &str) {
		self.peers.insert(token.to_owned(), PeerState::Gone);
	}

	/// Last observed liveness of `token`.
	#[must_use]
	pub fn peer_state(&self, token: &str) -> Option<PeerState> {
		self.peers.get(token).copied()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::endpoint::DatagramEndpoint;
	use crate::error::Error;

	fn unique(tag: &str) -> String {
		use std::sync::atomic::{AtomicU32, Ordering};
		static SEQ: AtomicU32 = AtomicU32::new(0);
		format!(
			"bkreg{tag}{}x{}",
			std::process::id(),
			SEQ.fetch_add(1, Ordering::Relaxed)
		)
	}

	fn registry(identity: &KernelIdentity, symbols: &[&str]) -> EnvironmentRegistry {
		EnvironmentRegistry::new(
			identity.clone(),
			symbols.iter().map(|s| (*s).to_owned()).collect(),
			Duration::from_millis(200),
			Duration::from_millis(50),
		)
	}

	#[tokio::test]
	async fn gathers_registrations_until_settle() {
		let identity = KernelIdentity {
			bench_name: unique("g"),
			instance: 1,
		};
		let backend = DatagramEndpoint::bind_abstract(&identity.backend_name()).unwrap();
		let foo = DatagramEndpoint::bind_abstract(&identity.peer_name("foo")).unwrap();
		let bar = DatagramEndpoint::bind_abstract(&identity.peer_name("bar")).unwrap();
		foo.send_to_abstract(&[1, 2], &identity.backend_name())
			.await
			.unwrap();
		bar.send_to_abstract(&[9], &identity.backend_name())
			.await
			.unwrap();

		let mut registry = registry(&identity, &["foo", "bar", "baz"]);
		let Gathered::Active(active) = registry.gather(&backend).await.unwrap() else {
			panic!("expected an active snapshot");
		};
		assert_eq!(active.len(), 2);
		assert_eq!(active["foo"], vec![1, 2]);
		assert_eq!(active["bar"], vec![9]);
		assert_eq!(registry.peer_state("foo"), Some(PeerState::Responsive));
		assert_eq!(registry.peer_state("baz"), None);
	}

	#[tokio::test]
	async fn duplicate_registration_keeps_the_newest_list() {
		let identity = KernelIdentity {
			bench_name: unique("dup"),
			instance: 1,
		};
		let backend = DatagramEndpoint::bind_abstract(&identity.backend_name()).unwrap();
		let foo = DatagramEndpoint::bind_abstract(&identity.peer_name("foo")).unwrap();
		foo.send_to_abstract(&[1], &identity.backend_name())
			.await
			.unwrap();
		foo.send_to_abstract(&[2], &identity.backend_name())
			.await
			.unwrap();

		let mut registry = registry(&identity, &["foo"]);
		let Gathered::Active(active) = registry.gather(&backend).await.unwrap() else {
			panic!("expected an active snapshot");
		};
		assert_eq!(active.len(), 1);
		assert_eq!(active["foo"], vec![2]);
	}

	#[tokio::test]
	async fn cycle_snapshots_are_independent() {
		let identity = KernelIdentity {
			bench_name: unique("i"),
			instance: 1,
		};
		let backend = DatagramEndpoint::bind_abstract(&identity.backend_name()).unwrap();
		let foo = DatagramEndpoint::bind_abstract(&identity.peer_name("foo")).unwrap();
		let bar = DatagramEndpoint::bind_abstract(&identity.peer_name("bar")).unwrap();

		let mut registry = registry(&identity, &["foo", "bar"]);
		foo.send_to_abstract(&[1], &identity.backend_name())
			.await
			.unwrap();
		let Gathered::Active(first) = registry.gather(&backend).await.unwrap() else {
			panic!("expected an active snapshot");
		};
		assert!(first.contains_key("foo"));

		bar.send_to_abstract(&[2], &identity.backend_name())
			.await
			.unwrap();
		let Gathered::Active(second) = registry.gather(&backend).await.unwrap() else {
			panic!("expected an active snapshot");
		};
		assert!(!second.contains_key("foo"), "cycle state must not leak");
		assert!(second.contains_key("bar"));
		// The liveness map is the one thing allowed to persist.
		assert_eq!(registry.peer_state("foo"), Some(PeerState::Responsive));
	}

	#[tokio::test]
	async fn shuts_down_when_no_peer_answers_any_probe() {
		let identity = KernelIdentity {
			bench_name: unique("d"),
			instance: 1,
		};
		let backend = DatagramEndpoint::bind_abstract(&identity.backend_name()).unwrap();
		let mut registry = registry(&identity, &["foo", "bar"]);
		let started = std::time::Instant::now();
		let Gathered::NoPeers = registry.gather(&backend).await.unwrap() else {
			panic!("expected shutdown");
		};
		// One first-wait window plus one probe pass, no hang.
		assert!(started.elapsed() < Duration::from_secs(2));
		assert_eq!(registry.peer_state("foo"), Some(PeerState::Gone));
		assert_eq!(registry.peer_state("bar"), Some(PeerState::Gone));
	}

	#[tokio::test]
	async fn idle_peer_keeps_the_kernel_waiting() {
		let identity = KernelIdentity {
			bench_name: unique("w"),
			instance: 1,
		};
		let backend = DatagramEndpoint::bind_abstract(&identity.backend_name()).unwrap();
		// "bar" exists but never registers; the probe must find it and loop
		// back to waiting, where a late "foo" registration lands.
		let _bar = DatagramEndpoint::bind_abstract(&identity.peer_name("bar")).unwrap();
		let foo_name = identity.peer_name("foo");
		let backend_name = identity.backend_name();
		let sender = tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(600)).await;
			let foo = DatagramEndpoint::bind_abstract(&foo_name).unwrap();
			foo.send_to_abstract(&[7], &backend_name).await.unwrap();
		});

		let mut registry = registry(&identity, &["foo", "bar"]);
		let Gathered::Active(active) = registry.gather(&backend).await.unwrap() else {
			panic!("expected an active snapshot");
		};
		assert_eq!(active["foo"], vec![7]);
		assert_eq!(registry.peer_state("bar"), Some(PeerState::Unresponsive));
		sender.await.unwrap();
	}

	#[tokio::test]
	async fn wrong_identity_is_a_fatal_violation() {
		let identity = KernelIdentity {
			bench_name: unique("v"),
			instance: 1,
		};
		let backend = DatagramEndpoint::bind_abstract(&identity.backend_name()).unwrap();
		let impostor_name = format!("{}:foo_2", identity.bench_name);
		let impostor = DatagramEndpoint::bind_abstract(&impostor_name).unwrap();
		impostor
			.send_to_abstract(&[1], &identity.backend_name())
			.await
			.unwrap();

		let mut registry = registry(&identity, &["foo"]);
		let err = registry.gather(&backend).await.unwrap_err();
		assert!(matches!(
			err,
			Error::Protocol(Violation::Instance { expected: 1, got: 2 })
		));
	}

	#[tokio::test]
	async fn unknown_function_is_a_fatal_violation() {
		let identity = KernelIdentity {
			bench_name: unique("u"),
			instance: 1,
		};
		let backend = DatagramEndpoint::bind_abstract(&identity.backend_name()).unwrap();
		let stranger = DatagramEndpoint::bind_abstract(&identity.peer_name("mystery")).unwrap();
		stranger
			.send_to_abstract(&[1], &identity.backend_name())
			.await
			.unwrap();

		let mut registry = registry(&identity, &["foo"]);
		let err = registry.gather(&backend).await.unwrap_err();
		assert!(matches!(
			err,
			Error::Protocol(Violation::UnknownFunction { .. })
		));
	}
}
