//! Full-cycle tests against simulated environments and a simulated
//! compiler: registration, decision relay, result dispatch, and partial
//! delivery failure.

use std::time::Duration;

use benchkernel::bridge::{BuildMode, CompilerBridge, Embeddings};
use benchkernel::dispatch;
use benchkernel::endpoint::DatagramEndpoint;
use benchkernel::profile::{RuntimeTable, SizeTable};
use benchkernel::registry::{EnvironmentRegistry, Gathered, PeerState};
use benchkernel_proto::addr::{AddrCodec, KernelIdentity};
use benchkernel_proto::wire;

fn unique_identity(tag: &str) -> KernelIdentity {
	use std::sync::atomic::{AtomicU32, Ordering};
	static SEQ: AtomicU32 = AtomicU32::new(0);
	KernelIdentity {
		bench_name: format!(
			"bkcycle{tag}{}x{}",
			std::process::id(),
			SEQ.fetch_add(1, Ordering::Relaxed)
		),
		instance: 1,
	}
}

fn registry_for(identity: &KernelIdentity, symbols: &[&str]) -> EnvironmentRegistry {
	EnvironmentRegistry::new(
		identity.clone(),
		symbols.iter().map(|s| (*s).to_owned()).collect(),
		Duration::from_millis(500),
		Duration::from_millis(50),
	)
}

/// One whole cycle: "foo" registers with a two-byte pass list, the
/// simulated compiler asks only about "foo", and exactly one result
/// datagram lands on "foo"'s address carrying the embedding and the packed
/// record.
#[tokio::test]
async fn one_cycle_end_to_end() {
	let identity = unique_identity("e");
	let codec = AddrCodec::new(identity.clone());
	let backend = DatagramEndpoint::bind_abstract(&identity.backend_name()).unwrap();
	let foo_peer = DatagramEndpoint::bind_abstract(&identity.peer_name("foo")).unwrap();

	// Registration phase.
	foo_peer
		.send_to_abstract(&[0x01, 0x02], &identity.backend_name())
		.await
		.unwrap();
	let mut registry = registry_for(&identity, &["foo", "bar"]);
	let Gathered::Active(active) = registry.gather(&backend).await.unwrap() else {
		panic!("expected an active snapshot");
	};
	assert_eq!(active.len(), 1);
	assert_eq!(active["foo"], vec![0x01, 0x02]);

	// Guided build phase against a simulated compiler.
	let dir = tempfile::tempdir().unwrap();
	let kernel_path = dir.path().join("kernel.soc");
	let plugin_path = dir.path().join("plugin.soc");
	let kernel_end = DatagramEndpoint::bind_path(&kernel_path).unwrap();
	let plugin_end = DatagramEndpoint::bind_path(&plugin_path).unwrap();
	let bridge = CompilerBridge::with_command(
		&kernel_end,
		&codec,
		"sh",
		vec!["-c".to_owned(), "sleep 0.4".to_owned()],
		plugin_path.clone(),
		1,
		false,
	);
	let compiler = async {
		plugin_end.send_to_path(b"foo", &kernel_path).await.unwrap();
		let mut buf = [0u8; 64];
		let (n, _) = plugin_end.recv_from(&mut buf).await.unwrap();
		assert_eq!(&buf[..n], &[0x01, 0x02], "compiler must get the exact pass list");
		plugin_end
			.send_to_path(&[0xAA, 0xBB, 0xCC, 0xDD], &kernel_path)
			.await
			.unwrap();
		// "bar" is never queried.
	};
	let mut slot = None;
	let (result, ()) = tokio::join!(bridge.run(&mut slot, BuildMode::Plain, &active), compiler);
	let embeddings = result.unwrap();
	assert_eq!(embeddings.len(), 1);
	assert_eq!(embeddings["foo"], vec![0xAA, 0xBB, 0xCC, 0xDD]);

	// "foo" is not long-running, so no instrumented pass ran.
	let mut sizes = SizeTable::new();
	sizes.insert("foo".to_owned(), 128);
	let runtimes = RuntimeTable::new();

	let delivered = dispatch::send_results(
		&backend,
		&identity,
		&active,
		&embeddings,
		&sizes,
		&runtimes,
		&mut registry,
	)
	.await;
	assert_eq!(delivered, 1);

	let mut buf = [0u8; 256];
	let (n, _) = foo_peer.recv_from(&mut buf).await.unwrap();
	let (embedding, record) = wire::decode_result(&buf[..n]).unwrap();
	assert_eq!(embedding.as_deref(), Some(&[0xAA, 0xBB, 0xCC, 0xDD][..]));
	assert_eq!(record.runtime_percent, 0.0);
	assert_eq!(record.runtime_seconds, 0.0);
	assert_eq!(record.size_bytes, 128);
}

/// A dead peer costs only itself: the other registered peers still receive
/// correct records in the same cycle.
#[tokio::test]
async fn dead_peer_does_not_abort_dispatch() {
	let identity = unique_identity("p");
	let backend = DatagramEndpoint::bind_abstract(&identity.backend_name()).unwrap();
	let foo_peer = DatagramEndpoint::bind_abstract(&identity.peer_name("foo")).unwrap();
	let bar_peer = DatagramEndpoint::bind_abstract(&identity.peer_name("bar")).unwrap();
	let baz_peer = DatagramEndpoint::bind_abstract(&identity.peer_name("baz")).unwrap();

	for (peer, payload) in [(&foo_peer, 1u8), (&bar_peer, 2), (&baz_peer, 3)] {
		peer.send_to_abstract(&[payload], &identity.backend_name())
			.await
			.unwrap();
	}
	let mut registry = registry_for(&identity, &["foo", "bar", "baz"]);
	let Gathered::Active(active) = registry.gather(&backend).await.unwrap() else {
		panic!("expected an active snapshot");
	};
	assert_eq!(active.len(), 3);

	// "bar" dies between registration and dispatch.
	drop(bar_peer);

	let mut sizes = SizeTable::new();
	sizes.insert("foo".to_owned(), 10);
	sizes.insert("bar".to_owned(), 20);
	// "baz" has no size entry: zero-default plus a diagnostic.
	let mut runtimes = RuntimeTable::new();
	runtimes.insert("foo".to_owned(), (75.0, 1.5));

	let delivered = dispatch::send_results(
		&backend,
		&identity,
		&active,
		&Embeddings::new(),
		&sizes,
		&runtimes,
		&mut registry,
	)
	.await;
	assert_eq!(delivered, 2);
	assert_eq!(registry.peer_state("bar"), Some(PeerState::Gone));
	assert_eq!(registry.peer_state("foo"), Some(PeerState::Responsive));

	let mut buf = [0u8; 64];
	let (n, _) = foo_peer.recv_from(&mut buf).await.unwrap();
	let (embedding, record) = wire::decode_result(&buf[..n]).unwrap();
	assert!(embedding.is_none());
	assert_eq!(record.runtime_percent, 75.0);
	assert_eq!(record.runtime_seconds, 1.5);
	assert_eq!(record.size_bytes, 10);

	let (n, _) = baz_peer.recv_from(&mut buf).await.unwrap();
	let (_, record) = wire::decode_result(&buf[..n]).unwrap();
	assert_eq!(record.size_bytes, 0, "missing metric defaults to zero");
}
