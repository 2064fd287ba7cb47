//! Per-function result delivery.
//!
//! Every function in the frozen snapshot gets exactly one result datagram:
//! the captured feature payload (length-tagged, when one exists) followed
//! by the packed profile record. A vanished peer is logged and skipped; it
//! must never cost the remaining peers their results.

use tracing::{debug, warn};

use benchkernel_proto::addr::KernelIdentity;
use benchkernel_proto::wire::{self, ProfileRecord};

use crate::bridge::Embeddings;
use crate::endpoint::DatagramEndpoint;
use crate::profile::{RuntimeTable, SizeTable};
use crate::registry::{ActiveFuncs, EnvironmentRegistry};

/// Send one cycle's results to every registered peer. Returns how many
/// deliveries succeeded.
pub async fn send_results(
	endpoint: &DatagramEndpoint,
	identity: &KernelIdentity,
	active: &ActiveFuncs,
	embeddings: &Embeddings,
	sizes: &SizeTable,
	runtimes: &RuntimeTable,
	registry: &mut EnvironmentRegistry,
) -> usize {
	let mut delivered = 0;
	for token in active.keys() {
		let size_bytes = match sizes.get(token) {
			Some(size) => *size,
			None => {
				warn!(%token, "symbol was not properly profiled, size or runtime data missing");
				0
			}
		};
		let (runtime_percent, runtime_seconds) =
			runtimes.get(token).copied().unwrap_or((0.0, 0.0));
		let record = ProfileRecord {
			runtime_percent,
			runtime_seconds,
			size_bytes,
		};
		let message = wire::encode_result(embeddings.get(token).map(Vec::as_slice), record);
		let peer = identity.peer_name(token);
		match endpoint.send_to_abstract(&message, &peer).await {
			Ok(_) => {
				debug!(%token, "result delivered");
				delivered += 1;
			}
			Err(error) => {
				warn!(%peer, %error, "environment unexpectedly died");
				registry.mark_gone(token);
			}
		}
	}
	delivered
}
