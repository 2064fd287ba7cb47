//! Bounded wire messages exchanged with peers and the compiler plugin.

/// Largest registration payload (pass list) accepted from a peer.
pub const PASS_LIST_MAX: usize = 4096;

/// Largest raw function-name query accepted from the compiler.
pub const QUERY_MAX: usize = 4096;

/// Feature payloads are capped at `multiplier * EMBED_UNIT` bytes.
pub const EMBED_UNIT: usize = 1024;

/// Default feature payload multiplier.
pub const DEFAULT_EMBED_MULTIPLIER: usize = 200;

/// Single-byte reply telling the compiler no decision exists for a function.
pub const NO_DECISION: [u8; 1] = [0];

/// Per-function measurement sent back to a peer at the end of a cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileRecord {
	/// Share of accumulated runtime attributed to the function, in percent.
	pub runtime_percent: f64,
	/// Self seconds attributed to the function.
	pub runtime_seconds: f64,
	/// Code size of the function in the plain build, in bytes.
	pub size_bytes: i32,
}

impl ProfileRecord {
	/// Packed length: two little-endian `f64`s followed by one `i32`.
	pub const PACKED_LEN: usize = 20;

	/// Pack the record into its wire form.
	#[must_use]
	pub fn to_bytes(self) -> [u8; Self::PACKED_LEN] {
		let mut out = [0u8; Self::PACKED_LEN];
		out[..8].copy_from_slice(&self.runtime_percent.to_le_bytes());
		out[8..16].copy_from_slice(&self.runtime_seconds.to_le_bytes());
		out[16..].copy_from_slice(&self.size_bytes.to_le_bytes());
		out
	}

	/// Unpack a record from exactly [`Self::PACKED_LEN`] bytes.
	#[must_use]
	pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
		if bytes.len() != Self::PACKED_LEN {
			return None;
		}
		Some(Self {
			runtime_percent: f64::from_le_bytes(bytes[..8].try_into().ok()?),
			runtime_seconds: f64::from_le_bytes(bytes[8..16].try_into().ok()?),
			size_bytes: i32::from_le_bytes(bytes[16..].try_into().ok()?),
		})
	}
}

/// Build one result datagram: an optional length-tagged feature payload
/// followed by the packed record.
#[must_use]
pub fn encode_result(embedding: Option<&[u8]>, record: ProfileRecord) -> Vec<u8> {
	let mut message =
		Vec::with_capacity(embedding.map_or(0, |e| e.len() + 4) + ProfileRecord::PACKED_LEN);
	if let Some(embedding) = embedding {
		message.extend_from_slice(&(embedding.len() as i32).to_le_bytes());
		message.extend_from_slice(embedding);
	}
	message.extend_from_slice(&record.to_bytes());
	message
}

/// Split a result datagram back into its feature payload and record.
///
/// The peer-side inverse of [`encode_result`]; the kernel itself never
/// decodes results.
#[must_use]
pub fn decode_result(bytes: &[u8]) -> Option<(Option<Vec<u8>>, ProfileRecord)> {
	if bytes.len() == ProfileRecord::PACKED_LEN {
		return Some((None, ProfileRecord::from_bytes(bytes)?));
	}
	let len = i32::from_le_bytes(bytes.get(..4)?.try_into().ok()?);
	let len = usize::try_from(len).ok()?;
	let embedding = bytes.get(4..4 + len)?.to_vec();
	let record = ProfileRecord::from_bytes(bytes.get(4 + len..)?)?;
	Some((Some(embedding), record))
}
