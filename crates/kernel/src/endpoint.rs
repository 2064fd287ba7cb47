//! Non-blocking UNIX datagram endpoints.
//!
//! Peer endpoints live in the abstract socket namespace (no filesystem
//! footprint); the compiler bridge endpoint is a regular path-bound socket
//! in the working directory. Both are plain non-blocking sockets driven
//! through [`AsyncFd`] readiness, so every wait stays cancellable and the
//! kernel keeps its single cooperative thread of control.

use std::io;
use std::os::linux::net::SocketAddrExt as _;
use std::os::unix::net::{SocketAddr, UnixDatagram};
use std::path::Path;

use tokio::io::unix::AsyncFd;

/// One bounded-message datagram endpoint.
pub struct DatagramEndpoint {
	fd: AsyncFd<UnixDatagram>,
}

impl DatagramEndpoint {
	/// Bind an endpoint in the abstract namespace under `name`.
	pub fn bind_abstract(name: &str) -> io::Result<Self> {
		let addr = SocketAddr::from_abstract_name(name.as_bytes())?;
		Self::from_std(UnixDatagram::bind_addr(&addr)?)
	}

	/// Bind an endpoint to a filesystem path.
	pub fn bind_path(path: &Path) -> io::Result<Self> {
		Self::from_std(UnixDatagram::bind(path)?)
	}

	fn from_std(socket: UnixDatagram) -> io::Result<Self> {
		socket.set_nonblocking(true)?;
		Ok(Self {
			fd: AsyncFd::new(socket)?,
		})
	}

	/// Receive one datagram, waiting until one arrives.
	///
	/// Datagrams larger than `buf` are truncated to the buffer, matching the
	/// protocol's bounded-message contract.
	pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
		loop {
			let mut guard = self.fd.readable().await?;
			match guard.try_io(|inner| inner.get_ref().recv_from(buf)) {
				Ok(result) => return result,
				Err(_would_block) => continue,
			}
		}
	}

	/// Send one datagram to an abstract-namespace address.
	///
	/// A refused delivery (nobody bound the name) surfaces as an error from
	/// the underlying send, which is exactly the peer-liveness signal the
	/// prober and dispatcher rely on.
	pub async fn send_to_abstract(&self, buf: &[u8], name: &str) -> io::Result<usize> {
		let addr = SocketAddr::from_abstract_name(name.as_bytes())?;
		loop {
			let mut guard = self.fd.writable().await?;
			match guard.try_io(|inner| inner.get_ref().send_to_addr(buf, &addr)) {
				Ok(result) => return result,
				Err(_would_block) => continue,
			}
		}
	}

	/// Send one datagram to a path-bound socket.
	pub async fn send_to_path(&self, buf: &[u8], path: &Path) -> io::Result<usize> {
		loop {
			let mut guard = self.fd.writable().await?;
			match guard.try_io(|inner| inner.get_ref().send_to(buf, path)) {
				Ok(result) => return result,
				Err(_would_block) => continue,
			}
		}
	}
}

/// Extract the abstract name of a sender address, if it has one.
#[must_use]
pub fn abstract_name(addr: &SocketAddr) -> Option<&[u8]> {
	addr.as_abstract_name()
}
