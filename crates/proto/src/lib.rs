//! Shared addressing and wire definitions for the benchkernel datagram IPC.
//!
//! This crate defines the pure protocol layer spoken over UNIX datagram
//! sockets: the bounded-length address encoding for function symbols, the
//! peer address grammar, the packed per-function result record, and the
//! benchmark descriptor format. It performs no I/O.

#![warn(missing_docs)]

pub mod addr;
pub mod descriptor;
pub mod wire;

pub use addr::{AddrCodec, AddrError, KernelIdentity, PeerAddr};
pub use descriptor::{BenchDescriptor, DescriptorError};
pub use wire::ProfileRecord;
