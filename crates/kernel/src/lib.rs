//! Benchmark orchestration kernel.
//!
//! Mediates between one compiler subprocess (extended with a decision
//! injection plugin) and any number of per-function learning environments
//! over UNIX datagram sockets. Each cycle gathers optimization decisions,
//! relays them during a guided build, measures code size and runtime cost,
//! and reports per-function results back to every registered environment.

pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod logging;
pub mod profile;
pub mod registry;
pub mod runloop;

pub use config::KernelConfig;
pub use error::{Error, Result};
pub use runloop::Kernel;
