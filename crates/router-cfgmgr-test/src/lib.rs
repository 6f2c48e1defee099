//! Integration test infrastructure for the router configuration daemons
//!
//! Provides:
//! - In-memory kernel and packet filter that record every mutation
//! - A notifier that records signals instead of sending them
//! - Temporary config, root and proc-sys directories with fixture files
//! - Mutation verification helpers

pub mod fake_kernel;
pub mod fixtures;
mod verification;

pub use fake_kernel::{FakeNetControl, FakePacketFilter, KernelState, Mutation, RecordingNotifier};
pub use fixtures::TestEnv;
pub use verification::*;
