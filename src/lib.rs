//! # Autocluster
//! Automatic cluster formation for nodes booting behind a service discovery backend.
//!
//! This is a convenience package which re-exports the sub-projects:
//!
//! ### Features
//! - `autocluster-core` - The discovery, registration and join decision pipeline.
//! - `test-utils` - In-memory backends, membership stores and probes for testing.

#[cfg(feature = "autocluster-core")]
pub use autocluster_core::*;
