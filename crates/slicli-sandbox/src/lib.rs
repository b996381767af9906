//! # slicli Sandbox
//!
//! Panic-safe, cancellable, timeout-bounded execution of untrusted plugins.
//!
//! Two layers:
//!
//! - [`SandboxExecutor`] bounds a single invocation with a global
//!   concurrency semaphore, a timeout, and panic recovery.
//! - [`MemoryLimiter`] adds OS-level memory isolation (Linux cgroups
//!   v1/v2, macOS best-effort hints, Windows job objects) with an active
//!   monitoring loop enforcing warning/critical/kill thresholds.

pub mod memory;
pub mod sandbox;

pub use memory::{EnforcementPolicy, MemoryLimiter};
pub use sandbox::{invoke_guarded, SandboxConfig, SandboxExecutor};
