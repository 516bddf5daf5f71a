//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     Parse CLI → init logging/metrics → build plugin tables
//!     → start orchestrator (initial config scan, then file watches)
//!
//! Shutdown (shutdown.rs):
//!     Signal received (signals.rs) → trigger shared token
//!     → stop file watches → wind down discovery → join tasks → drain pool
//! ```
//!
//! # Design Decisions
//! - Signal before joining, so nothing new is scheduled while draining
//! - Waits on the coordination service unblock immediately on shutdown

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
