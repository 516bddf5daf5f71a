//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Service check loop (one per service)
//!     → HealthCheck::run (one per port × check type)
//!         → Probe::perform (tcp.rs / http.rs / redis.rs)
//!         → ResultHistory (bounded, max(rise, fall))
//!         → rise/fall hysteresis → passing
//!     → port up/down transitions → discovery report_up / report_down
//! ```
//!
//! # Design Decisions
//! - Probe errors never escape `run`; they are recorded as failures
//! - Reconfiguration resizes history instead of discarding it

pub mod check;
pub mod history;
pub mod http;
pub mod probe;
pub mod redis;
pub mod tcp;

pub use check::HealthCheck;
pub use history::ResultHistory;
pub use probe::{Probe, ProbeError};
