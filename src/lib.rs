//! Harbormaster: keeps load balancer configuration in line with live
//! service membership.

// Configuration and reload
pub mod config;
pub mod reload;

// Membership
pub mod discovery;
pub mod health;
pub mod topology;

// Balancing
pub mod balancer;
pub mod plugins;

// Roles
pub mod orchestrator;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use error::{Error, Result};
pub use lifecycle::Shutdown;
pub use orchestrator::{Context, Reporter, Writer};
pub use plugins::Plugins;
