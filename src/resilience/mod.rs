//! Resilience helpers.
//!
//! Watch registrations that fail for reasons other than a missing path are
//! retried with jittered exponential backoff so a flapping coordination
//! service is not hammered by every cluster at once.

pub mod backoff;
