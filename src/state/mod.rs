//! State module for the frontier lifecycle
//!
//! # Components
//!
//! - `LinkStatus`: the persisted status of a frontier link (pending, claimed, done)
//! - `SessionPhase`: the phase of a session as observed by a worker; never stored

mod link_status;
mod session_phase;

// Re-export main types
pub use link_status::LinkStatus;
pub use session_phase::{FrontierCounts, SessionPhase};
