//! Output module for reporting on sessions
//!
//! This module handles:
//! - Loading per-session statistics from the store
//! - Printing them for the `--stats` mode

pub mod stats;

pub use stats::{load_statistics, print_statistics, SessionStatistics};
