//! Resilience patterns for infogen-runtime.
//!
//! This module provides:
//! - Deadline race between one provider call and a timer
//! - Cancellable backoff pause between attempts

mod deadline;

pub use deadline::{pause, race_deadline, Cancelled, RaceOutcome};
