//! Shared utilities.

/// Frame pacing and smoothed frame/step timing.
pub mod frame_timing;
