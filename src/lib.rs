// -- Lint policy ---------------------------------------------------------
// This is the single source of truth for crate-wide lints.

// Broad lint groups
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::nursery)]
// Documentation
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::bare_urls)]
// No panicking in library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
// No debug/print artifacts
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
// Import hygiene
#![deny(clippy::wildcard_imports)]
// Clone / pass-by-value hygiene
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::implicit_clone)]
// String hygiene
#![deny(clippy::inefficient_to_string)]
#![deny(clippy::redundant_closure_for_method_calls)]
#![deny(clippy::manual_string_new)]
#![deny(clippy::str_to_string)]
// Cargo lints (warn, not deny since cargo lints can be noisy)
#![warn(clippy::cargo)]
// Unused / redundant code
#![deny(unused_results)]
#![deny(unused_qualifications)]
// Cast hygiene
#![deny(trivial_casts)]
#![deny(trivial_numeric_casts)]
// Test code may unwrap.
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

//! GPU-resident particle simulation built on wgpu.
//!
//! The [`gpu`] module is the general core: structured device buffers and
//! 2D images, GLSL kernel templates with constant injection, compute and
//! full-screen render programs that share one uniform/binding model, and
//! a double buffer that ping-pongs state between them. [`simulation`]
//! drives Particle Lenia with it.
//!
//! # Key entry points
//!
//! - [`simulation::Simulation`] - particle step, field display, population
//!   edits
//! - [`options::Options`] - kernel, growth, view and run parameters with
//!   TOML presets
//! - [`gpu::program::GpuProgram`] - what compute and render stages share
//! - [`gpu::double_buffer::DoubleBuffer`] - source/destination buffer pair
//!
//! # Frame structure
//!
//! Each frame runs `steps_per_frame` dispatches of the step kernel. Every
//! dispatch reads the source buffer, writes the destination, and is waited
//! on before the roles flip. The field kernel then reads the latest source
//! and draws the full-screen quad, either straight into the swapchain or
//! into an off-screen image that a passthrough program copies out.

pub mod error;
pub mod gpu;
pub mod options;
pub mod simulation;
pub mod util;
#[cfg(feature = "viewer")]
pub mod viewer;

pub use error::SimError;
pub use options::Options;
pub use simulation::Simulation;
#[cfg(feature = "viewer")]
pub use viewer::Viewer;
