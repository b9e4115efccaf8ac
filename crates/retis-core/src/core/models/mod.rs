//! # Core Models Module
//!
//! Data structures describing trajectories in path space.
//!
//! ## Key Components
//!
//! - [`system`] - An in-memory configuration: positions, velocities, box and masses
//! - [`phasepoint`] - One frame of a trajectory, referencing its configuration
//! - [`path`] - An ordered, bounded sequence of phase points with status and provenance
//! - [`interfaces`] - The ordered triple of order-parameter thresholds of an ensemble
//! - [`status`] - Acceptance and rejection codes of trial paths

pub mod interfaces;
pub mod path;
pub mod phasepoint;
pub mod status;
pub mod system;
