//! # Core Module
//!
//! Stateless building blocks shared by every other layer of RETIS++.
//!
//! ## Overview
//!
//! The core module defines how a trajectory is represented (phase points collected into
//! paths and classified against interfaces), how a configuration is represented in memory,
//! and how trajectories are read from and written to disk. Nothing in here owns a process
//! or a working directory.
//!
//! ## Architecture
//!
//! - **Path Model** ([`models`]) - Phase points, paths, interfaces and system snapshots
//! - **File I/O** ([`io`]) - The TRR record codec, energy logs and the path-ensemble log
//! - **Order Parameters** ([`order`]) - The `OrderParameter` capability and stock implementations
//! - **Randomness** ([`rng`]) - The `RandomSource` capability and a seeded generator
//!
//! ## Key Capabilities
//!
//! - **Append-only paths** with cached order extrema and a freeze-on-status lifecycle
//! - **Incremental record decoding** that never consumes a partially written record
//! - **Explicit velocity sign convention** so that reversing a path twice is the identity

pub mod io;
pub mod models;
pub mod order;
pub mod rng;
