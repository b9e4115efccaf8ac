//! # Workflows Module
//!
//! High-level entry points that run complete path-sampling simulations.
//!
//! ## Overview
//!
//! A workflow takes a validated [`SimulationConfig`](crate::engine::config::SimulationConfig),
//! builds one path ensemble per interface, initiates each ensemble with the kick method
//! and then runs the requested number of TIS cycles. Progress is reported through a
//! [`ProgressReporter`](crate::engine::progress::ProgressReporter) and every trial is
//! recorded in the ensemble's path log.
//!
//! ## Architecture
//!
//! - **TIS Workflow** ([`tis`]) - Preparation, initiation, sampling and summary phases
//!
//! ## Key Capabilities
//!
//! - **Independent ensembles** each owning an engine, a working directory and a random stream
//! - **Parallel execution** of ensembles under the `parallel` feature with identical results
//! - **Retry semantics** where external engine failures are logged as rejected trials

pub mod tis;
