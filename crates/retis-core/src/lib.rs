//! # RETIS++ Core Library
//!
//! A rare-event path sampling library implementing Transition Interface Sampling (TIS),
//! able to drive both in-process integrators and external molecular dynamics programs
//! whose trajectories are consumed while they are still being written.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture so that data models, stateful
//! machinery and user-facing procedures stay separate.
//!
//! - **[`core`]: The Foundation.** Stateless data models (`PhasePoint`, `Path`, `Interfaces`,
//!   `Snapshot`), the order-parameter and random-number capabilities, and the binary
//!   trajectory codec together with the CSV logs.
//!
//! - **[`engine`]: The Logic Core.** This stateful layer owns the external process lifecycle,
//!   streaming trajectory reads, the propagation stopping rule, the engine backends, and the
//!   shooting, time-reversal and initiation algorithms operating on path ensembles.
//!
//! - **[`workflows`]: The Public API.** Ties `engine` and `core` together into complete
//!   simulations: initiate every ensemble, then run TIS cycles and summarise the outcome.

pub mod core;
pub mod engine;
pub mod workflows;
