//! # Engine Module
//!
//! The stateful machinery of RETIS++: running dynamics, building paths and applying
//! the TIS trial moves to path ensembles.
//!
//! ## Overview
//!
//! The engine module owns everything that touches a process, a working directory or a
//! random stream. External molecular dynamics programs are supervised as child processes
//! whose trajectories are decoded while they are written; in-process model systems are
//! integrated directly. Both are driven through one [`backends::EngineAdapter`] capability
//! so the sampling algorithms never know which kind of engine they use.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Typed settings and their validating builders
//! - **Error Handling** ([`error`]) - The engine error taxonomy and retry classification
//! - **Progress Monitoring** ([`progress`]) - Progress events for user interfaces
//! - **Process Supervision** ([`process`]) - Launching, polling and terminating programs
//! - **Streaming** ([`streaming`]) - Incremental trajectory reads from a running program
//! - **Propagation** ([`propagator`]) - The stopping rule shared by all backends
//! - **Backends** ([`backends`]) - Internal, stepwise and continuous engines
//! - **Trial Moves** ([`tis`]) - Shooting and time reversal
//! - **Ensembles** ([`ensemble`]) - Path storage, logging and acceptance statistics
//! - **Initiation** ([`initiation`]) - Kick initiation and repair of initial paths
//!
//! ## Key Capabilities
//!
//! - **Early termination** of external programs as soon as a path reaches an outer interface
//! - **Retryable failures** separating broken attempts from broken configurations
//! - **Bounded open loops** through optional patience settings

pub mod backends;
pub mod config;
pub mod context;
pub mod ensemble;
pub mod error;
pub mod initiation;
pub mod process;
pub mod progress;
pub mod propagator;
pub mod streaming;
pub mod tis;
