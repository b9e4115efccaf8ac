//! Reading and writing trajectory data.
//!
//! Binary trajectories are decoded through the [`traits::RecordDecoder`] contract, which
//! works on byte slices and never consumes a partially written record. This lets the same
//! decoder serve finished files and files that an external program is still appending to.
//! The CSV logs cover per-frame energies written by external programs and the per-ensemble
//! record of every trial path.

pub mod energy;
pub mod pathlog;
pub mod traits;
pub mod trr;
