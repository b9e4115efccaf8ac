use super::backends::EngineAdapter;
use super::config::{InitiationSettings, TisSettings};
use super::progress::ProgressReporter;
use crate::core::order::OrderParameter;
use crate::core::rng::RandomSource;

/// Everything a trial move needs besides the path ensemble it operates on.
///
/// A context is built per ensemble and borrows that ensemble's engine and random stream
/// exclusively, so two ensembles never share mutable sampling state.
pub struct SessionContext<'a> {
    pub engine: &'a mut dyn EngineAdapter,
    pub order: &'a dyn OrderParameter,
    pub rng: &'a mut dyn RandomSource,
    /// Inverse thermal energy used in the momenta-change acceptance test.
    pub beta: f64,
    pub tis: &'a TisSettings,
    pub initiation: &'a InitiationSettings,
    pub reporter: &'a ProgressReporter<'a>,
}

impl<'a> SessionContext<'a> {
    pub fn new(
        engine: &'a mut dyn EngineAdapter,
        order: &'a dyn OrderParameter,
        rng: &'a mut dyn RandomSource,
        beta: f64,
        tis: &'a TisSettings,
        initiation: &'a InitiationSettings,
        reporter: &'a ProgressReporter<'a>,
    ) -> Self {
        Self {
            engine,
            order,
            rng,
            beta,
            tis,
            initiation,
            reporter,
        }
    }
}
