use super::backends::internal::Potential;
use crate::core::models::interfaces::{Interfaces, Side};
use crate::core::models::system::Snapshot;
use crate::core::order::{Distance, OrderParameter, Position, Velocity};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid value for '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Unknown engine type '{0}' (expected 'internal', 'stepwise' or 'continuous')")]
    UnknownEngine(String),

    #[error("Unknown order parameter type '{0}' (expected 'position', 'distance' or 'velocity')")]
    UnknownOrder(String),
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidParameter {
        name,
        reason: reason.into(),
    }
}

/// Where the starting configuration of a simulation comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum InitialConfiguration {
    /// Coordinates given directly.
    Snapshot(Snapshot),
    /// First frame of a TRR file.
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemSettings {
    pub temperature: f64,
    pub boltzmann: f64,
    pub masses: Vec<f64>,
    pub initial: InitialConfiguration,
}

impl SystemSettings {
    /// Inverse thermal energy `1 / (k_B T)`.
    pub fn beta(&self) -> f64 {
        1.0 / (self.boltzmann * self.temperature)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.temperature > 0.0) {
            return Err(invalid("temperature", "must be positive"));
        }
        if !(self.boltzmann > 0.0) {
            return Err(invalid("boltzmann", "must be positive"));
        }
        if self.masses.iter().any(|&m| !(m > 0.0)) {
            return Err(invalid("masses", "every mass must be positive"));
        }
        Ok(())
    }
}

/// Settings of the TIS trial moves.
#[derive(Debug, Clone, PartialEq)]
pub struct TisSettings {
    /// Hard upper bound on the number of points in any path.
    pub maxlength: usize,
    /// Draw fresh Maxwell-Boltzmann velocities instead of perturbing the old ones.
    pub aimless: bool,
    /// Always allow trial paths up to `maxlength` instead of drawing a random limit.
    pub allow_maxlength: bool,
    /// Width of the velocity perturbation for non-aimless shooting.
    pub sigma_v: Option<f64>,
    /// Remove the center-of-mass momentum after drawing velocities.
    pub zero_momentum: bool,
    /// Probability of a time-reversal move instead of shooting.
    pub freq: f64,
    /// The halves of a shooting move share the shooting point, which is kept once.
    pub paste_overlap: bool,
    /// The side valid paths must start from.
    pub start_condition: Side,
}

impl TisSettings {
    /// The relaxed settings used while repairing an initial path.
    pub fn for_repair(&self) -> Self {
        Self {
            allow_maxlength: true,
            aimless: true,
            freq: 0.5,
            ..self.clone()
        }
    }
}

#[derive(Default)]
pub struct TisSettingsBuilder {
    maxlength: Option<usize>,
    aimless: Option<bool>,
    allow_maxlength: Option<bool>,
    sigma_v: Option<f64>,
    zero_momentum: Option<bool>,
    freq: Option<f64>,
    paste_overlap: Option<bool>,
    start_condition: Option<Side>,
}

impl TisSettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn maxlength(mut self, maxlength: usize) -> Self {
        self.maxlength = Some(maxlength);
        self
    }
    pub fn aimless(mut self, aimless: bool) -> Self {
        self.aimless = Some(aimless);
        self
    }
    pub fn allow_maxlength(mut self, allow: bool) -> Self {
        self.allow_maxlength = Some(allow);
        self
    }
    pub fn sigma_v(mut self, sigma_v: f64) -> Self {
        self.sigma_v = Some(sigma_v);
        self
    }
    pub fn zero_momentum(mut self, zero: bool) -> Self {
        self.zero_momentum = Some(zero);
        self
    }
    pub fn freq(mut self, freq: f64) -> Self {
        self.freq = Some(freq);
        self
    }
    pub fn paste_overlap(mut self, overlap: bool) -> Self {
        self.paste_overlap = Some(overlap);
        self
    }
    pub fn start_condition(mut self, side: Side) -> Self {
        self.start_condition = Some(side);
        self
    }

    pub fn build(self) -> Result<TisSettings, ConfigError> {
        let settings = TisSettings {
            maxlength: self
                .maxlength
                .ok_or(ConfigError::MissingParameter("maxlength"))?,
            aimless: self.aimless.unwrap_or(true),
            allow_maxlength: self.allow_maxlength.unwrap_or(false),
            sigma_v: self.sigma_v,
            zero_momentum: self.zero_momentum.unwrap_or(false),
            freq: self.freq.unwrap_or(0.0),
            paste_overlap: self.paste_overlap.unwrap_or(false),
            start_condition: self.start_condition.unwrap_or(Side::Left),
        };
        if settings.maxlength < 3 {
            return Err(invalid("maxlength", "paths need room for at least 3 points"));
        }
        if !(0.0..=1.0).contains(&settings.freq) {
            return Err(invalid("freq", "must be a probability in [0, 1]"));
        }
        match settings.sigma_v {
            Some(s) if !(s > 0.0) => return Err(invalid("sigma_v", "must be positive")),
            None if !settings.aimless => {
                return Err(ConfigError::MissingParameter("sigma_v"));
            }
            _ => {}
        }
        Ok(settings)
    }
}

/// Which configuration the kick initiation starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KickFrom {
    /// The configured initial system, for every ensemble.
    #[default]
    Initial,
    /// The point of the previously initiated ensemble's path closest to, and below,
    /// the current middle interface.
    Previous,
}

impl FromStr for KickFrom {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "initial" => Ok(KickFrom::Initial),
            "previous" => Ok(KickFrom::Previous),
            other => Err(invalid("kick-from", format!("unknown value '{other}'"))),
        }
    }
}

/// Bounds on the open-ended loops of the initiation. `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InitiationSettings {
    pub kick_from: KickFrom,
    /// Maximum number of kicks while searching for a middle-interface crossing.
    pub kick_patience: Option<usize>,
    /// Maximum number of trial moves while repairing a path.
    pub repair_patience: Option<usize>,
    /// Maximum number of complete kick-propagate-classify attempts.
    pub attempt_patience: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Internal,
    Stepwise,
    Continuous,
}

impl FromStr for EngineKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "internal" => Ok(EngineKind::Internal),
            "stepwise" => Ok(EngineKind::Stepwise),
            "continuous" => Ok(EngineKind::Continuous),
            other => Err(ConfigError::UnknownEngine(other.to_string())),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EngineKind::Internal => "internal",
            EngineKind::Stepwise => "stepwise",
            EngineKind::Continuous => "continuous",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InternalSettings {
    pub timestep: f64,
    pub subcycles: usize,
    pub potential: Potential,
}

/// Settings shared by engines that run an external program.
///
/// `args` are templates; the placeholders `{input}`, `{output}`, `{trajectory}`,
/// `{energy}`, `{steps}` and `{timestep}` are substituted per invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalSettings {
    pub program: String,
    pub args: Vec<String>,
    pub timestep: f64,
    pub subcycles: usize,
    pub poll_interval: Duration,
    pub stop_timeout: Duration,
    pub double_precision: bool,
}

impl ExternalSettings {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timestep: 0.002,
            subcycles: 1,
            poll_interval: Duration::from_millis(100),
            stop_timeout: Duration::from_secs(360),
            double_precision: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineSettings {
    Internal(InternalSettings),
    Stepwise(ExternalSettings),
    Continuous(ExternalSettings),
}

impl EngineSettings {
    pub fn kind(&self) -> EngineKind {
        match self {
            EngineSettings::Internal(_) => EngineKind::Internal,
            EngineSettings::Stepwise(_) => EngineKind::Stepwise,
            EngineSettings::Continuous(_) => EngineKind::Continuous,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let (timestep, subcycles) = match self {
            EngineSettings::Internal(s) => (s.timestep, s.subcycles),
            EngineSettings::Stepwise(s) | EngineSettings::Continuous(s) => {
                if s.program.trim().is_empty() {
                    return Err(ConfigError::MissingParameter("engine.program"));
                }
                (s.timestep, s.subcycles)
            }
        };
        if !(timestep > 0.0) {
            return Err(invalid("timestep", "must be positive"));
        }
        if subcycles == 0 {
            return Err(invalid("subcycles", "must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Position,
    Distance,
    Velocity,
}

impl FromStr for OrderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "position" => Ok(OrderKind::Position),
            "distance" => Ok(OrderKind::Distance),
            "velocity" => Ok(OrderKind::Velocity),
            other => Err(ConfigError::UnknownOrder(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OrderSettings {
    Position {
        index: usize,
        dim: usize,
        periodic: bool,
    },
    Distance {
        first: usize,
        second: usize,
        periodic: bool,
        with_velocity: bool,
    },
    Velocity {
        index: usize,
        dim: usize,
    },
}

impl OrderSettings {
    pub fn build(&self) -> Box<dyn OrderParameter> {
        match *self {
            OrderSettings::Position {
                index,
                dim,
                periodic,
            } => Box::new(Position {
                index,
                dim,
                periodic,
            }),
            OrderSettings::Distance {
                first,
                second,
                periodic,
                with_velocity,
            } => Box::new(Distance {
                first,
                second,
                periodic,
                with_velocity,
            }),
            OrderSettings::Velocity { index, dim } => Box::new(Velocity { index, dim }),
        }
    }
}

/// Complete description of a TIS simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub system: SystemSettings,
    pub engine: EngineSettings,
    pub order: OrderSettings,
    pub tis: TisSettings,
    pub initiation: InitiationSettings,
    /// Sorted interface positions `[lambda_A, lambda_1, ..., lambda_B]`.
    pub interfaces: Vec<f64>,
    pub cycles: u64,
    pub seed: u64,
    pub output_dir: PathBuf,
}

impl SimulationConfig {
    /// One `(name, interfaces)` pair per TIS ensemble.
    ///
    /// Ensemble `i` uses `(lambda_A, lambda_i, lambda_B)` for every interface but the last.
    pub fn ensembles(&self) -> Vec<(String, Interfaces)> {
        let (Some(&left), Some(&right)) = (self.interfaces.first(), self.interfaces.last()) else {
            return Vec::new();
        };
        self.interfaces[..self.interfaces.len() - 1]
            .iter()
            .enumerate()
            .filter_map(|(i, &middle)| {
                Interfaces::new(left, middle, right)
                    .ok()
                    .map(|ifaces| (format!("{:03}", i + 1), ifaces))
            })
            .collect()
    }
}

#[derive(Default)]
pub struct SimulationConfigBuilder {
    system: Option<SystemSettings>,
    engine: Option<EngineSettings>,
    order: Option<OrderSettings>,
    tis: Option<TisSettings>,
    initiation: Option<InitiationSettings>,
    interfaces: Option<Vec<f64>>,
    cycles: Option<u64>,
    seed: Option<u64>,
    output_dir: Option<PathBuf>,
}

impl SimulationConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn system(mut self, system: SystemSettings) -> Self {
        self.system = Some(system);
        self
    }
    pub fn engine(mut self, engine: EngineSettings) -> Self {
        self.engine = Some(engine);
        self
    }
    pub fn order(mut self, order: OrderSettings) -> Self {
        self.order = Some(order);
        self
    }
    pub fn tis(mut self, tis: TisSettings) -> Self {
        self.tis = Some(tis);
        self
    }
    pub fn initiation(mut self, initiation: InitiationSettings) -> Self {
        self.initiation = Some(initiation);
        self
    }
    pub fn interfaces(mut self, interfaces: Vec<f64>) -> Self {
        self.interfaces = Some(interfaces);
        self
    }
    pub fn cycles(mut self, cycles: u64) -> Self {
        self.cycles = Some(cycles);
        self
    }
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
    pub fn output_dir(mut self, dir: PathBuf) -> Self {
        self.output_dir = Some(dir);
        self
    }

    pub fn build(self) -> Result<SimulationConfig, ConfigError> {
        let system = self.system.ok_or(ConfigError::MissingParameter("system"))?;
        system.validate()?;
        let engine = self.engine.ok_or(ConfigError::MissingParameter("engine"))?;
        engine.validate()?;
        let interfaces = self
            .interfaces
            .ok_or(ConfigError::MissingParameter("interfaces"))?;
        if interfaces.len() < 2 {
            return Err(invalid("interfaces", "at least two interfaces are required"));
        }
        if interfaces.windows(2).any(|w| !(w[0] < w[1])) {
            return Err(invalid("interfaces", "must be strictly increasing"));
        }
        Ok(SimulationConfig {
            system,
            engine,
            order: self.order.ok_or(ConfigError::MissingParameter("order"))?,
            tis: self.tis.ok_or(ConfigError::MissingParameter("tis"))?,
            initiation: self.initiation.unwrap_or_default(),
            interfaces,
            cycles: self.cycles.ok_or(ConfigError::MissingParameter("cycles"))?,
            seed: self.seed.unwrap_or(0),
            output_dir: self
                .output_dir
                .ok_or(ConfigError::MissingParameter("output_dir"))?,
        })
    }
}
