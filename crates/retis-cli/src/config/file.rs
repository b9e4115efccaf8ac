use crate::error::{CliError, Result};
use retispp::core::models::interfaces::Side;
use retispp::engine::backends::Potential;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileConfig {
    pub cycles: Option<u64>,
    pub seed: Option<u64>,
    pub output_dir: Option<PathBuf>,
    pub interfaces: Option<Vec<f64>>,
    pub system: Option<FileSystemConfig>,
    pub engine: Option<FileEngineConfig>,
    pub order: Option<FileOrderConfig>,
    pub tis: Option<FileTisConfig>,
    pub initiation: Option<FileInitiationConfig>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileSystemConfig {
    pub temperature: Option<f64>,
    pub boltzmann: Option<f64>,
    pub masses: Option<Vec<f64>>,
    pub positions: Option<Vec<[f64; 3]>>,
    pub velocities: Option<Vec<[f64; 3]>>,
    /// Orthorhombic box edge lengths.
    pub box_lengths: Option<[f64; 3]>,
    /// Read the starting configuration from the first frame of a TRR file instead.
    pub initial_file: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "kebab-case", tag = "type", deny_unknown_fields)]
pub enum FilePotential {
    Free,
    Harmonic { k: f64, center: f64 },
    DoubleWell { a: f64, b: f64, c: f64 },
}

impl From<FilePotential> for Potential {
    fn from(p: FilePotential) -> Self {
        match p {
            FilePotential::Free => Potential::Free,
            FilePotential::Harmonic { k, center } => Potential::Harmonic { k, center },
            FilePotential::DoubleWell { a, b, c } => Potential::DoubleWell { a, b, c },
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileEngineConfig {
    #[serde(rename = "type")]
    pub engine_type: Option<String>,
    pub timestep: Option<f64>,
    pub subcycles: Option<usize>,
    pub potential: Option<FilePotential>,
    pub program: Option<String>,
    pub args: Option<Vec<String>>,
    pub poll_interval_ms: Option<u64>,
    pub stop_timeout_s: Option<u64>,
    pub double_precision: Option<bool>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileOrderConfig {
    #[serde(rename = "type")]
    pub order_type: Option<String>,
    pub index: Option<usize>,
    pub dim: Option<usize>,
    pub first: Option<usize>,
    pub second: Option<usize>,
    pub periodic: Option<bool>,
    pub with_velocity: Option<bool>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileTisConfig {
    pub maxlength: Option<usize>,
    pub aimless: Option<bool>,
    pub allow_maxlength: Option<bool>,
    pub sigma_v: Option<f64>,
    pub zero_momentum: Option<bool>,
    pub freq: Option<f64>,
    pub paste_overlap: Option<bool>,
    pub start_condition: Option<Side>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FileInitiationConfig {
    pub kick_from: Option<String>,
    pub kick_patience: Option<usize>,
    pub repair_patience: Option<usize>,
    pub attempt_patience: Option<usize>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
