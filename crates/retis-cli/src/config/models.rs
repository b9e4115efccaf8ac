use retispp::engine::config::SimulationConfig;
use std::path::PathBuf;

pub struct AppConfig {
    pub config_path: PathBuf,
    pub core_config: SimulationConfig,
}
