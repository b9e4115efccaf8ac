//! Simulation configuration as read from TOML files and merged with command-line overrides.

pub mod builder;
pub mod defaults;
pub mod file;
pub mod models;

pub use builder::build_config;
pub use models::AppConfig;
