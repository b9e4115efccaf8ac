pub struct DefaultsConfig {
    pub output_dir: String,
    pub seed: u64,
    pub boltzmann: f64,
    pub engine_type: String,
    pub timestep: f64,
    pub subcycles: usize,
    pub poll_interval_ms: u64,
    pub stop_timeout_s: u64,
    pub order_type: String,
    pub maxlength: usize,
    pub freq: f64,
    pub kick_from: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: "retis-output".to_string(),
            seed: 0,
            boltzmann: 1.0,
            engine_type: "internal".to_string(),
            timestep: 0.002,
            subcycles: 1,
            poll_interval_ms: 100,
            stop_timeout_s: 360,
            order_type: "position".to_string(),
            maxlength: 20_000,
            freq: 0.5,
            kick_from: "initial".to_string(),
        }
    }
}
