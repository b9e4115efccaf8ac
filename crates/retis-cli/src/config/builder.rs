use super::defaults::DefaultsConfig;
use super::file::{
    FileConfig, FileEngineConfig, FileInitiationConfig, FileOrderConfig, FileSystemConfig,
    FileTisConfig,
};
use super::models::AppConfig;
use crate::cli::RunArgs;
use crate::error::{CliError, Result};
use nalgebra::{Matrix3, Vector3};
use retispp::core::models::interfaces::Side;
use retispp::core::models::system::Snapshot;
use retispp::engine::backends::Potential;
use retispp::engine::config as core_config;
use retispp::engine::config::{EngineKind, OrderKind};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub fn build_config(args: &RunArgs) -> Result<AppConfig> {
    let defaults = DefaultsConfig::default();
    let base_dir = args
        .config
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let mut file_config = FileConfig::from_file(&args.config)?;
    if let Some(cycles) = args.cycles {
        file_config.cycles = Some(cycles);
    }
    if let Some(seed) = args.seed {
        file_config.seed = Some(seed);
    }
    let file_config = apply_set_values(file_config, &args.set_values)?;

    let output_dir = match &args.output {
        Some(dir) => dir.clone(),
        None => resolve_relative(
            &base_dir,
            file_config
                .output_dir
                .unwrap_or_else(|| PathBuf::from(&defaults.output_dir)),
        ),
    };

    let system = merge_system(file_config.system.unwrap_or_default(), &defaults, &base_dir)?;
    let engine = merge_engine(file_config.engine.unwrap_or_default(), &defaults)?;
    let order = merge_order(file_config.order.unwrap_or_default(), &defaults)?;
    let tis = merge_tis(file_config.tis.unwrap_or_default(), &defaults)?;
    let initiation = merge_initiation(file_config.initiation.unwrap_or_default(), &defaults)?;

    let cycles = file_config
        .cycles
        .ok_or_else(|| CliError::Config("`cycles` must be set in the file or with --cycles".to_string()))?;
    let interfaces = file_config
        .interfaces
        .ok_or_else(|| CliError::Config("`interfaces` must be set".to_string()))?;

    let core_config = core_config::SimulationConfigBuilder::new()
        .system(system)
        .engine(engine)
        .order(order)
        .tis(tis)
        .initiation(initiation)
        .interfaces(interfaces)
        .cycles(cycles)
        .seed(file_config.seed.unwrap_or(defaults.seed))
        .output_dir(output_dir)
        .build()
        .map_err(|e| CliError::Config(e.to_string()))?;

    Ok(AppConfig {
        config_path: args.config.clone(),
        core_config,
    })
}

fn resolve_relative(base_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

fn to_vectors(rows: Vec<[f64; 3]>) -> Vec<Vector3<f64>> {
    rows.into_iter().map(Vector3::from).collect()
}

fn merge_system(
    file: FileSystemConfig,
    defaults: &DefaultsConfig,
    base_dir: &Path,
) -> Result<core_config::SystemSettings> {
    let temperature = file
        .temperature
        .ok_or_else(|| CliError::Config("`system` requires `temperature`".to_string()))?;

    let initial = match (file.initial_file, file.positions) {
        (Some(_), Some(_)) => {
            return Err(CliError::Config(
                "`system.initial-file` and `system.positions` are mutually exclusive".to_string(),
            ));
        }
        (None, None) => {
            return Err(CliError::Config(
                "`system` requires either `positions` or `initial-file`".to_string(),
            ));
        }
        (Some(path), None) => {
            if file.velocities.is_some() || file.box_lengths.is_some() {
                warn!("Velocities and box are taken from the initial file; inline values are ignored.");
            }
            core_config::InitialConfiguration::File(resolve_relative(base_dir, path))
        }
        (None, Some(positions)) => {
            let velocities = file.velocities.unwrap_or_default();
            if velocities.len() > positions.len() {
                return Err(CliError::Config(format!(
                    "`system.velocities` has {} rows but only {} positions are given",
                    velocities.len(),
                    positions.len()
                )));
            }
            let mut snapshot = Snapshot::new(to_vectors(positions), to_vectors(velocities));
            if let Some(lengths) = file.box_lengths {
                snapshot = snapshot.with_box(Matrix3::from_diagonal(&Vector3::from(lengths)));
            }
            core_config::InitialConfiguration::Snapshot(snapshot)
        }
    };

    Ok(core_config::SystemSettings {
        temperature,
        boltzmann: file.boltzmann.unwrap_or(defaults.boltzmann),
        masses: file.masses.unwrap_or_default(),
        initial,
    })
}

fn merge_engine(
    file: FileEngineConfig,
    defaults: &DefaultsConfig,
) -> Result<core_config::EngineSettings> {
    let kind: EngineKind = file
        .engine_type
        .as_deref()
        .unwrap_or(defaults.engine_type.as_str())
        .parse()
        .map_err(|e: core_config::ConfigError| CliError::Config(e.to_string()))?;
    let timestep = file.timestep.unwrap_or(defaults.timestep);
    let subcycles = file.subcycles.unwrap_or(defaults.subcycles);

    if kind == EngineKind::Internal {
        return Ok(core_config::EngineSettings::Internal(
            core_config::InternalSettings {
                timestep,
                subcycles,
                potential: file.potential.map(Into::into).unwrap_or(Potential::Free),
            },
        ));
    }

    if file.potential.is_some() {
        warn!("`engine.potential` only applies to the internal engine and is ignored.");
    }
    let mut external = core_config::ExternalSettings::new(
        file.program.unwrap_or_default(),
        file.args.unwrap_or_default(),
    );
    external.timestep = timestep;
    external.subcycles = subcycles;
    external.poll_interval =
        Duration::from_millis(file.poll_interval_ms.unwrap_or(defaults.poll_interval_ms));
    external.stop_timeout =
        Duration::from_secs(file.stop_timeout_s.unwrap_or(defaults.stop_timeout_s));
    external.double_precision = file.double_precision.unwrap_or(false);

    Ok(match kind {
        EngineKind::Stepwise => core_config::EngineSettings::Stepwise(external),
        _ => core_config::EngineSettings::Continuous(external),
    })
}

fn merge_order(file: FileOrderConfig, defaults: &DefaultsConfig) -> Result<core_config::OrderSettings> {
    let kind: OrderKind = file
        .order_type
        .as_deref()
        .unwrap_or(defaults.order_type.as_str())
        .parse()
        .map_err(|e: core_config::ConfigError| CliError::Config(e.to_string()))?;
    let index = file.index.unwrap_or(0);
    let dim = file.dim.unwrap_or(0);
    if dim > 2 {
        return Err(CliError::Config(format!("`order.dim` must be 0, 1 or 2, got {dim}")));
    }

    Ok(match kind {
        OrderKind::Position => core_config::OrderSettings::Position {
            index,
            dim,
            periodic: file.periodic.unwrap_or(false),
        },
        OrderKind::Distance => core_config::OrderSettings::Distance {
            first: file.first.ok_or_else(|| {
                CliError::Config("`order` of type 'distance' requires `first`".to_string())
            })?,
            second: file.second.ok_or_else(|| {
                CliError::Config("`order` of type 'distance' requires `second`".to_string())
            })?,
            periodic: file.periodic.unwrap_or(false),
            with_velocity: file.with_velocity.unwrap_or(false),
        },
        OrderKind::Velocity => core_config::OrderSettings::Velocity { index, dim },
    })
}

fn merge_tis(file: FileTisConfig, defaults: &DefaultsConfig) -> Result<core_config::TisSettings> {
    let mut builder = core_config::TisSettingsBuilder::new()
        .maxlength(file.maxlength.unwrap_or(defaults.maxlength))
        .freq(file.freq.unwrap_or(defaults.freq));
    if let Some(aimless) = file.aimless {
        builder = builder.aimless(aimless);
    }
    if let Some(allow) = file.allow_maxlength {
        builder = builder.allow_maxlength(allow);
    }
    if let Some(sigma_v) = file.sigma_v {
        builder = builder.sigma_v(sigma_v);
    }
    if let Some(zero) = file.zero_momentum {
        builder = builder.zero_momentum(zero);
    }
    if let Some(overlap) = file.paste_overlap {
        builder = builder.paste_overlap(overlap);
    }
    if let Some(side) = file.start_condition {
        builder = builder.start_condition(side);
    }
    builder.build().map_err(|e| CliError::Config(e.to_string()))
}

fn merge_initiation(
    file: FileInitiationConfig,
    defaults: &DefaultsConfig,
) -> Result<core_config::InitiationSettings> {
    let kick_from = file
        .kick_from
        .as_deref()
        .unwrap_or(defaults.kick_from.as_str())
        .parse()
        .map_err(|e: core_config::ConfigError| CliError::Config(e.to_string()))?;
    Ok(core_config::InitiationSettings {
        kick_from,
        kick_patience: file.kick_patience,
        repair_patience: file.repair_patience,
        attempt_patience: file.attempt_patience,
    })
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| CliError::Config(format!("Invalid value for {}: {}", key, value)))
}

fn parse_side(key: &str, value: &str) -> Result<Side> {
    match value.to_ascii_uppercase().as_str() {
        "L" | "LEFT" => Ok(Side::Left),
        "R" | "RIGHT" => Ok(Side::Right),
        _ => Err(CliError::Config(format!(
            "Invalid value for {}: {} (expected L or R)",
            key, value
        ))),
    }
}

fn apply_set_values(mut config: FileConfig, set_values: &[String]) -> Result<FileConfig> {
    for kv_pair in set_values {
        let Some((key, value)) = kv_pair.split_once('=') else {
            return Err(CliError::Config(format!(
                "Invalid --set format: '{}'. Expected KEY=VALUE.",
                kv_pair
            )));
        };

        match key {
            "cycles" => config.cycles = Some(parse_value(key, value)?),
            "seed" => config.seed = Some(parse_value(key, value)?),
            "system.temperature" => {
                config.system.get_or_insert_with(Default::default).temperature =
                    Some(parse_value(key, value)?);
            }
            "engine.type" => {
                config.engine.get_or_insert_with(Default::default).engine_type =
                    Some(value.to_string());
            }
            "engine.timestep" => {
                config.engine.get_or_insert_with(Default::default).timestep =
                    Some(parse_value(key, value)?);
            }
            "engine.subcycles" => {
                config.engine.get_or_insert_with(Default::default).subcycles =
                    Some(parse_value(key, value)?);
            }
            "engine.program" => {
                config.engine.get_or_insert_with(Default::default).program =
                    Some(value.to_string());
            }
            "order.type" => {
                config.order.get_or_insert_with(Default::default).order_type =
                    Some(value.to_string());
            }
            "order.index" => {
                config.order.get_or_insert_with(Default::default).index =
                    Some(parse_value(key, value)?);
            }
            "tis.maxlength" => {
                config.tis.get_or_insert_with(Default::default).maxlength =
                    Some(parse_value(key, value)?);
            }
            "tis.freq" => {
                config.tis.get_or_insert_with(Default::default).freq =
                    Some(parse_value(key, value)?);
            }
            "tis.sigma-v" => {
                config.tis.get_or_insert_with(Default::default).sigma_v =
                    Some(parse_value(key, value)?);
            }
            "tis.aimless" => {
                config.tis.get_or_insert_with(Default::default).aimless =
                    Some(parse_value(key, value)?);
            }
            "tis.allow-maxlength" => {
                config.tis.get_or_insert_with(Default::default).allow_maxlength =
                    Some(parse_value(key, value)?);
            }
            "tis.zero-momentum" => {
                config.tis.get_or_insert_with(Default::default).zero_momentum =
                    Some(parse_value(key, value)?);
            }
            "tis.paste-overlap" => {
                config.tis.get_or_insert_with(Default::default).paste_overlap =
                    Some(parse_value(key, value)?);
            }
            "tis.start-condition" => {
                config.tis.get_or_insert_with(Default::default).start_condition =
                    Some(parse_side(key, value)?);
            }
            "initiation.kick-from" => {
                config.initiation.get_or_insert_with(Default::default).kick_from =
                    Some(value.to_string());
            }
            "initiation.kick-patience" => {
                config.initiation.get_or_insert_with(Default::default).kick_patience =
                    Some(parse_value(key, value)?);
            }
            "initiation.repair-patience" => {
                config.initiation.get_or_insert_with(Default::default).repair_patience =
                    Some(parse_value(key, value)?);
            }
            "initiation.attempt-patience" => {
                config.initiation.get_or_insert_with(Default::default).attempt_patience =
                    Some(parse_value(key, value)?);
            }
            _ => {
                return Err(CliError::Config(format!(
                    "Unsupported configuration key for --set: '{}'",
                    key
                )));
            }
        }
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use retispp::engine::config::{EngineSettings, InitialConfiguration, KickFrom, OrderSettings};
    use std::fs;
    use tempfile::{TempDir, tempdir};

    const MINIMAL: &str = r#"
        cycles = 20
        interfaces = [-0.9, -0.5, 1.0]

        [system]
        temperature = 0.5
        positions = [[-0.9, 0.0, 0.0]]
        "#;

    fn write_config(content: &str) -> (TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tis.toml");
        fs::write(&path, content).unwrap();
        (dir, path)
    }

    fn base_run_args(config: PathBuf) -> RunArgs {
        RunArgs {
            config,
            output: None,
            cycles: None,
            seed: None,
            set_values: vec![],
        }
    }

    #[test]
    fn minimal_file_is_completed_with_defaults() {
        let (dir, path) = write_config(MINIMAL);
        let app = build_config(&base_run_args(path.clone())).expect("build ok");
        let cfg = app.core_config;
        let defaults = DefaultsConfig::default();

        assert_eq!(app.config_path, path);
        assert_eq!(cfg.cycles, 20);
        assert_eq!(cfg.seed, defaults.seed);
        assert_eq!(cfg.output_dir, dir.path().join(&defaults.output_dir));
        assert_eq!(cfg.tis.maxlength, defaults.maxlength);
        assert_eq!(cfg.tis.freq, defaults.freq);
        assert_eq!(cfg.tis.start_condition, Side::Left);
        assert_eq!(cfg.initiation.kick_from, KickFrom::Initial);
        assert_eq!(cfg.initiation.kick_patience, None);
        assert_eq!(cfg.system.boltzmann, defaults.boltzmann);
        assert!(matches!(
            cfg.engine,
            EngineSettings::Internal(ref s) if s.potential == Potential::Free && s.subcycles == 1
        ));
        assert_eq!(
            cfg.order,
            OrderSettings::Position {
                index: 0,
                dim: 0,
                periodic: false
            }
        );
        let InitialConfiguration::Snapshot(snapshot) = cfg.system.initial else {
            panic!("expected inline coordinates");
        };
        assert_eq!(snapshot.velocities, vec![Vector3::zeros()]);
    }

    #[test]
    fn cli_flags_override_file_and_set_values_override_both() {
        let (_dir, path) = write_config(&format!("seed = 3\n{MINIMAL}"));
        let mut args = base_run_args(path);
        args.output = Some(PathBuf::from("/tmp/elsewhere"));
        args.cycles = Some(99);
        args.seed = Some(5);
        args.set_values = vec![
            "seed=8".to_string(),
            "tis.maxlength=300".to_string(),
            "tis.start-condition=right".to_string(),
            "initiation.kick-from=previous".to_string(),
            "initiation.repair-patience=12".to_string(),
        ];

        let cfg = build_config(&args).expect("build ok").core_config;
        assert_eq!(cfg.cycles, 99);
        assert_eq!(cfg.seed, 8);
        assert_eq!(cfg.output_dir, PathBuf::from("/tmp/elsewhere"));
        assert_eq!(cfg.tis.maxlength, 300);
        assert_eq!(cfg.tis.start_condition, Side::Right);
        assert_eq!(cfg.initiation.kick_from, KickFrom::Previous);
        assert_eq!(cfg.initiation.repair_patience, Some(12));
    }

    #[test]
    fn external_engine_settings_are_merged() {
        let (_dir, path) = write_config(&format!(
            "{MINIMAL}\n[engine]\ntype = \"continuous\"\nprogram = \"gmx\"\nargs = [\"mdrun\", \"-s\", \"{{input}}\"]\npoll-interval-ms = 20\nstop-timeout-s = 5\nsubcycles = 4\n"
        ));
        let cfg = build_config(&base_run_args(path)).expect("build ok").core_config;
        let EngineSettings::Continuous(external) = cfg.engine else {
            panic!("expected the continuous engine");
        };
        assert_eq!(external.program, "gmx");
        assert_eq!(external.args, vec!["mdrun", "-s", "{input}"]);
        assert_eq!(external.poll_interval, Duration::from_millis(20));
        assert_eq!(external.stop_timeout, Duration::from_secs(5));
        assert_eq!(external.subcycles, 4);
        assert!(!external.double_precision);
    }

    #[test]
    fn external_engine_without_program_is_rejected() {
        let (_dir, path) = write_config(&format!("{MINIMAL}\n[engine]\ntype = \"stepwise\"\n"));
        let err = build_config(&base_run_args(path)).err().expect("must fail");
        assert!(matches!(err, CliError::Config(msg) if msg.contains("engine.program")));
    }

    #[test]
    fn initial_file_is_resolved_next_to_the_config() {
        let doc = r#"
            cycles = 1
            interfaces = [0.0, 1.0]
            [system]
            temperature = 1.0
            initial-file = "start.trr"
            "#;
        let (dir, path) = write_config(doc);
        let cfg = build_config(&base_run_args(path)).expect("build ok").core_config;
        assert_eq!(
            cfg.system.initial,
            InitialConfiguration::File(dir.path().join("start.trr"))
        );
    }

    #[test]
    fn inline_and_file_coordinates_are_mutually_exclusive() {
        let doc = format!("{MINIMAL}initial-file = \"start.trr\"\n");
        let (_dir, path) = write_config(&doc);
        let err = build_config(&base_run_args(path)).err().expect("must fail");
        assert!(matches!(err, CliError::Config(msg) if msg.contains("mutually exclusive")));
    }

    #[test]
    fn unknown_engine_and_order_types_are_config_errors() {
        let (_dir, path) = write_config(MINIMAL);
        let mut args = base_run_args(path);
        args.set_values = vec!["engine.type=lammps".to_string()];
        let err = build_config(&args).err().expect("must fail");
        assert!(matches!(err, CliError::Config(msg) if msg.contains("lammps")));

        args.set_values = vec!["order.type=rmsd".to_string()];
        let err = build_config(&args).err().expect("must fail");
        assert!(matches!(err, CliError::Config(msg) if msg.contains("rmsd")));
    }

    #[test]
    fn distance_order_requires_both_particles() {
        let doc = format!("{MINIMAL}\n[order]\ntype = \"distance\"\nfirst = 0\n");
        let (_dir, path) = write_config(&doc);
        let err = build_config(&base_run_args(path)).err().expect("must fail");
        assert!(matches!(err, CliError::Config(msg) if msg.contains("second")));
    }

    #[test]
    fn core_validation_errors_surface_as_config_errors() {
        let (_dir, path) = write_config(MINIMAL);
        let mut args = base_run_args(path);
        args.set_values = vec!["tis.freq=1.5".to_string()];
        let err = build_config(&args).err().expect("must fail");
        assert!(matches!(err, CliError::Config(msg) if msg.contains("freq")));
    }

    #[test]
    fn malformed_set_values_are_rejected() {
        let config = FileConfig::default();
        assert!(matches!(
            apply_set_values(config.clone(), &["tis.freq".to_string()]),
            Err(CliError::Config(msg)) if msg.contains("KEY=VALUE")
        ));
        assert!(matches!(
            apply_set_values(config.clone(), &["tis.nope=1".to_string()]),
            Err(CliError::Config(msg)) if msg.contains("Unsupported")
        ));
        assert!(matches!(
            apply_set_values(config.clone(), &["cycles=many".to_string()]),
            Err(CliError::Config(msg)) if msg.contains("cycles")
        ));
        assert!(matches!(
            apply_set_values(config, &["tis.start-condition=up".to_string()]),
            Err(CliError::Config(_))
        ));
    }
}
