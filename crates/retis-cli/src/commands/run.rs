use crate::cli::RunArgs;
use crate::config::{AppConfig, build_config};
use crate::error::Result;
use crate::utils::progress::CliProgressHandler;
use retispp::engine::progress::ProgressReporter;
use retispp::workflows::{self, tis::EnsembleSummary};
use std::fmt::Write as _;
use tracing::{debug, info};

pub async fn run(args: RunArgs) -> Result<()> {
    info!("Starting TIS run with config {:?}", args.config);

    let AppConfig {
        config_path,
        core_config,
    } = build_config(&args)?;
    debug!(config = ?config_path, "Resolved simulation configuration: {:#?}", core_config);
    info!(
        ensembles = core_config.ensembles().len(),
        cycles = core_config.cycles,
        output = %core_config.output_dir.display(),
        "Configuration loaded."
    );

    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());

    let summaries =
        tokio::task::block_in_place(|| workflows::tis::run(&core_config, &reporter))?;

    println!("{}", format_summary(&summaries));
    Ok(())
}

fn format_summary(summaries: &[EnsembleSummary]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<8} {:>28} {:>8} {:>8} {:>8}  {}",
        "ensemble", "interfaces (L, M, R)", "trials", "accepted", "ratio", "statuses"
    );
    for s in summaries {
        let [left, middle, right] = s.interfaces.as_array();
        let statuses = s
            .by_status
            .iter()
            .map(|(code, count)| format!("{code}={count}"))
            .collect::<Vec<_>>()
            .join(" ");
        let _ = writeln!(
            out,
            "{:<8} {:>28} {:>8} {:>8} {:>8.3}  {}",
            s.name,
            format!("({left:.3}, {middle:.3}, {right:.3})"),
            s.trials,
            s.accepted,
            s.acceptance_ratio,
            statuses
        );
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use retispp::core::models::interfaces::Interfaces;
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn summary(name: &str, accepted: u64) -> EnsembleSummary {
        EnsembleSummary {
            name: name.to_string(),
            interfaces: Interfaces::new(-1.0, -0.5, 1.0).unwrap(),
            trials: 11,
            accepted,
            acceptance_ratio: accepted as f64 / 11.0,
            by_status: BTreeMap::from([("ACC".to_string(), accepted), ("BWI".to_string(), 11 - accepted)]),
            initial_length: 12,
            final_length: 20,
            directory: PathBuf::from("out").join(name),
        }
    }

    #[test]
    fn summary_table_has_one_row_per_ensemble() {
        let table = format_summary(&[summary("001", 4), summary("002", 7)]);
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ensemble"));
        assert!(lines[1].starts_with("001"));
        assert!(lines[1].contains("(-1.000, -0.500, 1.000)"));
        assert!(lines[2].contains("ACC=7 BWI=4"));
        assert!(lines[2].contains("0.636"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_command_executes_an_internal_simulation() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("tis.toml");
        let doc = r#"
            cycles = 3
            seed = 4
            interfaces = [-1.0, -0.5, 1.0]

            [system]
            temperature = 1.0
            positions = [[-0.9, 0.0, 0.0]]

            [engine]
            timestep = 0.1

            [tis]
            maxlength = 500
            "#;
        fs::write(&config_path, doc).unwrap();

        let args = RunArgs {
            config: config_path,
            output: Some(dir.path().join("out")),
            cycles: None,
            seed: None,
            set_values: vec![],
        };
        run(args).await.expect("run should succeed");

        assert!(dir.path().join("out").join("001").is_dir());
        assert!(dir.path().join("out").join("002").is_dir());
    }
}
