use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use retispp::engine::progress::{Progress, ProgressCallback};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

const TICK: Duration = Duration::from_millis(100);
const PHASE_TEMPLATE: &str = "{spinner:.green} {msg}";
const CYCLE_TEMPLATE: &str = "{msg} [{bar:30.cyan/blue}] {pos}/{len} cycles ({elapsed})";

/// Renders workflow progress on stderr.
///
/// Ensembles may report from several rayon workers at once, so the bar sits behind a mutex.
#[derive(Clone)]
pub struct CliProgressHandler {
    pb: Arc<Mutex<ProgressBar>>,
}

impl CliProgressHandler {
    pub fn new() -> Self {
        let pb = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
        pb.finish_and_clear();
        Self {
            pb: Arc::new(Mutex::new(pb)),
        }
    }

    pub fn get_callback(&self) -> ProgressCallback<'static> {
        let pb = Arc::clone(&self.pb);
        Box::new(move |event: Progress| match pb.lock() {
            Ok(pb) => render(&pb, event),
            Err(_) => warn!("Progress display lock was poisoned; dropping update."),
        })
    }
}

impl Default for CliProgressHandler {
    fn default() -> Self {
        Self::new()
    }
}

fn render(pb: &ProgressBar, event: Progress) {
    match event {
        Progress::PhaseStart { name } => {
            pb.reset();
            pb.set_length(0);
            pb.set_style(style(PHASE_TEMPLATE));
            pb.set_message(name);
            pb.enable_steady_tick(TICK);
        }
        Progress::PhaseFinish => {
            pb.disable_steady_tick();
            pb.finish_with_message("done");
        }
        Progress::TaskStart { total_steps } => {
            pb.disable_steady_tick();
            pb.reset();
            pb.set_style(style(CYCLE_TEMPLATE));
            pb.set_length(total_steps);
        }
        Progress::TaskIncrement => pb.inc(1),
        Progress::TaskFinish => {
            if let Some(total) = pb.length() {
                pb.set_position(total);
            }
            pb.finish();
        }
        // Initiation attempts and repair trials; only shown while a phase runs.
        Progress::StatusUpdate { text } if !pb.is_finished() => pb.set_message(text),
        Progress::StatusUpdate { .. } => {}
        Progress::Message(msg) if !pb.is_finished() => pb.println(format!("  {msg}")),
        Progress::Message(msg) => pb.set_message(msg),
    }
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_bar())
}
