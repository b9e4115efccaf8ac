use crate::cli::InspectArgs;
use crate::error::{CliError, Result};
use retispp::core::io::trr::{TrrHeader, read_trr_headers};
use std::fmt::Write as _;
use tracing::info;

pub async fn run(args: InspectArgs) -> Result<()> {
    info!("Inspecting trajectory {:?}", args.trajectory);
    if args.trajectory.is_dir() {
        return Err(CliError::Argument(format!(
            "{} is a directory, expected a TRR file",
            args.trajectory.display()
        )));
    }
    let headers = read_trr_headers(&args.trajectory)?;
    info!(frames = headers.len(), "Trajectory headers read.");
    println!("{}", format_headers(&headers));
    Ok(())
}

fn blocks(header: &TrrHeader) -> String {
    [
        (header.box_size, "box"),
        (header.x_size, "x"),
        (header.v_size, "v"),
        (header.f_size, "f"),
    ]
    .iter()
    .filter(|(size, _)| *size > 0)
    .map(|(_, name)| *name)
    .collect::<Vec<_>>()
    .join(",")
}

fn format_headers(headers: &[TrrHeader]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>6} {:>10} {:>12} {:>8} {:>9}  {}",
        "frame", "step", "time", "natoms", "precision", "blocks"
    );
    for (index, header) in headers.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>6} {:>10} {:>12.4} {:>8} {:>9}  {}",
            index,
            header.step,
            header.time,
            header.natoms,
            if header.double { "double" } else { "single" },
            blocks(header)
        );
    }
    let _ = write!(out, "{} frame(s)", headers.len());
    out
}
