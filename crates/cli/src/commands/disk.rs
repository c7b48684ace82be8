//! Disk counter deltas from a diskstats log

use anyhow::{Context, Result};
use colored::Colorize;
use runner_lib::config::DeviceMatch;
use runner_lib::sampler;
use serde::Serialize;
use std::path::Path;

use crate::output::{format_bytes, print_warning, OutputFormat};

#[derive(Serialize)]
struct DeltaView<'a> {
    device: &'a str,
    first: &'a runner_lib::CounterSnapshot,
    last: &'a runner_lib::CounterSnapshot,
    delta: runner_lib::CounterDelta,
    bytes_written: u64,
    warnings: Vec<String>,
}

pub fn show_delta(log: &Path, device: &str, match_mode: DeviceMatch, format: OutputFormat) -> Result<()> {
    let content = std::fs::read_to_string(log)
        .with_context(|| format!("failed to read {}", log.display()))?;
    let (first, last, delta, warnings) = sampler::delta_from_log(&content, device, match_mode)?;

    match format {
        OutputFormat::Json => {
            let view = DeltaView {
                device,
                first: &first,
                last: &last,
                delta,
                bytes_written: delta.bytes_written(),
                warnings: warnings.iter().map(ToString::to_string).collect(),
            };
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        OutputFormat::Table => {
            println!("{}", "Disk Counter Delta".bold());
            println!("{}", "=".repeat(50));
            println!("Device:           {}", first.device.cyan());
            println!(
                "Window:           {} .. {}",
                first.timestamp.format("%Y-%m-%d %H:%M:%S"),
                last.timestamp.format("%Y-%m-%d %H:%M:%S")
            );
            println!();
            println!("Reads:            {}", delta.reads_delta);
            println!("Writes:           {}", delta.writes_delta);
            println!("Sectors written:  {}", delta.sectors_written_delta);
            println!("Bytes written:    {}", format_bytes(delta.bytes_written() as f64).green());

            for warning in &warnings {
                print_warning(&warning.to_string());
            }
        }
    }

    Ok(())
}
