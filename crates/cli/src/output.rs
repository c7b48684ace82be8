//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use runner_lib::normalizer::units::{BYTES_PER_GIB, BYTES_PER_KIB, BYTES_PER_MIB, JOULES_PER_WATT_HOUR};
use runner_lib::{CanonicalUnit, ComponentStatus};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print rows as a table, or `value` as JSON
pub fn print_table<T: Tabled, V: Serialize + ?Sized>(rows: Vec<T>, value: &V, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("{}", "No items found".yellow());
                return Ok(());
            }
            let table = Table::new(rows).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
    }
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: f64) -> String {
    if bytes >= BYTES_PER_GIB {
        format!("{:.2} GiB", bytes / BYTES_PER_GIB)
    } else if bytes >= BYTES_PER_MIB {
        format!("{:.2} MiB", bytes / BYTES_PER_MIB)
    } else if bytes >= BYTES_PER_KIB {
        format!("{:.2} KiB", bytes / BYTES_PER_KIB)
    } else {
        format!("{:.0} B", bytes)
    }
}

/// Format joules, with watt-hours alongside
pub fn format_energy(joules: f64) -> String {
    format!("{:.1} J ({:.3} Wh)", joules, joules / JOULES_PER_WATT_HOUR)
}

/// Format a canonical total in the most readable unit
pub fn format_total(value: f64, unit: CanonicalUnit) -> String {
    match unit {
        CanonicalUnit::Bytes => format_bytes(value),
        CanonicalUnit::Joules => format_energy(value),
        CanonicalUnit::Operations => format!("{:.0} ops", value),
    }
}

/// Color status based on value
pub fn color_status(status: ComponentStatus) -> String {
    let text = status.to_string();
    match status {
        ComponentStatus::Healthy => text.green().to_string(),
        ComponentStatus::Degraded => text.yellow().to_string(),
        ComponentStatus::Unhealthy => text.red().to_string(),
    }
}

/// Color an exit code: 0 green, 3 yellow, anything else red
pub fn color_exit_code(code: i32) -> String {
    match code {
        0 => code.to_string().green().to_string(),
        3 => code.to_string().yellow().to_string(),
        _ => code.to_string().red().to_string(),
    }
}
