//! Configuration loading for the runner binary

use anyhow::{Context, Result};
use runner_lib::ExperimentConfig;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "wearwatch.toml";

/// Config file from the first argument, `WEARWATCH_CONFIG`, or the default
pub fn config_path(arg: Option<String>) -> PathBuf {
    arg.or_else(|| std::env::var("WEARWATCH_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Load the config file, overlay `WEARWATCH_*` environment variables
/// (`__` separates nested keys, e.g. `WEARWATCH_DEVICE__ID`), and validate.
pub fn load(path: &Path) -> Result<ExperimentConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::from(path).required(true))
        .add_source(
            config::Environment::with_prefix("WEARWATCH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("failed to read configuration from {}", path.display()))?;

    let experiment: ExperimentConfig = settings
        .try_deserialize()
        .context("configuration does not describe a valid experiment")?;
    experiment.validate()?;
    Ok(experiment)
}
