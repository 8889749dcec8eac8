use anyhow::{Context, Result};
use pretvm_core::config::{load_dotenv, TargetOverrides};
use pretvm_core::description::ProgramDescription;
use pretvm_core::{Diagnostics, TargetConfig};
use std::path::Path;
use tracing::debug;

use crate::cli::CompileArgs;

/// Load target property overrides from a TOML file.
pub fn load_overrides(path: &Path) -> Result<TargetOverrides> {
    debug!(?path, "Loading target overrides");
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read target config: {}", path.display()))?;
    let overrides: TargetOverrides = toml::from_str(&content)
        .with_context(|| format!("failed to parse target config: {}", path.display()))?;
    Ok(overrides)
}

/// Resolve the target configuration for a compile run.
/// Priority: CLI flags > environment > TOML file > program description.
pub fn resolve_target(
    desc: &ProgramDescription,
    args: &CompileArgs,
    diags: &mut Diagnostics,
) -> Result<TargetConfig> {
    let mut config = desc.target_config(diags);

    if let Some(path) = &args.target_config {
        config.apply_overrides(&load_overrides(path)?);
    }

    load_dotenv();
    config.apply_env(diags);

    config.apply_overrides(&args.overrides());
    Ok(config)
}
