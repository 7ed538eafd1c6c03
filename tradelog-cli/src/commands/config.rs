use std::{fs, path::Path};

use anyhow::{Context, Result, bail};
use shared::config::Config;

/// Writes the default configuration as `tradelog.yaml` or `tradelog.json`
/// into `dir`.
///
/// # Errors
/// Returns an error if the format is unsupported or writing the file fails.
pub fn generate_config(format: &str, dir: &Path) -> Result<()> {
    let config = Config::with_defaults();
    let (file_name, serialized) = match format {
        "yaml" | "yml" => ("tradelog.yaml", serde_yml::to_string(&config)?),
        "json" => ("tradelog.json", serde_json::to_string_pretty(&config)?),
        other => bail!("Unsupported format '{other}'. Use 'yaml' or 'json'."),
    };

    let path = dir.join(file_name);
    fs::write(&path, serialized).with_context(|| format!("failed to write {}", path.display()))?;

    println!("Configuration file '{}' generated successfully.", path.display());
    Ok(())
}
