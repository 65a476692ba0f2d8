use anyhow::{Context, Result};
use gofr_config::{ConfigLoader, GofrConfig};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Load configuration from an optional file, falling back to the environment
pub fn load_config(config_file: Option<&PathBuf>) -> Result<GofrConfig> {
    ConfigLoader::new()
        .load(config_file)
        .context("Failed to load configuration")
}

/// Handle `config validate`
pub fn handle_config_validate(config_file: &Path) -> Result<()> {
    info!("Validating configuration file: {:?}", config_file);

    if !config_file.exists() {
        return Err(anyhow::anyhow!(
            "Configuration file not found: {:?}",
            config_file
        ));
    }

    match ConfigLoader::new().from_file(config_file) {
        Ok(_config) => {
            println!("Configuration file is valid");
            info!("Configuration validation passed");
            Ok(())
        }
        Err(e) => {
            println!("Configuration validation failed: {}", e);
            error!("Configuration validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// Handle `config generate`
pub fn handle_config_generate(output: &Path, force: bool) -> Result<()> {
    info!("Generating configuration at: {:?}", output);

    if output.exists() && !force {
        return Err(anyhow::anyhow!(
            "Output file already exists: {:?}. Use --force to overwrite.",
            output
        ));
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).context("Failed to create output directory")?;
    }

    fs::write(output, GofrConfig::generate_sample()).context("Failed to write configuration file")?;
    println!("Configuration written to {}", output.display());
    Ok(())
}

/// Render the configuration in use as YAML or JSON
pub fn render_config(config: &GofrConfig, format: &str) -> Result<String> {
    match format.to_lowercase().as_str() {
        "yaml" | "yml" => serde_yaml::to_string(config).context("Failed to serialize to YAML"),
        "json" => serde_json::to_string_pretty(config).context("Failed to serialize to JSON"),
        _ => Err(anyhow::anyhow!(
            "Unknown output format: {}. Valid formats: yaml, json",
            format
        )),
    }
}

/// Handle `config show`
pub fn handle_config_show(config: &GofrConfig, format: &str) -> Result<()> {
    info!("Showing configuration (format: {})", format);
    println!("{}", render_config(config, format)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generate_then_validate() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("conf").join("gofr.yaml");

        handle_config_generate(&output, false).unwrap();
        assert!(handle_config_generate(&output, false).is_err());
        handle_config_generate(&output, true).unwrap();

        handle_config_validate(&output).unwrap();
    }

    #[test]
    fn test_validate_reports_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.yaml");
        fs::write(&path, "migrations:\n  table_name: \"bad name\"\n").unwrap();

        assert!(handle_config_validate(&path).is_err());
        assert!(handle_config_validate(&dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn test_render_formats() {
        let config = GofrConfig::default();
        assert!(render_config(&config, "yaml").unwrap().contains("table_name: gofr_migrations"));
        assert!(render_config(&config, "JSON").unwrap().contains("\"table_name\": \"gofr_migrations\""));
        assert!(render_config(&config, "toml").is_err());
    }
}
