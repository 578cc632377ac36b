//! Config file location, load and save.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::types::AppConfig;

pub const CONFIG_FILE_NAME: &str = "config.json";

/// Directory holding the running executable; the default install directory.
pub fn exe_dir() -> Result<PathBuf> {
    Ok(std::env::current_exe()?
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Cannot determine executable directory"))?
        .to_path_buf())
}

/// Absolute path of the config file; a relative `--config-file` is taken from
/// the caller's working directory.
pub fn resolve_config_path(path: Option<&Path>) -> Result<PathBuf> {
    match path {
        Some(p) if p.is_absolute() => Ok(p.to_path_buf()),
        Some(p) => Ok(std::env::current_dir()
            .context("Cannot determine current directory")?
            .join(p)),
        None => Ok(exe_dir()?.join(CONFIG_FILE_NAME)),
    }
}

pub async fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config_path = resolve_config_path(path)?;

    if config_path.exists() {
        let content = tokio::fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("Failed to read {:?}", config_path))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("Invalid configuration in {:?}", config_path))?;

        info!("Loaded configuration from: {:?}", config_path);
        Ok(config)
    } else {
        info!("Config file {:?} not found, using defaults", config_path);
        Ok(AppConfig::default())
    }
}

pub async fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path, content).await?;
    info!("Configuration saved to: {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_config_path_is_anchored_at_cwd() {
        let resolved = resolve_config_path(Some(Path::new("site/config.json"))).unwrap();
        assert!(resolved.is_absolute());
        assert_eq!(resolved, std::env::current_dir().unwrap().join("site/config.json"));

        let absolute = Path::new("/etc/detection/config.json");
        assert_eq!(resolve_config_path(Some(absolute)).unwrap(), absolute);
        assert!(resolve_config_path(None).unwrap().ends_with(CONFIG_FILE_NAME));
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.json"))).await.unwrap();
        assert_eq!(config.workload.unit_name, "detection");
    }

    #[tokio::test]
    async fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let mut config = AppConfig::default();
        config.workload.entry_point = "detector".to_string();
        config.maintenance.persist_schedule = true;
        save_config(&config, &path).await.unwrap();

        let loaded = load_config(Some(&path)).await.unwrap();
        assert_eq!(loaded.workload.entry_point, "detector");
        assert!(loaded.maintenance.persist_schedule);
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "{ not json").unwrap();
        assert!(load_config(Some(&path)).await.is_err());
    }
}
