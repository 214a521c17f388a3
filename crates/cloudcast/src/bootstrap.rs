//! Loads the TOML configuration, falling back to built-in defaults when no file exists,
//! and seeds a default file on request.
//!
//! Functions:
//!
//! - `load_config` resolves the explicit or discovered config file and validates it.
//! - `write_default_config` backs `cloudcast config init`.
//! - `parse_surface_size` parses `WIDTHxHEIGHT` CLI values.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use cloudconfig::CloudConfig;

use crate::paths::AppPaths;

pub fn load_config(paths: &AppPaths, explicit: Option<&Path>) -> Result<CloudConfig> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                bail!("config file {} does not exist", path.display());
            }
            path.to_path_buf()
        }
        None => paths.config_file(),
    };

    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file; using defaults");
        return Ok(CloudConfig::default());
    }

    let text = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    let config = CloudConfig::from_toml_str(&text)
        .with_context(|| format!("failed to load config at {}", path.display()))?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Writes the default configuration to `path`. Returns `false` when the file
/// already exists and `force` is not set.
pub fn write_default_config(path: &Path, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let text = CloudConfig::default().to_toml_string()?;
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

pub fn parse_surface_size(spec: &str) -> Result<(u32, u32), String> {
    let (width, height) = spec
        .trim()
        .split_once(['x', 'X', '×'])
        .ok_or_else(|| "expected WxH format, e.g. 1280x720".to_string())?;

    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| "invalid width in size specification".to_string())?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| "invalid height in size specification".to_string())?;

    if width == 0 || height == 0 {
        return Err("dimensions must be greater than zero".to_string());
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::tests::{env_lock, EnvGuard};
    use crate::paths::{ENV_CONFIG_DIR, ENV_DATA_DIR};
    use cloudconfig::MissedSeekPolicy;
    use tempfile::TempDir;

    fn temp_paths(root: &TempDir) -> (AppPaths, EnvGuard, EnvGuard) {
        let config = EnvGuard::set(ENV_CONFIG_DIR, &root.path().join("config"));
        let data = EnvGuard::set(ENV_DATA_DIR, &root.path().join("data"));
        (AppPaths::discover().unwrap(), config, data)
    }

    #[test]
    fn missing_discovered_file_yields_defaults() {
        let _lock = env_lock().lock().unwrap();
        let root = TempDir::new().unwrap();
        let (paths, _config, _data) = temp_paths(&root);

        let config = load_config(&paths, None).unwrap();
        assert_eq!(config.capture.sample_count, 100);
        assert_eq!(config.reconstruction.quality, 1.0);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let _lock = env_lock().lock().unwrap();
        let root = TempDir::new().unwrap();
        let (paths, _config, _data) = temp_paths(&root);

        let missing = root.path().join("nope.toml");
        assert!(load_config(&paths, Some(&missing)).is_err());
    }

    #[test]
    fn explicit_file_overrides_defaults() {
        let _lock = env_lock().lock().unwrap();
        let root = TempDir::new().unwrap();
        let (paths, _config, _data) = temp_paths(&root);

        let file = root.path().join("custom.toml");
        fs::write(
            &file,
            "version = 1\n[capture]\nsample_count = 12\nmissed_seek = \"keep-points\"\n",
        )
        .unwrap();

        let config = load_config(&paths, Some(&file)).unwrap();
        assert_eq!(config.capture.sample_count, 12);
        assert_eq!(config.capture.missed_seek, MissedSeekPolicy::KeepPoints);
    }

    #[test]
    fn invalid_file_reports_path() {
        let _lock = env_lock().lock().unwrap();
        let root = TempDir::new().unwrap();
        let (paths, _config, _data) = temp_paths(&root);

        fs::write(paths.config_file(), "version = 1\n[reconstruction]\nquality = 2.0\n").unwrap();
        let err = load_config(&paths, None).unwrap_err();
        assert!(format!("{err:#}").contains("cloudcast.toml"));
    }

    #[test]
    fn default_config_is_written_once() {
        let root = TempDir::new().unwrap();
        let target = root.path().join("nested").join("cloudcast.toml");

        assert!(write_default_config(&target, false).unwrap());
        fs::write(&target, "version = 1\n").unwrap();
        assert!(!write_default_config(&target, false).unwrap());
        assert_eq!(fs::read_to_string(&target).unwrap(), "version = 1\n");

        assert!(write_default_config(&target, true).unwrap());
        let text = fs::read_to_string(&target).unwrap();
        assert!(CloudConfig::from_toml_str(&text).is_ok());
    }

    #[test]
    fn parses_surface_sizes() {
        assert_eq!(parse_surface_size("1280x720"), Ok((1280, 720)));
        assert_eq!(parse_surface_size(" 640 X 360 "), Ok((640, 360)));
        assert!(parse_surface_size("0x720").is_err());
        assert!(parse_surface_size("1280").is_err());
    }
}
