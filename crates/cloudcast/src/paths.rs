//! Discovers the cloudcast config and data directories, honouring environment
//! overrides so tests and packaged installs can relocate them.
//!
//! Types:
//!
//! - `AppPaths` captures resolved directories and derives the config file and capture output roots.
//!
//! Functions:
//!
//! - `AppPaths::discover` probes environment variables and platform defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use directories_next::ProjectDirs;

pub const ENV_CONFIG_DIR: &str = "CLOUDCAST_CONFIG_DIR";
pub const ENV_DATA_DIR: &str = "CLOUDCAST_DATA_DIR";

const QUALIFIER: &str = "org";
const ORGANISATION: &str = "cloudcast";
const APPLICATION: &str = "cloudcast";
const CONFIG_FILE: &str = "cloudcast.toml";

#[derive(Debug, Clone)]
pub struct AppPaths {
    config_dir: PathBuf,
    data_dir: PathBuf,
}

impl AppPaths {
    pub fn discover() -> Result<Self> {
        let project_dirs = ProjectDirs::from(QUALIFIER, ORGANISATION, APPLICATION)
            .ok_or_else(|| anyhow!("failed to determine user directories"))?;

        let config_dir = resolve_directory(ENV_CONFIG_DIR, project_dirs.config_dir(), "config")?;
        let data_dir = resolve_directory(ENV_DATA_DIR, project_dirs.data_dir(), "data")?;

        Ok(Self {
            config_dir,
            data_dir,
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// Default root for relative export paths.
    pub fn output_dir(&self) -> PathBuf {
        self.data_dir.join("captures")
    }

    /// Absolute paths pass through; relative ones land under [`Self::output_dir`].
    pub fn resolve_output(&self, path: &Path) -> PathBuf {
        if path.is_absolute() || path.starts_with(".") {
            path.to_path_buf()
        } else {
            self.output_dir().join(path)
        }
    }
}

fn resolve_directory(env_name: &str, default: &Path, label: &str) -> Result<PathBuf> {
    if let Some(value) = env_override(env_name) {
        return Ok(value);
    }

    let dir = default.to_path_buf();
    if !dir.exists() {
        fs::create_dir_all(&dir).with_context(|| {
            format!("failed to create cloudcast {label} directory at {}", dir.display())
        })?;
    }
    Ok(dir)
}

fn env_override(name: &str) -> Option<PathBuf> {
    match env::var_os(name) {
        Some(value) if !value.as_os_str().is_empty() => Some(PathBuf::from(value)),
        _ => None,
    }
}
