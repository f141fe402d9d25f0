//! Developer configuration stored at `~/.e2e-runner/config.json`.
//!
//! Describes where test images live and which namespace tests run in. The
//! file is resolved in this order:
//! 1. Explicit `--config-file` flag
//! 2. `E2E_CONFIG_FILE` environment variable (via clap)
//! 3. `~/.e2e-runner/config.json`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const CONFIG_DIR_NAME: &str = ".e2e-runner";
const CONFIG_FILE_NAME: &str = "config.json";

/// Base image family for the agent image
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Distro {
    Ubuntu,
    Ubi,
}

/// Image locations and target namespace for a test run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevConfig {
    /// Namespace the test pod and operator run in
    pub namespace: String,
    /// Registry prefix, e.g. `quay.io/my-org`
    pub repo_url: String,
    pub operator_image: String,
    /// Locally built operator image; falls back to `operator_image`
    #[serde(default)]
    pub operator_image_dev: Option<String>,
    /// Image containing the test binary
    pub e2e_image: String,
    pub version_upgrade_hook_image: String,
    #[serde(default)]
    pub version_upgrade_hook_image_dev: Option<String>,
    pub readiness_probe_image: String,
    #[serde(default)]
    pub readiness_probe_image_dev: Option<String>,
    pub agent_image_ubuntu: String,
    pub agent_image_ubi: String,
}

impl DevConfig {
    pub fn operator_image_dev(&self) -> &str {
        self.operator_image_dev
            .as_deref()
            .unwrap_or(&self.operator_image)
    }

    pub fn version_upgrade_hook_image_dev(&self) -> &str {
        self.version_upgrade_hook_image_dev
            .as_deref()
            .unwrap_or(&self.version_upgrade_hook_image)
    }

    pub fn readiness_probe_image_dev(&self) -> &str {
        self.readiness_probe_image_dev
            .as_deref()
            .unwrap_or(&self.readiness_probe_image)
    }

    pub fn agent_image(&self, distro: Distro) -> &str {
        match distro {
            Distro::Ubuntu => &self.agent_image_ubuntu,
            Distro::Ubi => &self.agent_image_ubi,
        }
    }

    /// Fully qualified image reference: `<repo_url>/<image>:<tag>`
    pub fn image_ref(&self, image: &str, tag: &str) -> String {
        format!("{}/{}:{}", self.repo_url.trim_end_matches('/'), image, tag)
    }

    fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::config("namespace must not be empty"));
        }
        if self.repo_url.is_empty() {
            return Err(Error::config("repo_url must not be empty"));
        }
        Ok(())
    }
}

/// Path to `~/.e2e-runner/config.json`.
pub fn default_config_path() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| Error::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Resolve the config file, preferring an explicit path.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => default_config_path(),
    }
}

/// Load and validate a config file.
pub fn load_config(path: &Path) -> Result<DevConfig> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
    let config: DevConfig = serde_json::from_str(&data)
        .map_err(|e| Error::config(format!("failed to parse {}: {}", path.display(), e)))?;
    config.validate()?;
    Ok(config)
}
