use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::target::Target;

/// Get the config directory path (~/.config/podup)
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("podup"))
}

// ============================================================================
// Podup Config
// ============================================================================

/// Tool configuration, loaded from ~/.config/podup/config.toml.
///
/// Paths in `state_dir`, `workspace` and `requirements` live on the
/// *target* and are expanded by the target's shell, so `$HOME` refers to
/// the pod's home directory, not the operator's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodupConfig {
    /// Directory on the target holding the per-target state record
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Base directory on the target for checkouts, venv and model dirs
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// Local directory for per-invocation run logs (tilde-expanded)
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Base apt packages installed by the sysdeps step
    #[serde(default = "default_packages")]
    pub packages: Vec<String>,

    /// Extra requirement manifests watched by the python step
    #[serde(default)]
    pub requirements: Vec<String>,

    /// ComfyUI clone URL
    #[serde(default = "default_comfyui_url")]
    pub comfyui_url: String,

    /// Model/output directory skeleton, relative to `workspace`
    #[serde(default = "default_model_dirs")]
    pub model_dirs: Vec<String>,
}

fn default_state_dir() -> String {
    "$HOME/.podup".to_string()
}

fn default_workspace() -> String {
    "$HOME".to_string()
}

fn default_log_dir() -> String {
    "~/.local/state/podup/logs".to_string()
}

fn default_packages() -> Vec<String> {
    ["git", "rsync", "ffmpeg", "python3-venv", "python3-pip", "aria2"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_comfyui_url() -> String {
    "https://github.com/comfyanonymous/ComfyUI.git".to_string()
}

fn default_model_dirs() -> Vec<String> {
    [
        "models/checkpoints",
        "models/loras",
        "models/controlnet",
        "models/upscale",
        "output",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for PodupConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            workspace: default_workspace(),
            log_dir: default_log_dir(),
            packages: default_packages(),
            requirements: Vec::new(),
            comfyui_url: default_comfyui_url(),
            model_dirs: default_model_dirs(),
        }
    }
}

impl PodupConfig {
    /// Load config.toml, or return defaults if no file exists
    pub fn load() -> Result<Self> {
        let path = config_dir()?.join("config.toml");

        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config: {}", path.display()))
    }

    /// Path of the state record on the target, namespaced by target identity.
    pub fn state_file(&self, target: &Target) -> String {
        format!("{}/state.{}", self.state_dir, target.id())
    }

    /// Expanded local log directory.
    pub fn log_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.log_dir).as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PodupConfig::default();
        assert_eq!(config.state_dir, "$HOME/.podup");
        assert!(config.packages.contains(&"git".to_string()));
        assert!(config.requirements.is_empty());
    }

    #[test]
    fn test_state_file_namespacing() {
        let config = PodupConfig::default();
        let local = Target::parse("local", None).unwrap();
        let remote = Target::parse("pod:40022", None).unwrap();
        assert_eq!(config.state_file(&local), "$HOME/.podup/state.local");
        assert_eq!(config.state_file(&remote), "$HOME/.podup/state.pod_40022");
    }

    #[test]
    fn test_partial_toml() {
        let config: PodupConfig = toml::from_str("workspace = \"/workspace\"").unwrap();
        assert_eq!(config.workspace, "/workspace");
        assert_eq!(config.state_dir, "$HOME/.podup");
    }
}
