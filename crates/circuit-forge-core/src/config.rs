//! Build configuration: output roots, toolchain locations, resource limits.
//!
//! Loaded from `circuit-forge.config.json`. Every field has a default, so a
//! partial file (or none at all) is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, Result};

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "circuit-forge.config.json";

/// Configuration shared by every stage of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    /// Root of the per-circuit build trees (`{root}/{slug}/...`).
    pub circuit_output_root: PathBuf,
    /// Root of the generated sources (`{root}/{slug}/circuit/{name}.circom`).
    pub code_output_root: PathBuf,
    /// Powers-of-tau file used to create proving keys.
    pub trusted_setup_path: PathBuf,
    /// Circuit compiler executable.
    pub compiler: String,
    /// Key-generation tool executable.
    pub keygen: String,
    /// Library search path handed to the compiler (`-l`).
    pub library_path: PathBuf,
    /// Heap ceiling for proving-key generation, in MiB.
    pub keygen_max_old_space_mb: u64,
    /// Per-subprocess wall clock limit. `None` waits forever.
    pub stage_timeout_secs: Option<u64>,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            circuit_output_root: PathBuf::from("./output/circuit"),
            code_output_root: PathBuf::from("./output/code"),
            trusted_setup_path: PathBuf::from("./ptau/powersOfTau28_hez_final_23.ptau"),
            compiler: "circom".into(),
            keygen: "./node_modules/.bin/snarkjs".into(),
            library_path: PathBuf::from("./node_modules"),
            keygen_max_old_space_mb: 112_000,
            stage_timeout_secs: None,
        }
    }
}

impl ForgeConfig {
    /// Load a config from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ForgeError::ConfigNotFound {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&contents).map_err(|e| ForgeError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("no config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Write the config as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| ForgeError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Point both output roots at `{dir}/circuit` and `{dir}/code`.
    pub fn with_output_dir(mut self, dir: &Path) -> Self {
        self.circuit_output_root = dir.join("circuit");
        self.code_output_root = dir.join("code");
        self
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_secs.map(Duration::from_secs)
    }

    /// `NODE_OPTIONS` value for the proving-key generator.
    pub fn keygen_node_options(&self) -> String {
        format!("--max-old-space-size={}", self.keygen_max_old_space_mb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: ForgeConfig =
            serde_json::from_str(r#"{ "compiler": "/opt/circom/bin/circom" }"#).unwrap();
        assert_eq!(config.compiler, "/opt/circom/bin/circom");
        assert_eq!(config.keygen, "./node_modules/.bin/snarkjs");
        assert_eq!(config.keygen_max_old_space_mb, 112_000);
        assert!(config.stage_timeout().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let config = ForgeConfig {
            stage_timeout_secs: Some(3600),
            ..ForgeConfig::default()
        };
        config.save(&path).unwrap();
        let loaded = ForgeConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.stage_timeout(), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_load_missing_is_config_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = ForgeConfig::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ForgeError::ConfigNotFound { .. }));
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ForgeConfig::load_or_default(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, ForgeConfig::default());
    }

    #[test]
    fn test_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ForgeConfig::load(&path),
            Err(ForgeError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_with_output_dir() {
        let config = ForgeConfig::default().with_output_dir(Path::new("/srv/generated"));
        assert_eq!(config.circuit_output_root, PathBuf::from("/srv/generated/circuit"));
        assert_eq!(config.code_output_root, PathBuf::from("/srv/generated/code"));
    }

    #[test]
    fn test_keygen_node_options() {
        assert_eq!(
            ForgeConfig::default().keygen_node_options(),
            "--max-old-space-size=112000"
        );
    }
}
