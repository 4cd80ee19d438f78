//! Configuration loaded from `mkchal.config.json`.
//!
//! Every field is optional in the file; missing fields take the defaults below.
//!
//! ```json
//! {
//!   "templates_dir": "templates/challenges",
//!   "output_dir": "src",
//!   "workers": 4,
//!   "timeout_secs": 60,
//!   "secret": { "prefix": "bctf", "random_bytes": 16 },
//!   "markers": { "open": "{", "close": "}" },
//!   "toolchains": {
//!     "rev": { "command": ["cc", "-O2", "-s", "-o", "{artifact}", "{source}"],
//!              "artifact": "chall", "executable": true }
//!   },
//!   "layout": { "dist_dir": "dist", "solve_dir": null }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bundle::LayoutSpec;
use crate::error::{MkchalError, Result};
use crate::secret::SecretConfig;
use crate::templates::registry::TemplateRegistry;
use crate::templates::syntax::MarkerSyntax;
use crate::toolchain::{default_toolchains, ToolchainConfig, DEFAULT_TIMEOUT_SECS};

/// Config file looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "mkchal.config.json";

/// Top-level mkchal configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MkchalConfig {
    /// Directory of `<category>/<template>` files. The built-in templates are used when unset.
    pub templates_dir: Option<PathBuf>,
    /// Root of the generated challenge tree.
    pub output_dir: PathBuf,
    /// Maximum number of concurrent generation runs.
    pub workers: usize,
    /// Build timeout for toolchains that do not set their own.
    pub timeout_secs: u64,
    pub secret: SecretConfig,
    pub markers: MarkerSyntax,
    /// Per-category toolchains, merged over [`default_toolchains`].
    pub toolchains: BTreeMap<String, ToolchainConfig>,
    pub layout: LayoutSpec,
}

impl Default for MkchalConfig {
    fn default() -> Self {
        Self {
            templates_dir: None,
            output_dir: PathBuf::from("src"),
            workers: 4,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            secret: SecretConfig::default(),
            markers: MarkerSyntax::default(),
            toolchains: BTreeMap::new(),
            layout: LayoutSpec::default(),
        }
    }
}

impl MkchalConfig {
    /// Load a config file. The file must exist.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| MkchalError::ConfigNotFound {
                path: path.to_path_buf(),
                source: e,
            })?;
        serde_json::from_str(&contents).map_err(|e| MkchalError::ConfigParse {
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
        let json = serde_json::to_string_pretty(self).map_err(|e| MkchalError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// The toolchain for `category`, with the global timeout applied when the toolchain
    /// has none of its own.
    pub fn toolchain_for(&self, category: &str) -> Result<ToolchainConfig> {
        let mut toolchain = match self.toolchains.get(category) {
            Some(toolchain) => toolchain.clone(),
            None => default_toolchains()
                .remove(category)
                .ok_or_else(|| MkchalError::UnknownToolchain(category.to_string()))?,
        };
        toolchain.timeout_secs = toolchain.timeout_secs.or(Some(self.timeout_secs));
        Ok(toolchain)
    }

    /// Open the template registry this config points at.
    pub fn registry(&self) -> Result<Arc<TemplateRegistry>> {
        match &self.templates_dir {
            Some(dir) => Ok(Arc::new(TemplateRegistry::from_dir(dir, &self.markers)?)),
            None => Ok(TemplateRegistry::builtin()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_takes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(
            &path,
            r#"{ "workers": 8, "secret": { "prefix": "flag" }, "layout": { "solve_dir": null } }"#,
        )
        .unwrap();

        let config = MkchalConfig::load(&path).unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.secret.prefix, "flag");
        assert_eq!(config.secret.random_bytes, 16);
        assert_eq!(config.output_dir, PathBuf::from("src"));
        assert_eq!(config.layout.solve_dir, None);
        assert_eq!(config.layout.dist_dir, Some(PathBuf::from("dist")));
    }

    #[test]
    fn test_save_load_preserves_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        let mut config = MkchalConfig::default();
        config.templates_dir = Some(PathBuf::from("tmpl"));
        config.markers = MarkerSyntax {
            open: '<',
            close: '>',
        };
        config.save(&path).unwrap();
        assert_eq!(MkchalConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            MkchalConfig::load(&missing),
            Err(MkchalError::ConfigNotFound { .. })
        ));
        assert_eq!(
            MkchalConfig::load_or_default(&missing).unwrap(),
            MkchalConfig::default()
        );

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ workers: }").unwrap();
        assert!(matches!(
            MkchalConfig::load_or_default(&bad),
            Err(MkchalError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_toolchain_for() {
        let mut config = MkchalConfig {
            timeout_secs: 5,
            ..MkchalConfig::default()
        };

        let pwn = config.toolchain_for("pwn").unwrap();
        assert_eq!(pwn.program(), Some("cc"));
        assert_eq!(pwn.timeout_secs, Some(5));

        assert!(matches!(
            config.toolchain_for("osint"),
            Err(MkchalError::UnknownToolchain(_))
        ));

        config.toolchains.insert(
            "pwn".into(),
            ToolchainConfig {
                command: vec!["clang".into(), "{source}".into()],
                artifact: Some("a.out".into()),
                executable: true,
                timeout_secs: Some(120),
            },
        );
        let pwn = config.toolchain_for("pwn").unwrap();
        assert_eq!(pwn.program(), Some("clang"));
        assert_eq!(pwn.timeout_secs, Some(120));
    }

    #[test]
    fn test_registry_defaults_to_builtin() {
        let registry = MkchalConfig::default().registry().unwrap();
        assert!(registry.load("pwn", "sample").is_ok());
    }
}
