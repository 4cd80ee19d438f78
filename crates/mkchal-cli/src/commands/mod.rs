//! CLI command implementations for mkchal.
//!
//! Each module corresponds to a subcommand (`mkchal <command>`).

pub mod batch;
pub mod generate;
pub mod list;
pub mod render;
pub mod verify;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use mkchal_core::config::{MkchalConfig, DEFAULT_CONFIG_FILE};
use mkchal_core::pipeline::RunError;

use crate::output;

/// Load `--config` if given (it must exist), otherwise `./mkchal.config.json` or defaults.
///
/// `templates` overrides the configured templates directory.
pub fn load_config(path: Option<&Path>, templates: Option<PathBuf>) -> Result<MkchalConfig> {
    let mut config = match path {
        Some(path) => MkchalConfig::load(path)?,
        None => MkchalConfig::load_or_default(Path::new(DEFAULT_CONFIG_FILE))?,
    };
    if templates.is_some() {
        config.templates_dir = templates;
    }
    config
        .markers
        .validate()
        .context("invalid `markers` in config")?;
    config
        .layout
        .validate()
        .context("invalid `layout` in config")?;
    Ok(config)
}

/// Parse a `--set KEY=VALUE` argument. The value may itself contain `=`.
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{s}`"))?;
    if key.is_empty() {
        return Err(format!("empty key in `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Print a failed run with its stage, template and full diagnostic.
pub fn report_run_error(err: &RunError) {
    output::print_error(&err.to_string());
    output::print_diagnostic(&err.source.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("port=1337").unwrap(),
            ("port".to_string(), "1337".to_string())
        );
        assert_eq!(
            parse_key_value("cmd=a=b").unwrap(),
            ("cmd".to_string(), "a=b".to_string())
        );
        assert_eq!(
            parse_key_value("empty=").unwrap(),
            ("empty".to_string(), String::new())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_load_config_explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("missing.json")), None).is_err());

        let path = dir.path().join("mkchal.config.json");
        std::fs::write(&path, r#"{ "markers": { "open": "a", "close": "b" } }"#).unwrap();
        assert!(load_config(Some(&path), None).is_err());

        std::fs::write(&path, r#"{ "layout": { "secret": "../flag.txt" } }"#).unwrap();
        assert!(load_config(Some(&path), None).is_err());

        std::fs::write(&path, r#"{ "workers": 2 }"#).unwrap();
        let config = load_config(Some(&path), Some(PathBuf::from("tmpl"))).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.templates_dir, Some(PathBuf::from("tmpl")));
    }
}
