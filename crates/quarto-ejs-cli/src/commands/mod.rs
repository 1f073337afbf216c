//! Command implementations for the quarto-ejs CLI
//!
//! Each command module handles the CLI interface and delegates to
//! quarto-ejs for the actual work.

use std::sync::Arc;

use anyhow::{Context, Result};
use quarto_ejs::{Engine, EngineConfig, FileSystemReader};

use crate::EngineArgs;

pub mod compile;
pub mod render;

/// Build an engine from the configuration file and command-line overrides.
pub fn load_engine(args: &EngineArgs) -> Result<Engine> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let (Some(open), Some(close)) = (&args.open, &args.close) {
        config.open = open.clone();
        config.close = close.clone();
    }
    config.validate().context("Invalid delimiters")?;

    let mut engine = Engine::with_reader(config, Arc::new(FileSystemReader::new(&args.root)));
    if let Some(base) = &args.base {
        engine.set_base(base);
    }
    Ok(engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_load_engine_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("ejs.toml");
        std::fs::write(&config, "open = \"{{\"\nclose = \"}}\"\nbase = \"site\"\n").unwrap();

        let engine = load_engine(&EngineArgs {
            config: Some(config.clone()),
            root: PathBuf::from("."),
            ..EngineArgs::default()
        })
        .unwrap();
        assert_eq!(engine.config().open, "{{");
        assert_eq!(engine.base().as_str(), "site");

        let engine = load_engine(&EngineArgs {
            config: Some(config),
            root: PathBuf::from("."),
            base: Some("/other/".to_string()),
            open: Some("[%".to_string()),
            close: Some("%]".to_string()),
        })
        .unwrap();
        assert_eq!(engine.config().open, "[%");
        assert_eq!(engine.base().as_str(), "other");
    }

    #[test]
    fn test_load_engine_missing_config() {
        let err = load_engine(&EngineArgs {
            config: Some(PathBuf::from("/nonexistent/ejs.toml")),
            ..EngineArgs::default()
        })
        .unwrap_err();
        assert!(err.to_string().starts_with("Failed to load configuration"));
    }
}
