/*
 * render.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Render command implementation
 */

//! Render command implementation.
//!
//! Reads a template through the engine's file-system reader, renders it
//! with the input values assembled from `--locals` and `--set`, and writes
//! the result to stdout.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use quarto_ejs::{Locals, RenderOptions};

use crate::EngineArgs;
use crate::commands::load_engine;

/// Arguments for the render command
#[derive(Debug)]
pub struct RenderArgs {
    pub path: String,
    /// JSON file with input values
    pub locals: Option<PathBuf>,
    /// KEY=VALUE assignments, applied after `locals`
    pub set: Vec<String>,
    pub compile_debug: bool,
    pub cache: bool,
    pub debug: bool,
    pub engine: EngineArgs,
}

/// Execute the render command
pub fn execute(args: RenderArgs) -> Result<()> {
    let mut engine = load_engine(&args.engine)?;
    let locals = build_locals(args.locals.as_ref(), &args.set)?;
    debug!(path = %args.path, locals = locals.len(), "rendering template");

    let options = RenderOptions::new()
        .with_locals(locals)
        .with_compile_debug(args.compile_debug)
        .with_cache(args.cache)
        .with_debug(args.debug);
    let output = engine
        .render_file(&args.path, &options)
        .with_context(|| format!("Failed to render {}", args.path))?;
    print!("{output}");
    Ok(())
}

/// Merge the `--locals` file and the `--set` assignments.
fn build_locals(file: Option<&PathBuf>, assignments: &[String]) -> Result<Locals> {
    let mut locals = match file {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read locals from {}", path.display()))?;
            match serde_json::from_str::<serde_json::Value>(&text)
                .with_context(|| format!("Invalid JSON in {}", path.display()))?
            {
                serde_json::Value::Object(map) => map,
                _ => anyhow::bail!("{} must contain a JSON object", path.display()),
            }
        }
        None => Locals::new(),
    };

    for assignment in assignments {
        let (key, value) = parse_assignment(assignment)?;
        locals.insert(key, value);
    }
    Ok(locals)
}

/// Split `KEY=VALUE`. The value is JSON when it parses as JSON, otherwise
/// a plain string.
fn parse_assignment(assignment: &str) -> Result<(String, serde_json::Value)> {
    let (key, value) = assignment
        .split_once('=')
        .with_context(|| format!("Expected KEY=VALUE, got '{assignment}'"))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("Missing key in '{assignment}'");
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            parse_assignment("name=tobi").unwrap(),
            ("name".to_string(), json!("tobi"))
        );
        assert_eq!(
            parse_assignment("items=[1,2]").unwrap(),
            ("items".to_string(), json!([1, 2]))
        );
        assert_eq!(
            parse_assignment("expr=a=b").unwrap(),
            ("expr".to_string(), json!("a=b"))
        );
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=x").is_err());
    }

    #[test]
    fn test_build_locals_merges_file_and_assignments() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("locals.json");
        std::fs::write(&file, r#"{"name": "loki", "age": 2}"#).unwrap();

        let locals = build_locals(Some(&file), &["name=tobi".to_string()]).unwrap();
        assert_eq!(locals.get("name"), Some(&json!("tobi")));
        assert_eq!(locals.get("age"), Some(&json!(2)));
    }

    #[test]
    fn test_build_locals_rejects_non_object() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("locals.json");
        std::fs::write(&file, "[1, 2]").unwrap();
        assert!(build_locals(Some(&file), &[]).is_err());
    }
}
