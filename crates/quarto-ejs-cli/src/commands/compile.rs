/*
 * compile.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Compile command implementation
 */

//! Compile command implementation.
//!
//! Prints the program a template compiles to, or its client form as JSON.

use anyhow::{Context, Result};
use tracing::debug;

use quarto_ejs::{Engine, RenderOptions, TemplateReader};

use crate::EngineArgs;
use crate::commands::load_engine;

/// Arguments for the compile command
#[derive(Debug)]
pub struct CompileArgs {
    pub path: String,
    /// Print the client form instead of the program listing
    pub client: bool,
    pub engine: EngineArgs,
}

/// Execute the compile command
pub fn execute(args: CompileArgs) -> Result<()> {
    let engine = load_engine(&args.engine)?;
    let reader = quarto_ejs::FileSystemReader::new(&args.engine.root);
    print!("{}", compile_to_string(&engine, &reader, &args.path, args.client)?);
    Ok(())
}

fn compile_to_string(
    engine: &Engine,
    reader: &dyn TemplateReader,
    path: &str,
    client: bool,
) -> Result<String> {
    let path = engine.base().resolve(path);
    let text = reader
        .read(&path, "utf8")
        .with_context(|| format!("Template not found: {path}"))?;
    debug!(path = %path, client, "compiling template");

    let options = RenderOptions::new().with_filename(path.clone());
    if client {
        let template = engine
            .compile_client(&text, &options)
            .with_context(|| format!("Failed to compile {path}"))?;
        let mut json = template.to_json()?;
        json.push('\n');
        Ok(json)
    } else {
        let template = engine
            .compile(&text, &options)
            .with_context(|| format!("Failed to compile {path}"))?;
        Ok(template.program().to_string())
    }
}
