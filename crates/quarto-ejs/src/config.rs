/*
 * config.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Engine configuration.
//!
//! Configuration is plain data, loadable from TOML:
//!
//! ```toml
//! base = "views"
//! open = "{{"
//! close = "}}"
//! compile-debug = true
//! cache-files = true
//! escape = "html"
//! max-call-depth = 64
//! ```
//!
//! Every key is optional. Per-call [`RenderOptions`](crate::RenderOptions)
//! override these values.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{TemplateError, TemplateResult};
use crate::escape::Escaper;
use crate::lexer::{DEFAULT_CLOSE, DEFAULT_OPEN, Delimiters};

/// Default nesting limit for template-defined function calls.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct EngineConfig {
    /// Base directory that relative template paths resolve against.
    pub base: String,
    /// Default open delimiter.
    pub open: String,
    /// Default close delimiter.
    pub close: String,
    /// Attach line context to runtime errors.
    pub compile_debug: bool,
    /// Default for `cache` in `render_file`.
    pub cache_files: bool,
    /// Escape function for `<%= %>` output.
    pub escape: Escaper,
    /// Maximum nesting of template-defined function calls.
    pub max_call_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base: String::new(),
            open: DEFAULT_OPEN.to_string(),
            close: DEFAULT_CLOSE.to_string(),
            compile_debug: true,
            cache_files: true,
            escape: Escaper::Html,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> TemplateResult<Self> {
        let config: EngineConfig = toml::from_str(text).map_err(|e| TemplateError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> TemplateResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> TemplateResult<String> {
        toml::to_string(self).map_err(|e| TemplateError::Config {
            message: e.to_string(),
        })
    }

    pub fn validate(&self) -> TemplateResult<()> {
        if self.open.is_empty() || self.close.is_empty() {
            return Err(TemplateError::Config {
                message: "open and close delimiters must not be empty".to_string(),
            });
        }
        if self.max_call_depth == 0 {
            return Err(TemplateError::Config {
                message: "max-call-depth must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn delimiters(&self) -> Delimiters {
        Delimiters::new(self.open.clone(), self.close.clone())
    }
}
