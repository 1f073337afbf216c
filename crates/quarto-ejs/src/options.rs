/*
 * options.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Per-call options for `compile`, `render` and `render_file`.

use crate::compiler::Locals;
use crate::config::EngineConfig;
use crate::escape::Escaper;
use crate::lexer::Delimiters;

/// Options for one compile or render call.
///
/// Unset fields fall back to the engine's [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// The input values.
    pub locals: Locals,
    /// Name used for diagnostics, include resolution and as cache key.
    pub filename: Option<String>,
    pub open: Option<String>,
    pub close: Option<String>,
    pub compile_debug: Option<bool>,
    /// `render` defaults to no caching; `render_file` to the engine's
    /// `cache-files` setting.
    pub cache: Option<bool>,
    /// Value bound to `this` while rendering.
    pub scope: Option<serde_json::Value>,
    /// Log the generated program.
    pub debug: bool,
    pub escape: Option<Escaper>,
}

impl RenderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_locals(mut self, locals: Locals) -> Self {
        self.locals = locals;
        self
    }

    /// Set a single input value.
    pub fn with_local(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.locals.insert(key.into(), value.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_delimiters(mut self, open: impl Into<String>, close: impl Into<String>) -> Self {
        self.open = Some(open.into());
        self.close = Some(close.into());
        self
    }

    pub fn with_open(mut self, open: impl Into<String>) -> Self {
        self.open = Some(open.into());
        self
    }

    pub fn with_close(mut self, close: impl Into<String>) -> Self {
        self.close = Some(close.into());
        self
    }

    pub fn with_compile_debug(mut self, compile_debug: bool) -> Self {
        self.compile_debug = Some(compile_debug);
        self
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_scope(mut self, scope: serde_json::Value) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_escape(mut self, escape: Escaper) -> Self {
        self.escape = Some(escape);
        self
    }

    pub(crate) fn delimiters(&self, config: &EngineConfig) -> Delimiters {
        Delimiters::new(
            self.open.clone().unwrap_or_else(|| config.open.clone()),
            self.close.clone().unwrap_or_else(|| config.close.clone()),
        )
    }

    pub(crate) fn compile_debug_or(&self, config: &EngineConfig) -> bool {
        self.compile_debug.unwrap_or(config.compile_debug)
    }

    pub(crate) fn escape_or(&self, config: &EngineConfig) -> Escaper {
        self.escape.unwrap_or(config.escape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_options_override_config() {
        let config = EngineConfig {
            open: "{{".to_string(),
            close: "}}".to_string(),
            compile_debug: false,
            ..EngineConfig::default()
        };

        let defaults = RenderOptions::new();
        assert_eq!(defaults.delimiters(&config), Delimiters::new("{{", "}}"));
        assert!(!defaults.compile_debug_or(&config));
        assert_eq!(defaults.escape_or(&config), Escaper::Html);

        let options = RenderOptions::new()
            .with_open("[")
            .with_compile_debug(true)
            .with_escape(Escaper::Identity);
        assert_eq!(options.delimiters(&config), Delimiters::new("[", "}}"));
        assert!(options.compile_debug_or(&config));
        assert_eq!(options.escape_or(&config), Escaper::Identity);
    }

    #[test]
    fn test_with_local() {
        let options = RenderOptions::new()
            .with_local("name", "tobi")
            .with_local("age", 3);
        assert_eq!(options.locals.get("name"), Some(&serde_json::json!("tobi")));
        assert_eq!(options.locals.len(), 2);
    }
}
