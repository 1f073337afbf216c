/*
 * engine.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The template engine: configuration, filters, cache and the read
//! collaborator, plus the process-wide default instance behind the free
//! functions [`set_base`], [`compile`], [`render`], [`render_file`] and
//! [`clear_cache`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use once_cell::sync::Lazy;

use crate::cache::TemplateCache;
use crate::compiler::{ClientTemplate, CompiledTemplate, Compiler};
use crate::config::EngineConfig;
use crate::error::{TemplateError, TemplateResult};
use crate::filters::FilterRegistry;
use crate::options::RenderOptions;
use crate::paths::BaseDir;
use crate::reader::{FileSystemReader, TemplateReader};
use crate::value::Value;

/// Compiles and renders templates.
pub struct Engine {
    config: EngineConfig,
    base: BaseDir,
    reader: Arc<dyn TemplateReader>,
    filters: FilterRegistry,
    cache: TemplateCache,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("base", &self.base)
            .field("filters", &self.filters)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    /// An engine reading templates from the current directory.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_reader(config, Arc::new(FileSystemReader::default()))
    }

    pub fn with_reader(config: EngineConfig, reader: Arc<dyn TemplateReader>) -> Self {
        Self {
            base: BaseDir::new(&config.base),
            config,
            reader,
            filters: FilterRegistry::default(),
            cache: TemplateCache::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn base(&self) -> &BaseDir {
        &self.base
    }

    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    pub fn cache(&self) -> &TemplateCache {
        &self.cache
    }

    pub fn set_reader(&mut self, reader: Arc<dyn TemplateReader>) {
        self.reader = reader;
    }

    /// Replace the base directory. Leading and trailing slashes are trimmed.
    pub fn set_base(&mut self, url: &str) {
        self.base = BaseDir::new(url);
        self.config.base = self.base.as_str().to_string();
        tracing::debug!(base = %self.base.as_str(), "set base directory");
    }

    /// Register (or replace) a filter.
    pub fn register_filter<F>(&mut self, name: impl Into<String>, filter: F) -> &mut Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.filters.register(name, filter);
        self
    }

    /// Compile `text` without touching the cache.
    pub fn compile(&self, text: &str, options: &RenderOptions) -> TemplateResult<CompiledTemplate> {
        let template = Compiler::new(self.reader.as_ref(), &self.base)
            .with_delimiters(options.delimiters(&self.config))
            .with_escaper(options.escape_or(&self.config))
            .with_compile_debug(options.compile_debug_or(&self.config))
            .with_max_call_depth(self.config.max_call_depth)
            .compile(text, options.filename.as_deref())?;

        if options.debug {
            tracing::info!(
                target: "quarto_ejs::program",
                filename = options.filename.as_deref().unwrap_or("<template>"),
                "generated program:\n{}",
                template.program()
            );
        }
        Ok(template)
    }

    /// Compile `text` into its deferred-invocation form.
    pub fn compile_client(&self, text: &str, options: &RenderOptions) -> TemplateResult<ClientTemplate> {
        Ok(self.compile(text, options)?.to_client())
    }

    /// Render template text.
    ///
    /// With `cache` set the compiled template is stored under `filename`,
    /// which is then required.
    pub fn render(&mut self, text: &str, options: &RenderOptions) -> TemplateResult<String> {
        let template = if options.cache.unwrap_or(false) {
            let filename = options
                .filename
                .as_deref()
                .ok_or(TemplateError::CacheRequiresFilename)?;
            match self.cache.compiled(filename) {
                Some(template) => {
                    tracing::debug!(filename, "template cache hit");
                    template
                }
                None => {
                    tracing::debug!(filename, "template cache miss");
                    let template = Arc::new(self.compile(text, options)?);
                    self.cache.insert_compiled(filename, template)
                }
            }
        } else {
            Arc::new(self.compile(text, options)?)
        };

        template.render_with_scope(&options.locals, options.scope.as_ref(), &self.filters)
    }

    /// Read the template at `path` (relative to the base directory) and
    /// render it. The resolved path becomes the template's filename.
    pub fn render_file(&mut self, path: &str, options: &RenderOptions) -> TemplateResult<String> {
        let path = self.base.resolve(path);
        let cache = options.cache.unwrap_or(self.config.cache_files);
        let key = TemplateCache::source_key(&path);

        let text = match self.cache.source(&key).filter(|_| cache) {
            Some(text) => text,
            None => {
                let text = self
                    .reader
                    .read(&path, "utf8")
                    .ok_or_else(|| TemplateError::TemplateNotFound { path: path.clone() })?;
                if cache {
                    self.cache.insert_source(key, text)
                } else {
                    Arc::from(text)
                }
            }
        };

        let options = RenderOptions {
            filename: Some(path),
            cache: Some(cache),
            ..options.clone()
        };
        self.render(&text, &options)
    }

    /// Drop every cached template and source text.
    pub fn clear_cache(&mut self) {
        tracing::debug!(entries = self.cache.len(), "clearing template cache");
        self.cache.clear();
    }
}

// ============================================================================
// Process-wide default engine
// ============================================================================

static DEFAULT_ENGINE: Lazy<Mutex<Engine>> = Lazy::new(|| Mutex::new(Engine::default()));

/// Lock the process-wide default engine.
///
/// A panic while the lock was held leaves the engine usable; the cache may
/// simply be missing entries.
pub fn default_engine() -> MutexGuard<'static, Engine> {
    DEFAULT_ENGINE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Set the base directory of the default engine.
pub fn set_base(url: &str) {
    default_engine().set_base(url);
}

/// Compile with the default engine.
pub fn compile(text: &str, options: &RenderOptions) -> TemplateResult<CompiledTemplate> {
    default_engine().compile(text, options)
}

/// Render template text with the default engine.
pub fn render(text: &str, options: &RenderOptions) -> TemplateResult<String> {
    default_engine().render(text, options)
}

/// Render a template file with the default engine.
pub fn render_file(path: &str, options: &RenderOptions) -> TemplateResult<String> {
    default_engine().render_file(path, options)
}

/// Clear the default engine's cache.
pub fn clear_cache() {
    default_engine().clear_cache();
}

/// Register a filter on the default engine.
pub fn register_filter<F>(name: impl Into<String>, filter: F)
where
    F: Fn(&Value, &[Value]) -> Result<Value, String> + Send + Sync + 'static,
{
    default_engine().register_filter(name, filter);
}
