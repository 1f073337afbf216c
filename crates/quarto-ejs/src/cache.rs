/*
 * cache.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Compiled-template and source-text caches.
//!
//! Two independent maps: compiled templates keyed by filename (used by
//! `render`), and raw template text keyed by `"<path>:string"` (used by
//! `render_file`). Entries are shared; a recompile replaces the entry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::compiler::CompiledTemplate;

#[derive(Debug, Default)]
pub struct TemplateCache {
    compiled: HashMap<String, Arc<CompiledTemplate>>,
    sources: HashMap<String, Arc<str>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The source-cache key for a template path.
    pub fn source_key(path: &str) -> String {
        format!("{path}:string")
    }

    pub fn compiled(&self, filename: &str) -> Option<Arc<CompiledTemplate>> {
        self.compiled.get(filename).cloned()
    }

    pub fn insert_compiled(
        &mut self,
        filename: impl Into<String>,
        template: Arc<CompiledTemplate>,
    ) -> Arc<CompiledTemplate> {
        self.compiled.insert(filename.into(), Arc::clone(&template));
        template
    }

    pub fn source(&self, key: &str) -> Option<Arc<str>> {
        self.sources.get(key).cloned()
    }

    pub fn insert_source(&mut self, key: impl Into<String>, text: impl Into<Arc<str>>) -> Arc<str> {
        let text = text.into();
        self.sources.insert(key.into(), Arc::clone(&text));
        text
    }

    /// Drop every entry of both maps.
    pub fn clear(&mut self) {
        self.compiled.clear();
        self.sources.clear();
    }

    /// Number of compiled templates held.
    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty() && self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::paths::BaseDir;
    use crate::reader::NullReader;

    fn compiled(text: &str) -> Arc<CompiledTemplate> {
        let base = BaseDir::new("");
        Arc::new(Compiler::new(&NullReader, &base).compile(text, None).unwrap())
    }

    #[test]
    fn test_compiled_entries_are_shared() {
        let mut cache = TemplateCache::new();
        let template = cache.insert_compiled("a.ejs", compiled("a"));
        let hit = cache.compiled("a.ejs").unwrap();
        assert!(Arc::ptr_eq(&template, &hit));
        assert!(cache.compiled("b.ejs").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_source_and_compiled_maps_are_separate() {
        let mut cache = TemplateCache::new();
        cache.insert_source(TemplateCache::source_key("a.ejs"), "text");
        assert!(cache.compiled("a.ejs").is_none());
        assert_eq!(cache.source("a.ejs:string").as_deref(), Some("text"));
        assert_eq!(cache.len(), 0);
        assert!(!cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut cache = TemplateCache::new();
        cache.insert_compiled("a.ejs", compiled("a"));
        cache.insert_source("a.ejs:string", "a");
        cache.clear();
        assert!(cache.is_empty());
    }
}
