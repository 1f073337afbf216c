/*
 * reader.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template text loading.
//!
//! This module provides the trait the engine reads template files through,
//! plus implementations backed by the filesystem, an in-memory map, and
//! nothing at all.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

/// Trait for reading template text.
///
/// `path` is a resolved, slash-separated template path; `charset` names the
/// requested encoding (the engine always asks for `"utf8"`).
pub trait TemplateReader: Send + Sync {
    /// Returns the template text, or `None` if it cannot be read.
    fn read(&self, path: &str, charset: &str) -> Option<String>;
}

/// Reader that loads templates from files under a root directory.
///
/// A leading `/` in a template path means the root directory, not the
/// filesystem root. Paths with `..` components are never read, so a
/// template cannot reach files outside the root.
#[derive(Debug, Clone)]
pub struct FileSystemReader {
    root: PathBuf,
}

impl FileSystemReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The file a template path maps to, or `None` if the path would
    /// leave the root directory.
    pub fn file_path(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
            .then(|| self.root.join(relative))
    }
}

impl Default for FileSystemReader {
    fn default() -> Self {
        Self::new(".")
    }
}

impl TemplateReader for FileSystemReader {
    fn read(&self, path: &str, charset: &str) -> Option<String> {
        if !charset.eq_ignore_ascii_case("utf8") && !charset.eq_ignore_ascii_case("utf-8") {
            tracing::warn!(charset, "only UTF-8 templates are supported; reading as UTF-8");
        }
        let Some(file) = self.file_path(path) else {
            tracing::warn!(path, "refusing to read a template outside the root directory");
            return None;
        };
        match std::fs::read_to_string(&file) {
            Ok(text) => {
                tracing::debug!(path = %file.display(), bytes = text.len(), "read template");
                Some(text)
            }
            Err(err) => {
                tracing::debug!(path = %file.display(), error = %err, "failed to read template");
                None
            }
        }
    }
}

/// Reader that never finds anything.
///
/// Use this reader for engines that only render template strings without
/// includes.
#[derive(Debug, Clone, Default)]
pub struct NullReader;

impl TemplateReader for NullReader {
    fn read(&self, _path: &str, _charset: &str) -> Option<String> {
        None
    }
}

/// Reader that serves templates from an in-memory map.
///
/// Useful for testing and for templates bundled into the application.
/// Keys are looked up with leading slashes removed.
#[derive(Debug, Clone, Default)]
pub struct MemoryReader {
    templates: HashMap<String, String>,
}

impl MemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: impl Into<String>, text: impl Into<String>) -> &mut Self {
        let path = path.into();
        self.templates
            .insert(path.trim_start_matches('/').to_string(), text.into());
        self
    }

    pub fn with_templates(
        templates: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        let mut reader = Self::new();
        for (path, text) in templates {
            reader.add(path, text);
        }
        reader
    }
}

impl TemplateReader for MemoryReader {
    fn read(&self, path: &str, _charset: &str) -> Option<String> {
        self.templates.get(path.trim_start_matches('/')).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_reader() {
        let reader = MemoryReader::with_templates([("views/a.ejs", "A"), ("/b.ejs", "B")]);
        assert_eq!(reader.read("views/a.ejs", "utf8").as_deref(), Some("A"));
        assert_eq!(reader.read("/views/a.ejs", "utf8").as_deref(), Some("A"));
        assert_eq!(reader.read("b.ejs", "utf8").as_deref(), Some("B"));
        assert_eq!(reader.read("missing.ejs", "utf8"), None);
    }

    #[test]
    fn test_null_reader() {
        assert_eq!(NullReader.read("anything", "utf8"), None);
    }

    #[test]
    fn test_file_system_reader() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("views")).unwrap();
        std::fs::write(dir.path().join("views/page.ejs"), "<p><%= x %></p>").unwrap();

        let reader = FileSystemReader::new(dir.path());
        assert_eq!(
            reader.read("views/page.ejs", "utf8").as_deref(),
            Some("<p><%= x %></p>")
        );
        assert_eq!(
            reader.read("/views/page.ejs", "utf8").as_deref(),
            Some("<p><%= x %></p>")
        );
        assert_eq!(reader.read("views/missing.ejs", "utf8"), None);
    }

    #[test]
    fn test_file_system_reader_stays_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("views");
        std::fs::create_dir_all(root.join("partials")).unwrap();
        std::fs::write(dir.path().join("secret.txt"), "secret").unwrap();
        std::fs::write(root.join("partials/menu.ejs"), "menu").unwrap();

        let reader = FileSystemReader::new(&root);
        assert_eq!(reader.read("/../secret.txt", "utf8"), None);
        assert_eq!(reader.read("../secret.txt", "utf8"), None);
        assert_eq!(reader.read("partials/../../secret.txt", "utf8"), None);
        assert_eq!(reader.file_path("partials/../menu.ejs"), None);
        assert_eq!(
            reader.read("./partials/menu.ejs", "utf8").as_deref(),
            Some("menu")
        );
        assert_eq!(reader.file_path("//partials/menu.ejs"), Some(root.join("partials/menu.ejs")));
    }
}
