/*
 * include.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Compile-time include expansion.
//!
//! `<% include path %>` inlines another template: the target is resolved
//! against the including template's directory (or the base directory),
//! read through the [`TemplateReader`], lexed with the same delimiters and
//! expanded recursively. Each included file gets its own entry in the
//! source table so diagnostics can point into it.

use crate::error::{TemplateError, TemplateResult};
use crate::lexer::{Delimiters, Location, Segment, lex};
use crate::paths::BaseDir;
use crate::program::TemplateSource;
use crate::reader::TemplateReader;

/// Expands include segments for one compilation.
pub struct Includer<'a> {
    reader: &'a dyn TemplateReader,
    base: &'a BaseDir,
    delimiters: &'a Delimiters,
    sources: &'a mut Vec<TemplateSource>,
    /// Templates currently being expanded, outermost first.
    stack: Vec<String>,
}

impl<'a> Includer<'a> {
    pub fn new(
        reader: &'a dyn TemplateReader,
        base: &'a BaseDir,
        delimiters: &'a Delimiters,
        sources: &'a mut Vec<TemplateSource>,
    ) -> Self {
        Self {
            reader,
            base,
            delimiters,
            sources,
            stack: Vec::new(),
        }
    }

    /// Replace every `Include` in `segments` (recursively) with the included
    /// template's segments. `filename` names the template `segments` came
    /// from, if it has one.
    pub fn expand(
        &mut self,
        segments: Vec<Segment>,
        filename: Option<&str>,
    ) -> TemplateResult<Vec<Segment>> {
        if let Some(filename) = filename {
            self.stack.push(self.base.resolve(filename));
        }
        let result = self.expand_segments(segments, filename);
        if filename.is_some() {
            self.stack.pop();
        }
        result
    }

    fn expand_segments(
        &mut self,
        segments: Vec<Segment>,
        filename: Option<&str>,
    ) -> TemplateResult<Vec<Segment>> {
        segments
            .into_iter()
            .map(|segment| match segment {
                Segment::Include { path, location } => self.include(&path, filename, location),
                other => Ok(other),
            })
            .collect()
    }

    fn include(
        &mut self,
        target: &str,
        including: Option<&str>,
        location: Location,
    ) -> TemplateResult<Segment> {
        let path = self.base.resolve_include(target, including);
        if self.stack.contains(&path) {
            let mut chain = self.stack.clone();
            chain.push(path.clone());
            return Err(TemplateError::CircularInclude { path, chain });
        }

        let text = self
            .reader
            .read(&path, "utf8")
            .ok_or_else(|| TemplateError::IncludeNotFound { path: path.clone() })?;
        tracing::debug!(path = %path, from = including.unwrap_or("<template>"), "including template");

        let source = self.sources.len();
        let segments = lex(&text, source, self.delimiters)?;
        self.sources.push(TemplateSource::new(text, Some(path.clone())));

        self.stack.push(path.clone());
        let segments = self.expand_segments(segments, Some(&path));
        self.stack.pop();
        Ok(Segment::Included {
            segments: segments?,
            path,
            source,
            location,
        })
    }
}
