/*
 * program.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Compiled template programs.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::script::ast::{Statements, Stmt};

/// Template text plus the path it was read from, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSource {
    pub text: String,
    pub filename: Option<String>,
}

impl TemplateSource {
    pub fn new(text: impl Into<String>, filename: Option<String>) -> Self {
        Self {
            text: text.into(),
            filename,
        }
    }

    /// The 1-based `line` of the text, if it exists.
    pub fn line(&self, line: usize) -> Option<&str> {
        line.checked_sub(1)
            .and_then(|index| self.text.split('\n').nth(index))
    }
}

/// The statements of a template and the sources they were compiled from.
///
/// Source 0 is the template itself; included templates follow in the order
/// they were first read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub body: Vec<Stmt>,
    pub sources: Vec<TemplateSource>,
}

impl Program {
    pub fn source(&self, index: usize) -> Option<&TemplateSource> {
        self.sources.get(index)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Statements(&self.body))
    }
}
