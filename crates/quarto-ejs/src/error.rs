/*
 * error.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Error types for template compilation and rendering.

use thiserror::Error;

/// Errors raised while a compiled template program executes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    /// A filter pipeline referenced a name missing from the registry.
    #[error("filters.{name} is not a function")]
    FilterNotFound { name: String },

    /// A registered filter rejected its input.
    #[error("filter '{name}' failed: {message}")]
    Filter { name: String, message: String },

    /// A host-language type error (e.g. reading a property of `undefined`).
    #[error("TypeError: {0}")]
    Type(String),

    /// Something that is not a function was called.
    #[error("TypeError: {0} is not a function")]
    NotCallable(String),

    /// A value out of the allowed range (e.g. a string too long to build).
    #[error("RangeError: {0}")]
    Range(String),

    /// Function calls nested deeper than the configured limit.
    #[error("RangeError: Maximum call stack size exceeded")]
    StackOverflow,
}

/// Errors that can occur during template operations.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// An open delimiter without a matching close delimiter.
    #[error("Could not find matching close tag \"{close}\".")]
    UnterminatedTag { close: String, line: usize },

    /// Statement code that is not valid in the template script language.
    #[error("{message} {}", syntax_suffix(.filename))]
    Syntax {
        message: String,
        filename: Option<String>,
        line: usize,
    },

    /// Runtime failure with no diagnostic context attached (`compile_debug` off).
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Runtime failure enriched with the failing line and an excerpt of the source.
    #[error("{}:{line}\n{excerpt}\n\n{source}", .path.as_deref().unwrap_or("ejs"))]
    Render {
        path: Option<String>,
        line: usize,
        excerpt: String,
        source: RuntimeError,
    },

    /// `cache` was requested without a `filename` to key the cache by.
    #[error("\"cache\" option requires \"filename\".")]
    CacheRequiresFilename,

    /// An include chain re-entered a template that is already being compiled.
    #[error("Circular include of \"{path}\" (via {})", .chain.join(" -> "))]
    CircularInclude { path: String, chain: Vec<String> },

    /// The read collaborator returned nothing for an included template.
    #[error("Included template not found: {path}")]
    IncludeNotFound { path: String },

    /// The read collaborator returned nothing for a rendered template file.
    #[error("Template not found: {path}")]
    TemplateNotFound { path: String },

    /// Invalid engine configuration.
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// I/O error (e.g. reading a configuration file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn syntax_suffix(filename: &Option<String>) -> String {
    match filename {
        Some(f) => format!("in {f}"),
        None => "while compiling ejs".to_string(),
    }
}

impl TemplateError {
    /// The runtime error behind this error, enriched or not.
    pub fn runtime_error(&self) -> Option<&RuntimeError> {
        match self {
            TemplateError::Runtime(e) => Some(e),
            TemplateError::Render { source, .. } => Some(source),
            _ => None,
        }
    }

    /// The template path attached by diagnostics, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            TemplateError::Render { path, .. } => path.as_deref(),
            _ => None,
        }
    }
}

/// Result type for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Result type for program execution.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
