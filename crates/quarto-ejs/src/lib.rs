/*
 * lib.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! EJS-compatible template compiler and renderer.
//!
//! Templates are text with embedded tags:
//!
//! - `<% code %>`: statement code (loops, conditionals, declarations)
//! - `<%= expr %>`: escaped output
//! - `<%- expr %>`: raw output
//! - `<%=: value | filter:args | filter2 %>`: filter pipelines
//! - `<% include path %>`: compile-time inclusion of another template
//! - `-%>`: swallow the newline following the tag
//!
//! Delimiters are configurable per engine and per call.
//!
//! # Architecture
//!
//! Compilation is lex -> include expansion -> code generation; the result is
//! a [`Program`] (a statement AST plus the source table for diagnostics)
//! run by a tree-walking interpreter for a small JavaScript subset. There
//! is no `eval` step and no generated source text; line numbers in runtime
//! errors come straight from the AST.
//!
//! # Example
//!
//! ```ignore
//! use quarto_ejs::{Engine, RenderOptions};
//!
//! let mut engine = Engine::default();
//! let options = RenderOptions::new().with_local("name", "tobi");
//! let output = engine.render("<p><%= name %></p>", &options)?;
//! assert_eq!(output, "<p>tobi</p>");
//! ```

pub mod cache;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod escape;
pub mod filters;
pub mod include;
pub mod lexer;
pub mod options;
pub mod paths;
pub mod program;
pub mod reader;
pub mod script;
pub mod value;

// Re-export main types at crate root
pub use cache::TemplateCache;
pub use compiler::{ClientTemplate, CompiledTemplate, Compiler, Locals, error_context};
pub use config::EngineConfig;
pub use engine::{
    Engine, clear_cache, compile, default_engine, register_filter, render, render_file, set_base,
};
pub use error::{RuntimeError, TemplateError, TemplateResult};
pub use escape::Escaper;
pub use filters::FilterRegistry;
pub use lexer::{Delimiters, Location, Segment};
pub use options::RenderOptions;
pub use paths::BaseDir;
pub use program::{Program, TemplateSource};
pub use reader::{FileSystemReader, MemoryReader, NullReader, TemplateReader};
pub use value::Value;
