/*
 * mod.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! The template script language.
//!
//! Statement tags and output expressions are written in a small JavaScript
//! subset: the usual statements, literals, operators, functions and arrow
//! functions, plus the common string/array methods and a handful of
//! globals (`JSON.stringify`, `Math`, `Object.keys`, `Array.isArray`,
//! `String`, `Number`, `parseInt`, `parseFloat`).

pub mod ast;
pub mod interp;
pub mod parser;
pub mod token;

pub use ast::{Expr, Stmt};
pub use interp::{Closure, Interpreter};
pub use parser::{SyntaxError, generate, parse_expression_source};
