/*
 * compiler.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template compilation and invocation.
//!
//! Compiling runs the pipeline lex -> include expansion -> code generation
//! and pairs the resulting [`Program`] with the settings needed to run it.
//! A [`CompiledTemplate`] can be rendered any number of times; a
//! [`ClientTemplate`] is the same thing in a serializable form for
//! deferred rendering elsewhere.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_MAX_CALL_DEPTH;
use crate::error::{RuntimeError, TemplateError, TemplateResult};
use crate::escape::Escaper;
use crate::filters::FilterRegistry;
use crate::include::Includer;
use crate::lexer::{Delimiters, Location, lex};
use crate::paths::BaseDir;
use crate::program::{Program, TemplateSource};
use crate::reader::TemplateReader;
use crate::script::{Interpreter, SyntaxError, generate};
use crate::value::{ObjectRef, Value};

/// The input-values container passed to a compiled template.
pub type Locals = serde_json::Map<String, serde_json::Value>;

/// Number of lines shown on each side of the failing line in diagnostics.
const CONTEXT_LINES: usize = 3;

/// Compiles template text into [`CompiledTemplate`]s.
pub struct Compiler<'a> {
    reader: &'a dyn TemplateReader,
    base: &'a BaseDir,
    delimiters: Delimiters,
    escaper: Escaper,
    compile_debug: bool,
    max_call_depth: usize,
}

impl<'a> Compiler<'a> {
    /// A compiler reading includes through `reader`, resolved against `base`.
    pub fn new(reader: &'a dyn TemplateReader, base: &'a BaseDir) -> Self {
        Self {
            reader,
            base,
            delimiters: Delimiters::default(),
            escaper: Escaper::default(),
            compile_debug: true,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }

    pub fn with_delimiters(mut self, delimiters: Delimiters) -> Self {
        self.delimiters = delimiters;
        self
    }

    pub fn with_escaper(mut self, escaper: Escaper) -> Self {
        self.escaper = escaper;
        self
    }

    pub fn with_compile_debug(mut self, compile_debug: bool) -> Self {
        self.compile_debug = compile_debug;
        self
    }

    pub fn with_max_call_depth(mut self, max_call_depth: usize) -> Self {
        self.max_call_depth = max_call_depth;
        self
    }

    /// Compile `text`. `filename` is used for diagnostics and as the
    /// directory that relative includes resolve against.
    pub fn compile(&self, text: &str, filename: Option<&str>) -> TemplateResult<CompiledTemplate> {
        let program = self.program(text, filename)?;
        Ok(CompiledTemplate {
            program: Arc::new(program),
            escaper: self.escaper,
            compile_debug: self.compile_debug,
            max_call_depth: self.max_call_depth,
        })
    }

    /// Lex, expand includes and generate the program for `text`.
    pub fn program(&self, text: &str, filename: Option<&str>) -> TemplateResult<Program> {
        let start = Instant::now();
        let mut sources = vec![TemplateSource::new(text, filename.map(String::from))];

        let segments = lex(text, 0, &self.delimiters)?;
        let segments =
            Includer::new(self.reader, self.base, &self.delimiters, &mut sources)
                .expand(segments, filename)?;

        let body = generate(&segments, 0).map_err(|err| syntax_error(err, &sources))?;

        tracing::debug!(
            filename = filename.unwrap_or("<template>"),
            sources = sources.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "compiled template"
        );
        Ok(Program { body, sources })
    }
}

fn syntax_error(err: SyntaxError, sources: &[TemplateSource]) -> TemplateError {
    TemplateError::Syntax {
        message: err.message,
        filename: sources
            .get(err.location.source)
            .and_then(|source| source.filename.clone()),
        line: err.location.line,
    }
}

/// A compiled, reusable template.
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    program: Arc<Program>,
    escaper: Escaper,
    compile_debug: bool,
    max_call_depth: usize,
}

impl CompiledTemplate {
    /// Render with `locals` as the input values.
    pub fn render(&self, locals: &Locals, filters: &FilterRegistry) -> TemplateResult<String> {
        self.render_with_scope(locals, None, filters)
    }

    /// Render with `scope` bound to `this`.
    pub fn render_with_scope(
        &self,
        locals: &Locals,
        scope: Option<&serde_json::Value>,
        filters: &FilterRegistry,
    ) -> TemplateResult<String> {
        execute(
            &self.program,
            Settings {
                escaper: self.escaper,
                compile_debug: self.compile_debug,
                max_call_depth: self.max_call_depth,
            },
            locals,
            scope,
            filters,
        )
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn filename(&self) -> Option<&str> {
        self.program
            .source(0)
            .and_then(|source| source.filename.as_deref())
    }

    pub fn compile_debug(&self) -> bool {
        self.compile_debug
    }

    /// The deferred-invocation form of this template.
    pub fn to_client(&self) -> ClientTemplate {
        ClientTemplate {
            program: Arc::clone(&self.program),
            escaper: self.escaper,
            filename: self.filename().map(String::from),
            compile_debug: self.compile_debug,
            max_call_depth: self.max_call_depth,
        }
    }
}

/// A compiled template in serializable form.
///
/// The escaper travels with the program, so rendering a deserialized client
/// template only needs the locals and a filter registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientTemplate {
    pub program: Arc<Program>,
    pub escaper: Escaper,
    pub filename: Option<String>,
    pub compile_debug: bool,
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
}

fn default_max_call_depth() -> usize {
    DEFAULT_MAX_CALL_DEPTH
}

impl ClientTemplate {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn render(&self, locals: &Locals, filters: &FilterRegistry) -> TemplateResult<String> {
        execute(
            &self.program,
            Settings {
                escaper: self.escaper,
                compile_debug: self.compile_debug,
                max_call_depth: self.max_call_depth,
            },
            locals,
            None,
            filters,
        )
    }
}

#[derive(Clone, Copy)]
struct Settings {
    escaper: Escaper,
    compile_debug: bool,
    max_call_depth: usize,
}

fn execute(
    program: &Program,
    settings: Settings,
    locals: &Locals,
    scope: Option<&serde_json::Value>,
    filters: &FilterRegistry,
) -> TemplateResult<String> {
    let locals: ObjectRef = Rc::new(RefCell::new(
        locals
            .iter()
            .map(|(key, value)| (key.clone(), Value::from(value)))
            .collect(),
    ));
    let this = scope.map(Value::from).unwrap_or(Value::Undefined);

    let mut interpreter = Interpreter::new(locals, filters)
        .with_this(this)
        .with_escaper(settings.escaper)
        .with_max_depth(settings.max_call_depth);

    match interpreter.run(&program.body) {
        Ok(output) => Ok(output),
        Err(err) if settings.compile_debug => Err(enrich(err, program, interpreter.location())),
        Err(err) => Err(TemplateError::Runtime(err)),
    }
}

/// Attach the failing line and a source excerpt to a runtime error.
fn enrich(err: RuntimeError, program: &Program, location: Location) -> TemplateError {
    let source = program.source(location.source);
    TemplateError::Render {
        path: source.and_then(|source| source.filename.clone()),
        line: location.line,
        excerpt: source
            .map(|source| error_context(&source.text, location.line))
            .unwrap_or_default(),
        source: err,
    }
}

/// Lines around `line` of `text`, numbered, with ` >> ` marking `line`.
pub fn error_context(text: &str, line: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = line.saturating_sub(CONTEXT_LINES).max(1);
    let end = (line + CONTEXT_LINES).min(lines.len());

    (start..=end)
        .filter_map(|n| {
            let text = lines.get(n - 1)?;
            let marker = if n == line { " >> " } else { "    " };
            Some(format!("{marker}{n}| {text}"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{MemoryReader, NullReader};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn locals(value: serde_json::Value) -> Locals {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Locals::new(),
        }
    }

    fn compile(text: &str, filename: Option<&str>) -> TemplateResult<CompiledTemplate> {
        let base = BaseDir::new("");
        Compiler::new(&NullReader, &base).compile(text, filename)
    }

    // ========================================================================
    // Compilation
    // ========================================================================

    #[test]
    fn test_render_locals() {
        let template = compile("<p><%= name %></p>", None).unwrap();
        let output = template
            .render(&locals(json!({"name": "tobi"})), &FilterRegistry::default())
            .unwrap();
        assert_eq!(output, "<p>tobi</p>");
    }

    #[test]
    fn test_compiled_template_is_reusable() {
        let template = compile("<% for (const x of xs) { %><%= x %>,<% } %>", None).unwrap();
        let filters = FilterRegistry::default();
        assert_eq!(
            template.render(&locals(json!({"xs": [1, 2]})), &filters).unwrap(),
            "1,2,"
        );
        assert_eq!(
            template.render(&locals(json!({"xs": ["a"]})), &filters).unwrap(),
            "a,"
        );
    }

    #[test]
    fn test_scope_binds_this() {
        let template = compile("<%= this.title %>", None).unwrap();
        let output = template
            .render_with_scope(
                &Locals::new(),
                Some(&json!({"title": "Home"})),
                &FilterRegistry::default(),
            )
            .unwrap();
        assert_eq!(output, "Home");
    }

    #[test]
    fn test_identity_escaper() {
        let base = BaseDir::new("");
        let template = Compiler::new(&NullReader, &base)
            .with_escaper(Escaper::Identity)
            .compile("<%= html %>", None)
            .unwrap();
        let output = template
            .render(&locals(json!({"html": "<b>"})), &FilterRegistry::default())
            .unwrap();
        assert_eq!(output, "<b>");
    }

    #[test]
    fn test_syntax_error_names_file() {
        let err = compile("<% if (x) { %>\n<% } } %>", Some("fail.ejs")).unwrap_err();
        let TemplateError::Syntax {
            message,
            filename,
            line,
        } = err
        else {
            panic!("expected a syntax error");
        };
        assert_eq!(message, "Unexpected token '}'");
        assert_eq!(filename.as_deref(), Some("fail.ejs"));
        assert_eq!(line, 2);
    }

    #[test]
    fn test_syntax_error_in_include_names_included_file() {
        let reader = MemoryReader::with_templates([("bad.ejs", "ok\n<% let = %>")]);
        let base = BaseDir::new("");
        let err = Compiler::new(&reader, &base)
            .compile("<% include bad.ejs %>", Some("page.ejs"))
            .unwrap_err();
        assert!(
            matches!(err, TemplateError::Syntax { ref filename, line: 2, .. } if filename.as_deref() == Some("bad.ejs"))
        );
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    #[test]
    fn test_error_context_window() {
        let text = "1\n2\n3\n4\n5\n6\n7\n8\n9";
        assert_eq!(
            error_context(text, 5),
            "    2| 2\n    3| 3\n    4| 4\n >> 5| 5\n    6| 6\n    7| 7\n    8| 8"
        );
        assert_eq!(error_context(text, 1), " >> 1| 1\n    2| 2\n    3| 3\n    4| 4");
        assert_eq!(error_context(text, 9), "    6| 6\n    7| 7\n    8| 8\n >> 9| 9");
    }

    #[test]
    fn test_runtime_error_is_enriched() {
        let template = compile("<ul>\n<li>\n<%= user.name %>\n</li>\n</ul>", Some("user.ejs")).unwrap();
        let err = template
            .render(&Locals::new(), &FilterRegistry::default())
            .unwrap_err();
        assert_eq!(err.path(), Some("user.ejs"));
        insta::assert_snapshot!(err.to_string(), @r"
        user.ejs:3
            1| <ul>
            2| <li>
         >> 3| <%= user.name %>
            4| </li>
            5| </ul>

        TypeError: Cannot read properties of undefined (reading 'name')
        ");
    }

    #[test]
    fn test_runtime_error_without_filename() {
        let template = compile("<%= a.b %>", None).unwrap();
        let err = template
            .render(&Locals::new(), &FilterRegistry::default())
            .unwrap_err();
        assert!(err.to_string().starts_with("ejs:1\n >> 1| <%= a.b %>"));
    }

    #[test]
    fn test_runtime_error_points_into_include() {
        let reader = MemoryReader::with_templates([("partial.ejs", "fine\n<%- missing.x %>")]);
        let base = BaseDir::new("");
        let template = Compiler::new(&reader, &base)
            .compile("head\n<% include partial.ejs %>", Some("page.ejs"))
            .unwrap();
        let err = template
            .render(&Locals::new(), &FilterRegistry::default())
            .unwrap_err();
        let TemplateError::Render {
            path,
            line,
            excerpt,
            ..
        } = err
        else {
            panic!("expected an enriched error");
        };
        assert_eq!(path.as_deref(), Some("partial.ejs"));
        assert_eq!(line, 2);
        assert_eq!(excerpt, "    1| fine\n >> 2| <%- missing.x %>");
    }

    #[test]
    fn test_compile_debug_off_passes_error_through() {
        let base = BaseDir::new("");
        let template = Compiler::new(&NullReader, &base)
            .with_compile_debug(false)
            .compile("<%= a.b %>", Some("x.ejs"))
            .unwrap();
        let err = template
            .render(&Locals::new(), &FilterRegistry::default())
            .unwrap_err();
        assert!(matches!(err, TemplateError::Runtime(RuntimeError::Type(_))));
        assert_eq!(err.path(), None);
    }

    // ========================================================================
    // Client templates
    // ========================================================================

    #[test]
    fn test_client_template_survives_json() {
        let template = compile("<h1><%= title %></h1><%=: items | join: \", \" %>", Some("t.ejs")).unwrap();
        let json = template.to_client().to_json().unwrap();
        let client = ClientTemplate::from_json(&json).unwrap();

        assert_eq!(client.filename.as_deref(), Some("t.ejs"));
        assert_eq!(client.escaper, Escaper::Html);
        let values = locals(json!({"title": "<Hi>", "items": ["a", "b"]}));
        let filters = FilterRegistry::default();
        assert_eq!(
            client.render(&values, &filters).unwrap(),
            template.render(&values, &filters).unwrap()
        );
        assert_eq!(client.render(&values, &filters).unwrap(), "<h1>&lt;Hi&gt;</h1>a, b");
    }
}
