/*
 * lexer.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Tag recognition.
//!
//! The lexer scans template text for delimited tags and produces a flat list
//! of [`Segment`]s: literal text, the three tag kinds (escaped output, raw
//! output, statement code), filter pipelines, and unresolved includes. Every
//! segment is stamped with the [`Location`] it starts at so the compiled
//! program can report the line it was executing when something fails.

use serde::{Deserialize, Serialize};

use crate::error::{TemplateError, TemplateResult};

/// Default open delimiter.
pub const DEFAULT_OPEN: &str = "<%";
/// Default close delimiter.
pub const DEFAULT_CLOSE: &str = "%>";

/// The pair of markers that delimit a tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delimiters {
    pub open: String,
    pub close: String,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            open: DEFAULT_OPEN.to_string(),
            close: DEFAULT_CLOSE.to_string(),
        }
    }
}

impl Delimiters {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }
}

/// A position in one of the sources that make up a compiled template.
///
/// `source` indexes the program's source table (0 is the template itself,
/// included files follow); `line` is 1-based.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub source: usize,
    pub line: usize,
}

impl Location {
    pub fn new(source: usize, line: usize) -> Self {
        Self { source, line }
    }
}

/// What a tag does with the value of its expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputMode {
    /// `<%= %>`: stringify, escape, append.
    Escaped,
    /// `<%- %>`: stringify, append.
    Raw,
    /// `<% %>`: evaluate for side effects only.
    Discard,
}

/// One `| name: args` stage of a filter pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterStage {
    pub name: String,
    /// Raw argument-expression text, passed through verbatim.
    pub args: String,
}

/// A parsed `value | filter: args | filter` expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPipeline {
    pub input: String,
    pub stages: Vec<FilterStage>,
}

/// A lexed piece of template source.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Text outside tags, appended verbatim.
    Literal { text: String, location: Location },
    /// `<%= expr %>`
    Escaped { code: String, location: Location },
    /// `<%- expr %>`
    Raw { code: String, location: Location },
    /// `<%=: value | filter %>` (and the `-`/statement variants).
    Filtered {
        pipeline: FilterPipeline,
        mode: OutputMode,
        location: Location,
    },
    /// `<% code %>`, spliced verbatim into the program.
    Statement { code: String, location: Location },
    /// `<% include path %>` before resolution.
    Include { path: String, location: Location },
    /// An include after resolution: the lexed and expanded segments of the
    /// included file.
    Included {
        path: String,
        source: usize,
        segments: Vec<Segment>,
        location: Location,
    },
}

impl Segment {
    pub fn location(&self) -> Location {
        match self {
            Segment::Literal { location, .. }
            | Segment::Escaped { location, .. }
            | Segment::Raw { location, .. }
            | Segment::Filtered { location, .. }
            | Segment::Statement { location, .. }
            | Segment::Include { location, .. }
            | Segment::Included { location, .. } => *location,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Escaped,
    Raw,
    Statement,
}

/// Transient state of one lexer run.
struct LexState<'a> {
    text: &'a str,
    source: usize,
    delimiters: &'a Delimiters,
    segments: Vec<Segment>,
    literal: String,
    literal_line: usize,
    line: usize,
    /// Set by a `-%>` close; swallows the newline that immediately follows.
    consume_eol: bool,
    /// Byte offset of the next unscanned character.
    pos: usize,
}

/// Split template text into segments.
pub fn lex(text: &str, source: usize, delimiters: &Delimiters) -> TemplateResult<Vec<Segment>> {
    if delimiters.open.is_empty() || delimiters.close.is_empty() {
        return Err(TemplateError::Config {
            message: "delimiters must not be empty".to_string(),
        });
    }
    let mut state = LexState {
        text,
        source,
        delimiters,
        segments: Vec::new(),
        literal: String::new(),
        literal_line: 1,
        line: 1,
        consume_eol: false,
        pos: 0,
    };
    state.run()?;
    Ok(state.segments)
}

impl LexState<'_> {
    fn run(&mut self) -> TemplateResult<()> {
        while self.pos < self.text.len() {
            let rest = &self.text[self.pos..];
            if rest.starts_with(self.delimiters.open.as_str()) {
                self.flush_literal();
                self.lex_tag()?;
                continue;
            }
            let Some(c) = rest.chars().next() else { break };
            self.pos += c.len_utf8();
            match c {
                '\r' => {}
                '\n' if self.consume_eol => {
                    self.consume_eol = false;
                    self.line += 1;
                    self.literal_line = self.line;
                }
                '\n' => {
                    self.push_literal('\n');
                    self.line += 1;
                }
                c => {
                    self.consume_eol = false;
                    self.push_literal(c);
                }
            }
        }
        self.flush_literal();
        Ok(())
    }

    fn push_literal(&mut self, c: char) {
        if self.literal.is_empty() {
            self.literal_line = self.line;
        }
        self.literal.push(c);
    }

    fn flush_literal(&mut self) {
        if !self.literal.is_empty() {
            self.segments.push(Segment::Literal {
                text: std::mem::take(&mut self.literal),
                location: Location::new(self.source, self.literal_line),
            });
        }
    }

    fn lex_tag(&mut self) -> TemplateResult<()> {
        let location = Location::new(self.source, self.line);
        let mut start = self.pos + self.delimiters.open.len();
        let kind = match self.text[start..].chars().next() {
            Some('=') => {
                start += 1;
                TagKind::Escaped
            }
            Some('-') => {
                start += 1;
                TagKind::Raw
            }
            _ => TagKind::Statement,
        };

        let end = self.text[start..]
            .find(self.delimiters.close.as_str())
            .map(|offset| start + offset)
            .ok_or_else(|| TemplateError::UnterminatedTag {
                close: self.delimiters.close.clone(),
                line: location.line,
            })?;

        let mut body = &self.text[start..end];
        self.consume_eol = false;
        if let Some(stripped) = body.strip_suffix('-') {
            body = stripped;
            self.consume_eol = true;
        }

        if let Some(segment) = classify(kind, body, location) {
            self.segments.push(segment);
        }

        self.line += body.matches('\n').count();
        self.pos = end + self.delimiters.close.len();
        Ok(())
    }
}

/// Turn a tag body into a segment; `None` for tags that compile to nothing.
fn classify(kind: TagKind, body: &str, location: Location) -> Option<Segment> {
    let trimmed = body.trim();

    if kind == TagKind::Statement {
        if let Some(path) = include_path(trimmed) {
            return Some(Segment::Include {
                path: path.to_string(),
                location,
            });
        }
    }

    if let Some(pipeline) = body.strip_prefix(':') {
        let mode = match kind {
            TagKind::Escaped => OutputMode::Escaped,
            TagKind::Raw => OutputMode::Raw,
            TagKind::Statement => OutputMode::Discard,
        };
        return Some(Segment::Filtered {
            pipeline: parse_pipeline(pipeline),
            mode,
            location,
        });
    }

    if trimmed.is_empty() {
        return None;
    }

    let code = body.to_string();
    Some(match kind {
        TagKind::Escaped => Segment::Escaped { code, location },
        TagKind::Raw => Segment::Raw { code, location },
        TagKind::Statement => Segment::Statement { code, location },
    })
}

/// The path of an `include <path>` statement, if `body` is one.
fn include_path(body: &str) -> Option<&str> {
    let rest = body.strip_prefix("include")?;
    match rest.chars().next() {
        Some(c) if c.is_whitespace() => Some(rest.trim()),
        _ => None,
    }
}

/// Split a filter expression into its input and stages.
///
/// Stages are separated by `|` outside string literals (`||` is left
/// alone); each stage is split on its first `:` only, so arguments may
/// themselves contain colons.
pub fn parse_pipeline(text: &str) -> FilterPipeline {
    let mut parts = split_stages(text).into_iter();
    let input = parts.next().unwrap_or_default().trim().to_string();
    let stages = parts
        .map(|stage| match stage.split_once(':') {
            Some((name, args)) => FilterStage {
                name: name.trim().to_string(),
                args: args.trim().to_string(),
            },
            None => FilterStage {
                name: stage.trim().to_string(),
                args: String::new(),
            },
        })
        .collect();
    FilterPipeline { input, stages }
}

fn split_stages(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '|' if chars.peek().map(|(_, n)| *n) == Some('|') => {
                chars.next();
            }
            '|' => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}
