/*
 * parser.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Code generation: lexed segments to statement AST.
//!
//! Statement-tag code is tokenized and concatenated into one token stream.
//! Every other segment (literal text, output tags, filter pipelines,
//! includes) is compiled to a statement up front and represented in the
//! stream by a single [`Token::Segment`] placeholder. Parsing the stream
//! with a recursive-descent parser then yields the program, with template
//! text landing exactly where the surrounding statement code puts it:
//!
//! ```text
//! <% for (const u of users) { %><li><%= u %></li><% } %>
//! ```
//!
//! tokenizes as `for ( const u of users ) { #0 #1 #2 }`, where `#0..#2`
//! are the `<li>` text, the escaped output and the `</li>` text.

use std::sync::Arc;

use crate::lexer::{FilterPipeline, Location, OutputMode, Segment};
use crate::script::ast::{
    AssignOp, BinaryOp, DeclKind, Declarator, Expr, FunctionBody, FunctionDef, Literal,
    LogicalOp, LoopBinding, Property, Stmt, UnaryOp,
};
use crate::script::token::{LexError, Spanned, Token, tokenize};
use crate::value::format_number;

/// A code-generation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub message: String,
    pub location: Location,
}

type PResult<T> = Result<T, SyntaxError>;

const RESERVED: &[&str] = &[
    "if", "else", "for", "while", "do", "var", "let", "const", "return", "break", "continue",
    "new", "delete", "in", "instanceof", "switch", "case", "default", "try", "catch", "finally",
    "throw", "class", "void", "with", "yield",
];

fn is_reserved(word: &str) -> bool {
    RESERVED.contains(&word)
}

fn lex_error(source: usize) -> impl Fn(LexError) -> SyntaxError {
    move |err| SyntaxError {
        message: err.message,
        location: Location::new(source, err.line),
    }
}

/// Compile the segments of one template source into statements.
pub fn generate(segments: &[Segment], source: usize) -> PResult<Vec<Stmt>> {
    let mut tokens = Vec::new();
    let mut prepared = Vec::new();

    for segment in segments {
        if let Segment::Statement { code, location } = segment {
            tokens.extend(tokenize(code, location.line).map_err(lex_error(source))?);
            continue;
        }
        let location = segment.location();
        tokens.push(Spanned {
            token: Token::Segment(prepared.len()),
            line: location.line,
        });
        prepared.push(Some(prepare(segment)?));
    }

    let end_line = segments.last().map_or(1, |s| s.location().line);
    let mut parser = Parser::new(tokens, source, end_line, prepared);
    let mut body = Vec::new();
    while !parser.at_end() {
        body.push(parser.parse_statement()?);
    }
    Ok(body)
}

/// Compile a non-statement segment.
fn prepare(segment: &Segment) -> PResult<Stmt> {
    match segment {
        Segment::Literal { text, location } => Ok(Stmt::Text {
            text: text.clone(),
            location: *location,
        }),
        Segment::Escaped { code, location } => Ok(Stmt::Output {
            mode: OutputMode::Escaped,
            expr: parse_expression_source(code, *location)?,
            location: *location,
        }),
        Segment::Raw { code, location } => Ok(Stmt::Output {
            mode: OutputMode::Raw,
            expr: parse_expression_source(code, *location)?,
            location: *location,
        }),
        Segment::Filtered {
            pipeline,
            mode,
            location,
        } => {
            let expr = compile_pipeline(pipeline, *location)?;
            Ok(match mode {
                OutputMode::Discard => Stmt::Expr {
                    expr,
                    location: *location,
                },
                mode => Stmt::Output {
                    mode: *mode,
                    expr,
                    location: *location,
                },
            })
        }
        Segment::Included {
            path,
            source,
            segments,
            location,
        } => Ok(Stmt::Include {
            path: path.clone(),
            body: generate(segments, *source)?,
            location: *location,
        }),
        Segment::Include { path, location } => Err(SyntaxError {
            message: format!("Unresolved include '{path}'"),
            location: *location,
        }),
        // Handled by `generate`.
        Segment::Statement { code, location } => Ok(Stmt::Expr {
            expr: parse_expression_source(code, *location)?,
            location: *location,
        }),
    }
}

/// Parse `code` as exactly one expression.
pub fn parse_expression_source(code: &str, location: Location) -> PResult<Expr> {
    let tokens = tokenize(code, location.line).map_err(lex_error(location.source))?;
    let mut parser = Parser::new(tokens, location.source, location.line, Vec::new());
    let expr = parser.parse_expression()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Parse a comma-separated argument list (filter arguments).
fn parse_arguments_source(code: &str, location: Location) -> PResult<Vec<Expr>> {
    let tokens = tokenize(code, location.line).map_err(lex_error(location.source))?;
    let mut parser = Parser::new(tokens, location.source, location.line, Vec::new());
    let mut args = Vec::new();
    while !parser.at_end() {
        args.push(parser.parse_assignment()?);
        if !parser.eat_punct(",") {
            break;
        }
    }
    parser.expect_end()?;
    Ok(args)
}

/// `input | a: x | b` becomes `filters.b(filters.a(input, x))`.
fn compile_pipeline(pipeline: &FilterPipeline, location: Location) -> PResult<Expr> {
    let mut expr = parse_expression_source(&pipeline.input, location)?;
    for stage in &pipeline.stages {
        if stage.name.is_empty() {
            return Err(SyntaxError {
                message: "Missing filter name".to_string(),
                location,
            });
        }
        expr = Expr::Filter {
            name: stage.name.clone(),
            input: Box::new(expr),
            args: parse_arguments_source(&stage.args, location)?,
        };
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    source: usize,
    end_line: usize,
    prepared: Vec<Option<Stmt>>,
}

impl Parser {
    fn new(tokens: Vec<Spanned>, source: usize, end_line: usize, prepared: Vec<Option<Stmt>>) -> Self {
        let end_line = tokens.last().map_or(end_line, |t| t.line.max(end_line));
        Self {
            tokens,
            pos: 0,
            source,
            end_line,
            prepared,
        }
    }

    // ========================================================================
    // Token helpers
    // ========================================================================

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|t| &t.token)
    }

    fn line(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end_line, |t| t.line)
    }

    fn previous_line(&self) -> usize {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map_or(self.end_line, |t| t.line)
    }

    fn location(&self) -> Location {
        Location::new(self.source, self.line())
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError {
            message: message.into(),
            location: self.location(),
        }
    }

    fn unexpected(&self) -> SyntaxError {
        let message = match self.peek() {
            None => "Unexpected end of input".to_string(),
            Some(Token::Punct(p)) => format!("Unexpected token '{p}'"),
            Some(Token::Ident(name)) if is_reserved(name) => format!("Unexpected token '{name}'"),
            Some(Token::Ident(name)) => format!("Unexpected identifier '{name}'"),
            Some(Token::Number(_)) => "Unexpected number".to_string(),
            Some(Token::Str(_)) => "Unexpected string".to_string(),
            Some(Token::Segment(_)) => "Unexpected template text".to_string(),
        };
        self.error(message)
    }

    fn is_punct(&self, punct: &str) -> bool {
        matches!(self.peek(), Some(Token::Punct(p)) if *p == punct)
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.is_punct(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> PResult<()> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn is_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(w)) if w == word)
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.is_word(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_end(&self) -> PResult<()> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    /// A binding name: an identifier that is not a reserved word.
    fn expect_binding(&mut self) -> PResult<String> {
        match self.peek() {
            Some(Token::Ident(name)) if !is_reserved(name) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn decl_kind(&self) -> Option<DeclKind> {
        match self.peek() {
            Some(Token::Ident(w)) => match w.as_str() {
                "var" => Some(DeclKind::Var),
                "let" => Some(DeclKind::Let),
                "const" => Some(DeclKind::Const),
                _ => None,
            },
            _ => None,
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn parse_statement(&mut self) -> PResult<Stmt> {
        let location = self.location();
        let Some(token) = self.peek().cloned() else {
            return Err(self.unexpected());
        };
        match token {
            Token::Segment(index) => {
                let stmt = self.prepared.get_mut(index).and_then(Option::take);
                match stmt {
                    Some(stmt) => {
                        self.pos += 1;
                        Ok(stmt)
                    }
                    None => Err(self.unexpected()),
                }
            }
            Token::Punct("{") => Ok(Stmt::Block {
                body: self.parse_block()?,
            }),
            Token::Punct(";") => {
                self.pos += 1;
                Ok(Stmt::Empty)
            }
            Token::Ident(word) => match word.as_str() {
                "if" => self.parse_if(location),
                "for" => self.parse_for(location),
                "while" => {
                    self.pos += 1;
                    self.expect_punct("(")?;
                    let test = self.parse_expression()?;
                    self.expect_punct(")")?;
                    let body = Box::new(self.parse_statement()?);
                    Ok(Stmt::While {
                        test,
                        body,
                        location,
                    })
                }
                "var" | "let" | "const" => {
                    let decl = self.parse_decl(location)?;
                    self.eat_punct(";");
                    Ok(decl)
                }
                "function" if matches!(self.peek_at(1), Some(Token::Ident(_))) => {
                    self.pos += 1;
                    let def = self.parse_function_rest()?;
                    let name = def.name.clone().unwrap_or_default();
                    Ok(Stmt::Decl {
                        kind: DeclKind::Var,
                        declarators: vec![Declarator {
                            name,
                            init: Some(Expr::Function { def: Arc::new(def) }),
                        }],
                        location,
                    })
                }
                "return" => {
                    self.pos += 1;
                    let ends = self.at_end()
                        || self.is_punct(";")
                        || self.is_punct("}")
                        || matches!(self.peek(), Some(Token::Segment(_)))
                        || self.line() != location.line;
                    let value = if ends {
                        None
                    } else {
                        Some(self.parse_expression()?)
                    };
                    self.eat_punct(";");
                    Ok(Stmt::Return { value, location })
                }
                "break" => {
                    self.pos += 1;
                    self.eat_punct(";");
                    Ok(Stmt::Break { location })
                }
                "continue" => {
                    self.pos += 1;
                    self.eat_punct(";");
                    Ok(Stmt::Continue { location })
                }
                _ => self.parse_expression_statement(location),
            },
            _ => self.parse_expression_statement(location),
        }
    }

    fn parse_expression_statement(&mut self, location: Location) -> PResult<Stmt> {
        let expr = self.parse_expression()?;
        self.eat_punct(";");
        Ok(Stmt::Expr { expr, location })
    }

    fn parse_block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.is_punct("}") {
            if self.at_end() {
                return Err(self.unexpected());
            }
            body.push(self.parse_statement()?);
        }
        self.pos += 1;
        Ok(body)
    }

    fn parse_if(&mut self, location: Location) -> PResult<Stmt> {
        self.pos += 1;
        self.expect_punct("(")?;
        let test = self.parse_expression()?;
        self.expect_punct(")")?;
        let consequent = Box::new(self.parse_statement()?);
        let alternate = if self.eat_word("else") {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            test,
            consequent,
            alternate,
            location,
        })
    }

    fn parse_for(&mut self, location: Location) -> PResult<Stmt> {
        self.pos += 1;
        self.expect_punct("(")?;

        // for (x of …) / for (const x in …)
        let kind = self.decl_kind();
        let offset = usize::from(kind.is_some());
        if let (Some(Token::Ident(name)), Some(Token::Ident(keyword))) =
            (self.peek_at(offset), self.peek_at(offset + 1))
        {
            if (keyword == "of" || keyword == "in") && !is_reserved(name) {
                let binding = LoopBinding {
                    kind,
                    name: name.clone(),
                };
                let is_of = keyword == "of";
                self.pos += offset + 2;
                let target = self.parse_expression()?;
                self.expect_punct(")")?;
                let body = Box::new(self.parse_statement()?);
                return Ok(if is_of {
                    Stmt::ForOf {
                        binding,
                        iterable: target,
                        body,
                        location,
                    }
                } else {
                    Stmt::ForIn {
                        binding,
                        object: target,
                        body,
                        location,
                    }
                });
            }
        }

        let init = if self.eat_punct(";") {
            None
        } else {
            let init_location = self.location();
            let init = if self.decl_kind().is_some() {
                self.parse_decl(init_location)?
            } else {
                Stmt::Expr {
                    expr: self.parse_expression()?,
                    location: init_location,
                }
            };
            self.expect_punct(";")?;
            Some(Box::new(init))
        };
        let test = if self.is_punct(";") {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(";")?;
        let update = if self.is_punct(")") {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(")")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
            location,
        })
    }

    fn parse_decl(&mut self, location: Location) -> PResult<Stmt> {
        let kind = self.decl_kind().ok_or_else(|| self.unexpected())?;
        self.pos += 1;
        let mut declarators = Vec::new();
        loop {
            let name = self.expect_binding()?;
            let init = if self.eat_punct("=") {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            declarators.push(Declarator { name, init });
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(Stmt::Decl {
            kind,
            declarators,
            location,
        })
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn parse_expression(&mut self) -> PResult<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> PResult<Expr> {
        if let Some(arrow) = self.try_parse_arrow()? {
            return Ok(arrow);
        }
        let target = self.parse_conditional()?;
        let op = match self.peek() {
            Some(Token::Punct("=")) => AssignOp(None),
            Some(Token::Punct("+=")) => AssignOp(Some(BinaryOp::Add)),
            Some(Token::Punct("-=")) => AssignOp(Some(BinaryOp::Sub)),
            Some(Token::Punct("*=")) => AssignOp(Some(BinaryOp::Mul)),
            Some(Token::Punct("/=")) => AssignOp(Some(BinaryOp::Div)),
            _ => return Ok(target),
        };
        if !matches!(target, Expr::Ident { .. } | Expr::Member { .. }) {
            return Err(self.error("Invalid left-hand side in assignment"));
        }
        self.pos += 1;
        let value = self.parse_assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    /// Parse `x => …` or `(a, b) => …` if the tokens ahead form one.
    fn try_parse_arrow(&mut self) -> PResult<Option<Expr>> {
        let params = match (self.peek(), self.peek_at(1)) {
            (Some(Token::Ident(name)), Some(Token::Punct("=>"))) if !is_reserved(name) => {
                let params = vec![name.clone()];
                self.pos += 2;
                params
            }
            (Some(Token::Punct("(")), _) => {
                let Some(close) = self.matching_paren() else {
                    return Ok(None);
                };
                if !matches!(self.tokens.get(close + 1).map(|t| &t.token), Some(Token::Punct("=>"))) {
                    return Ok(None);
                }
                self.pos += 1;
                let params = self.parse_params_rest()?;
                self.expect_punct("=>")?;
                params
            }
            _ => return Ok(None),
        };
        let body = if self.is_punct("{") {
            FunctionBody::Block(self.parse_block()?)
        } else {
            FunctionBody::Expr(Box::new(self.parse_assignment()?))
        };
        Ok(Some(Expr::Function {
            def: Arc::new(FunctionDef {
                name: None,
                params,
                body,
                arrow: true,
            }),
        }))
    }

    /// Index of the `)` matching the `(` at the current position.
    fn matching_paren(&self) -> Option<usize> {
        let mut depth = 0usize;
        for (i, spanned) in self.tokens.iter().enumerate().skip(self.pos) {
            match spanned.token {
                Token::Punct("(") => depth += 1,
                Token::Punct(")") => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Parameter names after an opening `(`, through the closing `)`.
    fn parse_params_rest(&mut self) -> PResult<Vec<String>> {
        let mut params = Vec::new();
        while !self.eat_punct(")") {
            params.push(self.expect_binding()?);
            if !self.eat_punct(",") {
                self.expect_punct(")")?;
                break;
            }
        }
        Ok(params)
    }

    /// `name? (params) { body }` after the `function` keyword.
    fn parse_function_rest(&mut self) -> PResult<FunctionDef> {
        let name = match self.peek() {
            Some(Token::Ident(_)) => Some(self.expect_binding()?),
            _ => None,
        };
        self.expect_punct("(")?;
        let params = self.parse_params_rest()?;
        let body = FunctionBody::Block(self.parse_block()?);
        Ok(FunctionDef {
            name,
            params,
            body,
            arrow: false,
        })
    }

    fn parse_conditional(&mut self) -> PResult<Expr> {
        let test = self.parse_logical_or()?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let consequent = self.parse_assignment()?;
        self.expect_punct(":")?;
        let alternate = self.parse_assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn parse_logical_or(&mut self) -> PResult<Expr> {
        let mut left = self.parse_logical_and()?;
        while self.eat_punct("||") {
            let right = self.parse_logical_and()?;
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_logical_and(&mut self) -> PResult<Expr> {
        let mut left = self.parse_binary(0)?;
        while self.eat_punct("&&") {
            let right = self.parse_binary(0)?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// Binary operators by precedence level, loosest first.
    fn parse_binary(&mut self, level: usize) -> PResult<Expr> {
        const LEVELS: &[&[(&str, BinaryOp)]] = &[
            &[
                ("===", BinaryOp::StrictEq),
                ("!==", BinaryOp::StrictNe),
                ("==", BinaryOp::Eq),
                ("!=", BinaryOp::Ne),
            ],
            &[
                ("<=", BinaryOp::Le),
                (">=", BinaryOp::Ge),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
            ],
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            &[
                ("*", BinaryOp::Mul),
                ("/", BinaryOp::Div),
                ("%", BinaryOp::Rem),
            ],
        ];

        let Some(ops) = LEVELS.get(level) else {
            return self.parse_unary();
        };
        let mut left = self.parse_binary(level + 1)?;
        loop {
            let op = match self.peek() {
                Some(Token::Punct(p)) => ops.iter().find(|(symbol, _)| symbol == p).map(|(_, op)| *op),
                _ => None,
            };
            let Some(op) = op else { break };
            self.pos += 1;
            let right = self.parse_binary(level + 1)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            Some(Token::Punct("!")) => Some(UnaryOp::Not),
            Some(Token::Punct("-")) => Some(UnaryOp::Neg),
            Some(Token::Punct("+")) => Some(UnaryOp::Plus),
            Some(Token::Ident(w)) if w == "typeof" => Some(UnaryOp::TypeOf),
            Some(Token::Punct(p @ ("++" | "--"))) => {
                let increment = *p == "++";
                self.pos += 1;
                let target = self.parse_unary()?;
                return self.update(increment, true, target);
            }
            _ => None,
        };
        match op {
            Some(op) => {
                self.pos += 1;
                let operand = self.parse_unary()?;
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(operand),
                })
            }
            None => self.parse_postfix(),
        }
    }

    fn update(&self, increment: bool, prefix: bool, target: Expr) -> PResult<Expr> {
        if !matches!(target, Expr::Ident { .. } | Expr::Member { .. }) {
            let form = if prefix { "prefix" } else { "postfix" };
            return Err(self.error(format!(
                "Invalid left-hand side expression in {form} operation"
            )));
        }
        Ok(Expr::Update {
            increment,
            prefix,
            target: Box::new(target),
        })
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let expr = self.parse_call_member()?;
        let increment = match self.peek() {
            Some(Token::Punct("++")) => true,
            Some(Token::Punct("--")) => false,
            _ => return Ok(expr),
        };
        // A line break before `++` ends the expression.
        if self.line() != self.previous_line() {
            return Ok(expr);
        }
        self.pos += 1;
        self.update(increment, false, expr)
    }

    fn parse_call_member(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_punct(".") {
                let name = match self.peek() {
                    Some(Token::Ident(name)) => name.clone(),
                    _ => return Err(self.unexpected()),
                };
                self.pos += 1;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: Property::Named(name),
                };
            } else if self.eat_punct("[") {
                let index = self.parse_expression()?;
                self.expect_punct("]")?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: Property::Computed(Box::new(index)),
                };
            } else if self.eat_punct("(") {
                let mut args = Vec::new();
                while !self.eat_punct(")") {
                    args.push(self.parse_assignment()?);
                    if !self.eat_punct(",") {
                        self.expect_punct(")")?;
                        break;
                    }
                }
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.unexpected());
        };
        match token {
            Token::Number(n) => {
                self.pos += 1;
                Ok(Expr::literal(Literal::Number(n)))
            }
            Token::Str(s) => {
                self.pos += 1;
                Ok(Expr::literal(Literal::String(s)))
            }
            Token::Ident(word) => {
                let expr = match word.as_str() {
                    "true" => Expr::literal(Literal::Bool(true)),
                    "false" => Expr::literal(Literal::Bool(false)),
                    "null" => Expr::literal(Literal::Null),
                    "undefined" => Expr::literal(Literal::Undefined),
                    "this" => Expr::This,
                    "function" => {
                        self.pos += 1;
                        let def = self.parse_function_rest()?;
                        return Ok(Expr::Function { def: Arc::new(def) });
                    }
                    w if is_reserved(w) => return Err(self.unexpected()),
                    _ => Expr::Ident { name: word },
                };
                self.pos += 1;
                Ok(expr)
            }
            Token::Punct("(") => {
                self.pos += 1;
                let expr = self.parse_expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            Token::Punct("[") => {
                self.pos += 1;
                let mut elements = Vec::new();
                while !self.eat_punct("]") {
                    elements.push(self.parse_assignment()?);
                    if !self.eat_punct(",") {
                        self.expect_punct("]")?;
                        break;
                    }
                }
                Ok(Expr::Array { elements })
            }
            Token::Punct("{") => self.parse_object(),
            _ => Err(self.unexpected()),
        }
    }

    fn parse_object(&mut self) -> PResult<Expr> {
        self.expect_punct("{")?;
        let mut properties = Vec::new();
        while !self.eat_punct("}") {
            let (key, shorthand) = match self.peek() {
                Some(Token::Ident(name)) => (name.clone(), !is_reserved(name)),
                Some(Token::Str(s)) => (s.clone(), false),
                Some(Token::Number(n)) => (format_number(*n), false),
                _ => return Err(self.unexpected()),
            };
            self.pos += 1;

            let value = if self.eat_punct(":") {
                self.parse_assignment()?
            } else if self.eat_punct("(") {
                // Method shorthand: `{ name(a) { … } }`
                let params = self.parse_params_rest()?;
                let body = FunctionBody::Block(self.parse_block()?);
                Expr::Function {
                    def: Arc::new(FunctionDef {
                        name: Some(key.clone()),
                        params,
                        body,
                        arrow: false,
                    }),
                }
            } else if shorthand {
                Expr::ident(key.clone())
            } else {
                return Err(self.unexpected());
            };
            properties.push((key, value));

            if !self.eat_punct(",") {
                self.expect_punct("}")?;
                break;
            }
        }
        Ok(Expr::Object { properties })
    }
}
