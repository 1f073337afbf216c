/*
 * ast.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Abstract syntax tree of compiled templates.
//!
//! A compiled template is a list of [`Stmt`]s. Template text and output tags
//! become [`Stmt::Text`] and [`Stmt::Output`]; statement tags contribute
//! ordinary script statements; includes become [`Stmt::Include`] blocks
//! holding the included template's statements.

use std::fmt::{self, Write as _};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::lexer::{Location, OutputMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeclKind {
    Var,
    Let,
    Const,
}

impl DeclKind {
    pub fn keyword(self) -> &'static str {
        match self {
            DeclKind::Var => "var",
            DeclKind::Let => "let",
            DeclKind::Const => "const",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declarator {
    pub name: String,
    pub init: Option<Expr>,
}

/// The binding introduced by a `for (x of …)`/`for (x in …)` head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopBinding {
    pub kind: Option<DeclKind>,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Stmt {
    /// Literal template text.
    Text { text: String, location: Location },
    /// An output tag.
    Output {
        mode: OutputMode,
        expr: Expr,
        location: Location,
    },
    /// An included template, executed in its own block scope.
    Include {
        path: String,
        body: Vec<Stmt>,
        location: Location,
    },
    Expr { expr: Expr, location: Location },
    Decl {
        kind: DeclKind,
        declarators: Vec<Declarator>,
        location: Location,
    },
    If {
        test: Expr,
        consequent: Box<Stmt>,
        alternate: Option<Box<Stmt>>,
        location: Location,
    },
    For {
        init: Option<Box<Stmt>>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
        location: Location,
    },
    ForOf {
        binding: LoopBinding,
        iterable: Expr,
        body: Box<Stmt>,
        location: Location,
    },
    ForIn {
        binding: LoopBinding,
        object: Expr,
        body: Box<Stmt>,
        location: Location,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
        location: Location,
    },
    Block { body: Vec<Stmt> },
    Return {
        value: Option<Expr>,
        location: Location,
    },
    Break { location: Location },
    Continue { location: Location },
    Empty,
}

impl Stmt {
    /// Where the statement starts; `None` for blocks and empty statements.
    pub fn location(&self) -> Option<Location> {
        match self {
            Stmt::Text { location, .. }
            | Stmt::Output { location, .. }
            | Stmt::Include { location, .. }
            | Stmt::Expr { location, .. }
            | Stmt::Decl { location, .. }
            | Stmt::If { location, .. }
            | Stmt::For { location, .. }
            | Stmt::ForOf { location, .. }
            | Stmt::ForIn { location, .. }
            | Stmt::While { location, .. }
            | Stmt::Return { location, .. }
            | Stmt::Break { location }
            | Stmt::Continue { location } => Some(*location),
            Stmt::Block { .. } | Stmt::Empty => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::StrictEq => "===",
            BinaryOp::StrictNe => "!==",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogicalOp {
    And,
    Or,
}

/// `=` or a compound assignment (`+=` carries `Some(BinaryOp::Add)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignOp(pub Option<BinaryOp>);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Literal {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Property {
    Named(String),
    Computed(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FunctionBody {
    Block(Vec<Stmt>),
    Expr(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: FunctionBody,
    pub arrow: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Expr {
    Literal {
        value: Literal,
    },
    Ident {
        name: String,
    },
    This,
    Array {
        elements: Vec<Expr>,
    },
    Object {
        properties: Vec<(String, Expr)>,
    },
    Member {
        object: Box<Expr>,
        property: Property,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// `++x`, `x--`, …
    Update {
        increment: bool,
        prefix: bool,
        target: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Function {
        def: Arc<FunctionDef>,
    },
    /// One stage of a filter pipeline: `filters[name](input, args…)`.
    Filter {
        name: String,
        input: Box<Expr>,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn ident(name: impl Into<String>) -> Self {
        Expr::Ident { name: name.into() }
    }

    pub fn literal(value: Literal) -> Self {
        Expr::Literal { value }
    }

    fn is_compound(&self) -> bool {
        matches!(
            self,
            Expr::Binary { .. }
                | Expr::Logical { .. }
                | Expr::Conditional { .. }
                | Expr::Assign { .. }
                | Expr::Function { .. }
        )
    }
}

// ============================================================================
// Printing
// ============================================================================

struct Operand<'a>(&'a Expr);

impl fmt::Display for Operand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_compound() {
            write!(f, "({})", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Undefined => f.write_str("undefined"),
            Literal::Null => f.write_str("null"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Number(n) => f.write_str(&crate::value::format_number(*n)),
            Literal::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal { value } => write!(f, "{value}"),
            Expr::Ident { name } => f.write_str(name),
            Expr::This => f.write_str("this"),
            Expr::Array { elements } => {
                f.write_str("[")?;
                write_list(f, elements)?;
                f.write_str("]")
            }
            Expr::Object { properties } => {
                if properties.is_empty() {
                    return f.write_str("{}");
                }
                f.write_str("{ ")?;
                for (i, (key, value)) in properties.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key:?}: {value}")?;
                }
                f.write_str(" }")
            }
            Expr::Member { object, property } => match property {
                Property::Named(name) => write!(f, "{}.{name}", Operand(object)),
                Property::Computed(index) => write!(f, "{}[{index}]", Operand(object)),
            },
            Expr::Call { callee, args } => {
                write!(f, "{}(", Operand(callee))?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => write!(f, "!{}", Operand(operand)),
                UnaryOp::Neg => write!(f, "-{}", Operand(operand)),
                UnaryOp::Plus => write!(f, "+{}", Operand(operand)),
                UnaryOp::TypeOf => write!(f, "typeof {}", Operand(operand)),
            },
            Expr::Update {
                increment,
                prefix,
                target,
            } => {
                let op = if *increment { "++" } else { "--" };
                if *prefix {
                    write!(f, "{op}{target}")
                } else {
                    write!(f, "{target}{op}")
                }
            }
            Expr::Binary { op, left, right } => {
                write!(f, "{} {} {}", Operand(left), op.symbol(), Operand(right))
            }
            Expr::Logical { op, left, right } => {
                let symbol = match op {
                    LogicalOp::And => "&&",
                    LogicalOp::Or => "||",
                };
                write!(f, "{} {symbol} {}", Operand(left), Operand(right))
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => write!(
                f,
                "{} ? {} : {}",
                Operand(test),
                Operand(consequent),
                Operand(alternate)
            ),
            Expr::Assign { op, target, value } => match op.0 {
                Some(binary) => write!(f, "{target} {}= {value}", binary.symbol()),
                None => write!(f, "{target} = {value}"),
            },
            Expr::Function { def } => write_function(f, def, 0),
            Expr::Filter { name, input, args } => {
                write!(f, "filters.{name}({input}")?;
                for arg in args {
                    write!(f, ", {arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

fn write_function(f: &mut fmt::Formatter<'_>, def: &FunctionDef, indent: usize) -> fmt::Result {
    if def.arrow {
        f.write_str("(")?;
        write_list(f, &def.params)?;
        f.write_str(") => ")?;
    } else {
        f.write_str("function ")?;
        if let Some(name) = &def.name {
            f.write_str(name)?;
        }
        f.write_str("(")?;
        write_list(f, &def.params)?;
        f.write_str(") ")?;
    }
    match &def.body {
        FunctionBody::Expr(expr) => write!(f, "{expr}"),
        FunctionBody::Block(body) => write_block(f, body, indent),
    }
}

fn pad(f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
    for _ in 0..indent {
        f.write_str("  ")?;
    }
    Ok(())
}

fn write_block(f: &mut fmt::Formatter<'_>, body: &[Stmt], indent: usize) -> fmt::Result {
    f.write_str("{\n")?;
    for stmt in body {
        write_stmt(f, stmt, indent + 1)?;
    }
    pad(f, indent)?;
    f.write_str("}")
}

/// Write a statement that follows a header on the same line.
fn write_body(f: &mut fmt::Formatter<'_>, stmt: &Stmt, indent: usize) -> fmt::Result {
    match stmt {
        Stmt::Block { body } => write_block(f, body, indent),
        other => {
            f.write_str("{\n")?;
            write_stmt(f, other, indent + 1)?;
            pad(f, indent)?;
            f.write_str("}")
        }
    }
}

fn write_binding(f: &mut fmt::Formatter<'_>, binding: &LoopBinding) -> fmt::Result {
    if let Some(kind) = binding.kind {
        write!(f, "{} ", kind.keyword())?;
    }
    f.write_str(&binding.name)
}

fn write_decl(f: &mut fmt::Formatter<'_>, kind: DeclKind, declarators: &[Declarator]) -> fmt::Result {
    write!(f, "{} ", kind.keyword())?;
    for (i, decl) in declarators.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        f.write_str(&decl.name)?;
        if let Some(init) = &decl.init {
            write!(f, " = {init}")?;
        }
    }
    Ok(())
}

/// `if (…) {…} else if (…) {…} else {…}` without leading padding.
fn write_if(f: &mut fmt::Formatter<'_>, stmt: &Stmt, indent: usize) -> fmt::Result {
    let Stmt::If {
        test,
        consequent,
        alternate,
        ..
    } = stmt
    else {
        return write_body(f, stmt, indent);
    };
    write!(f, "if ({test}) ")?;
    write_body(f, consequent, indent)?;
    if let Some(alternate) = alternate {
        f.write_str(" else ")?;
        write_if(f, alternate, indent)?;
    }
    Ok(())
}

fn write_stmt(f: &mut fmt::Formatter<'_>, stmt: &Stmt, indent: usize) -> fmt::Result {
    if matches!(stmt, Stmt::Empty) {
        return Ok(());
    }
    pad(f, indent)?;
    match stmt {
        Stmt::Text { text, .. } => write!(f, "text {text:?};")?,
        Stmt::Output { mode, expr, .. } => match mode {
            OutputMode::Escaped => write!(f, "echo escape({expr});")?,
            OutputMode::Raw => write!(f, "echo {expr};")?,
            OutputMode::Discard => write!(f, "{expr};")?,
        },
        Stmt::Include { path, body, .. } => {
            write!(f, "include {path:?} ")?;
            write_block(f, body, indent)?;
        }
        Stmt::Expr { expr, .. } => write!(f, "{expr};")?,
        Stmt::Decl {
            kind, declarators, ..
        } => {
            write_decl(f, *kind, declarators)?;
            f.write_str(";")?;
        }
        Stmt::If { .. } => write_if(f, stmt, indent)?,
        Stmt::For {
            init,
            test,
            update,
            body,
            ..
        } => {
            f.write_str("for (")?;
            match init.as_deref() {
                Some(Stmt::Decl {
                    kind, declarators, ..
                }) => write_decl(f, *kind, declarators)?,
                Some(Stmt::Expr { expr, .. }) => write!(f, "{expr}")?,
                _ => {}
            }
            f.write_str(";")?;
            if let Some(test) = test {
                write!(f, " {test}")?;
            }
            f.write_str(";")?;
            if let Some(update) = update {
                write!(f, " {update}")?;
            }
            f.write_str(") ")?;
            write_body(f, body, indent)?;
        }
        Stmt::ForOf {
            binding,
            iterable,
            body,
            ..
        } => {
            f.write_str("for (")?;
            write_binding(f, binding)?;
            write!(f, " of {iterable}) ")?;
            write_body(f, body, indent)?;
        }
        Stmt::ForIn {
            binding,
            object,
            body,
            ..
        } => {
            f.write_str("for (")?;
            write_binding(f, binding)?;
            write!(f, " in {object}) ")?;
            write_body(f, body, indent)?;
        }
        Stmt::While { test, body, .. } => {
            write!(f, "while ({test}) ")?;
            write_body(f, body, indent)?;
        }
        Stmt::Block { body } => write_block(f, body, indent)?,
        Stmt::Return { value, .. } => match value {
            Some(value) => write!(f, "return {value};")?,
            None => f.write_str("return;")?,
        },
        Stmt::Break { .. } => f.write_str("break;")?,
        Stmt::Continue { .. } => f.write_str("continue;")?,
        Stmt::Empty => {}
    }
    f.write_char('\n')
}

/// Display adapter printing a statement list one statement per line.
pub struct Statements<'a>(pub &'a [Stmt]);

impl fmt::Display for Statements<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for stmt in self.0 {
            write_stmt(f, stmt, 0)?;
        }
        Ok(())
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_stmt(f, self, 0)
    }
}
