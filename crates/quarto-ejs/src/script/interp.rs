/*
 * interp.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Tree-walking interpreter for compiled templates.
//!
//! Output goes to a single buffer shared by the whole program, including
//! functions defined in the template and included templates. The
//! interpreter records the [`Location`] of the statement it is executing so
//! callers can attach line context to a failure.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{RuntimeError, RuntimeResult};
use crate::escape::Escaper;
use crate::filters::FilterRegistry;
use crate::lexer::{Location, OutputMode};
use crate::script::ast::{
    AssignOp, BinaryOp, DeclKind, Expr, FunctionBody, FunctionDef, Literal, LogicalOp,
    LoopBinding, Property, Stmt, UnaryOp,
};
use crate::value::{ArrayRef, Native, ObjectRef, Value, format_number, join_array};

/// Longest string a template may build, in characters.
pub const MAX_STRING_LENGTH: usize = (1 << 29) - 24;

/// A function value: a definition plus the scope it was created in.
pub struct Closure {
    def: Arc<FunctionDef>,
    env: Env,
}

impl Closure {
    pub fn name(&self) -> Option<&str> {
        self.def.name.as_deref()
    }

    pub fn arity(&self) -> usize {
        self.def.params.len()
    }
}

type Env = Rc<Scope>;

struct Binding {
    value: Value,
    constant: bool,
}

/// A lexical scope. Function scopes receive `var` declarations.
pub(crate) struct Scope {
    vars: RefCell<HashMap<String, Binding>>,
    parent: Option<Env>,
    function: bool,
}

impl Scope {
    fn root() -> Env {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent: None,
            function: true,
        })
    }

    fn child(parent: &Env, function: bool) -> Env {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
            function,
        })
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        let mut scope = self;
        loop {
            if let Some(binding) = scope.vars.borrow().get(name) {
                return Some(binding.value.clone());
            }
            scope = scope.parent.as_deref()?;
        }
    }

    /// Assign to an existing binding; `Ok(false)` if there is none.
    fn assign(&self, name: &str, value: Value) -> RuntimeResult<bool> {
        let mut scope = self;
        loop {
            if let Some(binding) = scope.vars.borrow_mut().get_mut(name) {
                if binding.constant {
                    return Err(RuntimeError::Type(
                        "Assignment to constant variable.".to_string(),
                    ));
                }
                binding.value = value;
                return Ok(true);
            }
            match scope.parent.as_deref() {
                Some(parent) => scope = parent,
                None => return Ok(false),
            }
        }
    }

    fn declare(&self, name: &str, value: Value, constant: bool) {
        self.vars
            .borrow_mut()
            .insert(name.to_string(), Binding { value, constant });
    }

    fn has_own(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
    }

    fn function_scope(env: &Env) -> Env {
        let mut scope = Rc::clone(env);
        while !scope.function {
            match &scope.parent {
                Some(parent) => scope = Rc::clone(parent),
                None => break,
            }
        }
        scope
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Executes one compiled program.
pub struct Interpreter<'a> {
    locals: ObjectRef,
    this: Value,
    filters: &'a FilterRegistry,
    escaper: Escaper,
    max_depth: usize,
    depth: usize,
    globals: Env,
    /// Scopes captured by closures created during the current run.
    captured: Vec<Weak<Scope>>,
    out: String,
    location: Location,
}

impl<'a> Interpreter<'a> {
    pub fn new(locals: ObjectRef, filters: &'a FilterRegistry) -> Self {
        Self {
            locals,
            this: Value::Undefined,
            filters,
            escaper: Escaper::default(),
            max_depth: crate::config::DEFAULT_MAX_CALL_DEPTH,
            depth: 0,
            globals: Scope::root(),
            captured: Vec::new(),
            out: String::new(),
            location: Location::default(),
        }
    }

    /// Bind `this` (the `scope` render option).
    pub fn with_this(mut self, this: Value) -> Self {
        self.this = this;
        self
    }

    pub fn with_escaper(mut self, escaper: Escaper) -> Self {
        self.escaper = escaper;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// The location of the statement executing (or that failed).
    pub fn location(&self) -> Location {
        self.location
    }

    /// Execute `body` and return the rendered text.
    pub fn run(&mut self, body: &[Stmt]) -> RuntimeResult<String> {
        self.out.clear();
        let globals = Rc::clone(&self.globals);
        let result = self.exec_block(body, &globals);
        self.release_scopes();
        result?;
        Ok(std::mem::take(&mut self.out))
    }

    /// Drop the bindings of every scope a closure captured, and of their
    /// parents. A closure stored in a variable it can see keeps its scope
    /// alive through `Rc`; emptying the bindings breaks that cycle.
    fn release_scopes(&mut self) {
        let captured = std::mem::take(&mut self.captured);
        let roots = captured
            .iter()
            .filter_map(Weak::upgrade)
            .chain(std::iter::once(Rc::clone(&self.globals)));
        for scope in roots {
            let mut next = Some(scope);
            while let Some(scope) = next {
                let vars = std::mem::take(&mut *scope.vars.borrow_mut());
                drop(vars);
                next = scope.parent.clone();
            }
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn exec_block(&mut self, body: &[Stmt], env: &Env) -> RuntimeResult<Flow> {
        for stmt in body {
            match self.exec(stmt, env)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, env: &Env) -> RuntimeResult<Flow> {
        if let Some(location) = stmt.location() {
            self.location = location;
        }
        match stmt {
            Stmt::Text { text, .. } => self.out.push_str(text),
            Stmt::Output { mode, expr, .. } => {
                let value = self.eval(expr, env)?;
                match mode {
                    OutputMode::Escaped => {
                        let text = self.escaper.escape(&value.to_display());
                        self.out.push_str(&text);
                    }
                    OutputMode::Raw => self.out.push_str(&value.to_output()),
                    OutputMode::Discard => {}
                }
            }
            Stmt::Include { body, .. } => {
                let scope = Scope::child(env, true);
                self.exec_block(body, &scope)?;
            }
            Stmt::Expr { expr, .. } => {
                self.eval(expr, env)?;
            }
            Stmt::Decl {
                kind, declarators, ..
            } => {
                for decl in declarators {
                    let value = match &decl.init {
                        Some(init) => Some(self.eval(init, env)?),
                        None => None,
                    };
                    self.declare(*kind, &decl.name, value, env);
                }
            }
            Stmt::If {
                test,
                consequent,
                alternate,
                ..
            } => {
                if self.eval(test, env)?.is_truthy() {
                    return self.exec(consequent, env);
                } else if let Some(alternate) = alternate {
                    return self.exec(alternate, env);
                }
            }
            Stmt::For {
                init,
                test,
                update,
                body,
                ..
            } => {
                let scope = Scope::child(env, false);
                if let Some(init) = init {
                    self.exec(init, &scope)?;
                }
                loop {
                    if let Some(test) = test {
                        if !self.eval(test, &scope)?.is_truthy() {
                            break;
                        }
                    }
                    match self.exec(body, &scope)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if let Some(update) = update {
                        self.eval(update, &scope)?;
                    }
                }
            }
            Stmt::ForOf {
                binding,
                iterable,
                body,
                ..
            } => {
                let items = match self.eval(iterable, env)? {
                    Value::Array(items) => items.borrow().clone(),
                    Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
                    _ => {
                        return Err(RuntimeError::Type(format!("{iterable} is not iterable")));
                    }
                };
                return self.exec_loop(binding, items, body, env);
            }
            Stmt::ForIn {
                binding,
                object,
                body,
                ..
            } => {
                let keys = match self.eval(object, env)? {
                    Value::Object(map) => map.borrow().keys().cloned().map(Value::String).collect(),
                    Value::Array(items) => index_keys(items.borrow().len()),
                    Value::String(s) => index_keys(s.chars().count()),
                    _ => Vec::new(),
                };
                return self.exec_loop(binding, keys, body, env);
            }
            Stmt::While { test, body, .. } => {
                while self.eval(test, env)?.is_truthy() {
                    match self.exec(body, env)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            Stmt::Block { body } => {
                let scope = Scope::child(env, false);
                return self.exec_block(body, &scope);
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::Undefined,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::Break { .. } => return Ok(Flow::Break),
            Stmt::Continue { .. } => return Ok(Flow::Continue),
            Stmt::Empty => {}
        }
        Ok(Flow::Normal)
    }

    fn exec_loop(
        &mut self,
        binding: &LoopBinding,
        items: Vec<Value>,
        body: &Stmt,
        env: &Env,
    ) -> RuntimeResult<Flow> {
        for item in items {
            let scope = Scope::child(env, false);
            match binding.kind {
                Some(DeclKind::Let) => scope.declare(&binding.name, item, false),
                Some(DeclKind::Const) => scope.declare(&binding.name, item, true),
                Some(DeclKind::Var) => Scope::function_scope(env).declare(&binding.name, item, false),
                None => self.assign_name(&binding.name, item, env)?,
            }
            match self.exec(body, &scope)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
        }
        Ok(Flow::Normal)
    }

    fn declare(&mut self, kind: DeclKind, name: &str, value: Option<Value>, env: &Env) {
        match kind {
            DeclKind::Var => {
                let scope = Scope::function_scope(env);
                // `var x;` keeps an existing value.
                if value.is_some() || !scope.has_own(name) {
                    scope.declare(name, value.unwrap_or_default(), false);
                }
            }
            DeclKind::Let => env.declare(name, value.unwrap_or_default(), false),
            DeclKind::Const => env.declare(name, value.unwrap_or_default(), true),
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn eval(&mut self, expr: &Expr, env: &Env) -> RuntimeResult<Value> {
        match expr {
            Expr::Literal { value } => Ok(match value {
                Literal::Undefined => Value::Undefined,
                Literal::Null => Value::Null,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Number(n) => Value::Number(*n),
                Literal::String(s) => Value::String(s.clone()),
            }),
            Expr::Ident { name } => Ok(self.lookup(name, env)),
            Expr::This => Ok(self.this.clone()),
            Expr::Array { elements } => {
                let items = elements
                    .iter()
                    .map(|e| self.eval(e, env))
                    .collect::<RuntimeResult<Vec<_>>>()?;
                Ok(Value::array(items))
            }
            Expr::Object { properties } => {
                let mut map = IndexMap::new();
                for (key, value) in properties {
                    let value = self.eval(value, env)?;
                    map.insert(key.clone(), value);
                }
                Ok(Value::object(map))
            }
            Expr::Member { object, property } => {
                let receiver = self.eval(object, env)?;
                let key = self.property_key(property, env)?;
                read_property(&receiver, &key)
            }
            Expr::Call { callee, args } => self.eval_call(callee, args, env),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, env)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.is_truthy()),
                    UnaryOp::Neg => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                    UnaryOp::TypeOf => Value::string(value.type_of()),
                })
            }
            Expr::Update {
                increment,
                prefix,
                target,
            } => {
                let old = self.eval(target, env)?.to_number();
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.assign_to(target, Value::Number(new), env)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                Ok(binary(*op, &left, &right))
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left, env)?;
                match (op, left.is_truthy()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                    _ => self.eval(right, env),
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, env)?.is_truthy() {
                    self.eval(consequent, env)
                } else {
                    self.eval(alternate, env)
                }
            }
            Expr::Assign {
                op: AssignOp(op),
                target,
                value,
            } => {
                let mut value = self.eval(value, env)?;
                if let Some(op) = op {
                    let current = self.eval(target, env)?;
                    value = binary(*op, &current, &value);
                }
                self.assign_to(target, value.clone(), env)?;
                Ok(value)
            }
            Expr::Function { def } => {
                let scope = Rc::downgrade(env);
                if !self.captured.last().is_some_and(|last| last.ptr_eq(&scope)) {
                    self.captured.push(scope);
                }
                Ok(Value::Function(Rc::new(Closure {
                    def: Arc::clone(def),
                    env: Rc::clone(env),
                })))
            }
            Expr::Filter { name, input, args } => {
                let input = self.eval(input, env)?;
                let args = args
                    .iter()
                    .map(|e| self.eval(e, env))
                    .collect::<RuntimeResult<Vec<_>>>()?;
                self.filters.apply(name, &input, &args)
            }
        }
    }

    /// Scope chain, then the input values (`with (locals)`), then globals.
    fn lookup(&self, name: &str, env: &Env) -> Value {
        if let Some(value) = env.lookup(name) {
            return value;
        }
        if let Some(value) = self.locals.borrow().get(name) {
            return value.clone();
        }
        if name == "locals" {
            return Value::Object(Rc::clone(&self.locals));
        }
        Native::global(name).map(Value::Native).unwrap_or_default()
    }

    fn property_key(&mut self, property: &Property, env: &Env) -> RuntimeResult<String> {
        Ok(match property {
            Property::Named(name) => name.clone(),
            Property::Computed(expr) => self.eval(expr, env)?.to_display(),
        })
    }

    fn assign_name(&mut self, name: &str, value: Value, env: &Env) -> RuntimeResult<()> {
        if env.assign(name, value.clone())? {
            return Ok(());
        }
        if let Some(slot) = self.locals.borrow_mut().get_mut(name) {
            *slot = value;
            return Ok(());
        }
        self.globals.declare(name, value, false);
        Ok(())
    }

    fn assign_to(&mut self, target: &Expr, value: Value, env: &Env) -> RuntimeResult<()> {
        match target {
            Expr::Ident { name } => self.assign_name(name, value, env),
            Expr::Member { object, property } => {
                let receiver = self.eval(object, env)?;
                let key = self.property_key(property, env)?;
                match receiver {
                    Value::Object(map) => {
                        map.borrow_mut().insert(key, value);
                    }
                    Value::Array(items) => set_array_element(&items, &key, value),
                    Value::Undefined | Value::Null => {
                        return Err(RuntimeError::Type(format!(
                            "Cannot set properties of {} (setting '{key}')",
                            receiver.to_display()
                        )));
                    }
                    _ => {}
                }
                Ok(())
            }
            _ => Err(RuntimeError::Type(
                "Invalid left-hand side in assignment".to_string(),
            )),
        }
    }

    // ========================================================================
    // Calls
    // ========================================================================

    fn eval_args(&mut self, args: &[Expr], env: &Env) -> RuntimeResult<Vec<Value>> {
        args.iter().map(|e| self.eval(e, env)).collect()
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr], env: &Env) -> RuntimeResult<Value> {
        let Expr::Member { object, property } = callee else {
            let function = self.eval(callee, env)?;
            let args = self.eval_args(args, env)?;
            return self.call_value(&function, args, callee);
        };

        let receiver = self.eval(object, env)?;
        let name = self.property_key(property, env)?;
        let own = read_property(&receiver, &name)?;
        let args = self.eval_args(args, env)?;

        if matches!(own, Value::Function(_) | Value::Native(_)) {
            return self.call_value(&own, args, callee);
        }
        if !own.is_nullish() && matches!(receiver, Value::Object(_)) {
            return Err(RuntimeError::NotCallable(callee.to_string()));
        }
        match self.call_method(&receiver, &name, args, callee)? {
            Some(value) => Ok(value),
            None => Err(RuntimeError::NotCallable(callee.to_string())),
        }
    }

    fn call_value(&mut self, function: &Value, args: Vec<Value>, callee: &Expr) -> RuntimeResult<Value> {
        match function {
            Value::Function(closure) => self.call_closure(closure, args),
            Value::Native(native) => call_native(*native, &args, callee),
            _ => Err(RuntimeError::NotCallable(callee.to_string())),
        }
    }

    fn call_closure(&mut self, closure: &Rc<Closure>, args: Vec<Value>) -> RuntimeResult<Value> {
        if self.depth >= self.max_depth {
            return Err(RuntimeError::StackOverflow);
        }
        self.depth += 1;

        let scope = Scope::child(&closure.env, true);
        if let (Some(name), false) = (&closure.def.name, closure.def.arrow) {
            scope.declare(name, Value::Function(Rc::clone(closure)), false);
        }
        let mut args = args.into_iter();
        for param in &closure.def.params {
            scope.declare(param, args.next().unwrap_or_default(), false);
        }

        let caller = self.location;
        let result = match &closure.def.body {
            FunctionBody::Block(body) => self.exec_block(body, &scope).map(|flow| match flow {
                Flow::Return(value) => value,
                _ => Value::Undefined,
            }),
            FunctionBody::Expr(expr) => self.eval(expr, &scope),
        };
        self.depth -= 1;
        if result.is_ok() {
            self.location = caller;
        }
        result
    }

    /// Call `callback(item, index, array)` for a callback-taking array method.
    fn call_callback(
        &mut self,
        callback: &Value,
        item: &Value,
        index: usize,
        array: &ArrayRef,
        callee: &Expr,
    ) -> RuntimeResult<Value> {
        let args = vec![
            item.clone(),
            Value::Number(index as f64),
            Value::Array(Rc::clone(array)),
        ];
        self.call_value(callback, args, callee)
    }

    /// Builtin methods of strings, arrays, numbers and objects.
    fn call_method(
        &mut self,
        receiver: &Value,
        name: &str,
        args: Vec<Value>,
        callee: &Expr,
    ) -> RuntimeResult<Option<Value>> {
        match receiver {
            Value::String(s) => string_method(s, name, &args),
            Value::Array(items) => self.array_method(items, name, args, callee),
            Value::Number(n) => Ok(match name {
                "toFixed" => {
                    let digits = arg(&args, 0).to_number();
                    let digits = if digits.is_nan() { 0 } else { digits.clamp(0.0, 100.0) as usize };
                    Some(Value::String(format!("{n:.digits$}")))
                }
                "toString" => Some(Value::String(format_number(*n))),
                _ => None,
            }),
            Value::Object(map) => Ok(match name {
                "hasOwnProperty" => Some(Value::Bool(
                    map.borrow().contains_key(&arg(&args, 0).to_display()),
                )),
                "toString" => Some(Value::string("[object Object]")),
                _ => None,
            }),
            Value::Bool(_) => Ok(match name {
                "toString" => Some(Value::String(receiver.to_display())),
                _ => None,
            }),
            _ => Ok(None),
        }
    }

    fn array_method(
        &mut self,
        items: &ArrayRef,
        name: &str,
        args: Vec<Value>,
        callee: &Expr,
    ) -> RuntimeResult<Option<Value>> {
        let snapshot = || items.borrow().clone();
        let value = match name {
            "join" => {
                let separator = match arg(&args, 0) {
                    Value::Undefined => ",".to_string(),
                    sep => sep.to_display(),
                };
                Value::String(join_array(items, &separator))
            }
            "toString" => Value::String(join_array(items, ",")),
            "indexOf" => {
                let needle = arg(&args, 0);
                let position = items.borrow().iter().position(|v| v.strict_eq(&needle));
                Value::Number(position.map_or(-1.0, |i| i as f64))
            }
            "includes" => {
                let needle = arg(&args, 0);
                Value::Bool(items.borrow().iter().any(|v| v.strict_eq(&needle)))
            }
            "slice" => {
                let items = snapshot();
                let (start, end) = slice_bounds(items.len(), &args);
                Value::array(items.get(start..end).map(<[Value]>::to_vec).unwrap_or_default())
            }
            "concat" => {
                let mut result = snapshot();
                for value in args {
                    match value {
                        Value::Array(other) => result.extend(other.borrow().iter().cloned()),
                        other => result.push(other),
                    }
                }
                Value::array(result)
            }
            "push" => {
                let mut items = items.borrow_mut();
                items.extend(args);
                Value::Number(items.len() as f64)
            }
            "pop" => items.borrow_mut().pop().unwrap_or_default(),
            "shift" => {
                let mut items = items.borrow_mut();
                if items.is_empty() {
                    Value::Undefined
                } else {
                    items.remove(0)
                }
            }
            "unshift" => {
                let mut items = items.borrow_mut();
                for (i, value) in args.into_iter().enumerate() {
                    items.insert(i, value);
                }
                Value::Number(items.len() as f64)
            }
            "reverse" => {
                items.borrow_mut().reverse();
                Value::Array(Rc::clone(items))
            }
            "sort" => {
                let comparator = arg(&args, 0);
                let sorted = merge_sort(snapshot(), &mut |a, b| {
                    if comparator.is_nullish() {
                        return Ok(default_order(a, b));
                    }
                    let result = self.call_value(&comparator, vec![a.clone(), b.clone()], callee)?;
                    let n = result.to_number();
                    Ok(if n < 0.0 {
                        Ordering::Less
                    } else if n > 0.0 {
                        Ordering::Greater
                    } else {
                        Ordering::Equal
                    })
                })?;
                *items.borrow_mut() = sorted;
                Value::Array(Rc::clone(items))
            }
            "forEach" => {
                let callback = arg(&args, 0);
                for (i, item) in snapshot().iter().enumerate() {
                    self.call_callback(&callback, item, i, items, callee)?;
                }
                Value::Undefined
            }
            "map" => {
                let callback = arg(&args, 0);
                let mut result = Vec::new();
                for (i, item) in snapshot().iter().enumerate() {
                    result.push(self.call_callback(&callback, item, i, items, callee)?);
                }
                Value::array(result)
            }
            "filter" => {
                let callback = arg(&args, 0);
                let mut result = Vec::new();
                for (i, item) in snapshot().into_iter().enumerate() {
                    if self.call_callback(&callback, &item, i, items, callee)?.is_truthy() {
                        result.push(item);
                    }
                }
                Value::array(result)
            }
            "find" | "findIndex" | "some" | "every" => {
                let callback = arg(&args, 0);
                let mut found = None;
                for (i, item) in snapshot().into_iter().enumerate() {
                    let hit = self.call_callback(&callback, &item, i, items, callee)?.is_truthy();
                    if hit != (name == "every") {
                        found = Some((i, item));
                        break;
                    }
                }
                match name {
                    "find" => found.map(|(_, item)| item).unwrap_or_default(),
                    "findIndex" => Value::Number(found.map_or(-1.0, |(i, _)| i as f64)),
                    "some" => Value::Bool(found.is_some()),
                    _ => Value::Bool(found.is_none()),
                }
            }
            "reduce" => {
                let callback = arg(&args, 0);
                let mut items_iter = snapshot().into_iter().enumerate();
                let mut acc = match args.get(1) {
                    Some(initial) => initial.clone(),
                    None => match items_iter.next() {
                        Some((_, first)) => first,
                        None => {
                            return Err(RuntimeError::Type(
                                "Reduce of empty array with no initial value".to_string(),
                            ));
                        }
                    },
                };
                for (i, item) in items_iter {
                    let args = vec![
                        acc,
                        item,
                        Value::Number(i as f64),
                        Value::Array(Rc::clone(items)),
                    ];
                    acc = self.call_value(&callback, args, callee)?;
                }
                acc
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }
}

// ============================================================================
// Value helpers
// ============================================================================

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

fn index_keys(len: usize) -> Vec<Value> {
    (0..len).map(|i| Value::String(i.to_string())).collect()
}

/// Property read that rejects `undefined`/`null` receivers like JavaScript.
fn read_property(receiver: &Value, key: &str) -> RuntimeResult<Value> {
    if receiver.is_nullish() {
        return Err(RuntimeError::Type(format!(
            "Cannot read properties of {} (reading '{key}')",
            receiver.to_display()
        )));
    }
    Ok(receiver.get_property(key))
}

fn set_array_element(items: &ArrayRef, key: &str, value: Value) {
    let mut items = items.borrow_mut();
    if key == "length" {
        let len = value.to_number();
        if len.is_finite() && len >= 0.0 {
            items.resize(len as usize, Value::Undefined);
        }
        return;
    }
    if let Ok(index) = key.parse::<usize>() {
        if index >= items.len() {
            items.resize(index + 1, Value::Undefined);
        }
        items[index] = value;
    }
}

fn adds_as_string(value: &Value) -> bool {
    matches!(
        value,
        Value::String(_) | Value::Array(_) | Value::Object(_) | Value::Function(_) | Value::Native(_)
    )
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    let numbers = || (left.to_number(), right.to_number());
    match op {
        BinaryOp::Add => {
            if adds_as_string(left) || adds_as_string(right) {
                Value::String(left.to_display() + &right.to_display())
            } else {
                let (a, b) = numbers();
                Value::Number(a + b)
            }
        }
        BinaryOp::Sub => {
            let (a, b) = numbers();
            Value::Number(a - b)
        }
        BinaryOp::Mul => {
            let (a, b) = numbers();
            Value::Number(a * b)
        }
        BinaryOp::Div => {
            let (a, b) = numbers();
            Value::Number(a / b)
        }
        BinaryOp::Rem => {
            let (a, b) = numbers();
            Value::Number(a % b)
        }
        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => {
                    let (a, b) = numbers();
                    a.partial_cmp(&b)
                }
            };
            Value::Bool(match (op, ordering) {
                (_, None) => false,
                (BinaryOp::Lt, Some(o)) => o == Ordering::Less,
                (BinaryOp::Gt, Some(o)) => o == Ordering::Greater,
                (BinaryOp::Le, Some(o)) => o != Ordering::Greater,
                (_, Some(o)) => o != Ordering::Less,
            })
        }
        BinaryOp::Eq => Value::Bool(left.loose_eq(right)),
        BinaryOp::Ne => Value::Bool(!left.loose_eq(right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_eq(right)),
        BinaryOp::StrictNe => Value::Bool(!left.strict_eq(right)),
    }
}

/// `Array.prototype.sort` without a comparator: string order, `undefined` last.
fn default_order(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Undefined, Value::Undefined) => Ordering::Equal,
        (Value::Undefined, _) => Ordering::Greater,
        (_, Value::Undefined) => Ordering::Less,
        _ => a.to_display().cmp(&b.to_display()),
    }
}

/// Stable merge sort with a fallible comparator.
fn merge_sort(
    items: Vec<Value>,
    compare: &mut dyn FnMut(&Value, &Value) -> RuntimeResult<Ordering>,
) -> RuntimeResult<Vec<Value>> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let mut left = items;
    let right = left.split_off(left.len() / 2);
    let left = merge_sort(left, compare)?;
    let right = merge_sort(right, compare)?;

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    while let (Some(a), Some(b)) = (left.peek(), right.peek()) {
        if compare(a, b)? == Ordering::Greater {
            merged.extend(right.next());
        } else {
            merged.extend(left.next());
        }
    }
    merged.extend(left);
    merged.extend(right);
    Ok(merged)
}

/// `start`/`end` arguments of `slice`, clamped to `len` (negatives count from the end).
fn slice_bounds(len: usize, args: &[Value]) -> (usize, usize) {
    let resolve = |value: Value, default: usize| -> usize {
        if value.is_nullish() {
            return default;
        }
        let n = value.to_number();
        if n.is_nan() {
            0
        } else if n < 0.0 {
            len.saturating_sub((-n) as usize)
        } else {
            (n as usize).min(len)
        }
    };
    let start = resolve(arg(args, 0), 0);
    let end = resolve(arg(args, 1), len);
    (start, end.max(start))
}

fn char_position(haystack: &str, byte_index: usize) -> f64 {
    haystack[..byte_index].chars().count() as f64
}

fn string_method(s: &str, name: &str, args: &[Value]) -> RuntimeResult<Option<Value>> {
    let text = |i: usize| arg(args, i).to_display();
    Ok(Some(match name {
        "toUpperCase" => Value::String(s.to_uppercase()),
        "toLowerCase" => Value::String(s.to_lowercase()),
        "trim" => Value::string(s.trim()),
        "trimStart" => Value::string(s.trim_start()),
        "trimEnd" => Value::string(s.trim_end()),
        "toString" | "valueOf" => Value::string(s),
        "charAt" => {
            let index = arg(args, 0).to_number();
            let index = if index.is_nan() { 0.0 } else { index };
            let c = if index < 0.0 { None } else { s.chars().nth(index as usize) };
            Value::String(c.map(String::from).unwrap_or_default())
        }
        "indexOf" => Value::Number(s.find(&text(0)).map_or(-1.0, |i| char_position(s, i))),
        "lastIndexOf" => Value::Number(s.rfind(&text(0)).map_or(-1.0, |i| char_position(s, i))),
        "includes" => Value::Bool(s.contains(&text(0))),
        "startsWith" => Value::Bool(s.starts_with(&text(0))),
        "endsWith" => Value::Bool(s.ends_with(&text(0))),
        "slice" | "substring" => {
            let chars: Vec<char> = s.chars().collect();
            let (start, end) = if name == "slice" {
                slice_bounds(chars.len(), args)
            } else {
                let clamp = |value: Value, default: usize| {
                    if value.is_nullish() {
                        return default;
                    }
                    let n = value.to_number();
                    if n.is_nan() || n < 0.0 { 0 } else { (n as usize).min(chars.len()) }
                };
                let a = clamp(arg(args, 0), 0);
                let b = clamp(arg(args, 1), chars.len());
                (a.min(b), a.max(b))
            };
            Value::String(chars[start..end].iter().collect())
        }
        "split" => {
            let parts: Vec<Value> = match arg(args, 0) {
                Value::Undefined => vec![Value::string(s)],
                separator => {
                    let separator = separator.to_display();
                    if separator.is_empty() {
                        s.chars().map(|c| Value::String(c.to_string())).collect()
                    } else {
                        s.split(separator.as_str()).map(Value::string).collect()
                    }
                }
            };
            let parts = match arg(args, 1) {
                Value::Undefined => parts,
                limit => parts.into_iter().take(limit.to_number().max(0.0) as usize).collect(),
            };
            Value::array(parts)
        }
        "replace" => Value::String(s.replacen(&text(0), &text(1), 1)),
        "replaceAll" => Value::String(s.replace(&text(0), &text(1))),
        "concat" => {
            let mut result = s.to_string();
            for value in args {
                result.push_str(&value.to_display());
            }
            Value::String(result)
        }
        "repeat" => {
            let count = arg(args, 0).to_number().trunc();
            if count < 0.0 || count.is_infinite() {
                return Err(RuntimeError::Range(format!(
                    "Invalid count value: {}",
                    format_number(count)
                )));
            }
            let count = if count > 0.0 { count as usize } else { 0 };
            let len = s.chars().count();
            if len > 0 && count > MAX_STRING_LENGTH / len {
                return Err(invalid_string_length());
            }
            Value::String(s.repeat(count))
        }
        "padStart" | "padEnd" => {
            let width = arg(args, 0).to_number();
            let width = if width > 0.0 { width as usize } else { 0 };
            let fill = match arg(args, 1) {
                Value::Undefined => " ".to_string(),
                fill => fill.to_display(),
            };
            let len = s.chars().count();
            if width <= len || fill.is_empty() {
                Value::string(s)
            } else if width > MAX_STRING_LENGTH {
                return Err(invalid_string_length());
            } else {
                let padding: String = fill.chars().cycle().take(width - len).collect();
                Value::String(if name == "padStart" {
                    padding + s
                } else {
                    s.to_string() + &padding
                })
            }
        }
        _ => return Ok(None),
    }))
}

fn invalid_string_length() -> RuntimeError {
    RuntimeError::Range("Invalid string length".to_string())
}

fn call_native(native: Native, args: &[Value], callee: &Expr) -> RuntimeResult<Value> {
    let number = |i: usize| arg(args, i).to_number();
    Ok(match native {
        Native::JsonStringify => match arg(args, 0).to_json()? {
            None => Value::Undefined,
            Some(json) => {
                let text = if arg(args, 2).is_truthy() {
                    serde_json::to_string_pretty(&json)
                } else {
                    serde_json::to_string(&json)
                };
                Value::String(text.map_err(|e| RuntimeError::Type(e.to_string()))?)
            }
        },
        Native::MathFloor => Value::Number(number(0).floor()),
        Native::MathCeil => Value::Number(number(0).ceil()),
        Native::MathRound => Value::Number((number(0) + 0.5).floor()),
        Native::MathAbs => Value::Number(number(0).abs()),
        Native::MathMax | Native::MathMin => {
            let is_max = native == Native::MathMax;
            let mut result = if is_max { f64::NEG_INFINITY } else { f64::INFINITY };
            for value in args {
                let n = value.to_number();
                if n.is_nan() {
                    return Ok(Value::Number(f64::NAN));
                }
                result = if is_max { result.max(n) } else { result.min(n) };
            }
            Value::Number(result)
        }
        Native::ObjectKeys => match arg(args, 0) {
            Value::Object(map) => Value::array(map.borrow().keys().cloned().map(Value::String).collect()),
            Value::Array(items) => Value::array(index_keys(items.borrow().len())),
            Value::String(s) => Value::array(index_keys(s.chars().count())),
            Value::Undefined | Value::Null => {
                return Err(RuntimeError::Type(
                    "Cannot convert undefined or null to object".to_string(),
                ));
            }
            _ => Value::array(Vec::new()),
        },
        Native::ArrayIsArray => Value::Bool(matches!(arg(args, 0), Value::Array(_))),
        Native::String => match args.first() {
            Some(value) => Value::String(value.to_display()),
            None => Value::string(""),
        },
        Native::Number => match args.first() {
            Some(value) => Value::Number(value.to_number()),
            None => Value::Number(0.0),
        },
        Native::ParseInt => {
            let radix = match arg(args, 1) {
                Value::Undefined => 0,
                radix => radix.to_number() as u32,
            };
            Value::Number(parse_int(&arg(args, 0).to_display(), radix))
        }
        Native::ParseFloat => Value::Number(parse_float(&arg(args, 0).to_display())),
        Native::Json | Native::Math | Native::Object | Native::Array => {
            return Err(RuntimeError::NotCallable(callee.to_string()));
        }
    })
}

/// `parseInt`: the longest valid prefix in `radix`, `NaN` if there is none.
fn parse_int(text: &str, radix: u32) -> f64 {
    let text = text.trim_start();
    let (sign, digits) = match text.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, text.strip_prefix('+').unwrap_or(text)),
    };
    // Radix 0 means "not given": hex prefixes are honoured, decimal otherwise.
    let (radix, digits) = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) if radix == 16 || radix == 0 => (16, hex),
        _ => (if radix == 0 { 10 } else { radix }, digits),
    };
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let mut result: Option<f64> = None;
    for c in digits.chars() {
        let Some(d) = c.to_digit(radix) else { break };
        result = Some(result.unwrap_or(0.0) * f64::from(radix) + f64::from(d));
    }
    result.map_or(f64::NAN, |n| sign * n)
}

/// `parseFloat`: the longest prefix that is a decimal number.
fn parse_float(text: &str) -> f64 {
    let text = text.trim_start();
    let bytes = text.as_bytes();
    let digits = |mut end: usize| {
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        end
    };

    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let mantissa_start = end;
    end = digits(end);
    if end < bytes.len() && bytes[end] == b'.' {
        end = digits(end + 1);
    }
    if end > mantissa_start && end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exponent = end + 1;
        if exponent < bytes.len() && matches!(bytes[exponent], b'+' | b'-') {
            exponent += 1;
        }
        if exponent < bytes.len() && bytes[exponent].is_ascii_digit() {
            end = digits(exponent);
        }
    }
    text[..end].parse().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::{Delimiters, lex};
    use crate::script::parser::generate;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn locals(json: serde_json::Value) -> ObjectRef {
        match Value::from(json) {
            Value::Object(map) => map,
            _ => Rc::new(RefCell::new(IndexMap::new())),
        }
    }

    fn run_with(template: &str, data: serde_json::Value) -> RuntimeResult<String> {
        let segments = lex(template, 0, &Delimiters::default()).unwrap();
        let body = generate(&segments, 0).unwrap();
        let filters = FilterRegistry::default();
        Interpreter::new(locals(data), &filters).run(&body)
    }

    fn render(template: &str, data: serde_json::Value) -> String {
        run_with(template, data).unwrap()
    }

    // ========================================================================
    // Output
    // ========================================================================

    #[test]
    fn test_escaped_and_raw_output() {
        let data = json!({"html": "<b>hi</b>"});
        assert_eq!(render("<%= html %>", data.clone()), "&lt;b&gt;hi&lt;/b&gt;");
        assert_eq!(render("<%- html %>", data), "<b>hi</b>");
    }

    #[test]
    fn test_undefined_output() {
        assert_eq!(render("[<%= missing %>]", json!({})), "[undefined]");
        assert_eq!(render("[<%- missing %>]", json!({})), "[]");
        assert_eq!(render("[<%- null %>]", json!({})), "[]");
    }

    #[test]
    fn test_loops_over_locals() {
        let data = json!({"users": [{"name": "tobi"}, {"name": "loki"}, {"name": "jane"}]});
        assert_eq!(
            render(
                "<ul><% users.forEach(function(user){ %><li><%= user.name %></li><% }) %></ul>",
                data.clone()
            ),
            "<ul><li>tobi</li><li>loki</li><li>jane</li></ul>"
        );
        assert_eq!(
            render("<% for (const u of users) { %><%= u.name %>,<% } %>", data),
            "tobi,loki,jane,"
        );
    }

    // ========================================================================
    // Statements
    // ========================================================================

    #[test]
    fn test_control_flow() {
        let template = "<% for (var i = 0; i < 10; i++) { if (i % 2) continue; if (i > 6) break; %><%= i %><% } %>";
        assert_eq!(render(template, json!({})), "0246");

        let template = "<% let n = 3; while (n > 0) { %><%= n-- %><% } %>";
        assert_eq!(render(template, json!({})), "321");

        let template = "<% for (const k in obj) { %><%= k %>=<%= obj[k] %>;<% } %>";
        assert_eq!(render(template, json!({"obj": {"a": 1, "b": 2}})), "a=1;b=2;");
    }

    #[test]
    fn test_var_is_function_scoped() {
        let template = "<% if (true) { var x = 'in'; let y = 'block' } %><%= x %>|<%= typeof y %>";
        assert_eq!(render(template, json!({})), "in|undefined");
    }

    #[test]
    fn test_functions_and_closures() {
        let template = "<% function greet(name) { return 'hi ' + name } \
                        const add = (a, b) => a + b; \
                        let count = 0; const inc = () => { count += 1; return count }; \
                        inc(); inc(); %><%= greet('tj') %> <%= add(1, 2) %> <%= count %>";
        assert_eq!(render(template, json!({})), "hi tj 3 2");
    }

    #[test]
    fn test_function_bodies_can_emit_text() {
        let template = "<% function item(x) { %><li><%= x %></li><% } %><% item(1); item(2) %>";
        assert_eq!(render(template, json!({})), "<li>1</li><li>2</li>");
    }

    #[test]
    fn test_assignment_updates_locals() {
        let template = "<% title = title.toUpperCase() %><%= title %><% other = 1 %><%= other %>";
        assert_eq!(render(template, json!({"title": "home"})), "HOME1");
    }

    #[test]
    fn test_const_reassignment_fails() {
        let err = run_with("<% const a = 1; a = 2 %>", json!({})).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: Assignment to constant variable.");
    }

    // ========================================================================
    // Expressions and builtins
    // ========================================================================

    #[test]
    fn test_operators() {
        assert_eq!(render("<%= 1 + 2 * 3 %>", json!({})), "7");
        assert_eq!(render("<%= '1' + 2 %>", json!({})), "12");
        assert_eq!(render("<%= 7 % 3 %>", json!({})), "1");
        assert_eq!(render("<%= 'b' > 'a' %>", json!({})), "true");
        assert_eq!(render("<%= 1 == '1' %> <%= 1 === '1' %>", json!({})), "true false");
        assert_eq!(render("<%= a || 'default' %>", json!({})), "default");
        assert_eq!(render("<%= a && a.b %>", json!({"a": null})), "null");
        assert_eq!(render("<%= n > 1 ? 'many' : 'one' %>", json!({"n": 3})), "many");
        assert_eq!(render("<%= typeof n %>", json!({"n": 3})), "number");
    }

    #[test]
    fn test_string_methods() {
        let data = json!({"s": "Hello, World"});
        assert_eq!(render("<%= s.toLowerCase() %>", data.clone()), "hello, world");
        assert_eq!(render("<%= s.split(', ').join('|') %>", data.clone()), "Hello|World");
        assert_eq!(render("<%= s.slice(-5) %>", data.clone()), "World");
        assert_eq!(render("<%= s.indexOf('World') %>", data.clone()), "7");
        assert_eq!(render("<%= s.length %>", data.clone()), "12");
        assert_eq!(render("<%= s.replace('l', 'L') %>", data), "HeLlo, World");
    }

    #[test]
    fn test_array_methods() {
        let data = json!({"nums": [3, 1, 2]});
        assert_eq!(render("<%= nums.map(n => n * 2).join(',') %>", data.clone()), "6,2,4");
        assert_eq!(render("<%= nums.filter(n => n > 1).length %>", data.clone()), "2");
        assert_eq!(render("<%= nums.reduce((a, b) => a + b, 0) %>", data.clone()), "6");
        assert_eq!(render("<%= nums.slice().sort().join() %>", data.clone()), "1,2,3");
        assert_eq!(
            render("<%= nums.slice().sort((a, b) => b - a).join() %>", data.clone()),
            "3,2,1"
        );
        assert_eq!(render("<%= nums.includes(2) %> <%= nums.indexOf(9) %>", data.clone()), "true -1");
        assert_eq!(render("<% nums.push(4) %><%= nums.length %>", data.clone()), "4");
        assert_eq!(render("<%= nums.find(n => n < 3) %>", data), "1");
    }

    #[test]
    fn test_globals() {
        let data = json!({"user": {"name": "tj", "tags": ["a"]}});
        assert_eq!(
            render("<%- JSON.stringify(user) %>", data.clone()),
            r#"{"name":"tj","tags":["a"]}"#
        );
        assert_eq!(render("<%= Object.keys(user).join() %>", data.clone()), "name,tags");
        assert_eq!(render("<%= Array.isArray(user.tags) %>", data), "true");
        assert_eq!(render("<%= Math.max(1, 5, 3) %> <%= Math.round(2.5) %>", json!({})), "5 3");
        assert_eq!(render("<%= parseInt('42px') %> <%= parseFloat('3.5em') %>", json!({})), "42 3.5");
        assert_eq!(render("<%= String(undefined) %> <%= Number('7') + 1 %>", json!({})), "undefined 8");
        assert_eq!(render("<%= (3.14159).toFixed(2) %>", json!({})), "3.14");
    }

    #[test]
    fn test_locals_object_is_visible() {
        assert_eq!(render("<%= locals.name %>", json!({"name": "tj"})), "tj");
        assert_eq!(render("<%= typeof locals.nope %>", json!({})), "undefined");
    }

    #[test]
    fn test_this_binding() {
        let segments = lex("<%= this.greeting %>", 0, &Delimiters::default()).unwrap();
        let body = generate(&segments, 0).unwrap();
        let filters = FilterRegistry::default();
        let this = Value::from(json!({"greeting": "hello"}));
        let out = Interpreter::new(locals(json!({})), &filters)
            .with_this(this)
            .run(&body)
            .unwrap();
        assert_eq!(out, "hello");
    }

    // ========================================================================
    // Errors
    // ========================================================================

    #[test]
    fn test_type_errors() {
        let err = run_with("<%= user.name %>", json!({})).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: Cannot read properties of undefined (reading 'name')"
        );

        let err = run_with("<%= name.nope() %>", json!({"name": "x"})).unwrap_err();
        assert_eq!(err, RuntimeError::NotCallable("name.nope".to_string()));

        let err = run_with("<% for (x of 5) {} %>", json!({})).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: 5 is not iterable");
    }

    #[test]
    fn test_error_location() {
        let segments = lex("ok\n<% let a = 1 %>\n<%= a.b.c %>", 0, &Delimiters::default()).unwrap();
        let body = generate(&segments, 0).unwrap();
        let filters = FilterRegistry::default();
        let mut interp = Interpreter::new(locals(json!({})), &filters);
        assert!(interp.run(&body).is_err());
        assert_eq!(interp.location(), Location::new(0, 3));
    }

    #[test]
    fn test_recursion_limit() {
        let segments = lex("<% function f(n) { return f(n + 1) } f(0) %>", 0, &Delimiters::default()).unwrap();
        let body = generate(&segments, 0).unwrap();
        let filters = FilterRegistry::default();
        let err = Interpreter::new(locals(json!({})), &filters)
            .with_max_depth(8)
            .run(&body)
            .unwrap_err();
        assert_eq!(err, RuntimeError::StackOverflow);
    }

    #[test]
    fn test_string_length_limit() {
        let err = run_with("<%= 'x'.repeat(1000000000000) %>", json!({})).unwrap_err();
        assert_eq!(err.to_string(), "RangeError: Invalid string length");

        let err = run_with("<%= 'x'.repeat(-1) %>", json!({})).unwrap_err();
        assert_eq!(err, RuntimeError::Range("Invalid count value: -1".to_string()));

        let err = run_with("<%= 'x'.padStart(1000000000000, 'ab') %>", json!({})).unwrap_err();
        assert_eq!(err.to_string(), "RangeError: Invalid string length");

        assert_eq!(render("<%= 'ab'.repeat(3) %>|<%= ''.repeat(1000000000000) %>", json!({})), "ababab|");
        assert_eq!(render("<%= '5'.padStart(3, '0') %><%= 'x'.padEnd(1000000000000, '') %>", json!({})), "005x");
    }

    #[test]
    fn test_cyclic_arrays() {
        let template = "<% var a = [1]; a.push(a) %><%= a %>|<%= a.join('-') %>";
        assert_eq!(render(template, json!({})), "1,|1-");

        let err = run_with("<% var o = {}; o.self = o %><%= JSON.stringify(o) %>", json!({})).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: Converting circular structure to JSON");
    }

    // ========================================================================
    // Scope lifetime
    // ========================================================================

    fn scopes_released(template: &str) -> bool {
        let segments = lex(template, 0, &Delimiters::default()).unwrap();
        let body = generate(&segments, 0).unwrap();
        let filters = FilterRegistry::default();
        let mut interp = Interpreter::new(locals(json!({})), &filters);
        let globals = Rc::downgrade(&interp.globals);
        let _ = interp.run(&body);
        drop(interp);
        globals.upgrade().is_none()
    }

    #[test]
    fn test_closures_do_not_keep_scopes_alive() {
        assert!(scopes_released("<% var f = function () { return 1 } %><%= f() %>"));
        assert!(scopes_released("<% function f(n) { return n } %><%= f(2) %>"));
        assert!(scopes_released(
            "<% var fs = []; for (let i = 0; i < 3; i++) { fs.push(() => i) } %><%= fs.length %>"
        ));
        assert!(scopes_released(
            "<% function outer() { const inner = () => inner; return inner } const g = outer() %>"
        ));
    }

    #[test]
    fn test_scopes_released_after_error() {
        assert!(scopes_released("<% const f = () => 1; %><%= missing.name %>"));
    }

    #[test]
    fn test_filters() {
        let data = json!({"users": [{"name": "tobi"}, {"name": "loki"}]});
        assert_eq!(render("<%=: users | map:'name' | join:', ' %>", data.clone()), "tobi, loki");
        let err = run_with("<%=: users | nope %>", data).unwrap_err();
        assert_eq!(err.to_string(), "filters.nope is not a function");
    }

    #[test]
    fn test_parse_float() {
        assert_eq!(parse_float("3.5em"), 3.5);
        assert_eq!(parse_float(" -1e3x"), -1000.0);
        assert_eq!(parse_float(".25"), 0.25);
        assert!(parse_float("em").is_nan());
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("  -12abc", 10), -12.0);
        assert_eq!(parse_int("ff", 16), 255.0);
        assert_eq!(parse_int("0x1f", 16), 31.0);
        assert_eq!(parse_int("0x1f", 0), 31.0);
        assert_eq!(parse_int("0x1f", 10), 0.0);
        assert!(parse_int("abc", 10).is_nan());
    }

    #[test]
    fn test_merge_sort_is_stable() {
        let items = vec![
            Value::from(json!({"k": 1, "id": "a"})),
            Value::from(json!({"k": 0, "id": "b"})),
            Value::from(json!({"k": 1, "id": "c"})),
        ];
        let sorted = merge_sort(items, &mut |a, b| {
            Ok(a.get_property("k")
                .to_number()
                .total_cmp(&b.get_property("k").to_number()))
        })
        .unwrap();
        let ids: Vec<String> = sorted.iter().map(|v| v.get_property("id").to_display()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }
}
