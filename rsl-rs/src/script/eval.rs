//! Tree-walking evaluator.
//!
//! Statements return `Result<Option<Flow>, RuntimeError>`: `Ok(None)` to
//! continue, `Ok(Some(Flow::Break))` to leave the innermost loop and
//! `Ok(Some(Flow::Exit(v)))` to stop the whole evaluation.  Errors never
//! carry control flow.
//!
//! Before a node runs, its position is stored in the runtime's `info` object.
//! The first node boundary an error crosses stamps it with that node's
//! location and a copy of the include/invoke call stack; outer boundaries
//! leave it alone, so the report names the innermost failing node.

use std::collections::HashMap;
use std::fmt;
use std::iter;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, warn};

use super::ast::{
    BinOp, Body, Cardinality, Expr, FunctionDef, IfBranch, Link, Loc, Nav, OrderBy, Param, Part, Select,
    SelectSource, Stmt, Target, UnOp,
};
use super::lexer::ParseError;
use super::parser::parse_file;
use super::runtime::Runtime;
use super::symtab::{SymbolTable, SymtabError};
use super::value::{Fragment, InstRef, InstSet, Value};
use crate::model::ModelError;

// ── Control flow and errors ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Break,
    Exit(Value),
}

/// An error raised while evaluating a node.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub message: String,
    loc: Option<Loc>,
    traceback: Vec<Loc>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        RuntimeError { message: message.into(), loc: None, traceback: Vec::new() }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RuntimeError {}

impl From<String> for RuntimeError {
    fn from(message: String) -> Self {
        RuntimeError::new(message)
    }
}

impl From<&str> for RuntimeError {
    fn from(message: &str) -> Self {
        RuntimeError::new(message)
    }
}

impl From<SymtabError> for RuntimeError {
    fn from(e: SymtabError) -> Self {
        RuntimeError::new(e.to_string())
    }
}

impl From<ModelError> for RuntimeError {
    fn from(e: ModelError) -> Self {
        RuntimeError::new(e.0)
    }
}

impl From<ParseError> for RuntimeError {
    fn from(e: ParseError) -> Self {
        RuntimeError::new(e.to_string())
    }
}

/// A fatal error surfaced by [`evaluate`], after the traceback was printed.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub file: String,
    pub line: usize,
    pub message: String,
    pub traceback: Vec<Loc>,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.file, self.line, self.message)
    }
}

impl std::error::Error for EvalError {}

type Exec = Result<Option<Flow>, RuntimeError>;

// ── Entry point ───────────────────────────────────────────────────────────────

/// Run `body` to completion.  Returns the `.exit` value, if one ran.
///
/// On a fatal error the message and traceback go to the runtime's print sink
/// before the error is returned.
pub fn evaluate(rt: &mut Runtime, body: &Body, includes: &[PathBuf]) -> Result<Option<Value>, EvalError> {
    let mut ev = Evaluator::new(rt, includes);
    let result = match ev.exec_block(&body.stmts) {
        Ok(None) => return Ok(None),
        Ok(Some(Flow::Exit(v))) => {
            debug!(value = %v, "exit");
            return Ok(Some(v));
        }
        Ok(Some(Flow::Break)) => RuntimeError::new("break outside of a loop"),
        Err(e) => e,
    };
    Err(ev.report(result))
}

/// Iteration state for `first`/`last`: which set a `for each` is walking and
/// the element it is on.
struct Iteration {
    origin: u64,
    current: InstRef,
}

enum Call {
    Returned(Value),
    Exited(Value),
}

pub struct Evaluator<'rt> {
    rt: &'rt mut Runtime,
    includes: Vec<PathBuf>,
    symtab: SymbolTable,
    callstack: Vec<Loc>,
    iterations: Vec<Iteration>,
}

impl<'rt> Evaluator<'rt> {
    pub fn new(rt: &'rt mut Runtime, includes: &[PathBuf]) -> Self {
        let mut symtab = SymbolTable::new();
        symtab.install_global("true", Value::Bool(true));
        symtab.install_global("false", Value::Bool(false));
        symtab.install_global("info", Value::Info);
        Evaluator { rt, includes: includes.to_vec(), symtab, callstack: Vec::new(), iterations: Vec::new() }
    }

    /// Print the error with its traceback and turn it into an [`EvalError`].
    fn report(&mut self, e: RuntimeError) -> EvalError {
        let loc = e.loc.clone().unwrap_or_else(|| Loc::new(self.rt.info.file.clone(), self.rt.info.line));
        let traceback = if e.traceback.is_empty() { vec![loc.clone()] } else { e.traceback.clone() };
        self.rt.set_location(&loc.file, loc.line);
        self.rt.print(&e.message, "ERROR");
        self.rt.print_raw("Traceback  (most recent call last):");
        for frame in &traceback {
            self.rt.print_raw(&format!("    File \"{}\", line {}", frame.file, frame.line));
        }
        EvalError { file: loc.file.to_string(), line: loc.line, message: e.message, traceback }
    }

    /// Stamp `e` with `loc` unless an inner node already did.
    fn locate(&self, mut e: RuntimeError, loc: &Loc) -> RuntimeError {
        if e.loc.is_none() {
            e.traceback = self.callstack.iter().cloned().chain(iter::once(loc.clone())).collect();
            e.loc = Some(loc.clone());
        }
        e
    }

    // ── Statements ────────────────────────────────────────────────────────────

    pub fn exec_block(&mut self, stmts: &[Stmt]) -> Exec {
        for stmt in stmts {
            if let Some(flow) = self.exec(stmt)? {
                return Ok(Some(flow));
            }
        }
        Ok(None)
    }

    fn exec(&mut self, stmt: &Stmt) -> Exec {
        let loc = stmt.loc();
        self.rt.set_location(&loc.file, loc.line);
        self.exec_stmt(stmt).map_err(|e| self.locate(e, loc))
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Exec {
        match stmt {
            Stmt::Literal { parts, .. } => {
                let text = self.render(parts)?;
                self.rt.buffer_literal(&text);
            }

            Stmt::If { branches, else_body, .. } => {
                self.symtab.enter_block();
                let result = self.exec_if(branches, else_body.as_deref());
                self.symtab.leave_block()?;
                return result;
            }

            Stmt::While { cond, body, .. } => {
                self.symtab.enter_block();
                let result = self.exec_while(cond, body);
                self.symtab.leave_block()?;
                return result;
            }

            Stmt::For { var, set, body, .. } => {
                let set = match self.symtab.find_symbol(set)? {
                    Value::Set(s) => s.clone(),
                    other => other
                        .to_set()
                        .ok_or_else(|| format!("cannot iterate over {}", other.type_name()))?,
                };
                self.symtab.enter_block();
                let result = self.exec_for(var, &set, body);
                self.symtab.leave_block()?;
                return result;
            }

            Stmt::Break { .. } => return Ok(Some(Flow::Break)),

            Stmt::Function(def) => {
                debug!(name = %def.name, params = def.params.len(), "define function");
                self.rt.functions.insert(def.name.clone(), def.clone());
            }

            Stmt::Invoke { result, name, args, loc } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                self.callstack.push(loc.clone());
                let outcome = self.invoke(name, values);
                self.callstack.pop();
                match outcome? {
                    Call::Returned(value) => {
                        if let Some(var) = result {
                            self.symtab.install_symbol(var, value);
                        }
                    }
                    Call::Exited(value) => return Ok(Some(Flow::Exit(value))),
                }
            }

            Stmt::Assign { target, value, .. } => {
                let value = self.eval(value)?;
                match target {
                    Target::Var(name) => self.symtab.install_symbol(name, value),
                    Target::Field { var, attr } => {
                        let obj = self.symtab.find_symbol(var)?.clone();
                        self.set_field(&obj, attr, value)?;
                    }
                }
            }

            Stmt::Clear { .. } => self.rt.clear_buffer(),

            Stmt::Include { path, loc } => {
                let filename = self.eval(path)?.to_string();
                return self.include(&filename, loc);
            }

            Stmt::Print { message, .. } => {
                let text = self.eval(message)?.to_string();
                self.rt.print(&text, "INFO");
            }

            Stmt::Emit { path, .. } => {
                let path = self.eval(path)?.to_string();
                self.rt.emit_buffer(&path)?;
            }

            Stmt::Exit { value, .. } => return Ok(Some(Flow::Exit(self.eval(value)?))),

            Stmt::AlXlate { activity, var, loc } => {
                warn!(file = %loc.file, line = loc.line, %activity, %var, "al_xlate has no effect");
            }

            Stmt::SpecialWhere { .. } => return Err("special_where is not supported".into()),

            Stmt::Create { var, kind, .. } => {
                let inst = self.rt.model.new_instance(kind)?;
                self.symtab.install_symbol(var, Value::Inst(inst));
            }

            Stmt::Delete { var, .. } => match self.symtab.find_symbol(var)?.clone() {
                Value::Inst(inst) => self.rt.model.delete(&inst)?,
                Value::Unit => return Err("cannot delete an empty instance reference".into()),
                other => return Err(format!("delete expects an instance, not {}", other.type_name()).into()),
            },

            Stmt::Select(select) => self.select(select)?,

            Stmt::Relate(link) => self.link(link, true)?,

            Stmt::Unrelate(link) => self.link(link, false)?,
        }
        Ok(None)
    }

    fn exec_if(&mut self, branches: &[IfBranch], else_body: Option<&[Stmt]>) -> Exec {
        for branch in branches {
            if self.eval(&branch.cond)?.truthy() {
                return self.exec_block(&branch.body);
            }
        }
        match else_body {
            Some(body) => self.exec_block(body),
            None => Ok(None),
        }
    }

    /// One pass of a loop body in its own block.
    fn exec_pass(&mut self, body: &[Stmt]) -> Exec {
        self.symtab.enter_block();
        let result = self.exec_block(body);
        self.symtab.leave_block()?;
        result
    }

    fn exec_while(&mut self, cond: &Expr, body: &[Stmt]) -> Exec {
        while self.eval(cond)?.truthy() {
            match self.exec_pass(body)? {
                Some(Flow::Break) => break,
                Some(flow) => return Ok(Some(flow)),
                None => {}
            }
        }
        Ok(None)
    }

    fn exec_for(&mut self, var: &str, set: &InstSet, body: &[Stmt]) -> Exec {
        for inst in set.items() {
            self.iterations.push(Iteration { origin: set.origin(), current: inst.clone() });
            self.symtab.install_symbol(var, Value::Inst(inst.clone()));
            let result = self.exec_pass(body);
            self.iterations.pop();
            match result? {
                Some(Flow::Break) => break,
                Some(flow) => return Ok(Some(flow)),
                None => {}
            }
        }
        Ok(None)
    }

    fn include(&mut self, filename: &str, loc: &Loc) -> Exec {
        let body = match self.rt.include_cache.get(filename) {
            Some(body) => body.clone(),
            None => {
                let path = self.resolve_include(filename).ok_or_else(|| format!("unable to find '{filename}'"))?;
                debug!(file = %path.display(), "include");
                let body = Rc::new(parse_file(&path)?);
                self.rt.include_cache.insert(filename.to_string(), body.clone());
                body
            }
        };
        self.callstack.push(loc.clone());
        let result = self.exec_block(&body.stmts);
        self.callstack.pop();
        result
    }

    /// Absolute paths as given; relative ones against the current
    /// archetype's folder, then each include directory.
    fn resolve_include(&self, filename: &str) -> Option<PathBuf> {
        let path = Path::new(filename);
        if path.is_absolute() {
            return path.exists().then(|| path.to_path_buf());
        }
        iter::once(PathBuf::from(self.rt.arch_folder_path()))
            .chain(self.includes.iter().cloned())
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(|dir| dir.join(filename))
            .find(|candidate| candidate.is_file())
    }

    // ── Functions ─────────────────────────────────────────────────────────────

    fn invoke(&mut self, name: &str, args: Vec<Value>) -> Result<Call, RuntimeError> {
        if let Some(def) = self.rt.functions.get(name).cloned() {
            let saved_buffer = self.rt.swap_buffer(String::new());
            let saved_iterations = std::mem::take(&mut self.iterations);
            let result = self.call_function(&def, args);
            self.iterations = saved_iterations;
            let body = self.rt.swap_buffer(saved_buffer);

            let (vars, flow) = result?;
            match flow {
                Some(Flow::Exit(v)) => return Ok(Call::Exited(v)),
                Some(Flow::Break) => return Err("break outside of a loop".into()),
                None => {}
            }
            let mut frag = Fragment::new(body);
            for (key, value) in vars {
                if let Some(attr) = fragment_attr(&key) {
                    frag.insert(attr, value);
                }
            }
            return Ok(Call::Returned(Value::Frag(Rc::new(frag))));
        }

        let saved_buffer = self.rt.swap_buffer(String::new());
        let result = self.rt.bridges.call(name, &args);
        let body = self.rt.swap_buffer(saved_buffer);
        match result {
            Some(Ok(attrs)) => {
                let mut frag = Fragment::new(body);
                for (key, value) in attrs {
                    frag.insert(key, value);
                }
                Ok(Call::Returned(Value::Frag(Rc::new(frag))))
            }
            Some(Err(message)) => Err(message.into()),
            None => Err(format!("Function '{name}' is undefined").into()),
        }
    }

    /// Run `def` in a fresh scope.  Returns the scope's bindings.
    fn call_function(
        &mut self,
        def: &FunctionDef,
        args: Vec<Value>,
    ) -> Result<(HashMap<String, Value>, Option<Flow>), RuntimeError> {
        self.symtab.enter_scope();
        let result = self.bind_and_run(def, args);
        let vars = self.symtab.leave_scope()?;
        Ok((vars, result?))
    }

    fn bind_and_run(&mut self, def: &FunctionDef, args: Vec<Value>) -> Exec {
        if args.len() != def.params.len() {
            let e = RuntimeError::new(format!(
                "wrong number of arguments to {}: expected {}, got {}",
                def.name,
                def.params.len(),
                args.len()
            ));
            return Err(self.locate(e, &def.loc));
        }
        for (param, arg) in def.params.iter().zip(args) {
            let value = check_type(param, arg).map_err(|m| self.locate(m.into(), &param.loc))?;
            self.symtab.install_symbol(&param.name, value);
        }
        self.exec_block(&def.body)
    }

    // ── Object model ──────────────────────────────────────────────────────────

    fn instance(&self, name: &str) -> Result<InstRef, RuntimeError> {
        match self.symtab.find_symbol(name)? {
            Value::Inst(inst) => Ok(inst.clone()),
            Value::Unit => Err(format!("{name} is an empty instance reference").into()),
            other => Err(format!("{name} is a {}, not an instance reference", other.type_name()).into()),
        }
    }

    fn link(&mut self, link: &Link, relate: bool) -> Result<(), RuntimeError> {
        let from = self.instance(&link.from)?;
        let to = self.instance(&link.to)?;
        let pairs = match &link.using {
            None => vec![(from, to)],
            Some(using) => {
                let using = self.instance(using)?;
                vec![(from, using.clone()), (using, to)]
            }
        };
        let phrase = link.phrase.as_deref();
        for (a, b) in pairs {
            if relate {
                self.rt.model.relate(&a, &b, link.rel_id, phrase)?;
            } else {
                self.rt.model.unrelate(&a, &b, link.rel_id, phrase)?;
            }
        }
        Ok(())
    }

    /// Follow `navs` from every instance in `start`.
    fn navigate<'n>(
        &self,
        start: &Value,
        navs: impl IntoIterator<Item = &'n Nav>,
    ) -> Result<InstSet, RuntimeError> {
        let mut current = start
            .to_set()
            .ok_or_else(|| format!("cannot navigate from a {}", start.type_name()))?;
        for nav in navs {
            let mut next = Vec::new();
            for inst in current.items() {
                next.extend(self.rt.model.navigate(inst, &nav.kind, nav.rel_id, nav.phrase.as_deref())?);
            }
            current = InstSet::new(next);
        }
        Ok(current)
    }

    fn select(&mut self, select: &Select) -> Result<(), RuntimeError> {
        let candidates = match &select.source {
            SelectSource::Instances { kind } => self.rt.model.instances_of(kind)?,
            SelectSource::Related { start, navs } => {
                let start = self.eval(start)?;
                self.navigate(&start, navs)?.items().to_vec()
            }
        };

        let mut chosen = Vec::new();
        for inst in candidates {
            if self.where_matches(select.filter.as_ref(), &inst)? {
                chosen.push(inst);
            }
        }

        let value = match select.cardinality {
            Cardinality::One if chosen.len() > 1 => {
                return Err(format!("select one from a set with cardinality {}", chosen.len()).into())
            }
            Cardinality::One | Cardinality::Any => chosen.into_iter().next().map_or(Value::Unit, Value::Inst),
            Cardinality::Many => {
                if let Some(order) = &select.order {
                    self.order(&mut chosen, order)?;
                }
                Value::Set(InstSet::new(chosen))
            }
        };
        self.symtab.install_symbol(&select.var, value);
        Ok(())
    }

    /// Evaluate a where clause with the candidate bound to `selected`.
    fn where_matches(&mut self, filter: Option<&Expr>, inst: &InstRef) -> Result<bool, RuntimeError> {
        let Some(cond) = filter else { return Ok(true) };
        self.symtab.enter_block();
        self.symtab.install_symbol("selected", Value::Inst(inst.clone()));
        let result = self.eval(cond);
        self.symtab.leave_block()?;
        Ok(result?.truthy())
    }

    /// Stable sort by the listed attributes; `reverse` flips the whole order.
    fn order(&self, items: &mut Vec<InstRef>, order: &OrderBy) -> Result<(), RuntimeError> {
        let mut keyed = Vec::with_capacity(items.len());
        for inst in items.drain(..) {
            let keys = order
                .attrs
                .iter()
                .map(|a| self.rt.model.get_attr(&inst, a))
                .collect::<Result<Vec<_>, _>>()?;
            keyed.push((keys, inst));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            let ord = a
                .iter()
                .zip(b)
                .map(|(x, y)| x.compare(y).unwrap_or(std::cmp::Ordering::Equal))
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal);
            if order.reverse {
                ord.reverse()
            } else {
                ord
            }
        });
        items.extend(keyed.into_iter().map(|(_, inst)| inst));
        Ok(())
    }

    fn set_field(&mut self, obj: &Value, attr: &str, value: Value) -> Result<(), RuntimeError> {
        match obj {
            Value::Inst(inst) => Ok(self.rt.model.set_attr(inst, attr, value)?),
            Value::Unit => Err(format!("cannot assign {attr} of an empty instance reference").into()),
            Value::Info => Err(format!("info.{attr} is read-only").into()),
            Value::Frag(_) => Err(format!("fragment attribute {attr} is read-only").into()),
            other => Err(format!("cannot assign attribute {attr} of a {}", other.type_name()).into()),
        }
    }

    fn field(&mut self, obj: &Value, attr: &str) -> Result<Value, RuntimeError> {
        match obj {
            Value::Inst(inst) => Ok(self.rt.model.get_attr(inst, attr)?),
            Value::Frag(frag) => frag
                .get(attr)
                .cloned()
                .ok_or_else(|| format!("fragment has no attribute {attr}").into()),
            Value::Info => Ok(self.rt.info_attr(attr)?),
            Value::Unit => Err(format!("cannot read {attr} of an empty instance reference").into()),
            other => Err(format!("{} has no attribute {attr}", other.type_name()).into()),
        }
    }

    // ── Expressions ───────────────────────────────────────────────────────────

    pub fn eval(&mut self, expr: &Expr) -> Result<Value, RuntimeError> {
        let loc = expr.loc();
        self.rt.set_location(&loc.file, loc.line);
        self.eval_expr(expr).map_err(|e| self.locate(e, loc))
    }

    fn eval_expr(&mut self, expr: &Expr) -> Result<Value, RuntimeError> {
        Ok(match expr {
            Expr::Str { parts, .. } => Value::Str(self.render(parts)?),
            Expr::Int { value, .. } => Value::Int(*value),
            Expr::Real { value, .. } => Value::Real(*value),
            Expr::Var { name, .. } => self.symtab.find_symbol(name)?.clone(),
            Expr::Field { target, attr, .. } => {
                let obj = self.eval(target)?;
                self.field(&obj, attr)?
            }
            Expr::Subst { formats, expr, .. } => {
                let value = self.eval(expr)?;
                Value::Str(self.rt.format_string(&value, formats)?)
            }
            Expr::Navigate { .. } => {
                // Collect the whole `->` chain, then navigate once from its start.
                let mut navs = Vec::new();
                let mut cur = expr;
                while let Expr::Navigate { start, nav, .. } = cur {
                    navs.push(nav);
                    cur = &**start;
                }
                navs.reverse();
                let start = self.eval(cur)?;
                let set = self.navigate(&start, navs)?;
                set.first().cloned().map_or(Value::Unit, Value::Inst)
            }
            Expr::ParseKeyword { target, keyword, .. } => {
                let text = self.eval(target)?.to_string();
                let keyword = self.eval(keyword)?.to_string();
                Value::Str(Runtime::parse_keyword(&text, &keyword))
            }
            Expr::Unary { op, operand, .. } => {
                let value = self.eval(operand)?;
                self.unary(*op, &value)?
            }
            Expr::Binary { op, lhs, rhs, .. } => {
                let lhs = self.eval(lhs)?;
                match op {
                    BinOp::Or if lhs.truthy() => return Ok(Value::Bool(true)),
                    BinOp::And if !lhs.truthy() => return Ok(Value::Bool(false)),
                    _ => {}
                }
                let rhs = self.eval(rhs)?;
                match op {
                    BinOp::Or | BinOp::And => Value::Bool(rhs.truthy()),
                    _ => lhs.binary(*op, &rhs)?,
                }
            }
        })
    }

    fn render(&mut self, parts: &[Part]) -> Result<String, RuntimeError> {
        let mut out = String::new();
        for part in parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Subst(expr) => out.push_str(&self.eval(expr)?.to_string()),
            }
        }
        Ok(out)
    }

    fn unary(&self, op: UnOp, value: &Value) -> Result<Value, RuntimeError> {
        Ok(match op {
            UnOp::Neg => value.negate()?,
            UnOp::Not => Value::Bool(!value.truthy()),
            UnOp::Cardinality => Value::Int(value.cardinality() as i64),
            UnOp::Empty => Value::Bool(value.cardinality() == 0),
            UnOp::NotEmpty => Value::Bool(value.cardinality() != 0),
            UnOp::First | UnOp::NotFirst | UnOp::Last | UnOp::NotLast => {
                let Value::Set(set) = value else {
                    return Err(format!("{} expects an instance set, not {}", op.as_str(), value.type_name()).into());
                };
                let current = self
                    .iterations
                    .iter()
                    .rev()
                    .find(|it| it.origin == set.origin())
                    .map(|it| &it.current)
                    .ok_or_else(|| format!("{} used outside a for each over that set", op.as_str()))?;
                Value::Bool(match op {
                    UnOp::First => set.first() == Some(current),
                    UnOp::NotFirst => set.first() != Some(current),
                    UnOp::Last => set.last() == Some(current),
                    _ => set.last() != Some(current),
                })
            }
        })
    }
}

/// `attr_name` bindings become fragment attribute `name`.
fn fragment_attr(key: &str) -> Option<&str> {
    if key.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("attr_")) {
        key.split_once('_').map(|(_, rest)| rest)
    } else {
        None
    }
}

/// Check an argument against a declared parameter, widening integers passed
/// as reals.
fn check_type(param: &Param, value: Value) -> Result<Value, String> {
    let actual = value.type_name();
    let value = match (param.ty.as_str(), value) {
        ("real", Value::Int(n)) => Value::Real(n as f64),
        ("unique_id", v @ (Value::Int(_) | Value::Unit)) => v,
        ("inst_ref", v @ (Value::Inst(_) | Value::Unit)) => v,
        (ty, v) if ty == actual => v,
        (ty, _) => return Err(format!("expected type {ty}, not {actual}")),
    };
    if let (Some(kind), Some(actual_kind)) = (&param.kind, value.kind()) {
        if kind != actual_kind {
            return Err(format!("expected kind {kind}, not {actual_kind}"));
        }
    }
    Ok(value)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttrType, End, MetaModel};
    use crate::script::parser::parse_text;

    fn run_in(rt: &mut Runtime, src: &str) -> Result<Option<Value>, EvalError> {
        let body = parse_text(src, "test.arc").unwrap();
        evaluate(rt, &body, &[])
    }

    fn run(src: &str) -> Option<Value> {
        let mut rt = Runtime::new(MetaModel::new()).capture_output();
        run_in(&mut rt, src).unwrap()
    }

    fn fails(src: &str) -> EvalError {
        let mut rt = Runtime::new(MetaModel::new()).capture_output();
        run_in(&mut rt, src).unwrap_err()
    }

    /// Ten `A` instances with `Num` 0..10 and `Id` unique ids.
    fn model_a(n: i64) -> MetaModel {
        let mut m = MetaModel::new();
        m.define_class("A", vec![("Id".into(), AttrType::UniqueId), ("Num".into(), AttrType::Integer)]).unwrap();
        for i in 0..n {
            let a = m.new_instance("A").unwrap();
            m.set_attr(&a, "Num", Value::Int(i % 3)).unwrap();
        }
        m
    }

    fn run_model(m: MetaModel, src: &str) -> Option<Value> {
        let mut rt = Runtime::new(m).capture_output();
        run_in(&mut rt, src).unwrap()
    }

    #[test]
    fn exit_preserves_type() {
        assert_eq!(run(".exit 1"), Some(Value::Int(1)));
        assert_eq!(run(".exit 1.5"), Some(Value::Real(1.5)));
        assert_eq!(run(".exit \"s\""), Some(Value::Str("s".into())));
        assert_eq!(run(".exit true"), Some(Value::Bool(true)));
        assert_eq!(run("text\n"), None);
    }

    #[test]
    fn arithmetic() {
        assert_eq!(run(".exit 1 + 1"), Some(Value::Int(2)));
        assert_eq!(run(".exit 10 / 2"), Some(Value::Int(5)));
        assert_eq!(run(".exit 0 < 1"), Some(Value::Bool(true)));
        assert_eq!(run(".exit -7 % 3"), Some(Value::Int(2)));
    }

    #[test]
    fn short_circuit() {
        // The right-hand side would fail on an undefined variable.
        assert_eq!(run(".exit (true or undefined_var)"), Some(Value::Bool(true)));
        assert_eq!(run(".exit (false and undefined_var)"), Some(Value::Bool(false)));
        assert!(fails(".exit (false or undefined_var)").message.contains("undefined_var"));
    }

    #[test]
    fn if_elif_else() {
        let src = "
.assign x = 2
.if (x == 1)
  .exit 10
.elif (x == 2)
  .exit 20
.else
  .exit 30
.end if
";
        assert_eq!(run(src), Some(Value::Int(20)));
    }

    #[test]
    fn while_and_break() {
        let src = "
.assign i = 0
.while (i < 10)
  .assign i = i + 1
  .if (i == 4)
    .break while
  .end if
.end while
.exit i
";
        assert_eq!(run(src), Some(Value::Int(4)));
    }

    #[test]
    fn block_locals_do_not_leak() {
        let src = "
.if (true)
  .assign inner = 1
.end if
.exit inner
";
        assert!(fails(src).message.contains("inner"));
    }

    #[test]
    fn first_and_last_in_loops() {
        for n in 0..=10 {
            for (op, expected) in [("first", 1.min(n)), ("last", 1.min(n)), ("not_first", (n - 1).max(0)), ("not_last", (n - 1).max(0))] {
                let src = format!(
                    "
.select many a_set from instances of A
.assign x = 0
.for each a in a_set
  .if ({op} a_set)
    .assign x = x + 1
  .end if
.end for
.exit x
"
                );
                assert_eq!(run_model(model_a(n), &src), Some(Value::Int(expected)), "{op} with {n}");
            }
        }
    }

    #[test]
    fn break_for_leaves_one_loop() {
        let src = "
.select many a_set from instances of A
.assign count = 0
.for each a in a_set
  .for each b in a_set
    .assign count = count + 1
    .break for
  .end for
.end for
.exit count
";
        assert_eq!(run_model(model_a(4), src), Some(Value::Int(4)));
    }

    #[test]
    fn select_where_and_order() {
        let src = "
.select many a_set from instances of A where (selected.Num != 1) ordered_by (Num)
.assign s = \"\"
.for each a in a_set
  .assign s = s + \"${a.Num}\"
.end for
.exit s
";
        assert_eq!(run_model(model_a(6), src), Some(Value::Str("0022".into())));

        let src = "
.select many a_set from instances of A reverse_ordered_by (Num)
.select any a from instances of A where (selected.Num == 2)
.assign n = cardinality a_set
.exit \"${n}${a.Num}\"
";
        assert_eq!(run_model(model_a(6), src), Some(Value::Str("62".into())));
    }

    #[test]
    fn set_algebra() {
        let src = "
.create object instance a of A
.create object instance b of A
.assign u = a | b
.assign i = a & b
.assign d = a - a
.assign p = a + a
.assign nu = cardinality u
.assign ni = cardinality i
.assign nd = cardinality d
.assign np = cardinality p
.exit \"${nu}${ni}${nd}${np}\"
";
        assert_eq!(run_model(model_a(0), src), Some(Value::Str("2001".into())));
    }

    /// Dog `Owner_Id` refers to Person `Id` across R1.
    fn pets() -> MetaModel {
        let mut m = MetaModel::new();
        m.define_class("Person", vec![("Id".into(), AttrType::UniqueId), ("Name".into(), AttrType::String)]).unwrap();
        m.define_class("Dog", vec![("Name".into(), AttrType::String), ("Owner_Id".into(), AttrType::UniqueId)]).unwrap();
        m.define_association(
            1,
            End::new("Dog", &["Owner_Id"]).with_multiplicity("MC").unwrap(),
            End::new("Person", &["Id"]).with_multiplicity("1").unwrap(),
        )
        .unwrap();
        m
    }

    #[test]
    fn relate_select_related() {
        let src = "
.create object instance p of Person
.create object instance d1 of Dog
.create object instance d2 of Dog
.assign d1.Name = \"Rex\"
.relate d1 to p across R1
.relate p to d2 across R1
.select many dogs related by p->Dog[R1]
.assign d2.Name = \"Rex\"
.select one owner related by d1->Person[R1]
.if (owner != p)
  .exit \"wrong owner\"
.end if
.assign n = cardinality dogs
.exit \"${n} ${p->Dog[R1].Name}\"
";
        assert_eq!(run_model(pets(), src), Some(Value::Str("2 Rex".into())));
    }

    #[test]
    fn select_one_rejects_many() {
        let src = "
.create object instance p of Person
.create object instance d1 of Dog
.create object instance d2 of Dog
.relate d1 to p across R1
.relate d2 to p across R1
.select one d related by p->Dog[R1]
";
        let mut rt = Runtime::new(pets()).capture_output();
        let err = run_in(&mut rt, src).unwrap_err();
        assert_eq!(err.message, "select one from a set with cardinality 2");
        assert_eq!(err.line, 7);
        assert!(rt.captured().contains("Traceback  (most recent call last):"));
    }

    #[test]
    fn unrelate_and_delete() {
        let src = "
.create object instance p of Person
.create object instance d of Dog
.relate d to p across R1
.unrelate d from p across R1
.select many dogs related by p->Dog[R1]
.delete object instance p
.exit cardinality dogs
";
        assert_eq!(run_model(pets(), src), Some(Value::Int(0)));
    }

    #[test]
    fn functions_return_fragments() {
        let src = "
.function f
  .param integer n
Body ${n}
  .assign attr_x = n + 1
.end function
outer
.invoke r = f(1)
.exit \"${r.x}|${r.body}\"
";
        let mut rt = Runtime::new(MetaModel::new()).capture_output();
        assert_eq!(run_in(&mut rt, src).unwrap(), Some(Value::Str("2|Body 1\n".into())));
        // The leading empty line is literal output too.
        assert_eq!(rt.buffer(), "\nouter\n");
    }

    #[test]
    fn emit_empties_buffer_and_skips_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        let src = format!("a\n.emit to file \"{}\"\n", path.display());
        let mut rt = Runtime::new(MetaModel::new()).capture_output();

        run_in(&mut rt, &src).unwrap();
        assert_eq!(rt.buffer(), "");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\n");
        let first = rt.captured().to_string();
        assert!(first.contains("CREATED"));

        run_in(&mut rt, &src).unwrap();
        assert_eq!(rt.buffer(), "");
        assert_eq!(rt.captured(), first);
    }

    #[test]
    fn function_scope_is_isolated() {
        let src = "
.assign secret = 1
.function peek
  .assign attr_v = secret
.end function
.invoke r = peek()
";
        assert!(fails(src).message.contains("secret"));
    }

    #[test]
    fn parameter_checks() {
        let def = "
.function f
  .param boolean b
.end function
";
        assert!(fails(&format!("{def}.invoke f()\n")).message.starts_with("wrong number of arguments"));
        assert_eq!(fails(&format!("{def}.invoke f(1)\n")).message, "expected type boolean, not integer");
        assert_eq!(run(&format!("{def}.invoke f(true)\n.exit 0\n")), Some(Value::Int(0)));
    }

    #[test]
    fn kind_checks() {
        let src = "
.function f
  .param inst_ref<Person> p
.end function
.create object instance d of Dog
.invoke f(d)
";
        let mut rt = Runtime::new(pets()).capture_output();
        assert_eq!(run_in(&mut rt, src).unwrap_err().message, "expected kind Person, not Dog");
    }

    #[test]
    fn bridges_and_undefined() {
        assert_eq!(
            run(".invoke r = STRING_TO_INTEGER(\" 12 \")\n.exit r.result + 1"),
            Some(Value::Int(13))
        );
        assert_eq!(fails(".invoke NOPE()").message, "Function 'NOPE' is undefined");
    }

    #[test]
    fn formats_and_keywords() {
        assert_eq!(run(".exit \"$u{\"ab\"}$_{\"a b\"}\""), Some(Value::Str("ABa_b".into())));
        assert!(fails(".exit \"$tq{\"ab\"}\"").message.contains("not a valid string formatter"));
        assert_eq!(
            run(".assign t = \"Name: x\"\n.exit t:Name"),
            Some(Value::Str("x".into()))
        );
    }

    #[test]
    fn include_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let inc = dir.path().join("inc.arc");
        std::fs::write(&inc, ".assign v = 1\n").unwrap();
        let src = format!(
            ".include \"{0}\"\n.invoke r = FILE_WRITE(\"{0}\", \".assign v = 2\")\n.include \"{0}\"\n.exit v\n",
            inc.display()
        );
        assert_eq!(run(&src), Some(Value::Int(1)));
        assert_eq!(fails(".include \"missing.arc\"").message, "unable to find 'missing.arc'");
    }

    #[test]
    fn include_searches_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.arc"), ".function g\n.assign attr_v = 7\n.end function\n").unwrap();
        let mut rt = Runtime::new(MetaModel::new()).capture_output();
        let body = parse_text(".include \"lib.arc\"\n.invoke r = g()\n.exit r.v\n", "main.arc").unwrap();
        assert_eq!(evaluate(&mut rt, &body, &[dir.path().to_path_buf()]).unwrap(), Some(Value::Int(7)));
    }

    #[test]
    fn errors_carry_location_and_traceback() {
        let src = "
.function f
  .exit undefined_thing
.end function
.invoke f()
";
        let err = fails(src);
        assert_eq!(err.line, 3);
        let lines: Vec<usize> = err.traceback.iter().map(|l| l.line).collect();
        assert_eq!(lines, vec![5, 3]);
    }

    #[test]
    fn info_and_print() {
        let mut rt = Runtime::new(MetaModel::new()).capture_output();
        let v = run_in(&mut rt, "\n.print \"line ${info.arch_file_line}\"\n.exit info.arch_file_name").unwrap();
        assert_eq!(v, Some(Value::Str("test.arc".into())));
        assert_eq!(rt.captured(), "test.arc: 2:  INFO:  line 2\n");
    }

    #[test]
    fn fragment_attr_names() {
        assert_eq!(fragment_attr("attr_x"), Some("x"));
        assert_eq!(fragment_attr("ATTR_a_b"), Some("a_b"));
        assert_eq!(fragment_attr("x"), None);
    }
}
