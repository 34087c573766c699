//! Scoped symbol table.
//!
//! A stack of scopes, one per function activation; each scope is a stack of
//! blocks (if/while/for bodies).  A fixed global layer underneath holds the
//! built-ins.  Lookups never cross scope boundaries: a function body sees its
//! own blocks and the globals, never its caller's variables.

use std::collections::HashMap;
use std::fmt;

use super::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum SymtabError {
    ScopeUnderflow,
    BlockUnderflow,
    Undefined(String),
}

impl fmt::Display for SymtabError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymtabError::ScopeUnderflow => write!(f, "scope stack underflow"),
            SymtabError::BlockUnderflow => write!(f, "block stack underflow"),
            SymtabError::Undefined(name) => write!(f, "undefined symbol '{name}'"),
        }
    }
}

impl std::error::Error for SymtabError {}

type Block = HashMap<String, Value>;

#[derive(Debug, Default)]
pub struct SymbolTable {
    globals: Block,
    scopes: Vec<Vec<Block>>,
}

impl SymbolTable {
    /// A table with one open scope.
    pub fn new() -> Self {
        SymbolTable { globals: Block::new(), scopes: vec![vec![Block::new()]] }
    }

    pub fn enter_scope(&mut self) {
        self.scopes.push(vec![Block::new()]);
    }

    /// Pop the innermost scope, returning the bindings of its outermost block.
    pub fn leave_scope(&mut self) -> Result<HashMap<String, Value>, SymtabError> {
        let mut scope = self.scopes.pop().ok_or(SymtabError::ScopeUnderflow)?;
        Ok(if scope.is_empty() { Block::new() } else { scope.swap_remove(0) })
    }

    pub fn enter_block(&mut self) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(Block::new());
        } else {
            self.scopes.push(vec![Block::new()]);
        }
    }

    pub fn leave_block(&mut self) -> Result<(), SymtabError> {
        let scope = self.scopes.last_mut().ok_or(SymtabError::BlockUnderflow)?;
        scope.pop().map(drop).ok_or(SymtabError::BlockUnderflow)
    }

    pub fn install_global(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_string(), value);
    }

    /// Bind `name`.  An existing binding visible from the current block is
    /// updated in place; otherwise the name goes into the innermost block.
    pub fn install_symbol(&mut self, name: &str, value: Value) {
        if self.scopes.is_empty() {
            self.enter_scope();
        }
        let Some(scope) = self.scopes.last_mut() else { return };
        if let Some(slot) = scope.iter_mut().rev().find_map(|b| b.get_mut(name)) {
            *slot = value;
            return;
        }
        if scope.is_empty() {
            scope.push(Block::new());
        }
        if let Some(block) = scope.last_mut() {
            block.insert(name.to_string(), value);
        }
    }

    pub fn find_symbol(&self, name: &str) -> Result<&Value, SymtabError> {
        self.scopes
            .last()
            .and_then(|scope| scope.iter().rev().find_map(|b| b.get(name)))
            .or_else(|| self.globals.get(name))
            .ok_or_else(|| SymtabError::Undefined(name.to_string()))
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
