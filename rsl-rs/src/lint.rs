//! Static checks over a parsed archetype.
//!
//! The linter never evaluates anything.  It walks the tree once to collect
//! function definitions and once more to check every node against the
//! metamodel and those definitions:
//!
//! - `.create`, `.select ... from instances of` and navigation steps naming
//!   a class the metamodel does not define
//! - a function defined twice
//! - `.invoke` of a name that is neither a function in this file nor a bridge
//! - `.invoke` of a known function with the wrong number of arguments
//!
//! Functions that only an `.include`d file defines are reported as
//! undefined.

use std::collections::HashMap;
use std::path::Path;

use tracing::warn;

use crate::model::MetaModel;
use crate::script::ast::{walk, Body, Expr, FunctionDef, Loc, Node, SelectSource, Stmt};
use crate::script::bridges::BridgeRegistry;

/// One finding.
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    pub loc: Loc,
    pub message: String,
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = Path::new(&*self.loc.file)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        write!(f, "{name}: {}:  WARNING:  {}", self.loc.line, self.message)
    }
}

/// Lint `body`, print each warning to stdout and return how many there were.
pub fn lint_ast(model: &MetaModel, body: &Body) -> usize {
    let warnings = check(model, body);
    for w in &warnings {
        warn!(file = %w.loc.file, line = w.loc.line, "{}", w.message);
        println!("{w}");
    }
    warnings.len()
}

/// Collect warnings for `body` in source order.
pub fn check(model: &MetaModel, body: &Body) -> Vec<Warning> {
    let bridges = BridgeRegistry::default();
    let mut warnings = Vec::new();

    let mut functions: HashMap<&str, &FunctionDef> = HashMap::new();
    walk(&body.stmts, &mut |node| {
        if let Node::Stmt(Stmt::Function(def)) = node {
            if functions.contains_key(def.name.as_str()) {
                warnings.push(Warning { loc: def.loc.clone(), message: format!("redefinition of function {}", def.name) });
            } else {
                functions.insert(&def.name, &**def);
            }
        }
    });

    let class = |kind: &str, loc: &Loc, out: &mut Vec<Warning>| {
        if model.class(kind).is_none() {
            out.push(Warning { loc: loc.clone(), message: format!("Undefined class {kind}") });
        }
    };

    walk(&body.stmts, &mut |node| match node {
        Node::Stmt(Stmt::Create { kind, loc, .. }) => class(kind, loc, &mut warnings),
        Node::Stmt(Stmt::Select(sel)) => match &sel.source {
            SelectSource::Instances { kind } => class(kind, &sel.loc, &mut warnings),
            SelectSource::Related { navs, .. } => {
                for nav in navs {
                    class(&nav.kind, &nav.loc, &mut warnings);
                }
            }
        },
        Node::Expr(Expr::Navigate { nav, .. }) => class(&nav.kind, &nav.loc, &mut warnings),
        Node::Stmt(Stmt::Invoke { name, args, loc, .. }) => match functions.get(name.as_str()) {
            Some(def) if def.params.len() != args.len() => warnings.push(Warning {
                loc: loc.clone(),
                message: format!(
                    "{name} takes {} arguments, {} given",
                    def.params.len(),
                    args.len()
                ),
            }),
            Some(_) => {}
            None if bridges.contains(name) => {}
            None => warnings.push(Warning { loc: loc.clone(), message: format!("Function '{name}' is undefined") }),
        },
        _ => {}
    });

    warnings.sort_by_key(|w| w.loc.line);
    warnings
}

// ── Tests ─────────────────────────────────────────────────────────────────────
