//! Archetype syntax tree.
//!
//! Statements and expressions are closed enums; every node carries a [`Loc`].
//! The tree is built once by the parser and never mutated.  Function bodies
//! are reference counted so that defining a function at runtime does not
//! copy the body.
//!
//! [`Node`] is a borrowed view over either kind of node with a uniform
//! `children()` list, used by read-only passes such as the linter.

use std::fmt;
use std::rc::Rc;

// ── Source location ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Loc {
    pub file: Rc<str>,
    pub line: usize,
}

impl Loc {
    pub fn new(file: Rc<str>, line: usize) -> Self {
        Loc { file, line }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

// ── Operators ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pipe,
    Amp,
    Caret,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Pipe => "|",
            BinOp::Amp => "&",
            BinOp::Caret => "^",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    Cardinality,
    Empty,
    NotEmpty,
    First,
    NotFirst,
    Last,
    NotLast,
}

impl UnOp {
    pub fn from_keyword(word: &str) -> Option<Self> {
        Some(match word.to_ascii_lowercase().as_str() {
            "not" => UnOp::Not,
            "cardinality" => UnOp::Cardinality,
            "empty" => UnOp::Empty,
            "not_empty" => UnOp::NotEmpty,
            "first" => UnOp::First,
            "not_first" => UnOp::NotFirst,
            "last" => UnOp::Last,
            "not_last" => UnOp::NotLast,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UnOp::Neg => "-",
            UnOp::Not => "not",
            UnOp::Cardinality => "cardinality",
            UnOp::Empty => "empty",
            UnOp::NotEmpty => "not_empty",
            UnOp::First => "first",
            UnOp::NotFirst => "not_first",
            UnOp::Last => "last",
            UnOp::NotLast => "not_last",
        }
    }
}

// ── Expressions ───────────────────────────────────────────────────────────────

/// One piece of a string body or literal line.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    Subst(Expr),
}

/// `Key[R<n>]` or `Key[R<n>.'phrase']`.
#[derive(Debug, Clone, PartialEq)]
pub struct Nav {
    pub kind: String,
    pub rel_id: u32,
    pub phrase: Option<String>,
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Str { parts: Vec<Part>, loc: Loc },
    Int { value: i64, loc: Loc },
    Real { value: f64, loc: Loc },
    Var { name: String, loc: Loc },
    Field { target: Box<Expr>, attr: String, loc: Loc },
    /// `$fmt{expr}`; formats are kept in source order.
    Subst { formats: Vec<String>, expr: Box<Expr>, loc: Loc },
    /// `term->Key[R<n>]`: the first instance reached by one navigation hop.
    Navigate { start: Box<Expr>, nav: Nav, loc: Loc },
    /// `term:Keyword`
    ParseKeyword { target: Box<Expr>, keyword: Box<Expr>, loc: Loc },
    Unary { op: UnOp, operand: Box<Expr>, loc: Loc },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr>, loc: Loc },
}

impl Expr {
    pub fn loc(&self) -> &Loc {
        match self {
            Expr::Str { loc, .. }
            | Expr::Int { loc, .. }
            | Expr::Real { loc, .. }
            | Expr::Var { loc, .. }
            | Expr::Field { loc, .. }
            | Expr::Subst { loc, .. }
            | Expr::Navigate { loc, .. }
            | Expr::ParseKeyword { loc, .. }
            | Expr::Unary { loc, .. }
            | Expr::Binary { loc, .. } => loc,
        }
    }
}

// ── Statements ────────────────────────────────────────────────────────────────

/// Assignment target: a plain variable or one attribute of an instance or
/// fragment held in a variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Var(String),
    Field { var: String, attr: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Declared type keyword, lowercase (`integer`, `inst_ref`, ...).
    pub ty: String,
    /// Optional `<Kind>` refinement for instance types.
    pub kind: Option<String>,
    pub name: String,
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub loc: Loc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Any,
    Many,
}

impl Cardinality {
    pub fn as_str(self) -> &'static str {
        match self {
            Cardinality::One => "one",
            Cardinality::Any => "any",
            Cardinality::Many => "many",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectSource {
    /// `related by var->A[R1]->B[R2]...`
    Related { start: Expr, navs: Vec<Nav> },
    /// `from instances of KIND`
    Instances { kind: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub attrs: Vec<String>,
    pub reverse: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub cardinality: Cardinality,
    pub var: String,
    pub source: SelectSource,
    pub filter: Option<Expr>,
    pub order: Option<OrderBy>,
    pub loc: Loc,
}

/// `relate` / `unrelate` operands.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub from: String,
    pub to: String,
    pub rel_id: u32,
    pub phrase: Option<String>,
    pub using: Option<String>,
    pub loc: Loc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfBranch {
    pub cond: Expr,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// One literal output line: text and substitutions, newline included.
    Literal { parts: Vec<Part>, loc: Loc },
    If { branches: Vec<IfBranch>, else_body: Option<Vec<Stmt>>, loc: Loc },
    While { cond: Expr, body: Vec<Stmt>, loc: Loc },
    For { var: String, set: String, body: Vec<Stmt>, loc: Loc },
    Break { loc: Loc },
    Function(Rc<FunctionDef>),
    Invoke { result: Option<String>, name: String, args: Vec<Expr>, loc: Loc },
    Assign { target: Target, value: Expr, loc: Loc },
    Clear { loc: Loc },
    Include { path: Expr, loc: Loc },
    Print { message: Expr, loc: Loc },
    Emit { path: Expr, loc: Loc },
    Exit { value: Expr, loc: Loc },
    AlXlate { activity: String, var: String, loc: Loc },
    SpecialWhere { kind: String, name: String, loc: Loc },
    Create { var: String, kind: String, loc: Loc },
    Delete { var: String, loc: Loc },
    Select(Select),
    Relate(Link),
    Unrelate(Link),
}

impl Stmt {
    pub fn loc(&self) -> &Loc {
        match self {
            Stmt::Literal { loc, .. }
            | Stmt::If { loc, .. }
            | Stmt::While { loc, .. }
            | Stmt::For { loc, .. }
            | Stmt::Break { loc }
            | Stmt::Invoke { loc, .. }
            | Stmt::Assign { loc, .. }
            | Stmt::Clear { loc }
            | Stmt::Include { loc, .. }
            | Stmt::Print { loc, .. }
            | Stmt::Emit { loc, .. }
            | Stmt::Exit { loc, .. }
            | Stmt::AlXlate { loc, .. }
            | Stmt::SpecialWhere { loc, .. }
            | Stmt::Create { loc, .. }
            | Stmt::Delete { loc, .. } => loc,
            Stmt::Function(f) => &f.loc,
            Stmt::Select(s) => &s.loc,
            Stmt::Relate(l) | Stmt::Unrelate(l) => &l.loc,
        }
    }
}

/// A parsed archetype file.
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    pub file: Rc<str>,
    pub stmts: Vec<Stmt>,
}

// ── Traversal view ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    Stmt(&'a Stmt),
    Expr(&'a Expr),
}

impl<'a> Node<'a> {
    pub fn loc(&self) -> &'a Loc {
        match self {
            Node::Stmt(s) => s.loc(),
            Node::Expr(e) => e.loc(),
        }
    }

    /// Semantically relevant children in source order.
    pub fn children(&self) -> Vec<Node<'a>> {
        let mut out = Vec::new();
        match *self {
            Node::Stmt(stmt) => stmt_children(stmt, &mut out),
            Node::Expr(expr) => expr_children(expr, &mut out),
        }
        out
    }
}

fn parts_children<'a>(parts: &'a [Part], out: &mut Vec<Node<'a>>) {
    out.extend(parts.iter().filter_map(|p| match p {
        Part::Subst(e) => Some(Node::Expr(e)),
        Part::Text(_) => None,
    }));
}

fn block_children<'a>(body: &'a [Stmt], out: &mut Vec<Node<'a>>) {
    out.extend(body.iter().map(Node::Stmt));
}

fn stmt_children<'a>(stmt: &'a Stmt, out: &mut Vec<Node<'a>>) {
    match stmt {
        Stmt::Literal { parts, .. } => parts_children(parts, out),
        Stmt::If { branches, else_body, .. } => {
            for b in branches {
                out.push(Node::Expr(&b.cond));
                block_children(&b.body, out);
            }
            if let Some(body) = else_body {
                block_children(body, out);
            }
        }
        Stmt::While { cond, body, .. } => {
            out.push(Node::Expr(cond));
            block_children(body, out);
        }
        Stmt::For { body, .. } => block_children(body, out),
        Stmt::Function(f) => block_children(&f.body, out),
        Stmt::Invoke { args, .. } => out.extend(args.iter().map(Node::Expr)),
        Stmt::Assign { value, .. } => out.push(Node::Expr(value)),
        Stmt::Include { path: e, .. }
        | Stmt::Print { message: e, .. }
        | Stmt::Emit { path: e, .. }
        | Stmt::Exit { value: e, .. } => out.push(Node::Expr(e)),
        Stmt::Select(sel) => {
            if let SelectSource::Related { start, .. } = &sel.source {
                out.push(Node::Expr(start));
            }
            if let Some(filter) = &sel.filter {
                out.push(Node::Expr(filter));
            }
        }
        Stmt::Break { .. }
        | Stmt::Clear { .. }
        | Stmt::AlXlate { .. }
        | Stmt::SpecialWhere { .. }
        | Stmt::Create { .. }
        | Stmt::Delete { .. }
        | Stmt::Relate(_)
        | Stmt::Unrelate(_) => {}
    }
}

fn expr_children<'a>(expr: &'a Expr, out: &mut Vec<Node<'a>>) {
    match expr {
        Expr::Str { parts, .. } => parts_children(parts, out),
        Expr::Field { target, .. } => out.push(Node::Expr(target)),
        Expr::Subst { expr, .. } => out.push(Node::Expr(expr)),
        Expr::Navigate { start, .. } => out.push(Node::Expr(start)),
        Expr::ParseKeyword { target, keyword, .. } => {
            out.push(Node::Expr(target));
            out.push(Node::Expr(keyword));
        }
        Expr::Unary { operand, .. } => out.push(Node::Expr(operand)),
        Expr::Binary { lhs, rhs, .. } => {
            out.push(Node::Expr(lhs));
            out.push(Node::Expr(rhs));
        }
        Expr::Int { .. } | Expr::Real { .. } | Expr::Var { .. } => {}
    }
}

/// Depth-first pre-order walk over every node under `body`.
pub fn walk<'a>(body: &'a [Stmt], visit: &mut dyn FnMut(Node<'a>)) {
    fn go<'a>(node: Node<'a>, visit: &mut dyn FnMut(Node<'a>)) {
        visit(node);
        for child in node.children() {
            go(child, visit);
        }
    }
    for stmt in body {
        go(Node::Stmt(stmt), visit);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(line: usize) -> Loc {
        Loc::new(Rc::from("t.arc"), line)
    }

    fn int(v: i64, line: usize) -> Expr {
        Expr::Int { value: v, loc: loc(line) }
    }

    #[test]
    fn binary_children_in_order() {
        let e = Expr::Binary {
            op: BinOp::Add,
            lhs: Box::new(int(1, 1)),
            rhs: Box::new(int(2, 1)),
            loc: loc(1),
        };
        let kids = Node::Expr(&e).children();
        assert_eq!(kids.len(), 2);
        assert!(matches!(kids[0], Node::Expr(Expr::Int { value: 1, .. })));
        assert!(matches!(kids[1], Node::Expr(Expr::Int { value: 2, .. })));
    }

    #[test]
    fn if_children_include_conditions_and_bodies() {
        let s = Stmt::If {
            branches: vec![IfBranch { cond: int(1, 1), body: vec![Stmt::Clear { loc: loc(2) }] }],
            else_body: Some(vec![Stmt::Break { loc: loc(4) }]),
            loc: loc(1),
        };
        assert_eq!(Node::Stmt(&s).children().len(), 3);
    }

    #[test]
    fn walk_visits_nested_nodes() {
        let body = vec![Stmt::While {
            cond: int(1, 1),
            body: vec![Stmt::Exit { value: int(2, 2), loc: loc(2) }],
            loc: loc(1),
        }];
        let mut lines = Vec::new();
        walk(&body, &mut |n| lines.push(n.loc().line));
        assert_eq!(lines, vec![1, 1, 2, 2]);
    }

    #[test]
    fn unop_keywords() {
        assert_eq!(UnOp::from_keyword("NOT_EMPTY"), Some(UnOp::NotEmpty));
        assert_eq!(UnOp::from_keyword("bogus"), None);
    }
}
