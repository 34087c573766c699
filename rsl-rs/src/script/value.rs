//! Runtime value type for archetypes.
//!
//! Archetype code is dynamically typed.  Values are a closed tagged union;
//! instance handles are opaque ids into the [`MetaModel`](crate::model::MetaModel)
//! and carry their class key so type and kind checks never need the model.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use crate::model::InstId;
use crate::script::ast::BinOp;

// ── Instance handles ──────────────────────────────────────────────────────────

/// A reference to one instance.  Equality is identity.
#[derive(Debug, Clone)]
pub struct InstRef {
    pub id: InstId,
    pub kind: Rc<str>,
}

impl PartialEq for InstRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for InstRef {}

static NEXT_ORIGIN: AtomicU64 = AtomicU64::new(1);

/// An ordered, duplicate-free collection of instances.
///
/// Every set built by a selection or an operator gets a fresh `origin`.
/// Copies of a set share it, which is how `first x` inside a `for each`
/// loop finds the iteration that is walking that very set.
#[derive(Debug, Clone)]
pub struct InstSet {
    origin: u64,
    items: Rc<Vec<InstRef>>,
}

impl InstSet {
    pub fn new(items: Vec<InstRef>) -> Self {
        let mut unique: Vec<InstRef> = Vec::with_capacity(items.len());
        for inst in items {
            if !unique.contains(&inst) {
                unique.push(inst);
            }
        }
        InstSet {
            origin: NEXT_ORIGIN.fetch_add(1, AtomicOrdering::Relaxed),
            items: Rc::new(unique),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn origin(&self) -> u64 {
        self.origin
    }

    pub fn items(&self) -> &[InstRef] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn first(&self) -> Option<&InstRef> {
        self.items.first()
    }

    pub fn last(&self) -> Option<&InstRef> {
        self.items.last()
    }

    pub fn contains(&self, inst: &InstRef) -> bool {
        self.items.contains(inst)
    }

    pub fn union(&self, other: &InstSet) -> InstSet {
        let mut items = self.items.to_vec();
        items.extend(other.items.iter().cloned());
        InstSet::new(items)
    }

    pub fn intersection(&self, other: &InstSet) -> InstSet {
        InstSet::new(self.items.iter().filter(|i| other.contains(i)).cloned().collect())
    }

    pub fn difference(&self, other: &InstSet) -> InstSet {
        InstSet::new(self.items.iter().filter(|i| !other.contains(i)).cloned().collect())
    }

    pub fn symmetric_difference(&self, other: &InstSet) -> InstSet {
        let mut items: Vec<InstRef> =
            self.items.iter().filter(|i| !other.contains(i)).cloned().collect();
        items.extend(other.items.iter().filter(|i| !self.contains(i)).cloned());
        InstSet::new(items)
    }
}

impl PartialEq for InstSet {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

// ── Fragments ─────────────────────────────────────────────────────────────────

/// Result of a function or bridge invocation: named attributes plus `body`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    attrs: BTreeMap<String, Value>,
}

impl Fragment {
    pub fn new(body: String) -> Self {
        let mut attrs = BTreeMap::new();
        attrs.insert("body".to_string(), Value::Str(body));
        Fragment { attrs }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.attrs.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attrs.keys().map(String::as_str)
    }
}

// ── Value ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// No value: an unassigned instance reference or a statement result.
    #[default]
    Unit,
    Bool(bool),
    Int(i64),
    Real(f64),
    Str(String),
    Inst(InstRef),
    Set(InstSet),
    Frag(Rc<Fragment>),
    /// The `info` service object.
    Info,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => Ok(()),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Real(x) => {
                // Integral reals keep one decimal so they read as reals.
                if x.fract() == 0.0 && x.abs() < 1e16 {
                    write!(f, "{x:.1}")
                } else {
                    write!(f, "{x}")
                }
            }
            Value::Str(s) => write!(f, "{s}"),
            Value::Inst(inst) => write!(f, "<{} instance {}>", inst.kind, inst.id.0),
            Value::Set(set) => {
                write!(f, "[")?;
                for (i, inst) in set.items().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "<{} instance {}>", inst.kind, inst.id.0)?;
                }
                write!(f, "]")
            }
            Value::Frag(frag) => match frag.get("body") {
                Some(body) => write!(f, "{body}"),
                None => Ok(()),
            },
            Value::Info => write!(f, "<info>"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Real(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl Value {
    /// Truthiness used by conditions: empty strings, zero, none and empty
    /// sets are false.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Unit => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Real(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Set(set) => !set.is_empty(),
            Value::Inst(_) | Value::Frag(_) | Value::Info => true,
        }
    }

    /// Declared-type name used in parameter checks and messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Unit | Value::Inst(_) => "inst_ref",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Real(_) => "real",
            Value::Str(_) => "string",
            Value::Set(_) => "inst_ref_set",
            Value::Frag(_) => "frag_ref",
            Value::Info => "info",
        }
    }

    /// Class key of an instance, or of the first member of a set.
    pub fn kind(&self) -> Option<&str> {
        match self {
            Value::Inst(inst) => Some(&inst.kind),
            Value::Set(set) => set.first().map(|i| &*i.kind),
            _ => None,
        }
    }

    pub fn is_inst_like(&self) -> bool {
        matches!(self, Value::Inst(_) | Value::Set(_))
    }

    /// Number of instances held: set length, 1 for an instance, else 0.
    pub fn cardinality(&self) -> usize {
        match self {
            Value::Set(set) => set.len(),
            Value::Inst(_) => 1,
            _ => 0,
        }
    }

    /// Promote to a set: instances become singletons, none the empty set.
    pub fn to_set(&self) -> Option<InstSet> {
        match self {
            Value::Set(set) => Some(set.clone()),
            Value::Inst(inst) => Some(InstSet::new(vec![inst.clone()])),
            Value::Unit => Some(InstSet::empty()),
            _ => None,
        }
    }

    fn as_number(&self) -> Option<Num> {
        match self {
            Value::Bool(b) => Some(Num::Int(i64::from(*b))),
            Value::Int(n) => Some(Num::Int(*n)),
            Value::Real(x) => Some(Num::Real(*x)),
            _ => None,
        }
    }

    /// Ordering used by comparisons and `ordered_by`.  `None` when the two
    /// values have no natural order.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Unit, Value::Unit) => Some(Ordering::Equal),
            _ => match (self.as_number()?, other.as_number()?) {
                (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
                (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
            },
        }
    }

    /// Equality as seen by `==`: numbers compare across int/real/bool.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self.as_number(), other.as_number()) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => a == b,
            (Some(a), Some(b)) => a.as_f64() == b.as_f64(),
            _ => self == other,
        }
    }

    // ── Operators ─────────────────────────────────────────────────────────────

    /// Apply a non-short-circuit binary operator.
    pub fn binary(&self, op: BinOp, rhs: &Value) -> Result<Value, String> {
        if matches!(op, BinOp::Pipe | BinOp::Amp | BinOp::Caret | BinOp::Add | BinOp::Sub)
            && (self.is_inst_like() || rhs.is_inst_like())
        {
            return self.set_op(op, rhs);
        }
        match op {
            BinOp::Add => match (self, rhs) {
                (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
                _ => self.arith(op, rhs, i64::checked_add, |a, b| a + b),
            },
            BinOp::Sub => self.arith(op, rhs, i64::checked_sub, |a, b| a - b),
            BinOp::Mul => self.arith(op, rhs, i64::checked_mul, |a, b| a * b),
            BinOp::Div => {
                if rhs.as_number().is_some_and(Num::is_zero) {
                    return Err("division by zero".into());
                }
                self.arith(op, rhs, floor_div, |a, b| a / b)
            }
            BinOp::Rem => {
                if rhs.as_number().is_some_and(Num::is_zero) {
                    return Err("modulo by zero".into());
                }
                self.arith(op, rhs, floor_rem, |a, b| a - b * (a / b).floor())
            }
            BinOp::Pipe | BinOp::Amp | BinOp::Caret => self.bitwise(op, rhs),
            BinOp::Eq => Ok(Value::Bool(self.loose_eq(rhs))),
            BinOp::Ne => Ok(Value::Bool(!self.loose_eq(rhs))),
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
                let ord = self.compare(rhs).ok_or_else(|| self.type_error(op, rhs))?;
                Ok(Value::Bool(match op {
                    BinOp::Lt => ord == Ordering::Less,
                    BinOp::Gt => ord == Ordering::Greater,
                    BinOp::Le => ord != Ordering::Greater,
                    _ => ord != Ordering::Less,
                }))
            }
            BinOp::And => Ok(Value::Bool(self.truthy() && rhs.truthy())),
            BinOp::Or => Ok(Value::Bool(self.truthy() || rhs.truthy())),
        }
    }

    fn type_error(&self, op: BinOp, rhs: &Value) -> String {
        format!(
            "unsupported operand types for {}: {} and {}",
            op.as_str(),
            self.type_name(),
            rhs.type_name()
        )
    }

    fn set_op(&self, op: BinOp, rhs: &Value) -> Result<Value, String> {
        let (Some(a), Some(b)) = (self.to_set(), rhs.to_set()) else {
            return Err(self.type_error(op, rhs));
        };
        let set = match op {
            BinOp::Pipe | BinOp::Add => a.union(&b),
            BinOp::Amp => a.intersection(&b),
            BinOp::Caret => a.symmetric_difference(&b),
            _ => a.difference(&b),
        };
        Ok(Value::Set(set))
    }

    fn arith(
        &self,
        op: BinOp,
        rhs: &Value,
        int_op: fn(i64, i64) -> Option<i64>,
        real_op: fn(f64, f64) -> f64,
    ) -> Result<Value, String> {
        let (Some(a), Some(b)) = (self.as_number(), rhs.as_number()) else {
            return Err(self.type_error(op, rhs));
        };
        match (a, b) {
            (Num::Int(a), Num::Int(b)) => int_op(a, b)
                .map(Value::Int)
                .ok_or_else(|| format!("integer overflow in {}", op.as_str())),
            (a, b) => Ok(Value::Real(real_op(a.as_f64(), b.as_f64()))),
        }
    }

    fn bitwise(&self, op: BinOp, rhs: &Value) -> Result<Value, String> {
        match (self, rhs) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(match op {
                BinOp::Pipe => a | b,
                BinOp::Amp => a & b,
                _ => a ^ b,
            })),
            _ => match (self.as_number(), rhs.as_number()) {
                (Some(Num::Int(a)), Some(Num::Int(b))) => Ok(Value::Int(match op {
                    BinOp::Pipe => a | b,
                    BinOp::Amp => a & b,
                    _ => a ^ b,
                })),
                _ => Err(self.type_error(op, rhs)),
            },
        }
    }

    pub fn negate(&self) -> Result<Value, String> {
        match self.as_number() {
            Some(Num::Int(n)) => n
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| "integer overflow in -".to_string()),
            Some(Num::Real(x)) => Ok(Value::Real(-x)),
            None => Err(format!("bad operand type for unary -: {}", self.type_name())),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Real(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Real(x) => x,
        }
    }

    fn is_zero(self) -> bool {
        self.as_f64() == 0.0
    }
}

/// Integer division rounding toward negative infinity.
fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

/// Remainder with the sign of the divisor.
fn floor_rem(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Some(r + b)
    } else {
        Some(r)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
