//! The object model archetypes query.
//!
//! A [`MetaModel`] holds classes (typed attribute lists), instances in
//! creation order, associations between pairs of classes and explicit links
//! between instances.  The interpreter only ever sees [`InstRef`] handles.
//!
//! An association has a *source* end (the class holding the referential
//! attributes) and a *target* end (the class whose identifying attributes are
//! referenced).  Multiplicity flags on an end say how many instances of that
//! end's class may be linked to one instance of the other end.
//!
//! Phrases on reflexive or doubly-related associations name the end played
//! by the instance a navigation or relate starts from.

pub mod sql;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::script::value::{InstRef, Value};

// ── Identifiers ───────────────────────────────────────────────────────────────

/// Identity of one instance.  Ids increase with creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstId(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub struct ModelError(pub String);

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ModelError {}

fn err<T>(message: impl Into<String>) -> Result<T, ModelError> {
    Err(ModelError(message.into()))
}

// ── Classes ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    Boolean,
    Integer,
    Real,
    String,
    UniqueId,
}

impl AttrType {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name.to_ascii_uppercase().as_str() {
            "BOOLEAN" => AttrType::Boolean,
            "INTEGER" => AttrType::Integer,
            "REAL" => AttrType::Real,
            "STRING" => AttrType::String,
            "UNIQUE_ID" => AttrType::UniqueId,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttrType::Boolean => "BOOLEAN",
            AttrType::Integer => "INTEGER",
            AttrType::Real => "REAL",
            AttrType::String => "STRING",
            AttrType::UniqueId => "UNIQUE_ID",
        }
    }

    fn default_value(self) -> Value {
        match self {
            AttrType::Boolean => Value::Bool(false),
            AttrType::Integer | AttrType::UniqueId => Value::Int(0),
            AttrType::Real => Value::Real(0.0),
            AttrType::String => Value::Str(String::new()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Class {
    pub kind: Rc<str>,
    pub attrs: Vec<(String, AttrType)>,
}

impl Class {
    /// Attribute position; names compare case-insensitively.
    pub fn attr_index(&self, name: &str) -> Option<usize> {
        self.attrs.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone)]
pub struct UniqueIndex {
    pub name: String,
    pub kind: String,
    pub attrs: Vec<String>,
}

// ── Associations ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct End {
    pub kind: String,
    pub keys: Vec<String>,
    /// More than one instance of this end may link to one of the other.
    pub many: bool,
    /// Zero instances of this end may link to one of the other.
    pub conditional: bool,
    pub phrase: Option<String>,
}

impl End {
    pub fn new(kind: &str, keys: &[&str]) -> Self {
        End {
            kind: kind.to_string(),
            keys: keys.iter().map(|k| k.to_string()).collect(),
            many: false,
            conditional: false,
            phrase: None,
        }
    }

    /// `1`, `1C`, `M` or `MC`.
    pub fn multiplicity(&self) -> &'static str {
        match (self.many, self.conditional) {
            (false, false) => "1",
            (false, true) => "1C",
            (true, false) => "M",
            (true, true) => "MC",
        }
    }

    pub fn with_multiplicity(mut self, code: &str) -> Option<Self> {
        let (many, conditional) = match code.to_ascii_uppercase().as_str() {
            "1" => (false, false),
            "1C" => (false, true),
            "M" => (true, false),
            "MC" => (true, true),
            _ => return None,
        };
        self.many = many;
        self.conditional = conditional;
        Some(self)
    }

    pub fn with_phrase(mut self, phrase: Option<&str>) -> Self {
        self.phrase = phrase.map(str::to_string);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Association {
    pub rel_id: u32,
    pub source: End,
    pub target: End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Link {
    assoc: usize,
    source: InstId,
    target: InstId,
}

#[derive(Debug, Clone)]
struct Instance {
    class: usize,
    values: Vec<Value>,
}

// ── MetaModel ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MetaModel {
    classes: Vec<Class>,
    class_index: HashMap<String, usize>,
    instances: BTreeMap<InstId, Instance>,
    assocs: Vec<Association>,
    links: Vec<Link>,
    indexes: Vec<UniqueIndex>,
    next_inst: u64,
    next_unique: i64,
}

impl Default for MetaModel {
    fn default() -> Self {
        Self::new()
    }
}

impl MetaModel {
    pub fn new() -> Self {
        MetaModel {
            classes: Vec::new(),
            class_index: HashMap::new(),
            instances: BTreeMap::new(),
            assocs: Vec::new(),
            links: Vec::new(),
            indexes: Vec::new(),
            next_inst: 1,
            next_unique: 1,
        }
    }

    /// Next value from the model-wide unique id counter, starting at 1.
    pub fn next_id(&mut self) -> i64 {
        let id = self.next_unique;
        self.next_unique += 1;
        id
    }

    // ── Schema ────────────────────────────────────────────────────────────────

    pub fn define_class(&mut self, kind: &str, attrs: Vec<(String, AttrType)>) -> Result<(), ModelError> {
        let key = kind.to_ascii_uppercase();
        if self.class_index.contains_key(&key) {
            return err(format!("class {kind} is already defined"));
        }
        debug!(kind, attrs = attrs.len(), "define class");
        self.class_index.insert(key, self.classes.len());
        self.classes.push(Class { kind: Rc::from(kind), attrs });
        Ok(())
    }

    fn class_idx(&self, kind: &str) -> Option<usize> {
        self.class_index.get(&kind.to_ascii_uppercase()).copied()
    }

    /// Look up a class by key letters, ignoring case.
    pub fn class(&self, kind: &str) -> Option<&Class> {
        self.class_idx(kind).map(|i| &self.classes[i])
    }

    pub fn classes(&self) -> &[Class] {
        &self.classes
    }

    pub fn define_unique_index(&mut self, name: &str, kind: &str, attrs: &[&str]) -> Result<(), ModelError> {
        let Some(class) = self.class(kind) else {
            return err(format!("undefined class {kind}"));
        };
        if let Some(bad) = attrs.iter().find(|a| class.attr_index(a).is_none()) {
            return err(format!("{kind} has no attribute {bad}"));
        }
        self.indexes.push(UniqueIndex {
            name: name.to_string(),
            kind: kind.to_string(),
            attrs: attrs.iter().map(|a| a.to_string()).collect(),
        });
        Ok(())
    }

    pub fn indexes(&self) -> &[UniqueIndex] {
        &self.indexes
    }

    pub fn define_association(&mut self, rel_id: u32, source: End, target: End) -> Result<(), ModelError> {
        for end in [&source, &target] {
            let Some(class) = self.class(&end.kind) else {
                return err(format!("R{rel_id}: undefined class {}", end.kind));
            };
            if let Some(bad) = end.keys.iter().find(|k| class.attr_index(k).is_none()) {
                return err(format!("R{rel_id}: {} has no attribute {bad}", end.kind));
            }
        }
        if source.keys.len() != target.keys.len() {
            return err(format!("R{rel_id}: key lists differ in length"));
        }
        self.assocs.push(Association { rel_id, source, target });
        Ok(())
    }

    pub fn associations(&self) -> &[Association] {
        &self.assocs
    }

    // ── Instances ─────────────────────────────────────────────────────────────

    fn handle(&self, id: InstId) -> Option<InstRef> {
        let inst = self.instances.get(&id)?;
        Some(InstRef { id, kind: self.classes[inst.class].kind.clone() })
    }

    fn instance(&self, inst: &InstRef) -> Result<&Instance, ModelError> {
        match self.instances.get(&inst.id) {
            Some(i) => Ok(i),
            None => err(format!("{} instance has been deleted", inst.kind)),
        }
    }

    pub fn is_alive(&self, inst: &InstRef) -> bool {
        self.instances.contains_key(&inst.id)
    }

    /// Create an instance with default attribute values; every `unique_id`
    /// attribute gets a fresh id.
    pub fn new_instance(&mut self, kind: &str) -> Result<InstRef, ModelError> {
        let Some(class) = self.class_idx(kind) else {
            return err(format!("undefined class {kind}"));
        };
        let types: Vec<AttrType> = self.classes[class].attrs.iter().map(|(_, t)| *t).collect();
        let values = types
            .into_iter()
            .map(|t| match t {
                AttrType::UniqueId => Value::Int(self.next_id()),
                t => t.default_value(),
            })
            .collect();
        Ok(self.insert(class, values))
    }

    /// Insert an instance with explicit values in attribute order.
    pub fn insert_instance(&mut self, kind: &str, values: Vec<Value>) -> Result<InstRef, ModelError> {
        let Some(class) = self.class_idx(kind) else {
            return err(format!("undefined class {kind}"));
        };
        let expected = self.classes[class].attrs.len();
        if values.len() != expected {
            return err(format!("{kind} expects {expected} values, got {}", values.len()));
        }
        // Keep the counter ahead of loaded ids so fresh ids never collide.
        for (v, (_, t)) in values.iter().zip(&self.classes[class].attrs) {
            if let (Value::Int(n), AttrType::UniqueId) = (v, t) {
                self.next_unique = self.next_unique.max(n.saturating_add(1));
            }
        }
        Ok(self.insert(class, values))
    }

    fn insert(&mut self, class: usize, values: Vec<Value>) -> InstRef {
        let id = InstId(self.next_inst);
        self.next_inst += 1;
        self.instances.insert(id, Instance { class, values });
        InstRef { id, kind: self.classes[class].kind.clone() }
    }

    /// All live instances of `kind`, in creation order.
    pub fn instances_of(&self, kind: &str) -> Result<Vec<InstRef>, ModelError> {
        let Some(class) = self.class_idx(kind) else {
            return err(format!("undefined class {kind}"));
        };
        let kind = self.classes[class].kind.clone();
        Ok(self
            .instances
            .iter()
            .filter(|(_, inst)| inst.class == class)
            .map(|(id, _)| InstRef { id: *id, kind: kind.clone() })
            .collect())
    }

    /// Attribute values of a live instance, in declaration order.
    pub fn values(&self, inst: &InstRef) -> Result<&[Value], ModelError> {
        Ok(&self.instance(inst)?.values)
    }

    pub fn get_attr(&self, inst: &InstRef, name: &str) -> Result<Value, ModelError> {
        let data = self.instance(inst)?;
        let class = &self.classes[data.class];
        match class.attr_index(name) {
            Some(i) => Ok(data.values[i].clone()),
            None => err(format!("{} has no attribute {name}", class.kind)),
        }
    }

    pub fn set_attr(&mut self, inst: &InstRef, name: &str, value: Value) -> Result<(), ModelError> {
        let Some(data) = self.instances.get_mut(&inst.id) else {
            return err(format!("{} instance has been deleted", inst.kind));
        };
        let class = &self.classes[data.class];
        match class.attr_index(name) {
            Some(i) => {
                data.values[i] = value;
                Ok(())
            }
            None => err(format!("{} has no attribute {name}", class.kind)),
        }
    }

    /// Remove an instance together with every link it takes part in.
    pub fn delete(&mut self, inst: &InstRef) -> Result<(), ModelError> {
        if self.instances.remove(&inst.id).is_none() {
            return err(format!("{} instance has already been deleted", inst.kind));
        }
        self.links.retain(|l| l.source != inst.id && l.target != inst.id);
        Ok(())
    }

    // ── Navigation ────────────────────────────────────────────────────────────

    /// Find the association `R<rel_id>` between `origin` and `other` and
    /// whether the origin plays its source end.
    fn resolve(
        &self,
        rel_id: u32,
        origin: &str,
        other: &str,
        phrase: Option<&str>,
    ) -> Result<(usize, bool), ModelError> {
        let candidates = |phrase_on_origin: bool| -> Vec<(usize, bool)> {
            let mut found = Vec::new();
            for (i, a) in self.assocs.iter().enumerate().filter(|(_, a)| a.rel_id == rel_id) {
                for origin_is_source in [true, false] {
                    let (mine, theirs) = if origin_is_source {
                        (&a.source, &a.target)
                    } else {
                        (&a.target, &a.source)
                    };
                    if !mine.kind.eq_ignore_ascii_case(origin) || !theirs.kind.eq_ignore_ascii_case(other) {
                        continue;
                    }
                    let named = if phrase_on_origin { mine } else { theirs };
                    if phrase.is_some() && named.phrase.as_deref() != phrase {
                        continue;
                    }
                    found.push((i, origin_is_source));
                }
            }
            found
        };

        let mut found = candidates(true);
        if found.is_empty() && phrase.is_some() {
            found = candidates(false);
        }
        match found.as_slice() {
            [one] => Ok(*one),
            [] => err(format!("no association R{rel_id} between {origin} and {other}")),
            _ => err(format!(
                "navigation across R{rel_id} between {origin} and {other} needs a phrase"
            )),
        }
    }

    /// Instances of `kind` linked to `inst` across `R<rel_id>`, in link order.
    pub fn navigate(
        &self,
        inst: &InstRef,
        kind: &str,
        rel_id: u32,
        phrase: Option<&str>,
    ) -> Result<Vec<InstRef>, ModelError> {
        self.instance(inst)?;
        let (assoc, origin_is_source) = self.resolve(rel_id, &inst.kind, kind, phrase)?;
        Ok(self
            .links
            .iter()
            .filter(|l| l.assoc == assoc)
            .filter_map(|l| match origin_is_source {
                true if l.source == inst.id => Some(l.target),
                false if l.target == inst.id => Some(l.source),
                _ => None,
            })
            .filter_map(|id| self.handle(id))
            .collect())
    }

    /// Link `from` and `to` across `R<rel_id>`, copying identifying values of
    /// the target into the referential attributes of the source.
    pub fn relate(
        &mut self,
        from: &InstRef,
        to: &InstRef,
        rel_id: u32,
        phrase: Option<&str>,
    ) -> Result<(), ModelError> {
        self.instance(from)?;
        self.instance(to)?;
        let (assoc, origin_is_source) = self.resolve(rel_id, &from.kind, &to.kind, phrase)?;
        let (source, target) = endpoints(origin_is_source, from, to);
        let link = Link { assoc, source, target };
        if self.links.contains(&link) {
            return Ok(());
        }

        let a = &self.assocs[assoc];
        let from_source = self.links.iter().filter(|l| l.assoc == assoc && l.source == source).count();
        let into_target = self.links.iter().filter(|l| l.assoc == assoc && l.target == target).count();
        if !a.target.many && from_source > 0 {
            return err(format!("{} instance is already related across R{rel_id}", a.source.kind));
        }
        if !a.source.many && into_target > 0 {
            return err(format!("{} instance is already related across R{rel_id}", a.target.kind));
        }

        let pairs: Vec<(String, String)> =
            a.source.keys.iter().cloned().zip(a.target.keys.iter().cloned()).collect();
        let (src, tgt) = (self.handle_of(source)?, self.handle_of(target)?);
        for (skey, tkey) in pairs {
            let value = self.get_attr(&tgt, &tkey)?;
            self.set_attr(&src, &skey, value)?;
        }
        self.links.push(link);
        Ok(())
    }

    /// Remove the link between `from` and `to` and clear the source's
    /// referential attributes.
    pub fn unrelate(
        &mut self,
        from: &InstRef,
        to: &InstRef,
        rel_id: u32,
        phrase: Option<&str>,
    ) -> Result<(), ModelError> {
        self.instance(from)?;
        self.instance(to)?;
        let (assoc, origin_is_source) = self.resolve(rel_id, &from.kind, &to.kind, phrase)?;
        let (source, target) = endpoints(origin_is_source, from, to);
        let Some(pos) = self.links.iter().position(|l| *l == Link { assoc, source, target }) else {
            return err(format!("{} and {} are not related across R{rel_id}", from.kind, to.kind));
        };
        self.links.remove(pos);
        let keys = self.assocs[assoc].source.keys.clone();
        let src = self.handle_of(source)?;
        for key in keys {
            self.set_attr(&src, &key, Value::Unit)?;
        }
        Ok(())
    }

    fn handle_of(&self, id: InstId) -> Result<InstRef, ModelError> {
        match self.handle(id) {
            Some(h) => Ok(h),
            None => err("instance has been deleted"),
        }
    }

    /// Rebuild links from referential attribute values, as after loading a
    /// database.  Unset keys never match.  Returns the number of links made.
    pub fn link_by_keys(&mut self) -> usize {
        let mut made = 0;
        for (ai, a) in self.assocs.iter().enumerate() {
            if a.source.keys.is_empty() {
                continue;
            }
            let (Some(sc), Some(tc)) = (self.class_idx(&a.source.kind), self.class_idx(&a.target.kind)) else {
                continue;
            };
            let sidx: Vec<usize> = a.source.keys.iter().filter_map(|k| self.classes[sc].attr_index(k)).collect();
            let tidx: Vec<usize> = a.target.keys.iter().filter_map(|k| self.classes[tc].attr_index(k)).collect();

            let mut by_key: HashMap<String, Vec<InstId>> = HashMap::new();
            for (id, inst) in self.instances.iter().filter(|(_, i)| i.class == tc) {
                if let Some(key) = key_of(&inst.values, &tidx) {
                    by_key.entry(key).or_default().push(*id);
                }
            }
            let mut new_links = Vec::new();
            for (id, inst) in self.instances.iter().filter(|(_, i)| i.class == sc) {
                let Some(key) = key_of(&inst.values, &sidx) else { continue };
                for target in by_key.get(&key).into_iter().flatten() {
                    if *target == *id {
                        continue;
                    }
                    let link = Link { assoc: ai, source: *id, target: *target };
                    if !self.links.contains(&link) {
                        new_links.push(link);
                    }
                }
            }
            made += new_links.len();
            self.links.extend(new_links);
        }
        made
    }

    // ── Integrity ─────────────────────────────────────────────────────────────

    /// Check unique indexes and association multiplicities.  Every violation
    /// is logged; the count is returned.
    pub fn check_integrity(&self) -> usize {
        self.check_uniqueness() + self.check_multiplicity()
    }

    fn check_uniqueness(&self) -> usize {
        let mut errors = 0;
        for index in &self.indexes {
            let Some(class) = self.class_idx(&index.kind) else { continue };
            let cols: Vec<usize> =
                index.attrs.iter().filter_map(|a| self.classes[class].attr_index(a)).collect();
            let mut seen: HashMap<String, usize> = HashMap::new();
            for inst in self.instances.values().filter(|i| i.class == class) {
                let Some(key) = key_of(&inst.values, &cols) else { continue };
                *seen.entry(key).or_default() += 1;
            }
            for (key, count) in seen.into_iter().filter(|(_, n)| *n > 1) {
                warn!(index = %index.name, kind = %index.kind, key = %key, count, "duplicate unique index value");
                errors += 1;
            }
        }
        errors
    }

    fn check_multiplicity(&self) -> usize {
        let mut errors = 0;
        for (ai, a) in self.assocs.iter().enumerate() {
            // Each source instance against the target end, and vice versa.
            for (here, there, here_is_source) in [(&a.source, &a.target, true), (&a.target, &a.source, false)] {
                let Some(class) = self.class_idx(&here.kind) else { continue };
                for (id, _) in self.instances.iter().filter(|(_, i)| i.class == class) {
                    let n = self
                        .links
                        .iter()
                        .filter(|l| l.assoc == ai && if here_is_source { l.source == *id } else { l.target == *id })
                        .count();
                    if n == 0 && !there.conditional {
                        warn!(rel = a.rel_id, kind = %here.kind, id = id.0, "instance is not related to any {}", there.kind);
                        errors += 1;
                    } else if n > 1 && !there.many {
                        warn!(rel = a.rel_id, kind = %here.kind, id = id.0, links = n, "instance is related to more than one {}", there.kind);
                        errors += 1;
                    }
                }
            }
        }
        errors
    }
}

/// `(source, target)` ids for a link started from `from`.
fn endpoints(origin_is_source: bool, from: &InstRef, to: &InstRef) -> (InstId, InstId) {
    if origin_is_source {
        (from.id, to.id)
    } else {
        (to.id, from.id)
    }
}

/// Composite key text for the selected columns; `None` if any is unset.
fn key_of(values: &[Value], cols: &[usize]) -> Option<String> {
    let mut key = String::new();
    for &c in cols {
        match values.get(c)? {
            Value::Unit => return None,
            v => {
                key.push_str(v.type_name());
                key.push(':');
                key.push_str(&v.to_string());
                key.push('\u{1f}');
            }
        }
    }
    Some(key)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Dog -R1-> Person (many dogs to one owner), Person -R2-> Person (reflexive).
    fn model() -> MetaModel {
        let mut m = MetaModel::new();
        m.define_class("Person", vec![("Id".into(), AttrType::UniqueId), ("Name".into(), AttrType::String), ("Boss_Id".into(), AttrType::UniqueId)]).unwrap();
        m.define_class("Dog", vec![("Name".into(), AttrType::String), ("Owner_Id".into(), AttrType::UniqueId)]).unwrap();
        m.define_association(
            1,
            End::new("Dog", &["Owner_Id"]).with_multiplicity("MC").unwrap(),
            End::new("Person", &["Id"]).with_multiplicity("1").unwrap(),
        )
        .unwrap();
        m.define_association(
            2,
            End::new("Person", &["Boss_Id"]).with_multiplicity("MC").unwrap().with_phrase(Some("reports to")),
            End::new("Person", &["Id"]).with_multiplicity("1C").unwrap().with_phrase(Some("manages")),
        )
        .unwrap();
        m
    }

    #[test]
    fn new_instance_defaults_and_ids() {
        let mut m = model();
        let a = m.new_instance("person").unwrap();
        let b = m.new_instance("Person").unwrap();
        assert_eq!(m.get_attr(&a, "NAME").unwrap(), Value::Str(String::new()));
        assert_ne!(m.get_attr(&a, "Id").unwrap(), m.get_attr(&b, "Id").unwrap());
        assert_eq!(m.instances_of("PERSON").unwrap(), vec![a, b]);
        assert!(m.new_instance("Cat").is_err());
    }

    #[test]
    fn relate_navigate_unrelate() {
        let mut m = model();
        let p = m.new_instance("Person").unwrap();
        let d1 = m.new_instance("Dog").unwrap();
        let d2 = m.new_instance("Dog").unwrap();
        m.relate(&d1, &p, 1, None).unwrap();
        m.relate(&p, &d2, 1, None).unwrap();
        assert_eq!(m.get_attr(&d1, "Owner_Id").unwrap(), m.get_attr(&p, "Id").unwrap());
        assert_eq!(m.navigate(&p, "Dog", 1, None).unwrap(), vec![d1.clone(), d2.clone()]);
        assert_eq!(m.navigate(&d2, "Person", 1, None).unwrap(), vec![p.clone()]);

        m.unrelate(&d1, &p, 1, None).unwrap();
        assert_eq!(m.get_attr(&d1, "Owner_Id").unwrap(), Value::Unit);
        assert_eq!(m.navigate(&p, "Dog", 1, None).unwrap(), vec![d2]);
        assert!(m.unrelate(&d1, &p, 1, None).is_err());
    }

    #[test]
    fn single_end_rejects_second_link() {
        let mut m = model();
        let p1 = m.new_instance("Person").unwrap();
        let p2 = m.new_instance("Person").unwrap();
        let d = m.new_instance("Dog").unwrap();
        m.relate(&d, &p1, 1, None).unwrap();
        assert!(m.relate(&d, &p2, 1, None).is_err());
    }

    #[test]
    fn reflexive_needs_phrase() {
        let mut m = model();
        let boss = m.new_instance("Person").unwrap();
        let worker = m.new_instance("Person").unwrap();
        assert!(m.relate(&worker, &boss, 2, None).is_err());
        m.relate(&worker, &boss, 2, Some("reports to")).unwrap();
        assert_eq!(m.navigate(&worker, "Person", 2, Some("reports to")).unwrap(), vec![boss.clone()]);
        assert_eq!(m.navigate(&boss, "Person", 2, Some("manages")).unwrap(), vec![worker.clone()]);
        assert!(m.navigate(&boss, "Person", 2, Some("reports to")).unwrap().is_empty());
    }

    #[test]
    fn delete_removes_links() {
        let mut m = model();
        let p = m.new_instance("Person").unwrap();
        let d = m.new_instance("Dog").unwrap();
        m.relate(&d, &p, 1, None).unwrap();
        m.delete(&d).unwrap();
        assert!(m.navigate(&p, "Dog", 1, None).unwrap().is_empty());
        assert!(m.delete(&d).is_err());
        assert!(m.get_attr(&d, "Name").is_err());
    }

    #[test]
    fn link_by_keys_rebuilds() {
        let mut m = model();
        let p = m.insert_instance("Person", vec![Value::Int(7), "Al".into(), Value::Unit]).unwrap();
        let d = m.insert_instance("Dog", vec!["Rex".into(), Value::Int(7)]).unwrap();
        assert_eq!(m.link_by_keys(), 1);
        assert_eq!(m.navigate(&p, "Dog", 1, None).unwrap(), vec![d]);
        assert_eq!(m.next_id(), 8);
    }

    #[test]
    fn integrity() {
        let mut m = model();
        m.define_unique_index("I1", "Person", &["Id"]).unwrap();
        let p = m.new_instance("Person").unwrap();
        let d = m.new_instance("Dog").unwrap();
        // Dog must have an owner.
        assert_eq!(m.check_integrity(), 1);
        m.relate(&d, &p, 1, None).unwrap();
        assert_eq!(m.check_integrity(), 0);
        let q = m.new_instance("Person").unwrap();
        let id = m.get_attr(&p, "Id").unwrap();
        m.set_attr(&q, "Id", id).unwrap();
        assert_eq!(m.check_integrity(), 1);
    }
}
