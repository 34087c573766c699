//! Load and dump a [`MetaModel`] as a small SQL dialect.
//!
//! Supported statements (keywords are case-insensitive, `--` starts a
//! comment):
//!
//! ```text
//! CREATE TABLE Person (Id UNIQUE_ID, Name STRING);
//! INSERT INTO Person VALUES (1, 'Al', NULL);
//! CREATE UNIQUE INDEX I1 ON Person (Id);
//! CREATE ROP REF_ID R1 FROM MC Dog (Owner_Id) PHRASE 'owns' TO 1 Person (Id);
//! ```
//!
//! Strings use `'` with `''` as the escaped quote.  Double-quoted values are
//! opaque identifiers; in a `UNIQUE_ID` column each distinct one is mapped to
//! a fresh integer id.  After loading, links are rebuilt from key values.

use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::path::Path;

use tracing::debug;

use super::{AttrType, End, MetaModel, ModelError};
use crate::script::value::Value;

// ── SqlError ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SqlError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for SqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for SqlError {}

// ── Lexer ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Int(i64),
    Real(f64),
    Str(String),
    Quoted(String),
    LParen,
    RParen,
    Comma,
    Semi,
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Lexer { src: src.as_bytes(), pos: 0, line: 1 }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.src.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> SqlError {
        SqlError { line: self.line, message: message.into() }
    }

    fn skip_ws(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => {
                    self.advance();
                }
                Some(b'-') if self.peek2() == Some(b'-') => {
                    while !matches!(self.peek(), None | Some(b'\n')) {
                        self.advance();
                    }
                }
                _ => return,
            }
        }
    }

    fn read_quoted(&mut self, quote: u8) -> Result<String, SqlError> {
        let start_line = self.line;
        self.advance();
        let mut buf = Vec::new();
        loop {
            match self.advance() {
                Some(c) if c == quote => {
                    if self.peek() == Some(quote) {
                        self.advance();
                        buf.push(quote);
                    } else {
                        return Ok(String::from_utf8_lossy(&buf).into_owned());
                    }
                }
                Some(c) => buf.push(c),
                None => {
                    return Err(SqlError { line: start_line, message: "unterminated string".into() })
                }
            }
        }
    }

    fn read_number_or_ident(&mut self) -> Tok {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == b'.') {
            self.pos += 1;
        }
        if matches!(self.peek(), Some(b'e' | b'E'))
            && self.peek2().is_some_and(|c| c.is_ascii_digit() || c == b'-' || c == b'+')
        {
            self.pos += 2;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        // `1C` is a multiplicity, not a number.
        if self.peek().is_some_and(|c| c.is_ascii_alphabetic() || c == b'_') {
            while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_') {
                self.pos += 1;
            }
            return Tok::Ident(String::from_utf8_lossy(&self.src[start..self.pos]).into_owned());
        }
        let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        match text.parse::<i64>() {
            Ok(n) => Tok::Int(n),
            Err(_) => Tok::Real(text.parse().unwrap_or(0.0)),
        }
    }

    fn tokenize(mut self) -> Result<Vec<(Tok, usize)>, SqlError> {
        let mut out = Vec::new();
        loop {
            self.skip_ws();
            let line = self.line;
            let Some(c) = self.peek() else { return Ok(out) };
            let tok = match c {
                b'(' | b')' | b',' | b';' => {
                    self.advance();
                    match c {
                        b'(' => Tok::LParen,
                        b')' => Tok::RParen,
                        b',' => Tok::Comma,
                        _ => Tok::Semi,
                    }
                }
                b'\'' => Tok::Str(self.read_quoted(b'\'')?),
                b'"' => Tok::Quoted(self.read_quoted(b'"')?),
                b'0'..=b'9' | b'-' | b'.' => self.read_number_or_ident(),
                c if c.is_ascii_alphabetic() || c == b'_' => {
                    let start = self.pos;
                    while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_') {
                        self.pos += 1;
                    }
                    Tok::Ident(String::from_utf8_lossy(&self.src[start..self.pos]).into_owned())
                }
                other => return Err(self.error(format!("unexpected character '{}'", other as char))),
            };
            out.push((tok, line));
        }
    }
}

// ── Loader ────────────────────────────────────────────────────────────────────

struct Loader<'m> {
    tokens: Vec<(Tok, usize)>,
    pos: usize,
    model: &'m mut MetaModel,
    /// Double-quoted identifiers already mapped to integer ids.
    ids: HashMap<String, i64>,
}

impl<'m> Loader<'m> {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(0, |(_, l)| *l)
    }

    fn error(&self, message: impl Into<String>) -> SqlError {
        SqlError { line: self.line(), message: message.into() }
    }

    fn model_error(&self, e: ModelError) -> SqlError {
        self.error(e.0)
    }

    fn next(&mut self) -> Result<Tok, SqlError> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        match tok {
            Some(t) => {
                self.pos += 1;
                Ok(t)
            }
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn expect(&mut self, tok: Tok) -> Result<(), SqlError> {
        let got = self.next()?;
        if got == tok {
            Ok(())
        } else {
            Err(self.error(format!("expected {tok:?}, found {got:?}")))
        }
    }

    fn ident(&mut self) -> Result<String, SqlError> {
        match self.next()? {
            Tok::Ident(s) => Ok(s),
            other => Err(self.error(format!("expected a name, found {other:?}"))),
        }
    }

    fn keyword(&mut self, kw: &str) -> Result<(), SqlError> {
        let word = self.ident()?;
        if word.eq_ignore_ascii_case(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected {kw}, found {word}")))
        }
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Tok::Ident(w)) if w.eq_ignore_ascii_case(kw))
    }

    /// `( a, b, c )` of names.
    fn name_list(&mut self) -> Result<Vec<String>, SqlError> {
        self.expect(Tok::LParen)?;
        let mut names = Vec::new();
        if self.peek() == Some(&Tok::RParen) {
            self.pos += 1;
            return Ok(names);
        }
        loop {
            names.push(self.ident()?);
            match self.next()? {
                Tok::Comma => continue,
                Tok::RParen => return Ok(names),
                other => return Err(self.error(format!("expected ',' or ')', found {other:?}"))),
            }
        }
    }

    fn run(&mut self) -> Result<usize, SqlError> {
        let mut statements = 0;
        while self.peek().is_some() {
            if self.peek() == Some(&Tok::Semi) {
                self.pos += 1;
                continue;
            }
            let word = self.ident()?.to_ascii_uppercase();
            match word.as_str() {
                "CREATE" => {
                    let what = self.ident()?.to_ascii_uppercase();
                    match what.as_str() {
                        "TABLE" => self.create_table()?,
                        "UNIQUE" => self.create_index()?,
                        "ROP" => self.create_rop()?,
                        _ => return Err(self.error(format!("unsupported statement CREATE {what}"))),
                    }
                }
                "INSERT" => self.insert()?,
                _ => return Err(self.error(format!("unsupported statement {word}"))),
            }
            self.expect(Tok::Semi)?;
            statements += 1;
        }
        Ok(statements)
    }

    fn create_table(&mut self) -> Result<(), SqlError> {
        let kind = self.ident()?;
        self.expect(Tok::LParen)?;
        let mut attrs = Vec::new();
        if self.peek() == Some(&Tok::RParen) {
            self.pos += 1;
        } else {
            loop {
                let name = self.ident()?;
                let ty_name = self.ident()?;
                let ty = AttrType::parse(&ty_name)
                    .ok_or_else(|| self.error(format!("unknown type {ty_name}")))?;
                attrs.push((name, ty));
                match self.next()? {
                    Tok::Comma => continue,
                    Tok::RParen => break,
                    other => return Err(self.error(format!("expected ',' or ')', found {other:?}"))),
                }
            }
        }
        self.model.define_class(&kind, attrs).map_err(|e| self.model_error(e))
    }

    fn create_index(&mut self) -> Result<(), SqlError> {
        self.keyword("INDEX")?;
        let name = self.ident()?;
        self.keyword("ON")?;
        let kind = self.ident()?;
        let attrs = self.name_list()?;
        let attrs: Vec<&str> = attrs.iter().map(String::as_str).collect();
        self.model
            .define_unique_index(&name, &kind, &attrs)
            .map_err(|e| self.model_error(e))
    }

    fn rop_end(&mut self) -> Result<End, SqlError> {
        let mult = match self.next()? {
            Tok::Int(n) => n.to_string(),
            Tok::Ident(s) => s,
            other => return Err(self.error(format!("expected multiplicity, found {other:?}"))),
        };
        let kind = self.ident()?;
        let keys = self.name_list()?;
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        let end = End::new(&kind, &keys)
            .with_multiplicity(&mult)
            .ok_or_else(|| self.error(format!("invalid multiplicity {mult}")))?;
        if self.at_keyword("PHRASE") {
            self.pos += 1;
            match self.next()? {
                Tok::Str(p) => return Ok(end.with_phrase(Some(&p))),
                other => return Err(self.error(format!("expected phrase string, found {other:?}"))),
            }
        }
        Ok(end)
    }

    fn create_rop(&mut self) -> Result<(), SqlError> {
        self.keyword("REF_ID")?;
        let rel = self.ident()?;
        let rel_id = rel
            .strip_prefix(['R', 'r'])
            .and_then(|d| d.parse().ok())
            .ok_or_else(|| self.error(format!("invalid relationship id {rel}")))?;
        self.keyword("FROM")?;
        let source = self.rop_end()?;
        self.keyword("TO")?;
        let target = self.rop_end()?;
        self.model
            .define_association(rel_id, source, target)
            .map_err(|e| self.model_error(e))
    }

    fn insert(&mut self) -> Result<(), SqlError> {
        self.keyword("INTO")?;
        let kind = self.ident()?;
        self.keyword("VALUES")?;
        let types: Vec<AttrType> = match self.model.class(&kind) {
            Some(class) => class.attrs.iter().map(|(_, t)| *t).collect(),
            None => return Err(self.error(format!("undefined class {kind}"))),
        };

        self.expect(Tok::LParen)?;
        let mut raw = Vec::new();
        if self.peek() == Some(&Tok::RParen) {
            self.pos += 1;
        } else {
            loop {
                raw.push(self.next()?);
                match self.next()? {
                    Tok::Comma => continue,
                    Tok::RParen => break,
                    other => return Err(self.error(format!("expected ',' or ')', found {other:?}"))),
                }
            }
        }
        if raw.len() != types.len() {
            return Err(self.error(format!(
                "{kind} has {} attributes, got {} values",
                types.len(),
                raw.len()
            )));
        }

        let mut values = Vec::with_capacity(raw.len());
        for (tok, ty) in raw.into_iter().zip(types) {
            values.push(self.convert(tok, ty)?);
        }
        self.model
            .insert_instance(&kind, values)
            .map(|_| ())
            .map_err(|e| self.model_error(e))
    }

    fn convert(&mut self, tok: Tok, ty: AttrType) -> Result<Value, SqlError> {
        if matches!(&tok, Tok::Ident(w) if w.eq_ignore_ascii_case("NULL")) {
            return Ok(Value::Unit);
        }
        let value = match (ty, tok) {
            (AttrType::Boolean, Tok::Ident(w)) if w.eq_ignore_ascii_case("TRUE") => Value::Bool(true),
            (AttrType::Boolean, Tok::Ident(w)) if w.eq_ignore_ascii_case("FALSE") => Value::Bool(false),
            (AttrType::Boolean, Tok::Int(n)) => Value::Bool(n != 0),
            (AttrType::Integer | AttrType::UniqueId, Tok::Int(n)) => Value::Int(n),
            (AttrType::Real, Tok::Int(n)) => Value::Real(n as f64),
            (AttrType::Real, Tok::Real(x)) => Value::Real(x),
            (AttrType::String, Tok::Str(s)) => Value::Str(s),
            (AttrType::UniqueId, Tok::Quoted(s) | Tok::Str(s)) => {
                let next = &mut *self.model;
                Value::Int(*self.ids.entry(s).or_insert_with(|| next.next_id()))
            }
            (ty, tok) => {
                return Err(self.error(format!("{tok:?} is not a valid {} value", ty.as_str())))
            }
        };
        Ok(value)
    }
}

/// Load SQL text into `model`.  Returns the number of statements executed.
pub fn load_str(model: &mut MetaModel, src: &str) -> Result<usize, SqlError> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut loader = Loader { tokens, pos: 0, model, ids: HashMap::new() };
    let statements = loader.run()?;
    let links = loader.model.link_by_keys();
    debug!(statements, links, "loaded sql");
    Ok(statements)
}

pub fn load_file(model: &mut MetaModel, path: impl AsRef<Path>) -> Result<usize, SqlError> {
    let src = std::fs::read_to_string(path.as_ref()).map_err(|e| SqlError {
        line: 0,
        message: format!("{}: {e}", path.as_ref().display()),
    })?;
    load_str(model, &src)
}

// ── Dumper ────────────────────────────────────────────────────────────────────

fn sql_value(value: &Value) -> String {
    match value {
        Value::Unit => "NULL".into(),
        Value::Bool(true) => "TRUE".into(),
        Value::Bool(false) => "FALSE".into(),
        Value::Str(s) => format!("'{}'", s.replace('\'', "''")),
        other => other.to_string(),
    }
}

fn rop_end(end: &super::End) -> String {
    let mut out = format!("{} {} ({})", end.multiplicity(), end.kind, end.keys.join(", "));
    if let Some(p) = &end.phrase {
        let _ = write!(out, " PHRASE '{}'", p.replace('\'', "''"));
    }
    out
}

/// Serialise the whole model: tables, rows, indexes, then associations.
pub fn dump(model: &MetaModel) -> String {
    let mut out = String::new();
    for class in model.classes() {
        let cols: Vec<String> =
            class.attrs.iter().map(|(n, t)| format!("    {n} {}", t.as_str())).collect();
        let _ = writeln!(out, "CREATE TABLE {} (\n{});", class.kind, cols.join(",\n"));
    }
    for class in model.classes() {
        for inst in model.instances_of(&class.kind).unwrap_or_default() {
            let Ok(values) = model.values(&inst) else { continue };
            let vals: Vec<String> = values.iter().map(sql_value).collect();
            let _ = writeln!(out, "INSERT INTO {} VALUES ({});", class.kind, vals.join(", "));
        }
    }
    for index in model.indexes() {
        let _ = writeln!(
            out,
            "CREATE UNIQUE INDEX {} ON {} ({});",
            index.name,
            index.kind,
            index.attrs.join(", ")
        );
    }
    for a in model.associations() {
        let _ = writeln!(
            out,
            "CREATE ROP REF_ID R{} FROM {} TO {};",
            a.rel_id,
            rop_end(&a.source),
            rop_end(&a.target)
        );
    }
    out
}

pub fn save_file(model: &MetaModel, path: impl AsRef<Path>) -> std::io::Result<()> {
    std::fs::write(path, dump(model))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
