//! Recursive descent parser for archetypes.
//!
//! Grammar overview (one control statement per line):
//!
//! ```text
//! code       := (literal-line | NEWLINE | comment-line | statement)*
//! condition  := '(' expr ')'
//! expr       := '(' expr ')' [bop expr] | uop '(' expr ')' [bop expr] | sexpr
//! sexpr      := uop term [bop expr] | '-' term [bop expr] | term [bop expr]
//! term       := string | ident | keyword | $fmt{term} | int | real
//!               followed by any of  ->Key[R<n>]  :keyword  .attr
//! ```
//!
//! Binary operators have no precedence: `a + b * c` groups to the right.
//! Parenthesise to force another grouping.

use std::path::Path;
use std::rc::Rc;

use super::ast::*;
use super::lexer::{Lexer, ParseError, Tok, Token};

// ── Parser ────────────────────────────────────────────────────────────────────

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    file: Rc<str>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>, file: Rc<str>) -> Self {
        Parser { tokens, pos: 0, file }
    }

    fn peek(&self) -> &Tok {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> &Tok {
        self.tokens
            .get(self.pos + n)
            .or_else(|| self.tokens.last())
            .map_or(&Tok::Eof, |t| &t.tok)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(0, |t| t.line)
    }

    fn loc(&self) -> Loc {
        Loc::new(self.file.clone(), self.line())
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == tok {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            file: self.file.to_string(),
            line: self.line(),
            message: message.into(),
        }
    }

    fn unexpected(&self) -> ParseError {
        self.error(format!("invalid token {}", describe(self.peek())))
    }

    fn expect(&mut self, tok: &Tok) -> Result<(), ParseError> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn expect_word(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Tok::Word(w) => {
                let w = w.clone();
                self.advance();
                Ok(w)
            }
            _ => Err(self.unexpected()),
        }
    }

    /// Expect a plain word equal (ignoring case) to `keyword`.
    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        match self.peek() {
            Tok::Word(w) if w.eq_ignore_ascii_case(keyword) => {
                self.advance();
                Ok(())
            }
            _ => Err(self.error(format!("expected '{keyword}', found {}", describe(self.peek())))),
        }
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Tok::Word(w) if w.eq_ignore_ascii_case(keyword))
    }

    /// End of a control line, optionally after a trailing comment.
    fn lineabreak(&mut self) -> Result<(), ParseError> {
        self.eat(&Tok::Comment);
        match self.peek() {
            Tok::Newline => {
                self.advance();
                Ok(())
            }
            Tok::Eof => Ok(()),
            _ => Err(self.unexpected()),
        }
    }

    // ── Blocks ────────────────────────────────────────────────────────────────

    /// Parse a whole file.
    pub fn parse_body(mut self) -> Result<Body, ParseError> {
        let stmts = self.parse_code()?;
        if *self.peek() != Tok::Eof {
            return Err(self.unexpected());
        }
        Ok(Body { file: self.file, stmts })
    }

    /// Statements up to (not including) a block terminator or end of input.
    fn parse_code(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = Vec::new();
        loop {
            match self.peek() {
                Tok::Eof
                | Tok::ElIf
                | Tok::Else
                | Tok::EndIf
                | Tok::EndFor
                | Tok::EndWhile
                | Tok::EndFunction
                | Tok::End => return Ok(stmts),
                Tok::Newline => {
                    let loc = self.loc();
                    self.advance();
                    stmts.push(Stmt::Literal { parts: vec![Part::Text("\n".into())], loc });
                }
                Tok::Comment => {
                    self.advance();
                    self.lineabreak()?;
                }
                Tok::Literal(_) => stmts.push(self.parse_literal_line()?),
                _ => stmts.push(self.parse_statement()?),
            }
        }
    }

    /// Close a block with its specific terminator or a bare `.end`.
    fn parse_end(&mut self, specific: &Tok) -> Result<(), ParseError> {
        if self.eat(specific) || self.eat(&Tok::End) {
            self.lineabreak()
        } else {
            Err(self.unexpected())
        }
    }

    fn parse_literal_line(&mut self) -> Result<Stmt, ParseError> {
        let loc = self.loc();
        let mut parts = Vec::new();
        if let Tok::Literal(lead) = self.advance() {
            if !lead.is_empty() {
                parts.push(Part::Text(lead));
            }
        }
        loop {
            match self.advance() {
                Tok::Literal(text) => match parts.last_mut() {
                    Some(Part::Text(prev)) => prev.push_str(&text),
                    _ => parts.push(Part::Text(text)),
                },
                Tok::Dollar => parts.push(Part::Subst(self.parse_subst()?)),
                Tok::Newline | Tok::Eof => return Ok(Stmt::Literal { parts, loc }),
                _ => {
                    self.pos -= 1;
                    return Err(self.unexpected());
                }
            }
        }
    }

    // ── Statements ────────────────────────────────────────────────────────────

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        let loc = self.loc();
        let stmt = match self.peek().clone() {
            Tok::SelectOne | Tok::SelectAny | Tok::SelectMany => {
                let select = self.parse_select()?;
                self.lineabreak()?;
                Stmt::Select(select)
            }
            Tok::If => return self.parse_if(),
            Tok::Function => return self.parse_function(),
            Tok::For => return self.parse_for(),
            Tok::While => return self.parse_while(),
            Tok::BreakFor | Tok::BreakWhile => {
                self.advance();
                self.lineabreak()?;
                Stmt::Break { loc }
            }
            Tok::Clear => {
                self.advance();
                self.lineabreak()?;
                Stmt::Clear { loc }
            }
            Tok::Include => {
                self.advance();
                let path = self.parse_string()?;
                self.lineabreak()?;
                Stmt::Include { path, loc }
            }
            Tok::Print => {
                self.advance();
                let message = self.parse_string()?;
                self.lineabreak()?;
                Stmt::Print { message, loc }
            }
            Tok::Emit => {
                self.advance();
                let path = self.parse_string()?;
                self.lineabreak()?;
                Stmt::Emit { path, loc }
            }
            Tok::Exit => {
                self.advance();
                let value = self.parse_sexpr()?;
                self.lineabreak()?;
                Stmt::Exit { value, loc }
            }
            Tok::Assign => {
                self.advance();
                let target = self.parse_target()?;
                self.expect(&Tok::Eq)?;
                let value = self.parse_expr()?;
                self.lineabreak()?;
                Stmt::Assign { target, value, loc }
            }
            Tok::Invoke => self.parse_invoke()?,
            Tok::AlXlate => {
                self.advance();
                let activity = self.expect_word()?;
                let var = self.parse_inst_ref_var()?;
                self.lineabreak()?;
                Stmt::AlXlate { activity, var, loc }
            }
            Tok::SpecialWhere => {
                self.advance();
                let kind = self.expect_word()?;
                let name = self.expect_word()?;
                self.lineabreak()?;
                Stmt::SpecialWhere { kind, name, loc }
            }
            Tok::CreateObj => {
                self.advance();
                let var = self.parse_inst_ref_var()?;
                self.expect(&Tok::Of)?;
                let kind = self.expect_word()?;
                self.lineabreak()?;
                Stmt::Create { var, kind, loc }
            }
            Tok::DeleteObj => {
                self.advance();
                let var = self.parse_inst_ref_var()?;
                self.lineabreak()?;
                Stmt::Delete { var, loc }
            }
            Tok::Relate => {
                self.advance();
                let link = self.parse_link("to", loc)?;
                Stmt::Relate(link)
            }
            Tok::Unrelate => {
                self.advance();
                let link = self.parse_link("from", loc)?;
                Stmt::Unrelate(link)
            }
            Tok::DotWord(word) => {
                return Err(self.error(format!("invalid control statement '.{word}'")))
            }
            Tok::Dot => return Err(self.error("invalid control statement '.'")),
            _ => return Err(self.unexpected()),
        };
        Ok(stmt)
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let loc = self.loc();
        self.advance();
        let mut branches = Vec::new();
        let cond = self.parse_condition()?;
        self.lineabreak()?;
        let body = self.parse_code()?;
        branches.push(IfBranch { cond, body });

        while self.eat(&Tok::ElIf) {
            let cond = self.parse_condition()?;
            self.lineabreak()?;
            let body = self.parse_code()?;
            branches.push(IfBranch { cond, body });
        }

        let else_body = if self.eat(&Tok::Else) {
            self.lineabreak()?;
            Some(self.parse_code()?)
        } else {
            None
        };
        self.parse_end(&Tok::EndIf)?;
        Ok(Stmt::If { branches, else_body, loc })
    }

    fn parse_function(&mut self) -> Result<Stmt, ParseError> {
        let loc = self.loc();
        self.advance();
        let name = self.parse_function_name()?;
        self.lineabreak()?;

        let mut params = Vec::new();
        loop {
            match self.peek().clone() {
                Tok::Param => {
                    let ploc = self.loc();
                    self.advance();
                    let Tok::Type { name: ty, kind } = self.advance() else {
                        self.pos -= 1;
                        return Err(self.error(format!(
                            "expected parameter type, found {}",
                            describe(self.peek())
                        )));
                    };
                    let pname = self.expect_word()?;
                    self.lineabreak()?;
                    params.push(Param { ty, kind, name: pname, loc: ploc });
                }
                Tok::Comment => {
                    self.advance();
                    self.lineabreak()?;
                }
                _ => break,
            }
        }

        let body = self.parse_code()?;
        self.parse_end(&Tok::EndFunction)?;
        Ok(Stmt::Function(Rc::new(FunctionDef { name, params, body, loc })))
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        let loc = self.loc();
        self.advance();
        let var = self.parse_inst_ref_var()?;
        self.expect(&Tok::In)?;
        let set = self.expect_word()?;
        self.lineabreak()?;
        let body = self.parse_code()?;
        self.parse_end(&Tok::EndFor)?;
        Ok(Stmt::For { var, set, body, loc })
    }

    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        let loc = self.loc();
        self.advance();
        let cond = self.parse_condition()?;
        self.lineabreak()?;
        let body = self.parse_code()?;
        self.parse_end(&Tok::EndWhile)?;
        Ok(Stmt::While { cond, body, loc })
    }

    fn parse_invoke(&mut self) -> Result<Stmt, ParseError> {
        let loc = self.loc();
        self.advance();
        let result = match (self.peek(), self.peek_at(1)) {
            (Tok::Word(w), Tok::Eq) => {
                let w = w.clone();
                self.pos += 2;
                Some(w)
            }
            _ => None,
        };
        let name = self.parse_function_name()?;
        self.expect(&Tok::LParen)?;
        let mut args = Vec::new();
        while *self.peek() != Tok::RParen {
            if !args.is_empty() {
                self.eat(&Tok::Comma);
            }
            args.push(self.parse_sexpr()?);
        }
        self.advance();
        self.lineabreak()?;
        Ok(Stmt::Invoke { result, name, args, loc })
    }

    fn parse_function_name(&mut self) -> Result<String, ParseError> {
        let mut name = self.expect_word()?;
        while *self.peek() == Tok::Dot {
            self.advance();
            name.push('.');
            name.push_str(&self.expect_word()?);
        }
        Ok(name)
    }

    /// `a to b across R1[.'phrase'] [using c]` (or `from` for unrelate).
    fn parse_link(&mut self, joiner: &str, loc: Loc) -> Result<Link, ParseError> {
        let from = self.parse_inst_ref_var()?;
        self.expect_keyword(joiner)?;
        let to = self.parse_inst_ref_var()?;
        self.expect_keyword("across")?;
        let rel_word = self.expect_word()?;
        let rel_id = parse_rel_id(&rel_word)
            .ok_or_else(|| self.error(format!("invalid relationship id '{rel_word}'")))?;
        let phrase = if self.eat(&Tok::Dot) {
            match self.advance() {
                Tok::Phrase(p) => Some(p),
                _ => {
                    self.pos -= 1;
                    return Err(self.unexpected());
                }
            }
        } else {
            None
        };
        let using = if self.at_keyword("using") {
            self.advance();
            Some(self.parse_inst_ref_var()?)
        } else {
            None
        };
        self.lineabreak()?;
        Ok(Link { from, to, rel_id, phrase, using, loc })
    }

    fn parse_select(&mut self) -> Result<Select, ParseError> {
        let loc = self.loc();
        let cardinality = match self.advance() {
            Tok::SelectOne => Cardinality::One,
            Tok::SelectAny => Cardinality::Any,
            _ => Cardinality::Many,
        };
        let var = self.parse_inst_ref_var()?;

        let source = match self.peek() {
            Tok::RelatedBy => {
                self.advance();
                let start = self.parse_variable_expr()?;
                let mut navs = Vec::new();
                while *self.peek() == Tok::Arrow {
                    self.advance();
                    navs.push(self.parse_nav()?);
                }
                SelectSource::Related { start, navs }
            }
            Tok::FromInstancesOf if cardinality != Cardinality::One => {
                self.advance();
                SelectSource::Instances { kind: self.expect_word()? }
            }
            _ => return Err(self.unexpected()),
        };

        let filter = if self.eat(&Tok::Where) {
            Some(self.parse_condition()?)
        } else {
            None
        };

        let order = match self.peek() {
            Tok::OrderedBy | Tok::ReverseOrderedBy if cardinality == Cardinality::Many => {
                let reverse = self.advance() == Tok::ReverseOrderedBy;
                self.expect(&Tok::LParen)?;
                let mut attrs = vec![self.parse_attribute()?];
                while self.eat(&Tok::Comma) {
                    attrs.push(self.parse_attribute()?);
                }
                self.expect(&Tok::RParen)?;
                Some(OrderBy { attrs, reverse })
            }
            _ => None,
        };

        Ok(Select { cardinality, var, source, filter, order, loc })
    }

    /// `Key[R<n>]` / `Key[R<n>.'phrase']`, the part after `->`.
    fn parse_nav(&mut self) -> Result<Nav, ParseError> {
        let loc = self.loc();
        let kind = self.expect_word()?;
        self.expect(&Tok::LBrack)?;
        let rel_id = match self.advance() {
            Tok::RelId(n) => n,
            _ => {
                self.pos -= 1;
                return Err(self.unexpected());
            }
        };
        let mut phrase = None;
        if self.eat(&Tok::Dot) {
            match self.advance() {
                Tok::Phrase(p) => phrase = Some(p),
                Tok::RelDir(_) => {}
                _ => {
                    self.pos -= 1;
                    return Err(self.unexpected());
                }
            }
        }
        self.expect(&Tok::RBrack)?;
        Ok(Nav { kind, rel_id, phrase, loc })
    }

    /// Instance variable name; type keywords are accepted as names.
    fn parse_inst_ref_var(&mut self) -> Result<String, ParseError> {
        match self.advance() {
            Tok::Word(w) => Ok(w),
            Tok::Type { name, .. } => Ok(name),
            _ => {
                self.pos -= 1;
                Err(self.unexpected())
            }
        }
    }

    /// Keywords that may double as variable and attribute names.
    fn keyword_name(tok: &Tok) -> Option<String> {
        match tok {
            Tok::Uop(s) => Some(s.clone()),
            Tok::Type { name, .. } => Some(name.clone()),
            Tok::Where => Some("where".into()),
            Tok::In => Some("in".into()),
            _ => None,
        }
    }

    fn parse_attribute(&mut self) -> Result<String, ParseError> {
        if let Tok::Word(w) = self.peek() {
            let w = w.clone();
            self.advance();
            return Ok(w);
        }
        match Self::keyword_name(self.peek()) {
            Some(name) => {
                self.advance();
                Ok(name)
            }
            None => Err(self.unexpected()),
        }
    }

    fn parse_target(&mut self) -> Result<Target, ParseError> {
        if let Some(name) = Self::keyword_name(self.peek()) {
            self.advance();
            return Ok(Target::Var(name));
        }
        let var = self.expect_word()?;
        if self.eat(&Tok::Dot) {
            let attr = self.parse_attribute()?;
            Ok(Target::Field { var, attr })
        } else {
            Ok(Target::Var(var))
        }
    }

    /// The starting point of an instance chain: `var`, `var.attr` or a keyword.
    fn parse_variable_expr(&mut self) -> Result<Expr, ParseError> {
        let loc = self.loc();
        Ok(match self.parse_target()? {
            Target::Var(name) => Expr::Var { name, loc },
            Target::Field { var, attr } => Expr::Field {
                target: Box::new(Expr::Var { name: var, loc: loc.clone() }),
                attr,
                loc,
            },
        })
    }

    // ── Expressions ───────────────────────────────────────────────────────────

    fn parse_condition(&mut self) -> Result<Expr, ParseError> {
        self.expect(&Tok::LParen)?;
        let e = self.parse_expr()?;
        self.expect(&Tok::RParen)?;
        Ok(e)
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let loc = self.loc();
        match self.peek() {
            Tok::LParen => {
                let inner = self.parse_condition()?;
                self.parse_binary_tail(inner, loc)
            }
            Tok::Uop(_) if *self.peek_at(1) == Tok::LParen => {
                let op = self.parse_uop()?;
                let inner = self.parse_condition()?;
                let unary = Expr::Unary { op, operand: Box::new(inner), loc: loc.clone() };
                self.parse_binary_tail(unary, loc)
            }
            _ => self.parse_sexpr(),
        }
    }

    fn parse_sexpr(&mut self) -> Result<Expr, ParseError> {
        let loc = self.loc();
        let lhs = match self.peek() {
            Tok::Uop(_) if *self.peek_at(1) == Tok::LParen => {
                let op = self.parse_uop()?;
                let inner = self.parse_condition()?;
                Expr::Unary { op, operand: Box::new(inner), loc: loc.clone() }
            }
            Tok::Uop(_) => {
                let op = self.parse_uop()?;
                let operand = self.parse_term()?;
                Expr::Unary { op, operand: Box::new(operand), loc: loc.clone() }
            }
            Tok::Minus => {
                self.advance();
                let operand = self.parse_term()?;
                Expr::Unary { op: UnOp::Neg, operand: Box::new(operand), loc: loc.clone() }
            }
            _ => self.parse_term()?,
        };
        self.parse_binary_tail(lhs, loc)
    }

    fn parse_uop(&mut self) -> Result<UnOp, ParseError> {
        match self.advance() {
            Tok::Uop(word) => UnOp::from_keyword(&word)
                .ok_or_else(|| self.error(format!("unknown operator '{word}'"))),
            _ => {
                self.pos -= 1;
                Err(self.unexpected())
            }
        }
    }

    fn parse_binary_tail(&mut self, lhs: Expr, loc: Loc) -> Result<Expr, ParseError> {
        let Some(op) = binop(self.peek()) else { return Ok(lhs) };
        self.advance();
        let rhs = self.parse_expr()?;
        Ok(Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), loc })
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let loc = self.loc();
        let mut term = match self.advance() {
            Tok::DQuote => self.parse_string_body(loc.clone())?,
            Tok::Word(name) => {
                if *self.peek() == Tok::LBrack {
                    return Err(self.error(format!("navigation to '{name}' needs a starting instance")));
                }
                Expr::Var { name, loc: loc.clone() }
            }
            Tok::Dollar => self.parse_subst()?,
            Tok::LParen => {
                let inner = self.parse_expr()?;
                self.expect(&Tok::RParen)?;
                inner
            }
            Tok::Int(value) => Expr::Int { value, loc: loc.clone() },
            Tok::Real(value) => Expr::Real { value, loc: loc.clone() },
            tok => match Self::keyword_name(&tok) {
                Some(name) => Expr::Var { name, loc: loc.clone() },
                None => {
                    self.pos -= 1;
                    return Err(self.unexpected());
                }
            },
        };

        loop {
            let ploc = self.loc();
            term = match self.peek() {
                Tok::Arrow => {
                    self.advance();
                    let nav = self.parse_nav()?;
                    Expr::Navigate { start: Box::new(term), nav, loc: ploc }
                }
                Tok::Colon => {
                    self.advance();
                    let keyword = match self.advance() {
                        Tok::Word(w) => Expr::Str { parts: vec![Part::Text(w)], loc: ploc.clone() },
                        Tok::Dollar => self.parse_subst()?,
                        _ => {
                            self.pos -= 1;
                            return Err(self.unexpected());
                        }
                    };
                    Expr::ParseKeyword { target: Box::new(term), keyword: Box::new(keyword), loc: ploc }
                }
                Tok::Dot => {
                    self.advance();
                    let attr = self.parse_attribute()?;
                    Expr::Field { target: Box::new(term), attr, loc: ploc }
                }
                _ => return Ok(term),
            };
        }
    }

    /// After `$`: `fmt* { term }`.
    fn parse_subst(&mut self) -> Result<Expr, ParseError> {
        let loc = self.loc();
        let mut formats = Vec::new();
        while let Tok::Format(f) = self.peek() {
            formats.push(f.clone());
            self.advance();
        }
        self.expect(&Tok::LBrace)?;
        let expr = self.parse_term()?;
        self.expect(&Tok::RBrace)?;
        Ok(Expr::Subst { formats, expr: Box::new(expr), loc })
    }

    fn parse_string(&mut self) -> Result<Expr, ParseError> {
        let loc = self.loc();
        self.expect(&Tok::DQuote)?;
        self.parse_string_body(loc)
    }

    /// After the opening quote, up to and including the closing quote.
    fn parse_string_body(&mut self, loc: Loc) -> Result<Expr, ParseError> {
        let mut parts = Vec::new();
        loop {
            match self.advance() {
                Tok::Text(text) => parts.push(Part::Text(unescape(&text))),
                Tok::Dollar => parts.push(Part::Subst(self.parse_subst()?)),
                Tok::DQuote => return Ok(Expr::Str { parts, loc }),
                _ => {
                    self.pos -= 1;
                    return Err(self.unexpected());
                }
            }
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn binop(tok: &Tok) -> Option<BinOp> {
    Some(match tok {
        Tok::Plus => BinOp::Add,
        Tok::Minus => BinOp::Sub,
        Tok::Star => BinOp::Mul,
        Tok::Slash => BinOp::Div,
        Tok::Percent => BinOp::Rem,
        Tok::Pipe => BinOp::Pipe,
        Tok::Amp => BinOp::Amp,
        Tok::Caret => BinOp::Caret,
        Tok::Lt => BinOp::Lt,
        Tok::Gt => BinOp::Gt,
        Tok::Le => BinOp::Le,
        Tok::Ge => BinOp::Ge,
        Tok::EqEq => BinOp::Eq,
        Tok::Ne => BinOp::Ne,
        Tok::And => BinOp::And,
        Tok::Or => BinOp::Or,
        _ => return None,
    })
}

/// `R12` → 12.
fn parse_rel_id(word: &str) -> Option<u32> {
    let digits = word.strip_prefix('R').or_else(|| word.strip_prefix('r'))?;
    digits.parse().ok()
}

/// String literals understand `\n` and `\t`.
fn unescape(text: &str) -> String {
    text.replace("\\n", "\n").replace("\\t", "\t")
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Word(w) => format!("'{w}'"),
        Tok::Newline => "end of line".into(),
        Tok::Eof => "end of file".into(),
        Tok::DotWord(w) => format!("'.{w}'"),
        Tok::Literal(_) => "literal text".into(),
        other => format!("{other:?}"),
    }
}

// ── Entry points ──────────────────────────────────────────────────────────────

/// Parse archetype source text attributed to `file`.
pub fn parse_text(src: &str, file: &str) -> Result<Body, ParseError> {
    let file: Rc<str> = Rc::from(file);
    let mut text = String::with_capacity(src.len() + 1);
    text.push_str(src);
    if !text.ends_with('\n') {
        text.push('\n');
    }
    let tokens = Lexer::new(&text, file.clone()).tokenize()?;
    Parser::new(tokens, file).parse_body()
}

/// Read and parse an archetype file.
pub fn parse_file(path: impl AsRef<Path>) -> Result<Body, ParseError> {
    let path = path.as_ref();
    let name = path.display().to_string();
    let src = std::fs::read_to_string(path).map_err(|e| ParseError {
        file: name.clone(),
        line: 0,
        message: format!("unable to read file: {e}"),
    })?;
    parse_text(&src, &name)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Vec<Stmt> {
        parse_text(src, "t.arc").expect("parse failed").stmts
    }

    fn parse_err(src: &str) -> ParseError {
        parse_text(src, "t.arc").expect_err("expected a parse error")
    }

    fn exit_value(src: &str) -> Expr {
        match parse(src).into_iter().next() {
            Some(Stmt::Exit { value, .. }) => value,
            other => panic!("expected exit, got {other:?}"),
        }
    }

    #[test]
    fn literal_line_parts() {
        let stmts = parse("a ${x} b\n");
        let Stmt::Literal { parts, .. } = &stmts[0] else { panic!() };
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], Part::Text("a ".into()));
        assert!(matches!(&parts[1], Part::Subst(Expr::Subst { .. })));
        assert_eq!(parts[2], Part::Text(" b".into()));
    }

    #[test]
    fn blank_line_is_newline_literal() {
        let stmts = parse("\n");
        assert_eq!(stmts.len(), 1);
        assert!(matches!(&stmts[0], Stmt::Literal { parts, .. } if parts == &vec![Part::Text("\n".into())]));
    }

    #[test]
    fn final_newline_is_not_doubled() {
        assert_eq!(parse("a\n").len(), 1);
        assert_eq!(parse("a").len(), 1);
        assert_eq!(parse("").len(), 1);
    }

    #[test]
    fn binary_ops_group_right() {
        let Expr::Binary { op, rhs, .. } = exit_value(".exit 1 - 2 - 3") else { panic!() };
        assert_eq!(op, BinOp::Sub);
        assert!(matches!(*rhs, Expr::Binary { op: BinOp::Sub, .. }));
    }

    #[test]
    fn parenthesised_grouping() {
        let Expr::Binary { lhs, .. } = exit_value(".exit (1 - 2) - 3") else { panic!() };
        assert!(matches!(*lhs, Expr::Binary { .. }));
    }

    #[test]
    fn unary_keyword_with_parens() {
        let e = exit_value(".exit not_empty (s)");
        assert!(matches!(e, Expr::Unary { op: UnOp::NotEmpty, .. }));
    }

    #[test]
    fn postfix_chain() {
        let e = exit_value(".exit a->B[R1].Name");
        let Expr::Field { target, attr, .. } = e else { panic!() };
        assert_eq!(attr, "Name");
        assert!(matches!(*target, Expr::Navigate { ref nav, .. } if nav.rel_id == 1 && nav.kind == "B"));
    }

    #[test]
    fn parse_keyword_postfix() {
        let e = exit_value(".exit x:Name");
        assert!(matches!(e, Expr::ParseKeyword { .. }));
    }

    #[test]
    fn if_elif_else() {
        let stmts = parse(".if (a)\nx\n.elif (b)\ny\n.else\nz\n.end if\n");
        let Stmt::If { branches, else_body, .. } = &stmts[0] else { panic!() };
        assert_eq!(branches.len(), 2);
        assert_eq!(else_body.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn bare_end_closes_blocks() {
        let stmts = parse(".while (x)\n.break while\n.end\n");
        assert!(matches!(&stmts[0], Stmt::While { body, .. } if matches!(body[0], Stmt::Break { .. })));
    }

    #[test]
    fn function_with_params() {
        let stmts = parse(
            ".function f .// doc\n.param integer a\n.param inst_ref<Obj> o\nbody\n.end function\n",
        );
        let Stmt::Function(f) = &stmts[0] else { panic!() };
        assert_eq!(f.name, "f");
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.params[1].kind.as_deref(), Some("Obj"));
        assert_eq!(f.body.len(), 1);
    }

    #[test]
    fn invoke_args_in_source_order() {
        let stmts = parse(".invoke r = PUT_ENV_VAR(\"A\", \"B\")\n");
        let Stmt::Invoke { result, name, args, .. } = &stmts[0] else { panic!() };
        assert_eq!(result.as_deref(), Some("r"));
        assert_eq!(name, "PUT_ENV_VAR");
        let texts: Vec<_> = args
            .iter()
            .map(|a| match a {
                Expr::Str { parts, .. } => parts.clone(),
                _ => panic!(),
            })
            .collect();
        assert_eq!(texts, vec![vec![Part::Text("A".into())], vec![Part::Text("B".into())]]);
    }

    #[test]
    fn invoke_dotted_name_no_commas() {
        let stmts = parse(".invoke HASH.MD5(1 2)\n");
        assert!(matches!(&stmts[0], Stmt::Invoke { name, args, .. } if name == "HASH.MD5" && args.len() == 2));
    }

    #[test]
    fn select_related_with_where() {
        let stmts = parse(".select many bs related by a->B[R1]->C[R2.'x'] where (selected.v > 1)\n");
        let Stmt::Select(sel) = &stmts[0] else { panic!() };
        assert_eq!(sel.cardinality, Cardinality::Many);
        let SelectSource::Related { navs, .. } = &sel.source else { panic!() };
        assert_eq!(navs.len(), 2);
        assert_eq!(navs[1].phrase.as_deref(), Some("x"));
        assert!(sel.filter.is_some());
    }

    #[test]
    fn select_ordered() {
        let stmts = parse(".select many s from instances of A reverse_ordered_by (x, y)\n");
        let Stmt::Select(sel) = &stmts[0] else { panic!() };
        assert_eq!(sel.order, Some(OrderBy { attrs: vec!["x".into(), "y".into()], reverse: true }));
    }

    #[test]
    fn select_one_from_instances_rejected() {
        parse_err(".select one a from instances of A\n");
    }

    #[test]
    fn relate_using_phrase() {
        let stmts = parse(".relate a to b across R3.'owns' using c\n");
        let Stmt::Relate(link) = &stmts[0] else { panic!() };
        assert_eq!((link.rel_id, link.phrase.as_deref(), link.using.as_deref()), (3, Some("owns"), Some("c")));
    }

    #[test]
    fn keyword_variable_names() {
        let stmts = parse(".assign string = 1\n.assign x.where = 2\n");
        assert!(matches!(&stmts[0], Stmt::Assign { target: Target::Var(n), .. } if n == "string"));
        assert!(matches!(&stmts[1], Stmt::Assign { target: Target::Field { attr, .. }, .. } if attr == "where"));
    }

    #[test]
    fn string_escapes_unescaped() {
        let e = exit_value(".exit \"a\\tb\"");
        assert_eq!(e, Expr::Str { parts: vec![Part::Text("a\tb".into())], loc: e.loc().clone() });
    }

    #[test]
    fn errors() {
        assert!(parse_err(".bogus\n").message.contains("bogus"));
        parse_err(".\n");
        parse_err(".if (x)\n");
        parse_err(".end if\n");
        parse_err(".assign = 1\n");
        let err = parse_err("\n\n.exit )\n");
        assert_eq!(err.line, 3);
    }
}
