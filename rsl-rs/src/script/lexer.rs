//! Archetype tokenizer.
//!
//! Archetypes are line oriented.  A line whose first non-blank character is
//! `.` is a control statement, a line starting with `..` is literal text whose
//! first dot is an escape, and every other line is literal output text.
//! Inside a line the lexer moves between sub-languages by pushing and popping
//! modes on an explicit stack:
//!
//! | Mode | Entered by | Left by |
//! |------|------------|---------|
//! | `Initial` | start of every line | first non-blank character |
//! | `Literal` | a literal line | newline |
//! | `Control` | `.keyword` | newline |
//! | `Str` | `"` | `"` |
//! | `PreSubst` | `$` | `{` |
//! | `Subst` | `{` after `$fmt` | `}` |
//! | `RelTraversal` | `[` | `]` |
//!
//! Control keywords are case-insensitive; identifiers keep their case.
//! Illegal characters are logged and skipped so one stray byte does not hide
//! every later diagnostic, but a malformed control word or an unterminated
//! string or substitution is a hard [`ParseError`].

use std::fmt;
use std::rc::Rc;

use tracing::error;

// ── ParseError ────────────────────────────────────────────────────────────────

/// A fatal lex or parse failure, located by file and line.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub file: String,
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.file, self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

// ── Token ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Newline,
    /// Raw output text from a literal line.
    Literal(String),
    /// `.//` or `.comment`; the rest of the line is discarded.
    Comment,

    // Statement keywords (first word of a control line)
    Function,
    Param,
    EndFunction,
    Invoke,
    Clear,
    SelectOne,
    SelectAny,
    SelectMany,
    If,
    ElIf,
    Else,
    EndIf,
    For,
    BreakFor,
    EndFor,
    While,
    BreakWhile,
    EndWhile,
    /// A bare `.end`, closing whichever block is open.
    End,
    Include,
    Assign,
    Print,
    Exit,
    Emit,
    AlXlate,
    SpecialWhere,
    CreateObj,
    Relate,
    Unrelate,
    DeleteObj,
    /// `.word` that is not a known control keyword.
    DotWord(String),

    // Keywords inside a control line
    Where,
    RelatedBy,
    FromInstancesOf,
    In,
    Of,
    Type { name: String, kind: Option<String> },
    And,
    Or,
    Uop(String),
    OrderedBy,
    ReverseOrderedBy,

    // Values
    Word(String),
    Int(i64),
    Real(f64),
    DQuote,
    Text(String),
    Dollar,
    Format(String),
    Phrase(String),
    RelId(u32),
    /// `RI` / `IR` direction marker inside `[...]`.
    RelDir(String),

    // Punctuation and operators
    LBrace,
    RBrace,
    LBrack,
    RBrack,
    Arrow,
    Le,
    Ge,
    EqEq,
    Ne,
    Dot,
    Comma,
    LParen,
    RParen,
    Star,
    Plus,
    Minus,
    Pipe,
    Slash,
    Percent,
    Amp,
    Caret,
    Lt,
    Gt,
    Colon,
    Eq,

    Eof,
}

/// A token plus the line it started on.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Initial,
    Literal,
    Control,
    Str,
    PreSubst,
    Subst,
    RelTraversal,
}

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
    file: Rc<str>,
    modes: Vec<Mode>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, file: Rc<str>) -> Self {
        Lexer {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
            file,
            modes: vec![Mode::Initial],
        }
    }

    /// Tokenize the whole input.  The returned stream always ends in `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.tok == Tok::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    // ── Cursor helpers ────────────────────────────────────────────────────────

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.src.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let ch = self.src.get(self.pos).copied();
        if let Some(c) = ch {
            self.pos += 1;
            if c == b'\n' {
                self.line += 1;
            }
        }
        ch
    }

    fn eat(&mut self, ch: u8) -> bool {
        if self.peek() == Some(ch) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn skip_to(&mut self, end: usize) {
        while self.pos < end {
            self.advance();
        }
    }

    fn skip_to_eol(&mut self) {
        while !matches!(self.peek(), None | Some(b'\n')) {
            self.advance();
        }
    }

    fn text(&self, start: usize, end: usize) -> String {
        String::from_utf8_lossy(&self.src[start..end]).into_owned()
    }

    fn mode(&self) -> Mode {
        self.modes.last().copied().unwrap_or(Mode::Initial)
    }

    fn push(&mut self, mode: Mode) {
        self.modes.push(mode);
    }

    fn pop(&mut self) {
        self.modes.pop();
        if self.modes.is_empty() {
            self.modes.push(Mode::Initial);
        }
    }

    fn begin(&mut self, mode: Mode) {
        self.modes.clear();
        self.modes.push(mode);
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            file: self.file.to_string(),
            line: self.line,
            message: message.into(),
        }
    }

    /// Log the (possibly multi-byte) character under the cursor and skip it.
    fn skip_illegal(&mut self, context: &str) {
        let rest = String::from_utf8_lossy(&self.src[self.pos..]);
        let ch = rest.chars().next().unwrap_or('?');
        error!(
            file = %self.file,
            line = self.line,
            "illegal character '{}' in {}",
            ch.escape_default(),
            context
        );
        let len = if ch == char::REPLACEMENT_CHARACTER { 1 } else { ch.len_utf8() };
        self.skip_to(self.pos + len);
    }

    fn is_word_start(c: u8) -> bool {
        c.is_ascii_alphabetic()
    }

    fn is_word_char(c: u8) -> bool {
        c.is_ascii_alphanumeric() || c == b'_'
    }

    fn read_word(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(Self::is_word_char) {
            self.pos += 1;
        }
        self.text(start, self.pos)
    }

    /// Match a sequence of blank-separated words (case-insensitive) starting at
    /// `at`, without consuming.  Returns the position just past the last word.
    fn match_words(&self, at: usize, words: &[&str]) -> Option<usize> {
        let mut p = at;
        for w in words {
            let ws_start = p;
            while matches!(self.src.get(p), Some(b' ' | b'\t')) {
                p += 1;
            }
            if p == ws_start {
                return None;
            }
            let end = p + w.len();
            let candidate = self.src.get(p..end)?;
            if !candidate.eq_ignore_ascii_case(w.as_bytes()) {
                return None;
            }
            if self.src.get(end).is_some_and(|&c| Self::is_word_char(c)) {
                return None;
            }
            p = end;
        }
        Some(p)
    }

    fn ws_at(&self, at: usize) -> bool {
        matches!(self.src.get(at), Some(b' ' | b'\t' | b'\r' | b'\n'))
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    fn next_token(&mut self) -> Result<Token, ParseError> {
        loop {
            let line = self.line;
            if self.peek().is_none() {
                return match self.mode() {
                    Mode::Str => Err(self.error("unterminated string")),
                    Mode::PreSubst | Mode::Subst => Err(self.error("unterminated substitution")),
                    Mode::RelTraversal => Err(self.error("unterminated relationship traversal")),
                    _ => Ok(Token { tok: Tok::Eof, line }),
                };
            }
            let mode = self.mode();
            let tok = match mode {
                Mode::Initial => self.lex_line_start()?,
                Mode::Literal => self.lex_literal(),
                Mode::Control => self.lex_control()?,
                Mode::Str => self.lex_str(),
                Mode::PreSubst => self.lex_pre_subst()?,
                Mode::Subst => self.lex_subst()?,
                Mode::RelTraversal => self.lex_rel_traversal()?,
            };
            if let Some(tok) = tok {
                // Blank lines swallowed ahead of a control line move the start.
                let line = if mode == Mode::Initial && tok != Tok::Newline {
                    self.line
                } else {
                    line
                };
                return Ok(Token { tok, line });
            }
        }
    }

    // ── Line start ────────────────────────────────────────────────────────────

    fn lex_line_start(&mut self) -> Result<Option<Tok>, ParseError> {
        if self.eat(b'\n') {
            return Ok(Some(Tok::Newline));
        }

        // Blank space ahead of a control line belongs to it, including lines
        // of only spaces or tabs.  An empty line was taken as a newline above.
        let mut j = self.pos;
        while matches!(self.src.get(j), Some(b' ' | b'\t' | b'\r' | b'\n' | 0x0b | 0x0c)) {
            j += 1;
        }
        if self.src.get(j) == Some(&b'.') {
            let line_start = self.src[self.pos..j]
                .iter()
                .rposition(|&c| c == b'\n')
                .map_or(self.pos, |p| self.pos + p + 1);
            self.skip_to(j);
            if self.peek2() == Some(b'.') {
                let lead = self.text(line_start, j);
                self.advance();
                self.begin(Mode::Literal);
                return Ok(Some(Tok::Literal(lead)));
            }
            self.begin(Mode::Control);
            return self.lex_control_word().map(Some);
        }

        let start = self.pos;
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | 0x0b | 0x0c)) {
            self.advance();
        }
        self.begin(Mode::Literal);
        Ok(Some(Tok::Literal(self.text(start, self.pos))))
    }

    /// Lex `.keyword` at the start of a control line.
    fn lex_control_word(&mut self) -> Result<Tok, ParseError> {
        self.advance(); // '.'
        if self.peek() == Some(b'/') && self.peek2() == Some(b'/') {
            self.skip_to_eol();
            return Ok(Tok::Comment);
        }
        if !self.peek().is_some_and(Self::is_word_start) {
            return Ok(Tok::Dot);
        }

        let word = self.read_word();
        let lower = word.to_ascii_lowercase();
        let multi = |lexer: &mut Self, words: &[&str], tok: Tok| -> Option<Tok> {
            let end = lexer.match_words(lexer.pos, words)?;
            lexer.pos = end;
            Some(tok)
        };

        let tok = match lower.as_str() {
            "comment" => {
                self.skip_to_eol();
                Tok::Comment
            }
            "function" => Tok::Function,
            "param" => Tok::Param,
            "invoke" => Tok::Invoke,
            "clear" => Tok::Clear,
            "if" => Tok::If,
            "elif" => Tok::ElIf,
            "else" => Tok::Else,
            "while" => Tok::While,
            "include" => Tok::Include,
            "assign" => Tok::Assign,
            "print" => Tok::Print,
            "exit" => Tok::Exit,
            "al_xlate" => Tok::AlXlate,
            "special_where" => Tok::SpecialWhere,
            "relate" => Tok::Relate,
            "unrelate" => Tok::Unrelate,
            "select" => multi(self, &["one"], Tok::SelectOne)
                .or_else(|| multi(self, &["any"], Tok::SelectAny))
                .or_else(|| multi(self, &["many"], Tok::SelectMany))
                .unwrap_or(Tok::DotWord(word)),
            "end" => multi(self, &["if"], Tok::EndIf)
                .or_else(|| multi(self, &["for"], Tok::EndFor))
                .or_else(|| multi(self, &["while"], Tok::EndWhile))
                .or_else(|| multi(self, &["function"], Tok::EndFunction))
                .unwrap_or(Tok::End),
            "for" => multi(self, &["each"], Tok::For).unwrap_or(Tok::DotWord(word)),
            "break" => multi(self, &["for"], Tok::BreakFor)
                .or_else(|| multi(self, &["while"], Tok::BreakWhile))
                .unwrap_or(Tok::DotWord(word)),
            "emit" => multi(self, &["to", "file"], Tok::Emit).unwrap_or(Tok::DotWord(word)),
            "create" => multi(self, &["object", "instance"], Tok::CreateObj)
                .unwrap_or(Tok::DotWord(word)),
            "delete" => multi(self, &["object", "instance"], Tok::DeleteObj)
                .unwrap_or(Tok::DotWord(word)),
            _ => Tok::DotWord(word),
        };
        Ok(tok)
    }

    // ── Literal text ──────────────────────────────────────────────────────────

    fn lex_literal(&mut self) -> Option<Tok> {
        let mut buf = Vec::new();
        while let Some(c) = self.peek() {
            match c {
                b'\n' => break,
                b'$' if self.peek2() == Some(b'$') => {
                    buf.push(b'$');
                    self.pos += 2;
                }
                b'$' => break,
                _ => {
                    buf.push(c);
                    self.pos += 1;
                }
            }
        }
        if !buf.is_empty() {
            return Some(Tok::Literal(String::from_utf8_lossy(&buf).into_owned()));
        }
        match self.advance() {
            Some(b'\n') => {
                self.begin(Mode::Initial);
                Some(Tok::Newline)
            }
            _ => {
                self.push(Mode::PreSubst);
                Some(Tok::Dollar)
            }
        }
    }

    // ── Control line ──────────────────────────────────────────────────────────

    fn lex_control(&mut self) -> Result<Option<Tok>, ParseError> {
        let Some(ch) = self.peek() else { return Ok(None) };
        match ch {
            b'\n' => {
                self.advance();
                self.begin(Mode::Initial);
                Ok(Some(Tok::Newline))
            }
            b' ' | b'\t' | b'\r' | b';' => {
                self.advance();
                Ok(None)
            }
            b'.' if self.peek2() == Some(b'/') && self.src.get(self.pos + 2) == Some(&b'/') => {
                self.skip_to_eol();
                Ok(Some(Tok::Comment))
            }
            b'.' if self.match_comment_word() => {
                self.skip_to_eol();
                Ok(Some(Tok::Comment))
            }
            b'.' if self.peek2().is_some_and(|c| c.is_ascii_digit()) => {
                Ok(Some(self.read_number()))
            }
            b'0'..=b'9' => Ok(Some(self.read_number())),
            b'"' => {
                self.advance();
                self.push(Mode::Str);
                Ok(Some(Tok::DQuote))
            }
            b'$' => {
                self.advance();
                self.push(Mode::PreSubst);
                Ok(Some(Tok::Dollar))
            }
            b'[' => {
                self.advance();
                self.push(Mode::RelTraversal);
                Ok(Some(Tok::LBrack))
            }
            b'\'' => self.read_phrase().map(Some),
            c if Self::is_word_start(c) => Ok(Some(self.lex_keyword_or_word())),
            _ => match self.read_operator() {
                Some(tok) => Ok(Some(tok)),
                None => {
                    self.skip_illegal("control statement");
                    Ok(None)
                }
            },
        }
    }

    fn match_comment_word(&self) -> bool {
        let end = self.pos + 1 + "comment".len();
        self.src
            .get(self.pos + 1..end)
            .is_some_and(|w| w.eq_ignore_ascii_case(b"comment"))
            && !self.src.get(end).is_some_and(|&c| Self::is_word_char(c))
    }

    fn lex_keyword_or_word(&mut self) -> Tok {
        let word = self.read_word();
        let lower = word.to_ascii_lowercase();
        let ws_follows = self.ws_at(self.pos);
        let paren_follows = self.peek() == Some(b'(');

        match lower.as_str() {
            "where" if ws_follows => Tok::Where,
            "in" if ws_follows => Tok::In,
            "of" if ws_follows => Tok::Of,
            "and" if ws_follows || paren_follows => Tok::And,
            "or" if ws_follows || paren_follows => Tok::Or,
            "ordered_by" if ws_follows || paren_follows => Tok::OrderedBy,
            "reverse_ordered_by" if ws_follows || paren_follows => Tok::ReverseOrderedBy,
            "not_empty" | "not_first" | "not_last" | "not" | "empty" | "first" | "last"
            | "cardinality"
                if ws_follows || paren_follows =>
            {
                Tok::Uop(lower)
            }
            "related" => match self.match_words(self.pos, &["by"]) {
                Some(end) if self.ws_at(end) => {
                    self.pos = end;
                    Tok::RelatedBy
                }
                _ => Tok::Word(word),
            },
            "from" => match self.match_words(self.pos, &["instances", "of"]) {
                Some(end) if self.ws_at(end) => {
                    self.pos = end;
                    Tok::FromInstancesOf
                }
                _ => Tok::Word(word),
            },
            "boolean" | "integer" | "real" | "string" | "unique_id" | "inst_ref"
            | "inst_ref_set" | "frag_ref" => {
                if self.peek() == Some(b'<') {
                    let start = self.pos + 1;
                    let mut end = start;
                    while self.src.get(end).is_some_and(|&c| Self::is_word_char(c)) {
                        end += 1;
                    }
                    if end > start && self.src.get(end) == Some(&b'>') {
                        let kind = self.text(start, end);
                        self.pos = end + 1;
                        return Tok::Type { name: lower, kind: Some(kind) };
                    }
                }
                if ws_follows {
                    Tok::Type { name: lower, kind: None }
                } else {
                    Tok::Word(word)
                }
            }
            _ => Tok::Word(word),
        }
    }

    fn read_number(&mut self) -> Tok {
        let start = self.pos;
        let mut is_real = false;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some(b'.') {
            let after = self.peek2();
            if after.is_some_and(|c| c.is_ascii_digit()) {
                is_real = true;
                self.pos += 1;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            } else if self.pos > start && !after.is_some_and(|c| c.is_ascii_alphabetic() || c == b'_') {
                is_real = true;
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let mut p = self.pos + 1;
            if matches!(self.src.get(p), Some(b'+' | b'-')) {
                p += 1;
            }
            if self.src.get(p).is_some_and(|c| c.is_ascii_digit()) {
                is_real = true;
                self.pos = p;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }
        let text = self.text(start, self.pos);
        if is_real && matches!(self.peek(), Some(b'f' | b'F' | b'l' | b'L')) {
            self.pos += 1;
        }
        if is_real {
            Tok::Real(text.parse().unwrap_or(0.0))
        } else {
            match text.parse() {
                Ok(n) => Tok::Int(n),
                Err(_) => Tok::Real(text.parse().unwrap_or(0.0)),
            }
        }
    }

    fn read_phrase(&mut self) -> Result<Tok, ParseError> {
        self.advance(); // opening quote
        let start = self.pos;
        loop {
            match self.peek() {
                Some(b'\'') => {
                    let phrase = self.text(start, self.pos);
                    self.advance();
                    return Ok(Tok::Phrase(phrase));
                }
                None | Some(b'\n') => return Err(self.error("unterminated phrase")),
                Some(_) => self.pos += 1,
            }
        }
    }

    fn read_operator(&mut self) -> Option<Tok> {
        let two = |lexer: &mut Self, next: u8, long: Tok, short: Tok| {
            if lexer.eat(next) {
                long
            } else {
                short
            }
        };
        let ch = self.peek()?;
        let tok = match ch {
            b'-' => {
                self.advance();
                two(self, b'>', Tok::Arrow, Tok::Minus)
            }
            b'<' => {
                self.advance();
                two(self, b'=', Tok::Le, Tok::Lt)
            }
            b'>' => {
                self.advance();
                two(self, b'=', Tok::Ge, Tok::Gt)
            }
            b'=' => {
                self.advance();
                two(self, b'=', Tok::EqEq, Tok::Eq)
            }
            b'!' if self.peek2() == Some(b'=') => {
                self.pos += 2;
                Tok::Ne
            }
            b'.' => {
                self.advance();
                Tok::Dot
            }
            b',' | b'(' | b')' | b'{' | b'}' | b'*' | b'+' | b'|' | b'/' | b'%' | b'&'
            | b'^' | b':' => {
                self.advance();
                match ch {
                    b',' => Tok::Comma,
                    b'(' => Tok::LParen,
                    b')' => Tok::RParen,
                    b'{' => Tok::LBrace,
                    b'}' => Tok::RBrace,
                    b'*' => Tok::Star,
                    b'+' => Tok::Plus,
                    b'|' => Tok::Pipe,
                    b'/' => Tok::Slash,
                    b'%' => Tok::Percent,
                    b'&' => Tok::Amp,
                    b'^' => Tok::Caret,
                    _ => Tok::Colon,
                }
            }
            _ => return None,
        };
        Some(tok)
    }

    // ── Strings ───────────────────────────────────────────────────────────────

    fn lex_str(&mut self) -> Option<Tok> {
        let mut buf = Vec::new();
        while let Some(c) = self.peek() {
            match (c, self.peek2()) {
                (b'"', Some(b'"')) => {
                    buf.push(b'"');
                    self.pos += 2;
                }
                (b'$', Some(b'$')) => {
                    buf.push(b'$');
                    self.pos += 2;
                }
                (b'"' | b'$', _) => break,
                _ => {
                    buf.push(c);
                    self.advance();
                }
            }
        }
        if !buf.is_empty() {
            return Some(Tok::Text(String::from_utf8_lossy(&buf).into_owned()));
        }
        match self.advance() {
            Some(b'"') => {
                self.pop();
                Some(Tok::DQuote)
            }
            _ => {
                self.push(Mode::PreSubst);
                Some(Tok::Dollar)
            }
        }
    }

    // ── Substitutions ─────────────────────────────────────────────────────────

    fn lex_pre_subst(&mut self) -> Result<Option<Tok>, ParseError> {
        let Some(ch) = self.peek() else { return Ok(None) };
        match ch {
            b'{' => {
                self.advance();
                self.pop();
                self.push(Mode::Subst);
                Ok(Some(Tok::LBrace))
            }
            b't' | b'T' => {
                let start = self.pos;
                while !matches!(self.peek(), None | Some(b'{' | b'\n' | b'"')) {
                    self.pos += 1;
                }
                if self.peek() != Some(b'{') {
                    return Err(self.error("unterminated substitution"));
                }
                Ok(Some(Tok::Format(self.text(start, self.pos))))
            }
            b'o' | b'O' | b'c' | b'C' | b'l' | b'L' | b'r' | b'R' | b'u' | b'U' | b'_' => {
                self.advance();
                Ok(Some(Tok::Format((ch as char).to_string())))
            }
            b'\n' => Err(self.error("unterminated substitution")),
            _ => {
                let rest = String::from_utf8_lossy(&self.src[self.pos..]);
                let c = rest.chars().next().unwrap_or('?');
                Err(self.error(format!("invalid substitution format '{}'", c.escape_default())))
            }
        }
    }

    fn lex_subst(&mut self) -> Result<Option<Tok>, ParseError> {
        let Some(ch) = self.peek() else { return Ok(None) };
        match ch {
            b'}' => {
                self.advance();
                self.pop();
                Ok(Some(Tok::RBrace))
            }
            b'\n' => Err(self.error("unterminated substitution")),
            b' ' | b'\t' | b'\r' => {
                self.advance();
                Ok(None)
            }
            b'$' => {
                self.advance();
                self.push(Mode::PreSubst);
                Ok(Some(Tok::Dollar))
            }
            b'[' => {
                self.advance();
                self.push(Mode::RelTraversal);
                Ok(Some(Tok::LBrack))
            }
            b'"' => {
                self.advance();
                self.push(Mode::Str);
                Ok(Some(Tok::DQuote))
            }
            b'0'..=b'9' => Ok(Some(self.read_number())),
            c if Self::is_word_start(c) => Ok(Some(Tok::Word(self.read_word()))),
            _ => match self.read_operator() {
                Some(tok) => Ok(Some(tok)),
                None => {
                    self.skip_illegal("substitution");
                    Ok(None)
                }
            },
        }
    }

    // ── Relationship traversal ────────────────────────────────────────────────

    fn lex_rel_traversal(&mut self) -> Result<Option<Tok>, ParseError> {
        let Some(ch) = self.peek() else { return Ok(None) };
        match ch {
            b']' => {
                self.advance();
                self.pop();
                Ok(Some(Tok::RBrack))
            }
            b'.' => {
                self.advance();
                Ok(Some(Tok::Dot))
            }
            b'\'' => self.read_phrase().map(Some),
            b' ' | b'\t' | b'\r' => {
                self.advance();
                Ok(None)
            }
            b'\n' => Err(self.error("unterminated relationship traversal")),
            b'R' | b'r' if self.peek2().is_some_and(|c| c.is_ascii_digit()) => {
                self.advance();
                let start = self.pos;
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
                let digits = self.text(start, self.pos);
                digits
                    .parse()
                    .map(|n| Some(Tok::RelId(n)))
                    .map_err(|_| self.error(format!("invalid relationship id 'R{digits}'")))
            }
            c if Self::is_word_start(c) => {
                let word = self.read_word();
                match word.as_str() {
                    "RI" | "IR" => Ok(Some(Tok::RelDir(word))),
                    _ => Ok(Some(Tok::Word(word))),
                }
            }
            _ => {
                self.skip_illegal("relationship traversal");
                Ok(None)
            }
        }
    }
}

/// Convenience wrapper: tokenize `src` attributed to `file`.
pub fn tokenize(src: &str, file: &str) -> Result<Vec<Token>, ParseError> {
    Lexer::new(src, Rc::from(file)).tokenize()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src, "test.arc")
            .expect("lex failed")
            .into_iter()
            .map(|t| t.tok)
            .collect()
    }

    fn word(s: &str) -> Tok {
        Tok::Word(s.into())
    }

    #[test]
    fn literal_line() {
        assert_eq!(
            toks("hello world\n"),
            vec![Tok::Literal(String::new()), Tok::Literal("hello world".into()), Tok::Newline, Tok::Eof]
        );
    }

    #[test]
    fn literal_keeps_leading_whitespace() {
        assert_eq!(
            toks("  x\n"),
            vec![Tok::Literal("  ".into()), Tok::Literal("x".into()), Tok::Newline, Tok::Eof]
        );
    }

    #[test]
    fn empty_line_is_newline() {
        assert_eq!(toks("\n"), vec![Tok::Newline, Tok::Eof]);
    }

    #[test]
    fn double_dollar_in_literal() {
        assert_eq!(
            toks("$$5\n"),
            vec![Tok::Literal(String::new()), Tok::Literal("$5".into()), Tok::Newline, Tok::Eof]
        );
    }

    #[test]
    fn dotdot_escapes_literal_dot() {
        assert_eq!(
            toks("..comment\n"),
            vec![Tok::Literal(String::new()), Tok::Literal(".comment".into()), Tok::Newline, Tok::Eof]
        );
    }

    #[test]
    fn control_keywords_are_case_insensitive() {
        assert_eq!(toks(".IF (x)\n")[0], Tok::If);
        assert_eq!(toks(".End  If\n")[0], Tok::EndIf);
        assert_eq!(toks(".select   many s from instances of A\n")[0], Tok::SelectMany);
        assert_eq!(toks(".Emit to File \"x\"\n")[0], Tok::Emit);
        assert_eq!(toks(".create object instance a of A\n")[0], Tok::CreateObj);
    }

    #[test]
    fn bare_end() {
        assert_eq!(toks(".end\n"), vec![Tok::End, Tok::Newline, Tok::Eof]);
    }

    #[test]
    fn unknown_control_word() {
        assert_eq!(toks(".bogus\n")[0], Tok::DotWord("bogus".into()));
        assert_eq!(toks(".\n")[0], Tok::Dot);
    }

    #[test]
    fn comments() {
        assert_eq!(toks(".// anything $ goes\n"), vec![Tok::Comment, Tok::Newline, Tok::Eof]);
        assert_eq!(toks(".COMMENT stuff\n"), vec![Tok::Comment, Tok::Newline, Tok::Eof]);
        assert_eq!(
            toks(".assign x = 1 .// trailing\n"),
            vec![Tok::Assign, word("x"), Tok::Eq, Tok::Int(1), Tok::Comment, Tok::Newline, Tok::Eof]
        );
    }

    #[test]
    fn select_keywords() {
        assert_eq!(
            toks(".select any a from instances of A where (x)\n"),
            vec![
                Tok::SelectAny,
                word("a"),
                Tok::FromInstancesOf,
                word("A"),
                Tok::Where,
                Tok::LParen,
                word("x"),
                Tok::RParen,
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn navigation_chain() {
        assert_eq!(
            toks(".select one b related by a->B[R12.'next']\n"),
            vec![
                Tok::SelectOne,
                word("b"),
                Tok::RelatedBy,
                word("a"),
                Tok::Arrow,
                word("B"),
                Tok::LBrack,
                Tok::RelId(12),
                Tok::Dot,
                Tok::Phrase("next".into()),
                Tok::RBrack,
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn keywords_need_trailing_space() {
        assert_eq!(toks(".assign inx = 1\n")[1], word("inx"));
        assert_eq!(toks(".exit empty s\n")[1], Tok::Uop("empty".into()));
        assert_eq!(toks(".assign x = emptyish\n")[3], word("emptyish"));
        assert_eq!(toks(".assign x = empty\n")[3], Tok::Uop("empty".into()));
    }

    #[test]
    fn typed_param() {
        assert_eq!(
            toks(".param inst_ref<Obj> o\n")[1],
            Tok::Type { name: "inst_ref".into(), kind: Some("Obj".into()) }
        );
        assert_eq!(toks(".param Integer n\n")[1], Tok::Type { name: "integer".into(), kind: None });
    }

    #[test]
    fn numbers() {
        assert_eq!(toks(".exit 42\n")[1], Tok::Int(42));
        assert_eq!(toks(".exit 1.5\n")[1], Tok::Real(1.5));
        assert_eq!(toks(".exit .5\n")[1], Tok::Real(0.5));
        assert_eq!(toks(".exit 2e3\n")[1], Tok::Real(2000.0));
    }

    #[test]
    fn operators() {
        assert_eq!(
            toks(".exit a <= b != c -> d\n")[1..8].to_vec(),
            vec![word("a"), Tok::Le, word("b"), Tok::Ne, word("c"), Tok::Arrow, word("d")]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            toks(".print \"say \"\"hi\"\" $$5\"\n"),
            vec![
                Tok::Print,
                Tok::DQuote,
                Tok::Text("say \"hi\" $5".into()),
                Tok::DQuote,
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn substitution_in_string() {
        assert_eq!(
            toks(".print \"a ${x.y} b\"\n"),
            vec![
                Tok::Print,
                Tok::DQuote,
                Tok::Text("a ".into()),
                Tok::Dollar,
                Tok::LBrace,
                word("x"),
                Tok::Dot,
                word("y"),
                Tok::RBrace,
                Tok::Text(" b".into()),
                Tok::DQuote,
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn substitution_formats() {
        assert_eq!(
            toks("$Cr{x}\n"),
            vec![
                Tok::Literal(String::new()),
                Tok::Dollar,
                Tok::Format("C".into()),
                Tok::Format("r".into()),
                Tok::LBrace,
                word("x"),
                Tok::RBrace,
                Tok::Newline,
                Tok::Eof,
            ]
        );
        assert_eq!(toks("$tcf_kl{x}\n")[2], Tok::Format("tcf_kl".into()));
    }

    #[test]
    fn lone_dollar_is_an_error() {
        assert!(tokenize("$\n", "f").is_err());
        assert!(tokenize("cost $5\n", "f").is_err());
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = tokenize(".print \"abc\n", "f.arc").unwrap_err();
        assert_eq!(err.file, "f.arc");
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn illegal_character_is_skipped() {
        assert_eq!(
            toks(".assign x = 1 @\n"),
            vec![Tok::Assign, word("x"), Tok::Eq, Tok::Int(1), Tok::Newline, Tok::Eof]
        );
    }

    #[test]
    fn line_numbers() {
        let tokens = tokenize("a\n\n.if (x)\n", "f").unwrap();
        let if_tok = tokens.iter().find(|t| t.tok == Tok::If).unwrap();
        assert_eq!(if_tok.line, 3);
    }
}
