//! Services the evaluator calls into.
//!
//! A [`Runtime`] owns everything that outlives a single statement: the
//! object model, the output buffer, registered functions, bridges and
//! formatters, the include cache, the emission policy and the `info` object.
//! One runtime serves one top-level evaluation.

use std::collections::HashMap;
use std::ffi::CStr;
use std::io::Write;
use std::path::Path;
use std::rc::Rc;

use regex::Regex;

use super::ast::{Body, FunctionDef};
use super::bridges::BridgeRegistry;
use super::format::FormatterRegistry;
use super::value::Value;
use crate::emit::{self, EmitOptions, Outcome};
use crate::model::MetaModel;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Where `.print` lines, emit reports and error tracebacks go.
#[derive(Debug, Clone, PartialEq)]
pub enum Sink {
    Stdout,
    Capture(String),
}

impl Sink {
    fn write_line(&mut self, line: &str) {
        match self {
            Sink::Stdout => {
                let mut out = std::io::stdout().lock();
                let _ = writeln!(out, "{line}");
            }
            Sink::Capture(buf) => {
                buf.push_str(line);
                buf.push('\n');
            }
        }
    }
}

/// Current source position, readable through `info`.
#[derive(Debug, Clone)]
pub struct Info {
    pub file: Rc<str>,
    pub line: usize,
}

pub struct Runtime {
    pub model: MetaModel,
    pub emit: EmitOptions,
    pub bridges: BridgeRegistry,
    pub formatters: FormatterRegistry,
    pub sink: Sink,
    pub info: Info,
    pub(crate) functions: HashMap<String, Rc<FunctionDef>>,
    pub(crate) include_cache: HashMap<String, Rc<Body>>,
    buffer: String,
}

impl Runtime {
    pub fn new(model: MetaModel) -> Self {
        Runtime {
            model,
            emit: EmitOptions::default(),
            bridges: BridgeRegistry::default(),
            formatters: FormatterRegistry::default(),
            sink: Sink::Stdout,
            info: Info { file: Rc::from(""), line: 0 },
            functions: HashMap::new(),
            include_cache: HashMap::new(),
            buffer: String::new(),
        }
    }

    pub fn with_emit(mut self, emit: EmitOptions) -> Self {
        self.emit = emit;
        self
    }

    /// Collect printed lines in memory instead of writing to stdout.
    pub fn capture_output(mut self) -> Self {
        self.sink = Sink::Capture(String::new());
        self
    }

    pub fn captured(&self) -> &str {
        match &self.sink {
            Sink::Capture(s) => s,
            Sink::Stdout => "",
        }
    }

    pub fn is_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    // ── Buffer ────────────────────────────────────────────────────────────────

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Append one evaluated literal line.
    ///
    /// | Ends with | Written                         |
    /// |-----------|---------------------------------|
    /// | `\\\`     | text minus two chars, no newline |
    /// | `\\`      | text minus one char, newline     |
    /// | `\`       | text minus the backslash         |
    /// | newline   | as is                            |
    /// | other     | text plus newline                |
    pub fn buffer_literal(&mut self, literal: &str) {
        if let Some(rest) = literal.strip_suffix("\\\\\\") {
            self.buffer.push_str(rest);
            self.buffer.push('\\');
        } else if let Some(rest) = literal.strip_suffix("\\\\") {
            self.buffer.push_str(rest);
            self.buffer.push_str("\\\n");
        } else if let Some(rest) = literal.strip_suffix('\\') {
            self.buffer.push_str(rest);
        } else {
            self.buffer.push_str(literal);
            if !literal.ends_with('\n') {
                self.buffer.push('\n');
            }
        }
    }

    /// Replace the buffer, returning the old contents.
    pub fn swap_buffer(&mut self, buffer: String) -> String {
        std::mem::replace(&mut self.buffer, buffer)
    }

    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
    }

    /// Flush the buffer to `path` under the configured policy.
    pub fn emit_buffer(&mut self, path: &str) -> Result<(), String> {
        let mut text = std::mem::take(&mut self.buffer);
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        let target = emit::normalize(Path::new(path));
        match emit::emit(&self.emit, &target, &text) {
            Ok(Outcome::Created) => self.print(&format!("File '{}' CREATED", target.display()), "INFO"),
            Ok(Outcome::Replaced) => self.print(&format!("File '{}' REPLACED", target.display()), "INFO"),
            Ok(Outcome::Skipped) => {}
            Err(e) => return Err(format!("unable to emit '{}': {e}", target.display())),
        }
        Ok(())
    }

    // ── Printing ──────────────────────────────────────────────────────────────

    /// `<file>: <line>:  <PREFIX>:  <message>` for the current position.
    pub fn print(&mut self, message: &str, prefix: &str) {
        let name = Path::new(&*self.info.file)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let line = format!("{name}: {}:  {prefix}:  {message}", self.info.line);
        self.sink.write_line(&line);
    }

    pub fn print_raw(&mut self, line: &str) {
        self.sink.write_line(line);
    }

    // ── Strings ───────────────────────────────────────────────────────────────

    pub fn format_string(&self, value: &Value, formats: &[String]) -> Result<String, String> {
        self.formatters.apply(&value.to_string(), formats)
    }

    /// Text after `keyword:` up to the end of that line, trimmed; `""` when
    /// the keyword does not occur.
    pub fn parse_keyword(text: &str, keyword: &str) -> String {
        let Ok(re) = Regex::new(&format!("{}:([^\n]*)", regex::escape(keyword))) else {
            return String::new();
        };
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default()
    }

    // ── info ──────────────────────────────────────────────────────────────────

    pub fn set_location(&mut self, file: &Rc<str>, line: usize) {
        if !Rc::ptr_eq(&self.info.file, file) {
            self.info.file = file.clone();
        }
        self.info.line = line;
    }

    /// Directory of the archetype being evaluated, `""` for a bare name.
    pub fn arch_folder_path(&self) -> String {
        Path::new(&*self.info.file)
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }

    pub fn info_attr(&mut self, name: &str) -> Result<Value, String> {
        Ok(match name {
            "arch_file_name" => Value::Str(
                Path::new(&*self.info.file)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            ),
            "arch_file_path" => Value::Str(self.info.file.to_string()),
            "arch_file_line" => Value::Int(self.info.line as i64),
            "arch_folder_path" => Value::Str(self.arch_folder_path()),
            "date" => Value::Str(chrono::Local::now().format("%a %b %e %H:%M:%S %Y").to_string()),
            "unique_num" => Value::Int(self.model.next_id()),
            "user_id" => Value::Str(user_id()),
            "interpreter_version" => Value::Str(VERSION.to_string()),
            "interpreter_platform" => Value::Str(std::env::consts::FAMILY.to_string()),
            other => return Err(format!("info has no attribute {other}")),
        })
    }
}

/// Login name of the current user.
fn user_id() -> String {
    #[cfg(unix)]
    {
        // SAFETY: getpwuid returns a pointer into static storage or null; the
        // name is copied out before any other passwd call can run.
        let name = unsafe {
            let pw = libc::getpwuid(libc::getuid());
            if pw.is_null() || (*pw).pw_name.is_null() {
                None
            } else {
                Some(CStr::from_ptr((*pw).pw_name).to_string_lossy().into_owned())
            }
        };
        if let Some(name) = name {
            return name;
        }
    }
    std::env::var("USER").or_else(|_| std::env::var("USERNAME")).unwrap_or_default()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn rt() -> Runtime {
        Runtime::new(MetaModel::new()).capture_output()
    }

    #[test]
    fn literal_escapes() {
        let mut r = rt();
        r.buffer_literal("Hello \\");
        r.buffer_literal("world");
        assert_eq!(r.buffer(), "Hello world\n");

        let mut r = rt();
        r.buffer_literal("a\\\\");
        r.buffer_literal("b\\\\\\");
        r.buffer_literal("\n");
        assert_eq!(r.buffer(), "a\\\nb\\\n");
    }

    #[test]
    fn swap_buffer_isolates() {
        let mut r = rt();
        r.buffer_literal("outer");
        let saved = r.swap_buffer(String::new());
        r.buffer_literal("inner");
        let inner = r.swap_buffer(saved);
        assert_eq!(inner, "inner\n");
        assert_eq!(r.buffer(), "outer\n");
    }

    #[test]
    fn print_format() {
        let mut r = rt();
        r.set_location(&Rc::from("dir/a.arc"), 3);
        r.print("hello", "INFO");
        assert_eq!(r.captured(), "a.arc: 3:  INFO:  hello\n");
    }

    #[test]
    fn keywords() {
        let text = "Name: Foo \nTYPE:bar\n";
        assert_eq!(Runtime::parse_keyword(text, "Name"), "Foo");
        assert_eq!(Runtime::parse_keyword(text, "TYPE"), "bar");
        assert_eq!(Runtime::parse_keyword(text, "Other"), "");
    }

    #[test]
    fn info_attributes() {
        let mut r = rt();
        r.set_location(&Rc::from("/x/y/z.arc"), 7);
        assert_eq!(r.info_attr("arch_file_name").unwrap(), Value::Str("z.arc".into()));
        assert_eq!(r.info_attr("arch_folder_path").unwrap(), Value::Str("/x/y".into()));
        assert_eq!(r.info_attr("arch_file_line").unwrap(), Value::Int(7));
        let a = r.info_attr("unique_num").unwrap();
        let b = r.info_attr("unique_num").unwrap();
        assert_ne!(a, b);
        assert!(r.info_attr("nope").is_err());
    }

    #[test]
    fn emit_reports() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt").display().to_string();
        let mut r = rt();
        r.buffer_literal("x\\");
        r.emit_buffer(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "x\n");
        assert!(r.captured().contains("CREATED"));
        assert_eq!(r.buffer(), "");
    }
}
