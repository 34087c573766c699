//! Archetype language.
//!
//! This module implements a tree-walking interpreter for archetype files,
//! covering:
//!
//! - Literal output lines with `${expr}` substitutions and `$fmt{expr}`
//!   formatting
//! - Control flow: `.if` … `.elif` … `.else` … `.end if`, `.while`,
//!   `.for each`, `.break`, `.exit`
//! - Functions (`.function` / `.param` / `.invoke`) returning fragments
//! - Object model statements: `.create`, `.delete`, `.select`, `.relate`,
//!   `.unrelate`
//! - File output with `.emit to file`, `.include` and native bridges
//!
//! # Quick start
//!
//! ```rust
//! use rsl::model::MetaModel;
//! use rsl::script::{evaluate, parse_text, Runtime, Value};
//!
//! let body = parse_text(".assign x = 6\n.exit x * 7\n", "quick.arc").unwrap();
//! let mut rt = Runtime::new(MetaModel::new()).capture_output();
//! assert_eq!(evaluate(&mut rt, &body, &[]).unwrap(), Some(Value::Int(42)));
//! ```

pub mod ast;
pub mod bridges;
pub mod eval;
pub mod format;
pub mod lexer;
pub mod parser;
pub mod runtime;
pub mod symtab;
pub mod value;

// Re-exports for convenience.
pub use eval::{evaluate, EvalError};
pub use lexer::ParseError;
pub use parser::{parse_file, parse_text};
pub use runtime::Runtime;
pub use value::Value;
