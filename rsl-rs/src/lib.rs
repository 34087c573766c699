//! Rule-specification language (RSL) interpreter.
//!
//! Archetype files are parsed into a syntax tree and evaluated against an
//! in-memory object model loaded from SQL.  Literal lines accumulate in an
//! output buffer that `.emit to file` writes to disk.
//!
//! | Module | Role |
//! |--------|------|
//! | [`script`] | lexer, parser, evaluator and runtime services |
//! | [`model`] | classes, instances, associations and the SQL loader |
//! | [`emit`] | emission policy |
//! | [`lint`] | static checks |
//! | [`cli`], [`config`], [`logging`] | the `gen_erate` and `rsl-lint` binaries |

pub mod cli;
pub mod config;
pub mod emit;
pub mod lint;
pub mod logging;
pub mod model;
pub mod script;

pub use lint::lint_ast;
pub use model::MetaModel;
pub use script::{evaluate, parse_file, parse_text, Runtime, Value};
