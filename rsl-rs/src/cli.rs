//! Command-line argument parsing.
//!
//! Usage:
//!   gen_erate [-arch <file>] ... [-import <file>] ... [-include <dir>] ...
//!             [-emit never|change|always] [-f <db>] [-force] [-integrity]
//!             [-diff <file>] [-nopersist] [-qim] [-v <level>] [//] [-version] [-h]
//!   rsl-lint  [-i <sql>] ... [-I <dir>] ... [-v] <file.arc> ...
//!
//! `gen_erate` flags are whole words; several legacy flags are accepted and
//! ignored, some of them along with the value that follows.

use std::fmt;
use std::path::PathBuf;

use crate::emit::EmitMode;

pub const DEFAULT_DATABASE: &str = "mcdbms.gen";

/// Flags accepted for compatibility and otherwise ignored.
const IGNORED_FLAGS: &[&str] = &["-lVHs", "-lSCs", "-l2b", "-l2s", "-l3b", "-l3s", "-q", "-l"];

/// Ignored flags that consume the following argument.
const IGNORED_VALUE_FLAGS: &[&str] = &["-d", "-priority", "-e", "-t", "-#"];

// ── Public types ──────────────────────────────────────────────────────────────

/// One input file, processed in command-line order.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// `-arch <file>`: an archetype to evaluate.
    Arch(PathBuf),
    /// `-import <file>`: SQL to load into the model.
    Import(PathBuf),
}

/// Parsed `gen_erate` arguments.  Options left `None`/`false` fall back to
/// `.rslrc` and then to built-in defaults.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct GenArgs {
    pub inputs: Vec<Input>,
    /// `-include <dir>`, in order.
    pub includes: Vec<PathBuf>,
    pub emit: Option<EmitMode>,
    /// `-f <db>`.
    pub database: Option<PathBuf>,
    pub force: bool,
    pub integrity: bool,
    pub diff: Option<PathBuf>,
    pub nopersist: bool,
    /// `-qim`: stop at the first import that fails to load.
    pub quit_on_import_error: bool,
    /// `-v <level>`; the level itself is not interpreted.
    pub verbose: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenCommand {
    Run(GenArgs),
    Help,
    Version,
}

/// Parsed `rsl-lint` arguments.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LintArgs {
    pub imports: Vec<PathBuf>,
    pub includes: Vec<PathBuf>,
    pub verbosity: usize,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LintCommand {
    Run(LintArgs),
    Help,
    Version,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CliError {
    /// An argument no flag matches.
    Unknown(String),
    /// A flag given without its value.
    MissingValue(String),
    /// A flag whose value does not parse.
    BadValue { flag: String, message: String },
    /// `rsl-lint` with no archetype files.
    NoFiles,
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Unknown(arg) => write!(f, "PARSE ERROR: Argument: {arg}"),
            CliError::MissingValue(flag) => write!(f, "PARSE ERROR: {flag} requires a value"),
            CliError::BadValue { flag, message } => write!(f, "PARSE ERROR: {flag}: {message}"),
            CliError::NoFiles => write!(f, "no archetype files given"),
        }
    }
}

impl std::error::Error for CliError {}

// ── gen_erate ─────────────────────────────────────────────────────────────────

/// Parse a slice of argument strings, not including the program name.
pub fn parse_gen_argv(argv: &[String]) -> Result<GenCommand, CliError> {
    let mut args = GenArgs::default();
    let mut it = argv.iter();

    while let Some(arg) = it.next() {
        let arg = arg.as_str();
        let mut value = || it.next().cloned().ok_or_else(|| CliError::MissingValue(arg.to_owned()));
        match arg {
            "-arch" => args.inputs.push(Input::Arch(PathBuf::from(value()?))),
            "-import" => args.inputs.push(Input::Import(PathBuf::from(value()?))),
            "-include" => args.includes.push(PathBuf::from(value()?)),
            "-emit" => {
                let v = value()?;
                let mode = v
                    .parse()
                    .map_err(|message| CliError::BadValue { flag: arg.to_owned(), message })?;
                args.emit = Some(mode);
            }
            "-f" => args.database = Some(PathBuf::from(value()?)),
            "-diff" => args.diff = Some(PathBuf::from(value()?)),
            "-v" => {
                value()?;
                args.verbose = true;
            }
            "-force" => args.force = true,
            "-integrity" => args.integrity = true,
            "-nopersist" => args.nopersist = true,
            "-qim" => args.quit_on_import_error = true,
            "-version" => return Ok(GenCommand::Version),
            "-h" => return Ok(GenCommand::Help),
            "//" | "-ignore_rest" => break,
            a if IGNORED_FLAGS.contains(&a) => {}
            a if IGNORED_VALUE_FLAGS.contains(&a) => {
                value()?;
            }
            other => return Err(CliError::Unknown(other.to_owned())),
        }
    }

    Ok(GenCommand::Run(args))
}

pub fn gen_brief_usage(prog: &str) -> String {
    format!(
        "Brief USAGE:\n   {prog}  [-arch <string>] ... [-import <string>] ... [-include <string>] ... \
         [-diff <string>] [-emit <string>] [-nopersist] [-force] [-integrity] [-qim] [-v <string>] \
         [-f <string>] [//] [-version] [-h]\n\n\
         For complete USAGE and HELP type:\n   {prog} -h\n"
    )
}

pub fn gen_usage(prog: &str) -> String {
    format!(
        "USAGE:\n\n   {prog}  [-arch <string>] ... [-import <string>] ... [-include <string>] ... \
         [-diff <string>] [-emit <string>] [-nopersist] [-force] [-integrity] [-qim] [-v <string>] \
         [-f <string>] [//] [-version] [-h]\n\n\
Where:\n\n\
   -arch <string>  (accepted multiple times)\n     Archetype file name(s)\n\n\
   -import <string>  (accepted multiple times)\n     SQL data file name(s)\n\n\
   -include <string>  (accepted multiple times)\n     Add a directory to search for include files\n\n\
   -diff <string>\n     Append a diff of every emit to this file\n\n\
   -emit <string>\n     When to emit: never, change (default) or always\n\n\
   -nopersist\n     Do not load or save the database\n\n\
   -force\n     Make read-only emit targets writable\n\n\
   -integrity\n     Check the model for integrity violations on exit\n\n\
   -qim\n     Quit when an import fails to load\n\n\
   -v <string>\n     Verbose logging\n\n\
   -f <string>\n     Database file name (default {DEFAULT_DATABASE})\n\n\
   //,  -ignore_rest\n     Ignore the remaining arguments\n\n\
   -version\n     Display version information and exit\n\n\
   -h\n     Display usage information and exit\n\n\
   Accepted and ignored: -lVHs -lSCs -l2b -l2s -l3b -l3s -q -l, and -d -priority -e -t -# with a value.\n"
    )
}

// ── rsl-lint ──────────────────────────────────────────────────────────────────

pub fn parse_lint_argv(argv: &[String]) -> Result<LintCommand, CliError> {
    let mut args = LintArgs::default();
    let mut it = argv.iter();

    while let Some(arg) = it.next() {
        let arg = arg.as_str();
        let mut value = || it.next().cloned().ok_or_else(|| CliError::MissingValue(arg.to_owned()));
        match arg {
            "-i" | "--import" => args.imports.push(PathBuf::from(value()?)),
            "-I" | "--include" => args.includes.push(PathBuf::from(value()?)),
            "-h" | "--help" => return Ok(LintCommand::Help),
            "--version" => return Ok(LintCommand::Version),
            a if a.starts_with("--import=") => args.imports.push(PathBuf::from(&a[9..])),
            a if a.starts_with("--include=") => args.includes.push(PathBuf::from(&a[10..])),
            // -v, -vv, ...
            a if a.len() > 1 && a.starts_with('-') && a[1..].chars().all(|c| c == 'v') => {
                args.verbosity += a.len() - 1;
            }
            "--verbosity" => args.verbosity += 1,
            a if a.starts_with('-') && a != "-" => return Err(CliError::Unknown(a.to_owned())),
            file => args.files.push(PathBuf::from(file)),
        }
    }

    if args.files.is_empty() {
        return Err(CliError::NoFiles);
    }
    Ok(LintCommand::Run(args))
}

pub fn lint_usage(prog: &str) -> String {
    format!(
        "Usage: {prog} [options] script.arc [another_script.arc]\n\n\
Options:\n\
  -i, --import PATH    import model information from PATH\n\
  -I, --include PATH   add PATH to list of dirs to search for include files\n\
  -v, --verbosity      increase debug logging level\n\
  -h, --help           show this help message and exit\n\
  --version            show the version and exit\n"
    )
}

pub fn version_string() -> String {
    format!("{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
