//! `.rslrc` defaults file parser.
//!
//! | Directive | Action |
//! |-----------|--------|
//! | `/include <dir>` | append an include directory |
//! | `/set <name>=<value>` or `/set <name> <value>` | set an option |
//! | Lines starting with `;` | comment, ignored |
//! | Any other `/command` | silently skipped |
//!
//! Options understood by `/set`:
//!
//! | Name | Value |
//! |------|-------|
//! | `emit` | `never`, `change` or `always` |
//! | `force`, `persist`, `integrity`, `verbose` | `on`/`off`, `1`/`0`, `true`/`false` |
//! | `diff` | path of the diff file |
//! | `database` | path of the database file |
//!
//! Command-line flags override whatever the file sets.

use std::path::{Path, PathBuf};

use directories::BaseDirs;

use crate::emit::EmitMode;

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading a config file.
#[derive(Debug)]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Defaults for a `gen_erate` run.  `None` means "not set here".
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Config {
    pub includes: Vec<PathBuf>,
    pub emit: Option<EmitMode>,
    pub force: Option<bool>,
    pub diff: Option<PathBuf>,
    pub database: Option<PathBuf>,
    pub persist: Option<bool>,
    pub integrity: Option<bool>,
    pub verbose: Option<bool>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config string.
    ///
    /// Returns the config and a list of any errors on recognised lines.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Config::new();
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let lineno = i + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            let Some(rest) = line.strip_prefix('/') else { continue };

            let (cmd, args_str) = rest
                .split_once(|c: char| c.is_ascii_whitespace())
                .unwrap_or((rest, ""));
            let tokens = split_args(args_str.trim());

            let result = match cmd {
                "include" => match tokens.as_slice() {
                    [dir] => {
                        config.includes.push(PathBuf::from(dir));
                        Ok(())
                    }
                    _ => Err("/include: requires exactly one directory".to_owned()),
                },
                "set" => parse_set(&tokens, &mut config),
                _ => Ok(()),
            };
            if let Err(message) = result {
                errors.push(ConfigError { line: lineno, message });
            }
        }

        (config, errors)
    }

    /// Read and parse a config file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }
}

/// Where the user config lives: `$RSLRC` if set, else `~/.rslrc` when it
/// exists.
pub fn find_user_config() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("RSLRC") {
        return Some(PathBuf::from(path));
    }
    let dirs = BaseDirs::new()?;
    let path = dirs.home_dir().join(".rslrc");
    path.exists().then_some(path)
}

// ── Argument tokenizer ────────────────────────────────────────────────────────

/// Split `s` into whitespace-delimited tokens, honouring double-quoted strings
/// and `\"` escapes within them.
fn split_args(s: &str) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    cur.push(escaped);
                }
            }
            c if c.is_ascii_whitespace() && !in_quotes => {
                if !cur.is_empty() {
                    args.push(std::mem::take(&mut cur));
                }
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() {
        args.push(cur);
    }
    args
}

// ── /set ─────────────────────────────────────────────────────────────────────

fn parse_flag(name: &str, value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "on" | "true" | "yes" => Ok(true),
        "0" | "off" | "false" | "no" => Ok(false),
        _ => Err(format!("/set: {name} expects on or off, not '{value}'")),
    }
}

/// Parse `/set <name>=<value>` or `/set <name> <value>`.
fn parse_set(tokens: &[String], config: &mut Config) -> Result<(), String> {
    if tokens.is_empty() {
        return Err("/set: requires an argument".into());
    }

    let (name, value) = if let Some((n, v)) = tokens[0].split_once('=') {
        (n.to_owned(), v.to_owned())
    } else if tokens.len() >= 2 {
        (tokens[0].clone(), tokens[1..].join(" "))
    } else {
        return Err(format!("/set: missing value for '{}'", tokens[0]));
    };

    match name.as_str() {
        "emit" => config.emit = Some(value.parse()?),
        "force" => config.force = Some(parse_flag(&name, &value)?),
        "persist" => config.persist = Some(parse_flag(&name, &value)?),
        "integrity" => config.integrity = Some(parse_flag(&name, &value)?),
        "verbose" => config.verbose = Some(parse_flag(&name, &value)?),
        "diff" => config.diff = Some(PathBuf::from(value)),
        "database" => config.database = Some(PathBuf::from(value)),
        "" => return Err("/set: option name cannot be empty".into()),
        other => return Err(format!("/set: unknown option '{other}'")),
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // -- split_args -----------------------------------------------------------

    #[test]
    fn split_quoted_spaces() {
        assert_eq!(split_args(r#""My Dir" x"#), ["My Dir", "x"]);
    }

    #[test]
    fn split_escaped_quote_inside_quotes() {
        assert_eq!(split_args(r#""say \"hi\"""#), [r#"say "hi""#]);
    }

    // -- /set -----------------------------------------------------------------

    #[test]
    fn set_equals_and_space_syntax() {
        let (cfg, errs) = Config::load_str("/set emit=always\n/set database gen/db.sql");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.emit, Some(EmitMode::Always));
        assert_eq!(cfg.database, Some(PathBuf::from("gen/db.sql")));
    }

    #[test]
    fn set_flags() {
        let (cfg, errs) = Config::load_str("/set force=on\n/set persist off\n/set integrity=1");
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.force, Some(true));
        assert_eq!(cfg.persist, Some(false));
        assert_eq!(cfg.integrity, Some(true));
        assert_eq!(cfg.verbose, None);
    }

    #[test]
    fn bad_values_are_errors() {
        let (cfg, errs) = Config::load_str("/set emit=sometimes\n/set force=maybe\n/set colour=red\n/set x");
        assert_eq!(errs.iter().map(|e| e.line).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert!(errs[0].message.contains("invalid emit mode"));
        assert_eq!(cfg, Config::default());
    }

    // -- /include -------------------------------------------------------------

    #[test]
    fn includes_accumulate() {
        let (cfg, errs) = Config::load_str("/include lib\n/include \"my arcs\"\n/include");
        assert_eq!(cfg.includes, vec![PathBuf::from("lib"), PathBuf::from("my arcs")]);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].line, 3);
    }

    // -- Comments & skipping --------------------------------------------------

    #[test]
    fn comments_blank_and_unknown_skipped() {
        let src = "\
;; defaults\n\
\n\
/def something else\n\
plain text\n\
/set verbose=yes\n\
";
        let (cfg, errs) = Config::load_str(src);
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.verbose, Some(true));
    }

    #[test]
    fn load_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".rslrc");
        std::fs::write(&path, "/set diff=changes.diff\n").unwrap();
        let (cfg, errs) = Config::load_file(&path).unwrap();
        assert!(errs.is_empty());
        assert_eq!(cfg.diff, Some(PathBuf::from("changes.diff")));
    }
}
