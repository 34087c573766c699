/// Command-line tests: run the `gen_erate` and `rsl-lint` binaries in a
/// scratch directory and check exit status, output and files left behind.
///
/// Every run points `RSLRC` at an empty file so a user's own `.rslrc` cannot
/// change the outcome.
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

// ── Helpers ───────────────────────────────────────────────────────────────────

fn gen_erate() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_gen_erate"))
}

fn rsl_lint() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_rsl-lint"))
}

/// Run `bin` with `args` inside `dir`.
fn run_in(bin: &Path, dir: &Path, args: &[&str]) -> Output {
    let rc = dir.join("empty.rslrc");
    if !rc.exists() {
        fs::write(&rc, "").unwrap();
    }
    Command::new(bin)
        .args(args)
        .current_dir(dir)
        .env("RSLRC", &rc)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to spawn binary")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn write(dir: &Path, name: &str, text: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, text).unwrap();
}

const SCHEMA: &str = "
CREATE TABLE Cls (Id STRING);
CREATE UNIQUE INDEX I1 ON Cls (Id);
INSERT INTO Cls VALUES ('a');
";

// ── gen_erate ─────────────────────────────────────────────────────────────────

#[test]
fn help_and_version() {
    let dir = tempfile::tempdir().unwrap();
    let out = run_in(&gen_erate(), dir.path(), &["-h"]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("USAGE"));

    let out = run_in(&gen_erate(), dir.path(), &["-version"]);
    assert!(out.status.success());
    assert!(stdout(&out).starts_with("rsl v"));
}

#[test]
fn unknown_argument_fails() {
    let dir = tempfile::tempdir().unwrap();
    let out = run_in(&gen_erate(), dir.path(), &["-bogus"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stdout(&out).contains("PARSE ERROR"));
}

#[test]
fn legacy_flags_are_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let out = run_in(&gen_erate(), dir.path(), &["-nopersist", "-l2s", "-d", "1", "-priority", "32", "-q"]);
    assert!(out.status.success());
    assert!(!dir.path().join("mcdbms.gen").exists());
}

#[test]
fn emit_creates_file() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "gen.arc", ".assign who = \"world\"\nhello ${who}\n.emit to file \"out/hello.txt\"\n");
    let out = run_in(&gen_erate(), dir.path(), &["-nopersist", "-arch", "gen.arc"]);
    assert!(out.status.success(), "{}", stdout(&out));
    assert_eq!(fs::read_to_string(dir.path().join("out/hello.txt")).unwrap(), "hello world\n");
    assert!(stdout(&out).contains("CREATED"));
}

#[test]
fn exit_sets_status() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "x.arc", ".exit 3\n");
    let out = run_in(&gen_erate(), dir.path(), &["-nopersist", "-arch", "x.arc"]);
    assert_eq!(out.status.code(), Some(3));
}

#[test]
fn runtime_error_fails() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "x.arc", ".assign y = nothing\n");
    let out = run_in(&gen_erate(), dir.path(), &["-nopersist", "-arch", "x.arc"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stdout(&out).contains("ERROR"));
}

#[test]
fn include_searches_include_dirs() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "lib/greet.inc", "from the library\n");
    write(dir.path(), "x.arc", ".include \"greet.inc\"\n.emit to file \"x.txt\"\n");
    let out = run_in(&gen_erate(), dir.path(), &["-nopersist", "-include", "lib", "-arch", "x.arc"]);
    assert!(out.status.success(), "{}", stdout(&out));
    assert_eq!(fs::read_to_string(dir.path().join("x.txt")).unwrap(), "from the library\n");
}

#[test]
fn diff_file_starts_with_command_line() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "x.arc", "new\n.emit to file \"x.txt\"\n");
    let out = run_in(&gen_erate(), dir.path(), &["-nopersist", "-diff", "d.txt", "-arch", "x.arc"]);
    assert!(out.status.success());
    let diff = fs::read_to_string(dir.path().join("d.txt")).unwrap();
    let first = diff.lines().next().unwrap();
    assert!(first.ends_with("-nopersist -diff d.txt -arch x.arc"), "{first}");
    assert!(diff.contains("+new"));
}

#[test]
fn integrity_check_sets_status() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "schema.sql", SCHEMA);
    write(dir.path(), "dup.arc", ".create object instance c of Cls\n.assign c.Id = \"a\"\n");

    let out = run_in(&gen_erate(), dir.path(), &["-nopersist", "-integrity", "-import", "schema.sql"]);
    assert!(out.status.success());

    let out = run_in(
        &gen_erate(),
        dir.path(),
        &["-nopersist", "-integrity", "-import", "schema.sql", "-arch", "dup.arc"],
    );
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn database_persists_between_runs() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "schema.sql", SCHEMA);
    write(dir.path(), "dup.arc", ".create object instance c of Cls\n.assign c.Id = \"a\"\n");

    let out = run_in(&gen_erate(), dir.path(), &["-import", "schema.sql"]);
    assert!(out.status.success());
    assert!(dir.path().join("mcdbms.gen").is_file());

    let out = run_in(&gen_erate(), dir.path(), &["-integrity", "-arch", "dup.arc"]);
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn quit_on_import_error() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "x.arc", "text\n.emit to file \"x.txt\"\n");

    let out = run_in(&gen_erate(), dir.path(), &["-nopersist", "-import", "missing.sql", "-arch", "x.arc"]);
    assert!(out.status.success());
    assert!(dir.path().join("x.txt").exists());

    fs::remove_file(dir.path().join("x.txt")).unwrap();
    let out = run_in(
        &gen_erate(),
        dir.path(),
        &["-nopersist", "-qim", "-import", "missing.sql", "-arch", "x.arc"],
    );
    assert_eq!(out.status.code(), Some(1));
    assert!(!dir.path().join("x.txt").exists());
}

// ── rsl-lint ──────────────────────────────────────────────────────────────────

#[test]
fn lint_exit_status() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "schema.sql", SCHEMA);
    write(dir.path(), "good.arc", ".create object instance c of Cls\n");
    write(dir.path(), "bad.arc", ".create object instance c of Nope\n");

    let out = run_in(&rsl_lint(), dir.path(), &["-i", "schema.sql", "good.arc"]);
    assert!(out.status.success(), "{}", stdout(&out));

    let out = run_in(&rsl_lint(), dir.path(), &["--import=schema.sql", "bad.arc"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stdout(&out).contains("bad.arc: 1:  WARNING:  Undefined class Nope"));
}

#[test]
fn lint_without_files_is_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    let out = run_in(&rsl_lint(), dir.path(), &[]);
    assert_eq!(out.status.code(), Some(1));
}
