//! Writing generated text to disk.
//!
//! | Mode     | Behaviour                                      |
//! |----------|------------------------------------------------|
//! | `never`  | nothing is written                             |
//! | `change` | written unless the file already holds the text |
//! | `always` | always written                                 |
//!
//! Files are written through a temporary file in the target directory and
//! renamed into place.  With a diff file configured, a unified diff of the
//! old and new contents is appended for every emit, written or not.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use similar::TextDiff;
use tempfile::NamedTempFile;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmitMode {
    Never,
    #[default]
    Change,
    Always,
}

impl FromStr for EmitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "never" => Ok(EmitMode::Never),
            "change" => Ok(EmitMode::Change),
            "always" => Ok(EmitMode::Always),
            other => Err(format!("invalid emit mode '{other}' (expected never, change or always)")),
        }
    }
}

impl fmt::Display for EmitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EmitMode::Never => "never",
            EmitMode::Change => "change",
            EmitMode::Always => "always",
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct EmitOptions {
    pub mode: EmitMode,
    /// Make read-only targets writable before replacing them.
    pub force: bool,
    /// Append unified diffs here.
    pub diff: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Replaced,
    /// Not written: unchanged content, or `never`.
    Skipped,
}

/// Lexically normalise `path`: drop `.` components and fold `..` into the
/// preceding component where there is one.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Emit `text` to `path` under `opts`.
pub fn emit(opts: &EmitOptions, path: &Path, text: &str) -> io::Result<Outcome> {
    let path = normalize(path);
    let original = match fs::read_to_string(&path) {
        Ok(s) => Some(s),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(e),
    };

    let write = match opts.mode {
        EmitMode::Never => false,
        EmitMode::Change => original.as_deref() != Some(text),
        EmitMode::Always => true,
    };

    if let Some(diff_path) = &opts.diff {
        append_diff(diff_path, &path, original.as_deref().unwrap_or(""), text)?;
    }

    if !write {
        debug!(path = %path.display(), mode = %opts.mode, "emit skipped");
        return Ok(Outcome::Skipped);
    }

    let mut keep_perms = None;
    if original.is_some() {
        let perms = fs::metadata(&path)?.permissions();
        keep_perms = Some(perms.clone());
        if perms.readonly() {
            if !opts.force {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    format!("{}: file is read-only", path.display()),
                ));
            }
            make_writable(&path)?;
            keep_perms = Some(fs::metadata(&path)?.permissions());
        }
    }

    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(text.as_bytes())?;
    // Temporary files are created private; give the result ordinary modes.
    match keep_perms {
        Some(perms) => fs::set_permissions(tmp.path(), perms)?,
        None => set_default_mode(tmp.path())?,
    }
    tmp.persist(&path).map_err(|e| e.error)?;

    let outcome = if original.is_some() { Outcome::Replaced } else { Outcome::Created };
    info!(path = %path.display(), ?outcome, "emitted");
    Ok(outcome)
}

#[cfg(unix)]
fn make_writable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o200);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn make_writable(path: &Path) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(false);
    fs::set_permissions(path, perms)
}

#[cfg(unix)]
fn set_default_mode(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    // SAFETY: umask only swaps the process file-mode mask; it is restored at once.
    let mask = unsafe {
        let m = libc::umask(0);
        libc::umask(m);
        m
    };
    fs::set_permissions(path, fs::Permissions::from_mode(0o666 & !(mask as u32)))
}

#[cfg(not(unix))]
fn set_default_mode(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn append_diff(diff_path: &Path, target: &Path, old: &str, new: &str) -> io::Result<()> {
    let name = target.display().to_string();
    let diff = TextDiff::from_lines(old, new);
    let text = diff.unified_diff().header(&name, &name).to_string();
    let mut f = OpenOptions::new().create(true).append(true).open(diff_path)?;
    f.write_all(text.as_bytes())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(mode: EmitMode) -> EmitOptions {
        EmitOptions { mode, ..Default::default() }
    }

    #[test]
    fn normalize_paths() {
        assert_eq!(normalize(Path::new("a/./b/../c")), PathBuf::from("a/c"));
        assert_eq!(normalize(Path::new("../x")), PathBuf::from("../x"));
        assert_eq!(normalize(Path::new("/a/../../b")), PathBuf::from("/b"));
        assert_eq!(normalize(Path::new("./")), PathBuf::from("."));
    }

    #[test]
    fn change_mode_skips_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub/out.txt");
        assert_eq!(emit(&opts(EmitMode::Change), &path, "a\n").unwrap(), Outcome::Created);
        assert_eq!(emit(&opts(EmitMode::Change), &path, "a\n").unwrap(), Outcome::Skipped);
        assert_eq!(emit(&opts(EmitMode::Always), &path, "a\n").unwrap(), Outcome::Replaced);
        assert_eq!(emit(&opts(EmitMode::Change), &path, "b\n").unwrap(), Outcome::Replaced);
        assert_eq!(fs::read_to_string(&path).unwrap(), "b\n");
    }

    #[test]
    fn never_mode_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        assert_eq!(emit(&opts(EmitMode::Never), &path, "a\n").unwrap(), Outcome::Skipped);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn force_overwrites_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ro.txt");
        fs::write(&path, "old\n").unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(&path, perms).unwrap();

        assert!(emit(&opts(EmitMode::Always), &path, "new\n").is_err());
        let forced = EmitOptions { force: true, ..opts(EmitMode::Always) };
        assert_eq!(emit(&forced, &path, "new\n").unwrap(), Outcome::Replaced);
        assert_eq!(fs::read_to_string(&path).unwrap(), "new\n");
    }

    #[test]
    fn diff_is_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let diff = dir.path().join("changes.diff");
        let o = EmitOptions { diff: Some(diff.clone()), ..opts(EmitMode::Change) };
        emit(&o, &path, "one\n").unwrap();
        emit(&o, &path, "two\n").unwrap();
        let text = fs::read_to_string(&diff).unwrap();
        assert!(text.contains("+one"));
        assert!(text.contains("-one"));
        assert!(text.contains("+two"));
    }
}
