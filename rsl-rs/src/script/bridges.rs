//! Native functions callable with `.invoke`.
//!
//! A bridge takes already-evaluated arguments in source order and returns the
//! named attributes of the fragment the caller receives.  Recoverable
//! failures (missing variable, unreadable file) come back as
//! `success = False`; only conversion errors abort the script.

use std::collections::{BTreeMap, HashMap};
use std::process::Command;
use std::rc::Rc;

use tracing::debug;

use super::value::Value;

pub type Attrs = BTreeMap<String, Value>;
pub type BridgeFn = Rc<dyn Fn(&[Value]) -> Result<Attrs, String>>;

#[derive(Clone)]
pub struct Bridge {
    pub arity: usize,
    pub f: BridgeFn,
}

pub struct BridgeRegistry {
    map: HashMap<String, Bridge>,
}

fn attrs<const N: usize>(pairs: [(&str, Value); N]) -> Attrs {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

impl Default for BridgeRegistry {
    fn default() -> Self {
        let mut reg = BridgeRegistry { map: HashMap::new() };

        // ── Environment and processes ────────────────────────────────────────
        reg.register("GET_ENV_VAR", 1, |a| {
            Ok(match std::env::var(a[0].to_string()) {
                Ok(v) => attrs([("success", Value::Bool(true)), ("result", Value::Str(v))]),
                Err(_) => attrs([("success", Value::Bool(false)), ("result", Value::Str(String::new()))]),
            })
        });
        reg.register("PUT_ENV_VAR", 2, |a| {
            let name = a[0].to_string();
            if name.is_empty() || name.contains(['=', '\0']) {
                return Ok(attrs([("success", Value::Bool(false))]));
            }
            std::env::set_var(&name, a[1].to_string());
            Ok(attrs([("success", Value::Bool(std::env::var_os(&name).is_some()))]))
        });
        reg.register("SHELL_COMMAND", 1, |a| {
            let cmd = a[0].to_string();
            debug!(%cmd, "shell command");
            let code = match Command::new("sh").arg("-c").arg(&cmd).status() {
                Ok(status) => status.code().unwrap_or(-1),
                Err(_) => -1,
            };
            Ok(attrs([("result", Value::Int(i64::from(code)))]))
        });

        // ── Files ────────────────────────────────────────────────────────────
        reg.register("FILE_READ", 1, |a| {
            Ok(match std::fs::read_to_string(a[0].to_string()) {
                Ok(text) => attrs([("success", Value::Bool(true)), ("result", Value::Str(text))]),
                Err(_) => attrs([("success", Value::Bool(false)), ("result", Value::Str(String::new()))]),
            })
        });
        reg.register("FILE_WRITE", 2, |a| {
            let ok = std::fs::write(a[0].to_string(), format!("{}\n", a[1])).is_ok();
            Ok(attrs([("success", Value::Bool(ok))]))
        });

        // ── Conversions ──────────────────────────────────────────────────────
        reg.register("STRING_TO_INTEGER", 1, |a| {
            let s = a[0].to_string();
            match s.trim().parse::<i64>() {
                Ok(n) => Ok(attrs([("result", Value::Int(n))])),
                Err(_) => Err(format!("Unable to convert the string \"{s}\" to an integer")),
            }
        });
        reg.register("STRING_TO_REAL", 1, |a| {
            let s = a[0].to_string();
            match s.trim().parse::<f64>() {
                Ok(x) => Ok(attrs([("result", Value::Real(x))])),
                Err(_) => Err(format!("Unable to convert the string \"{s}\" to a real")),
            }
        });
        reg.register("INTEGER_TO_STRING", 1, |a| Ok(attrs([("result", Value::Str(a[0].to_string()))])));
        reg.register("REAL_TO_STRING", 1, |a| Ok(attrs([("result", Value::Str(a[0].to_string()))])));
        reg.register("BOOLEAN_TO_STRING", 1, |a| {
            Ok(attrs([("result", Value::Str(a[0].to_string().to_uppercase()))]))
        });
        reg
    }
}

impl BridgeRegistry {
    /// Add or replace a bridge.  `arity` is checked before `f` runs.
    pub fn register(
        &mut self,
        name: &str,
        arity: usize,
        f: impl Fn(&[Value]) -> Result<Attrs, String> + 'static,
    ) {
        self.map.insert(name.to_string(), Bridge { arity, f: Rc::new(f) });
    }

    pub fn get(&self, name: &str) -> Option<&Bridge> {
        self.map.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn call(&self, name: &str, args: &[Value]) -> Option<Result<Attrs, String>> {
        let bridge = self.map.get(name)?;
        if args.len() != bridge.arity {
            return Some(Err(format!(
                "{name} takes {} arguments, {} given",
                bridge.arity,
                args.len()
            )));
        }
        Some((bridge.f)(args))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Value]) -> Result<Attrs, String> {
        BridgeRegistry::default().call(name, args).unwrap()
    }

    #[test]
    fn env_roundtrip() {
        let r = call("PUT_ENV_VAR", &["RSL_BRIDGE_TEST".into(), "yes".into()]).unwrap();
        assert_eq!(r["success"], Value::Bool(true));
        let r = call("GET_ENV_VAR", &["RSL_BRIDGE_TEST".into()]).unwrap();
        assert_eq!(r["result"], Value::Str("yes".into()));
        let r = call("GET_ENV_VAR", &["RSL_BRIDGE_TEST_MISSING".into()]).unwrap();
        assert_eq!(r["success"], Value::Bool(false));
    }

    #[test]
    fn shell_exit_status() {
        assert_eq!(call("SHELL_COMMAND", &["exit 3".into()]).unwrap()["result"], Value::Int(3));
    }

    #[test]
    fn file_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt").display().to_string();
        assert_eq!(call("FILE_WRITE", &[path.clone().into(), "hi".into()]).unwrap()["success"], Value::Bool(true));
        assert_eq!(call("FILE_READ", &[path.into()]).unwrap()["result"], Value::Str("hi\n".into()));
        let missing = dir.path().join("nope").display().to_string();
        assert_eq!(call("FILE_READ", &[missing.into()]).unwrap()["success"], Value::Bool(false));
    }

    #[test]
    fn conversions() {
        assert_eq!(call("STRING_TO_INTEGER", &[" 42 ".into()]).unwrap()["result"], Value::Int(42));
        assert_eq!(call("STRING_TO_REAL", &["1.5".into()]).unwrap()["result"], Value::Real(1.5));
        assert_eq!(
            call("STRING_TO_INTEGER", &["x".into()]).unwrap_err(),
            "Unable to convert the string \"x\" to an integer"
        );
        assert_eq!(call("BOOLEAN_TO_STRING", &[Value::Bool(true)]).unwrap()["result"], Value::Str("TRUE".into()));
        assert_eq!(call("REAL_TO_STRING", &[Value::Real(2.0)]).unwrap()["result"], Value::Str("2.0".into()));
    }

    #[test]
    fn arity_checked() {
        assert!(call("GET_ENV_VAR", &[]).is_err());
        assert!(BridgeRegistry::default().call("NOPE", &[]).is_none());
    }
}
