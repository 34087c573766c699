//! String formatters for `$<codes>{expr}` substitutions.
//!
//! | Code        | Effect                                              |
//! |-------------|-----------------------------------------------------|
//! | `u` / `l`   | upper / lower case                                  |
//! | `c`         | capitalise each word, lower-case the rest           |
//! | `o`         | camel case, non-word characters dropped             |
//! | `_` / `r`   | whitespace runs to `_` / removed                    |
//! | `t`         | identity (a hook users override)                    |
//! | `tnosplat`  | drop `*`                                            |
//! | `t2tick`    | `'` to `''`                                         |
//! | `tnonl`     | newline to space                                    |
//! | `tu2d`      | `_` to `-` (and `td2u` the reverse)                 |
//! | `tstrsep_`  | text before the first `_` (`t_strsep`: after it)   |
//! | `txml*`     | XML entity escaping, attribute quoting, name repair |
//! | `tcf_*`     | parts of the first `->KL[Rn.'phrase']` step        |
//! | `tcb_*`     | parts of the last navigation step                   |
//!
//! All `t` codes run before the single-character codes; within each group
//! codes apply left to right.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::OnceLock;

use regex::{Captures, Regex};

pub type Formatter = Rc<dyn Fn(&str) -> String>;

pub struct FormatterRegistry {
    map: HashMap<String, Formatter>,
}

impl Default for FormatterRegistry {
    fn default() -> Self {
        let mut reg = FormatterRegistry { map: HashMap::new() };
        reg.register("u", |s| s.to_uppercase());
        reg.register("l", |s| s.to_lowercase());
        reg.register("c", capwords);
        reg.register("o", camelcase);
        reg.register("_", |s| whitespace().replace_all(s, "_").into_owned());
        reg.register("r", |s| whitespace().replace_all(s, "").into_owned());
        reg.register("t", str::to_string);
        reg.register("tnosplat", |s| s.replace('*', ""));
        reg.register("t2tick", |s| s.replace('\'', "''"));
        reg.register("tnonl", |s| s.replace('\n', " "));
        reg.register("tu2d", |s| s.replace('_', "-"));
        reg.register("td2u", |s| s.replace('-', "_"));
        reg.register("tstrsep_", |s| s.split('_').next().unwrap_or_default().to_string());
        reg.register("t_strsep", |s| s.split_once('_').map(|(_, r)| r.to_string()).unwrap_or_default());
        reg.register("txmlclean", |s| s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;"));
        reg.register("txmlquot", |s| if s.contains('\'') { format!("\"{s}\"") } else { format!("'{s}'") });
        reg.register("txmlname", xml_name);

        reg.register("tcf_kl", |s| first_step(s, |c| group(c, 2)));
        reg.register("tcf_rel", |s| first_step(s, |c| group(c, 3)));
        reg.register("tcf_phrase", |s| first_step(s, |c| group(c, 4)));
        reg.register("tcf_rest", |s| first_step(s, |c| s[c.get(0).map_or(0, |m| m.end())..].to_string()));
        reg.register("tcb_kl", |s| last_step(s, |c| group(c, 2)));
        reg.register("tcb_rel", |s| last_step(s, |c| group(c, 3)));
        reg.register("tcb_phrase", |s| last_step(s, |c| group(c, 4)));
        reg.register("tcb_rest", |s| last_step(s, |c| s[..c.get(0).map_or(0, |m| m.start())].to_string()));
        reg
    }
}

impl FormatterRegistry {
    /// Add or replace a formatter.  Codes are matched case-insensitively.
    pub fn register(&mut self, code: &str, f: impl Fn(&str) -> String + 'static) {
        self.map.insert(code.to_lowercase(), Rc::new(f));
    }

    pub fn contains(&self, code: &str) -> bool {
        self.map.contains_key(&code.to_lowercase())
    }

    /// Run `codes` over `text`: `t` codes first, then the rest.
    pub fn apply(&self, text: &str, codes: &[String]) -> Result<String, String> {
        let is_t = |c: &&String| c.starts_with(['t', 'T']);
        let ordered = codes.iter().filter(is_t).chain(codes.iter().filter(|c| !is_t(c)));
        let mut out = text.to_string();
        for code in ordered {
            let f = self
                .map
                .get(&code.to_lowercase())
                .ok_or_else(|| format!("{code} is not a valid string formatter"))?;
            out = f(&out);
        }
        Ok(out)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

fn capitalize_word(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Words split on whitespace, each capitalised, joined by single spaces.
fn capwords(s: &str) -> String {
    s.split_whitespace().map(capitalize_word).collect::<Vec<_>>().join(" ")
}

fn camelcase(s: &str) -> String {
    // Title-case: a letter following a non-letter starts a word.
    let mut titled = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for ch in s.chars().map(|c| if c == '_' { ' ' } else { c }) {
        if ch.is_alphabetic() {
            if prev_alpha {
                titled.extend(ch.to_lowercase());
            } else {
                titled.extend(ch.to_uppercase());
            }
            prev_alpha = true;
        } else {
            titled.push(ch);
            prev_alpha = false;
        }
    }
    let word: String = titled.chars().filter(|c| c.is_alphanumeric()).collect();
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn xml_name(s: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(^[^\w])|[^\w.-]").expect("static regex"))
        .replace_all(s, "_")
        .into_owned()
}

const STEP: &str = r"(\s*->\s*(\w+)\[[Rr](\d+)(?:\.'([^']+)')?\]\s*)";

fn group(c: &Captures<'_>, i: usize) -> String {
    c.get(i).map_or_else(String::new, |m| m.as_str().to_string())
}

fn first_step(s: &str, f: impl Fn(&Captures<'_>) -> String) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(STEP).expect("static regex"));
    re.captures(s).map(|c| f(&c)).unwrap_or_default()
}

fn last_step(s: &str, f: impl Fn(&Captures<'_>) -> String) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(&format!("{STEP}$")).expect("static regex"));
    re.captures(s).map(|c| f(&c)).unwrap_or_default()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(codes: &[&str], s: &str) -> String {
        let codes: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        FormatterRegistry::default().apply(s, &codes).unwrap()
    }

    #[test]
    fn case_formats() {
        assert_eq!(fmt(&["u"], "Example Text"), "EXAMPLE TEXT");
        assert_eq!(fmt(&["L"], "Example Text"), "example text");
        assert_eq!(fmt(&["c"], "example  TEXT"), "Example Text");
        assert_eq!(fmt(&["o"], "Example Text"), "exampleText");
        assert_eq!(fmt(&["o"], "my_var name!"), "myVarName");
        assert_eq!(fmt(&["_"], "Example \t Text"), "Example_Text");
        assert_eq!(fmt(&["r"], " a b\nc "), "abc");
    }

    #[test]
    fn t_codes_run_first() {
        // `u` is written first but `tu2d` still sees the original text.
        assert_eq!(fmt(&["u", "tu2d"], "a_b"), "A-B");
        assert_eq!(fmt(&["tstrsep_"], "abc_def_g"), "abc");
        assert_eq!(fmt(&["t_strsep"], "abc_def_g"), "def_g");
        assert_eq!(fmt(&["t_strsep"], "abc"), "");
        assert_eq!(fmt(&["t2tick"], "it's"), "it''s");
    }

    #[test]
    fn xml_formats() {
        assert_eq!(fmt(&["txmlclean"], "a<b>&c"), "a&lt;b&gt;&amp;c");
        assert_eq!(fmt(&["txmlquot"], "it's"), "\"it's\"");
        assert_eq!(fmt(&["txmlquot"], "x"), "'x'");
        assert_eq!(fmt(&["txmlname"], "-a b.c"), "_a_b.c");
        assert_eq!(fmt(&["txmlname"], "1a"), "1a");
    }

    #[test]
    fn navigation_parsers() {
        let chain = "->O_ATTR[R102]->O_OBJ[R103.'precedes'] ";
        assert_eq!(fmt(&["tcf_kl"], chain), "O_ATTR");
        assert_eq!(fmt(&["tcf_rel"], chain), "102");
        assert_eq!(fmt(&["tcf_phrase"], chain), "");
        assert_eq!(fmt(&["tcf_rest"], chain), "->O_OBJ[R103.'precedes'] ");
        assert_eq!(fmt(&["tcb_kl"], chain), "O_OBJ");
        assert_eq!(fmt(&["tcb_phrase"], chain), "precedes");
        assert_eq!(fmt(&["tcb_rest"], chain), "->O_ATTR[R102]");
        assert_eq!(fmt(&["tcf_kl"], "no navigation"), "");
    }

    #[test]
    fn unknown_code() {
        let err = FormatterRegistry::default().apply("x", &["q".to_string()]).unwrap_err();
        assert_eq!(err, "q is not a valid string formatter");
    }

    #[test]
    fn user_formatter() {
        let mut reg = FormatterRegistry::default();
        reg.register("tREV", |s| s.chars().rev().collect());
        assert_eq!(reg.apply("abc", &["trev".to_string()]).unwrap(), "cba");
    }
}
