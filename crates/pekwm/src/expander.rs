//! Pluggable variable-name expanders: `$name`, `${name}`, `$_env`, `$@atom`,
//! `$&xresource`.
//!
//! Each [`Expander`] recognises a single prefix character and is tried in
//! registration order; the first one whose [`Expander::lookup`] returns
//! `found = true` wins. An expander that does not recognise the name's
//! prefix returns `(false, "", "")` so the next one in line gets a chance.

use std::collections::HashMap;

/// Result of a single lookup attempt.
pub struct LookupResult {
    pub found: bool,
    pub value: String,
    pub error: String,
}

impl LookupResult {
    fn not_recognised() -> LookupResult {
        LookupResult {
            found: false,
            value: String::new(),
            error: String::new(),
        }
    }

    fn missing(error: impl Into<String>) -> LookupResult {
        LookupResult {
            found: false,
            value: String::new(),
            error: error.into(),
        }
    }

    fn ok(value: impl Into<String>) -> LookupResult {
        LookupResult {
            found: true,
            value: value.into(),
            error: String::new(),
        }
    }
}

pub trait Expander {
    /// The prefix byte this expander claims, e.g. `_` for env, `@` for X11
    /// atoms, `&` for X resources. The mem expander claims everything else
    /// and so has no fixed prefix; it is always tried last.
    fn matches(&self, name: &str) -> bool;
    fn lookup(&self, name: &str) -> LookupResult;
}

/// `$_NAME` -> process environment variable `NAME`.
pub struct EnvExpander;

impl Expander for EnvExpander {
    fn matches(&self, name: &str) -> bool {
        name.starts_with('_')
    }

    fn lookup(&self, name: &str) -> LookupResult {
        let key = &name[1..];
        match std::env::var(key) {
            Ok(value) => LookupResult::ok(value),
            Err(_) => LookupResult::missing(format!("environment variable {key} is not set")),
        }
    }
}

/// `$@NAME` -> string property of the given atom name on the root window.
/// Backed by a caller-supplied lookup function so the parser itself need not
/// know about X11 connection details.
pub struct X11AtomExpander<F>
where
    F: Fn(&str) -> Option<String>,
{
    lookup_fn: F,
}

impl<F> X11AtomExpander<F>
where
    F: Fn(&str) -> Option<String>,
{
    pub fn new(lookup_fn: F) -> X11AtomExpander<F> {
        X11AtomExpander { lookup_fn }
    }
}

impl<F> Expander for X11AtomExpander<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn matches(&self, name: &str) -> bool {
        name.starts_with('@')
    }

    fn lookup(&self, name: &str) -> LookupResult {
        let atom = &name[1..];
        match (self.lookup_fn)(atom) {
            Some(value) => LookupResult::ok(value),
            None => LookupResult::missing(format!("atom property {atom} is not set")),
        }
    }
}

/// `$&NAME` -> value from the X Resource Manager database. When
/// `register_x_resource` is enabled, every successful lookup is recorded so
/// consumers (e.g. `pekwm_sys` theme switching) can introspect exactly which
/// resources a parse consulted.
pub struct X11ResourceExpander<F>
where
    F: Fn(&str) -> Option<String>,
{
    lookup_fn: F,
    register: bool,
    seen: std::cell::RefCell<Vec<String>>,
}

impl<F> X11ResourceExpander<F>
where
    F: Fn(&str) -> Option<String>,
{
    pub fn new(lookup_fn: F, register: bool) -> X11ResourceExpander<F> {
        X11ResourceExpander {
            lookup_fn,
            register,
            seen: std::cell::RefCell::new(Vec::new()),
        }
    }

    pub fn consulted(&self) -> Vec<String> {
        self.seen.borrow().clone()
    }
}

impl<F> Expander for X11ResourceExpander<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn matches(&self, name: &str) -> bool {
        name.starts_with('&')
    }

    fn lookup(&self, name: &str) -> LookupResult {
        let resource = &name[1..];
        match (self.lookup_fn)(resource) {
            Some(value) => {
                if self.register {
                    self.seen.borrow_mut().push(resource.to_owned());
                }
                LookupResult::ok(value)
            }
            None => LookupResult::missing(format!("X resource {resource} is not set")),
        }
    }
}

/// User-defined `$name` variables, set via `$name = "value"` directives.
/// Always registered last so that the prefixed expanders above are never
/// shadowed by a user variable of the same bare name.
#[derive(Default)]
pub struct MemExpander {
    vars: HashMap<String, String>,
}

impl MemExpander {
    pub fn new() -> MemExpander {
        MemExpander::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

impl Expander for MemExpander {
    fn matches(&self, _name: &str) -> bool {
        true
    }

    fn lookup(&self, name: &str) -> LookupResult {
        match self.vars.get(name) {
            Some(value) => LookupResult::ok(value.clone()),
            None => LookupResult::missing(format!("variable {name} is not defined")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_expander_strips_prefix() {
        // SAFETY: test-only, no other threads touch this var concurrently.
        unsafe { std::env::set_var("PEKWM_TEST_VAR", "value") };
        let e = EnvExpander;
        assert!(e.matches("_PEKWM_TEST_VAR"));
        let r = e.lookup("_PEKWM_TEST_VAR");
        assert!(r.found);
        assert_eq!(r.value, "value");
    }

    #[test]
    fn env_expander_missing_reports_error() {
        let e = EnvExpander;
        let r = e.lookup("_PEKWM_DOES_NOT_EXIST_XYZ");
        assert!(!r.found);
        assert!(!r.error.is_empty());
    }

    #[test]
    fn mem_expander_matches_anything() {
        let mut m = MemExpander::new();
        m.set("x", "1");
        assert!(m.matches("x"));
        assert!(m.matches("_weird"));
        assert_eq!(m.lookup("x").value, "1");
    }
}
