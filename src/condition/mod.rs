//! Boolean condition engine.
//!
//! A [`BooleanRegistry`] holds named booleans: the built-ins `true` and
//! `false`, names describing the host platform, values registered by the
//! caller, and values computed by running a shell snippet. Condition
//! strings combine them:
//!
//! | Syntax | Meaning |
//! |--------|---------|
//! | `name` | value of the boolean; undefined names are `false` |
//! | `!e` | negation |
//! | `+(a, b, ...)` | AND |
//! | `\|(a, b, ...)` | OR |
//! | `^(a, b, ...)` | exactly one operand is true |
//!
//! The empty string is always true.
//!
//! ```rust
//! use installkit::condition::BooleanRegistry;
//!
//! let mut booleans = BooleanRegistry::new();
//! booleans.register("demo", true);
//! assert!(booleans.eval("+(demo, !false)"));
//! assert!(!booleans.eval("^(demo, true)"));
//! assert!(!booleans.eval("no_such_name"));
//! ```

mod expr;

pub use expr::{Expr, ExprKind};

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::Result;
use crate::platform::Platform;

/// Identity of a registered boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoolId(usize);

/// A named boolean.
#[derive(Debug, Clone)]
pub struct Boolean {
    name: String,
    value: bool,
    once_only: bool,
    initialized: bool,
    script: Option<String>,
}

impl Boolean {
    /// Boolean name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the value is fixed after its first evaluation.
    pub fn once_only(&self) -> bool {
        self.once_only
    }

    /// Whether a value has been computed.
    pub fn initialized(&self) -> bool {
        self.initialized
    }

    /// Shell snippet backing this boolean, if any.
    pub fn script(&self) -> Option<&str> {
        self.script.as_deref()
    }
}

/// Registry of named booleans.
#[derive(Debug, Clone)]
pub struct BooleanRegistry {
    booleans: Vec<Boolean>,
    index: HashMap<String, BoolId>,
    shell: PathBuf,
}

impl Default for BooleanRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BooleanRegistry {
    /// Creates a registry holding only `true` and `false`.
    pub fn new() -> Self {
        let mut registry = Self {
            booleans: Vec::new(),
            index: HashMap::new(),
            shell: PathBuf::from("/bin/sh"),
        };
        registry.register("true", true);
        registry.register("false", false);
        registry
    }

    /// Creates a registry with the built-ins plus the host's platform names.
    pub fn with_platform(platform: &Platform) -> Self {
        let mut registry = Self::new();
        for name in platform.boolean_names() {
            registry.register(name, true);
        }
        registry
    }

    /// Sets the shell used for script-backed booleans.
    pub fn shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Registers a fixed value.
    ///
    /// The first registration of a name wins; later ones return the
    /// existing identity and leave its value untouched.
    pub fn register(&mut self, name: impl Into<String>, value: bool) -> BoolId {
        self.insert(Boolean {
            name: name.into(),
            value,
            once_only: true,
            initialized: true,
            script: None,
        })
    }

    /// Registers a boolean computed by a shell snippet.
    ///
    /// A zero exit status means true. With `once_only` the snippet runs
    /// now and its result is kept; otherwise it runs again on every query.
    pub fn register_script(
        &mut self,
        name: impl Into<String>,
        script: impl Into<String>,
        once_only: bool,
    ) -> BoolId {
        let script = script.into();
        let (value, initialized) = if once_only {
            (self.run_script(&script), true)
        } else {
            (false, false)
        };
        self.insert(Boolean {
            name: name.into(),
            value,
            once_only,
            initialized,
            script: Some(script),
        })
    }

    fn insert(&mut self, boolean: Boolean) -> BoolId {
        if let Some(&id) = self.index.get(&boolean.name) {
            log::debug!("Boolean '{}' already registered", boolean.name);
            return id;
        }
        let id = BoolId(self.booleans.len());
        self.index.insert(boolean.name.clone(), id);
        self.booleans.push(boolean);
        id
    }

    /// Explicitly replaces a boolean's value, registering it if needed.
    ///
    /// A script-backed boolean becomes a fixed value.
    pub fn set(&mut self, name: &str, value: bool) -> BoolId {
        match self.index.get(name) {
            Some(&id) => {
                let boolean = &mut self.booleans[id.0];
                boolean.value = value;
                boolean.once_only = true;
                boolean.initialized = true;
                boolean.script = None;
                id
            }
            None => self.register(name, value),
        }
    }

    /// Looks up a boolean by name.
    pub fn lookup(&self, name: &str) -> Option<BoolId> {
        self.index.get(name).copied()
    }

    /// Returns a registered boolean.
    pub fn boolean(&self, id: BoolId) -> &Boolean {
        &self.booleans[id.0]
    }

    /// Number of registered booleans.
    pub fn len(&self) -> usize {
        self.booleans.len()
    }

    /// Always false: the built-ins are registered at construction.
    pub fn is_empty(&self) -> bool {
        self.booleans.is_empty()
    }

    /// Current value of a boolean, re-running its script if it has one
    /// and is not fixed.
    pub fn value(&self, id: BoolId) -> bool {
        let boolean = &self.booleans[id.0];
        match (&boolean.script, boolean.once_only) {
            (Some(script), false) => self.run_script(script),
            _ => boolean.value,
        }
    }

    /// Value of a boolean by name.
    pub fn get(&self, name: &str) -> Option<bool> {
        self.lookup(name).map(|id| self.value(id))
    }

    /// Parses a condition string, binding undefined names to `false`.
    pub fn parse(&self, condition: &str) -> Result<Expr> {
        let false_id = self.lookup("false").unwrap_or(BoolId(1));
        expr::parse(condition, &mut |name| match self.lookup(name) {
            Some(id) => id,
            None => {
                log::warn!("Undefined boolean '{}' treated as false", name);
                false_id
            }
        })
    }

    /// Evaluates a condition string.
    ///
    /// The empty string is true. Syntax errors are logged and evaluate to
    /// false.
    pub fn eval(&self, condition: &str) -> bool {
        if condition.trim().is_empty() {
            return true;
        }
        match self.parse(condition) {
            Ok(expr) => self.eval_expr(&expr),
            Err(e) => {
                log::error!("{}", e);
                false
            }
        }
    }

    /// Evaluates a parsed expression.
    pub fn eval_expr(&self, expr: &Expr) -> bool {
        expr.eval_with(&mut |id| self.value(id))
    }

    fn run_script(&self, script: &str) -> bool {
        let status = Command::new(&self.shell)
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status();
        match status {
            Ok(status) => status.success(),
            Err(e) => {
                log::warn!("Failed to run boolean script '{}': {}", script, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins() {
        let booleans = BooleanRegistry::new();
        assert!(booleans.eval(""));
        assert!(booleans.eval("   "));
        assert!(booleans.eval("true"));
        assert!(!booleans.eval("!true"));
        assert!(booleans.eval("^(true,false)"));
        assert!(!booleans.eval("^(true,true)"));
        assert!(!booleans.eval("undefined_name"));
        assert!(booleans.eval("!undefined_name"));
    }

    #[test]
    fn test_first_registration_wins() {
        let mut booleans = BooleanRegistry::new();
        let a = booleans.register("feature", true);
        let b = booleans.register("feature", false);
        assert_eq!(a, b);
        assert_eq!(booleans.get("feature"), Some(true));
        assert_eq!(booleans.register("true", false), booleans.lookup("true").unwrap());
        assert!(booleans.eval("true"));

        booleans.set("feature", false);
        assert_eq!(booleans.get("feature"), Some(false));
    }

    #[test]
    fn test_platform_names() {
        let platform = Platform::new("Linux", "x86_64", "glibc").with_distro("debian");
        let booleans = BooleanRegistry::with_platform(&platform);
        assert!(booleans.eval("+(Linux, x86_64, glibc, debian)"));
        assert!(!booleans.eval("FreeBSD"));
    }

    #[test]
    fn test_syntax_error_is_false() {
        let booleans = BooleanRegistry::new();
        assert!(!booleans.eval("+(true"));
        assert!(booleans.parse("+(true").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_script_booleans() {
        let dir = tempfile::tempdir().unwrap();
        let flag = dir.path().join("flag");
        let script = format!("test -e '{}'", flag.display());

        let mut booleans = BooleanRegistry::new();
        let live = booleans.register_script("live", script.clone(), false);
        let once = booleans.register_script("once", script, true);
        assert!(!booleans.boolean(live).initialized());
        assert!(booleans.boolean(once).initialized());

        assert!(!booleans.value(live));
        std::fs::write(&flag, b"").unwrap();
        assert!(booleans.value(live));
        assert!(!booleans.value(once));
        assert!(booleans.eval("+(live, !once)"));
    }
}
