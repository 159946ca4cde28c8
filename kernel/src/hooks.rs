//! Custom preprocessor/processor/postprocessor hooks, referenced in configuration as a
//! `<module>:<function>` string (spec §4.3 step 2, §9 "Custom hooks referenced by
//! string"). Since Rust has no runtime module loader, a hook reference is resolved
//! against a process-wide registered-function table populated at startup -- the typed
//! equivalent of Python's `importlib.import_module` + `getattr`.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

use regex::Regex;

use crate::error::{ArzipError, ArzipResult};
use crate::model::Dataset;

pub type HookFn = Arc<dyn Fn(Dataset) -> ArzipResult<Dataset> + Send + Sync>;

static REGISTRY: LazyLock<RwLock<HashMap<String, HookFn>>> = LazyLock::new(|| RwLock::new(HashMap::new()));

static REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*:[A-Za-z_][A-Za-z0-9_]*$").unwrap()
});

/// Register a hook under `<module>:<function>`. Call this at process startup for every
/// hook the embedding application wants configuration files to be able to reference.
pub fn register_hook(reference: impl Into<String>, f: HookFn) {
    REGISTRY.write().expect("hook registry poisoned").insert(reference.into(), f);
}

/// A validated, resolved hook reference: the string was well-formed, its module
/// namespace is known, and it resolves to a callable entry in the registry.
#[derive(Clone)]
pub struct Hook {
    reference: String,
    f: HookFn,
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook").field("reference", &self.reference).finish()
    }
}

impl Hook {
    /// Validate and resolve `reference` (`<module>:<function>`, identifiers only).
    pub fn resolve(reference: &str) -> ArzipResult<Hook> {
        if !REFERENCE_RE.is_match(reference) {
            return Err(ArzipError::CustomHookError(format!(
                "invalid hook reference {reference:?}: expected '<module>:<function>' of identifiers"
            )));
        }
        let registry = REGISTRY.read().expect("hook registry poisoned");
        let f = registry.get(reference).cloned().ok_or_else(|| {
            ArzipError::CustomHookError(format!(
                "hook {reference:?} did not resolve to a registered function"
            ))
        })?;
        Ok(Hook { reference: reference.to_string(), f })
    }

    pub fn apply(&self, ds: Dataset) -> ArzipResult<Dataset> {
        (self.f)(ds)
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }
}
