use std::collections::HashMap;
use std::env as stdenv;

/// Variable holding the user's pager preference.
pub const PAGER_VAR: &str = "PAGER";
/// Pager used when [`PAGER_VAR`] is unset or empty.
pub const DEFAULT_PAGER: &str = "less";
/// Pager tried, without arguments, when the preferred one cannot be executed.
pub const FALLBACK_PAGER: &str = "more";

/// Snapshot of the process environment the pipeline is configured from.
///
/// The snapshot is taken once at startup and passed down explicitly; nothing in
/// the crate reads `std::env` for configuration after that. Children still
/// inherit the real process environment, which is what `printenv` shows.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    /// Key-value store of environment variables (e.g., PATH, PAGER).
    pub vars: HashMap<String, String>,
}

impl Environment {
    /// Capture the variables of the current process.
    pub fn new() -> Self {
        Self::from_vars(stdenv::vars())
    }

    /// Build an environment from explicit pairs, ignoring the process state.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Get the value of an environment variable.
    pub fn get_var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Set or override an environment variable in `self.vars`.
    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }

    /// Program the final stage should run.
    ///
    /// The value of `PAGER` is taken as a single program name. An empty value
    /// counts as unset.
    pub fn pager(&self) -> &str {
        match self.get_var(PAGER_VAR) {
            Some(pager) if !pager.trim().is_empty() => pager,
            _ => DEFAULT_PAGER,
        }
    }

    /// Pager to try when [`pager`](Self::pager) cannot be executed.
    pub fn fallback_pager(&self) -> &str {
        FALLBACK_PAGER
    }

    /// Directories searched for programs, as found in `PATH`.
    pub fn search_path(&self) -> &str {
        self.get_var("PATH").unwrap_or_default()
    }
}
