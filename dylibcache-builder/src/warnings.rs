//! Non-fatal, per-input diagnostics. A dylib excluded during
//! `verify_self_contained` or categorization does not fail the build; it is
//! recorded here and surfaced through [`Warnings::for_each_warning`] after a
//! successful `build`.

/// One recorded warning.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Warning {
    /// A dylib was not placed in the cache. Renders via `Display` using the
    /// exact format the design requires.
    DylibExcluded { path: String, reason: String },
    /// An optional optimization downgraded instead of failing the build
    /// ("Optional optimizations... downgrade to a recorded warning and
    /// continue").
    OptimizationDowngraded { optimization: &'static str, reason: String },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::DylibExcluded { path, reason } => write!(
                f,
                "Dylib located at '{path}' not placed in shared cache because: {reason}"
            ),
            Warning::OptimizationDowngraded { optimization, reason } => {
                write!(f, "{optimization} disabled: {reason}")
            }
        }
    }
}

/// Append-only, insertion-ordered sink of [`Warning`]s.
#[derive(Debug, Default, Clone)]
pub struct Warnings {
    items: Vec<Warning>,
}

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, warning: Warning) {
        tracing::warn!(%warning, "recorded build warning");
        self.items.push(warning);
    }

    pub fn dylib_excluded(&mut self, path: impl Into<String>, reason: impl Into<String>) {
        self.push(Warning::DylibExcluded {
            path: path.into(),
            reason: reason.into(),
        });
    }

    pub fn optimization_downgraded(&mut self, optimization: &'static str, reason: impl Into<String>) {
        self.push(Warning::OptimizationDowngraded {
            optimization,
            reason: reason.into(),
        });
    }

    /// Invokes `f` for every warning recorded so far, in recording order.
    pub fn for_each_warning(&self, mut f: impl FnMut(&Warning)) {
        for w in &self.items {
            f(w);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excluded_dylib_message_matches_spec_format() {
        let mut warnings = Warnings::new();
        warnings.dylib_excluded("/usr/lib/Bad.dylib", "non-weak dependency missing");
        let mut seen = Vec::new();
        warnings.for_each_warning(|w| seen.push(w.to_string()));
        assert_eq!(
            seen,
            vec![
                "Dylib located at '/usr/lib/Bad.dylib' not placed in shared cache because: non-weak dependency missing"
                    .to_string()
            ]
        );
    }
}
