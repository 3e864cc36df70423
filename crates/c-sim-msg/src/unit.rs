//! ---
//! csim_section: "02-message-schema"
//! csim_subsection: "module"
//! csim_type: "source"
//! csim_scope: "code"
//! csim_description: "Message schema, value blocks, and protocol codecs."
//! csim_version: "v0.0.0-prealpha"
//! csim_owner: "tbd"
//! ---
use std::collections::BTreeSet;

use tracing::debug;

/// Unit codes accepted out of the box. UCUM-style case-sensitive codes
/// covering the quantities exchanged on the platform.
const DEFAULT_UNIT_CODES: &[&str] = &[
    "A", "V", "kV", "W", "kW", "MW", "kV.A", "kV.A{r}", "V.A", "W.h", "kW.h", "MW.h", "Hz", "%",
    "s", "min", "h", "Cel", "m", "kg", "Pa", "bar", "deg", "m/s",
];

/// Vocabulary of accepted unit-of-measure codes.
///
/// Built once at component startup and passed explicitly to the validation
/// sites that want unit checking; code paths that receive no registry accept
/// any non-empty unit string. Codes confirmed valid by an external validator
/// can be added at runtime with [`UnitRegistry::register`].
#[derive(Debug, Clone, Default)]
pub struct UnitRegistry {
    codes: BTreeSet<String>,
}

impl UnitRegistry {
    /// An empty registry that accepts nothing until codes are registered.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the registry from the built-in code table.
    pub fn with_defaults() -> Self {
        Self {
            codes: DEFAULT_UNIT_CODES
                .iter()
                .map(|code| (*code).to_owned())
                .collect(),
        }
    }

    /// Add a code to the vocabulary. Returns false if it was already known.
    pub fn register(&mut self, code: impl Into<String>) -> bool {
        let code = code.into();
        let added = self.codes.insert(code.clone());
        if added {
            debug!(code = %code, "unit code added to the registry");
        }
        added
    }

    /// Whether the given code is part of the vocabulary.
    pub fn is_valid(&self, code: &str) -> bool {
        self.codes.contains(code)
    }

    /// Number of known codes.
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Whether the registry holds no codes at all.
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}
