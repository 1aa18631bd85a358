//! Variant naming
//!
//! Derived resources are named `{name}{suffix}`. Applying and stripping a
//! suffix are exact string operations.

/// Fixed suffixes for derived objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantSuffix {
    Green,
    Canary,
    Baseline,
    Stable,
    /// Traffic split object owned by a rollout
    TrafficSplit,
}

impl VariantSuffix {
    pub const ALL: [VariantSuffix; 5] = [
        VariantSuffix::Green,
        VariantSuffix::Canary,
        VariantSuffix::Baseline,
        VariantSuffix::Stable,
        VariantSuffix::TrafficSplit,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            VariantSuffix::Green => "-green",
            VariantSuffix::Canary => "-canary",
            VariantSuffix::Baseline => "-baseline",
            VariantSuffix::Stable => "-stable",
            VariantSuffix::TrafficSplit => "-workflow-rollout",
        }
    }

    pub fn apply(self, name: &str) -> String {
        format!("{}{}", name, self.as_str())
    }

    /// Remove this suffix; `None` if the name does not carry it
    pub fn strip(self, name: &str) -> Option<&str> {
        name.strip_suffix(self.as_str())
    }
}
