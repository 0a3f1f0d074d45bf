//! Mode model definitions

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque tag naming an operating mode (`architect`, `patcher`, `hybrid:security`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModeTag(String);

impl ModeTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Branch-safe form of the tag (`hybrid:security` -> `hybrid-security`)
    pub fn slug(&self) -> String {
        self.0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
            .collect()
    }
}

impl fmt::Display for ModeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModeTag {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

/// Behavioral family of a mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeFamily {
    /// Architect-like: plans structural changes, output needs a refinement pass
    Structural,
    /// Patch-like: direct, localized edits
    Localized,
    /// `category:subtype` hybrids focused on one concern
    Specialized,
}

impl ModeFamily {
    /// Whether a sequencing marker on the issue should add a second stage
    pub fn needs_review(&self) -> bool {
        matches!(self, Self::Structural)
    }
}

/// An operating mode with its directive and default agent arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mode {
    pub tag: ModeTag,
    pub family: ModeFamily,
    pub labels: Vec<String>,
    pub directive: String,
    pub default_args: Vec<String>,
}

impl Mode {
    pub fn new(tag: impl Into<String>, family: ModeFamily) -> Self {
        Self {
            tag: ModeTag::new(tag),
            family,
            labels: Vec::new(),
            directive: String::new(),
            default_args: Vec::new(),
        }
    }

    pub fn with_labels(mut self, labels: &[&str]) -> Self {
        self.labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directive = directive.into();
        self
    }

    pub fn with_args(mut self, args: &[&str]) -> Self {
        self.default_args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Case-insensitive check against the issue labels
    pub fn matches_any_label(&self, labels: &[String]) -> bool {
        labels
            .iter()
            .any(|label| self.labels.iter().any(|own| own.eq_ignore_ascii_case(label.trim())))
    }
}

/// The mode(s) chosen for one issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeSelection {
    pub primary: ModeTag,
    pub secondary: Option<ModeTag>,
    pub needs_sequencing: bool,
}

impl ModeSelection {
    pub fn single(primary: ModeTag) -> Self {
        Self {
            primary,
            secondary: None,
            needs_sequencing: false,
        }
    }

    pub fn sequence(primary: ModeTag, secondary: ModeTag) -> Self {
        Self {
            primary,
            secondary: Some(secondary),
            needs_sequencing: true,
        }
    }

    /// Modes in execution order
    pub fn modes(&self) -> Vec<&ModeTag> {
        std::iter::once(&self.primary)
            .chain(self.secondary.as_ref())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug() {
        assert_eq!(ModeTag::new("hybrid:security").slug(), "hybrid-security");
        assert_eq!(ModeTag::new("Patcher").slug(), "patcher");
    }

    #[test]
    fn test_label_match_is_case_insensitive() {
        let mode = Mode::new("patcher", ModeFamily::Localized).with_labels(&["bug"]);
        assert!(mode.matches_any_label(&["BUG".to_string()]));
        assert!(!mode.matches_any_label(&["enhancement".to_string()]));
    }

    #[test]
    fn test_selection_modes_order() {
        let selection = ModeSelection::sequence("architect".into(), "patcher".into());
        let modes: Vec<&str> = selection.modes().iter().map(|m| m.as_str()).collect();
        assert_eq!(modes, vec!["architect", "patcher"]);
        assert!(ModeSelection::single("patcher".into()).secondary.is_none());
    }
}
