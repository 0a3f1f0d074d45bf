//! Built-in mode catalog and external overrides

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::model::{Mode, ModeFamily, ModeSelection, ModeTag};
use crate::Result;

const ARCHITECT_DIRECTIVE: &str = "You are working in architect mode. Identify the structural \
cause of the issue and reshape the code around it: move responsibilities to the modules that \
should own them, introduce or adjust interfaces, and keep behavior intact. Prefer a coherent \
design over a minimal diff.";

const PATCHER_DIRECTIVE: &str = "You are working in patch mode. Make the smallest correct change \
that resolves the issue. Touch only the files that need it, keep the existing style, and add or \
update a test when one exists nearby.";

const SECURITY_DIRECTIVE: &str = "You are working in security mode. Resolve the issue with \
attention to input validation, injection, authentication and secret handling. Do not weaken \
existing checks.";

const PERFORMANCE_DIRECTIVE: &str = "You are working in performance mode. Resolve the issue by \
removing the hot-path cost it describes. Avoid speculative optimizations elsewhere.";

const TESTING_DIRECTIVE: &str = "You are working in testing mode. Add or repair the tests the \
issue asks for. Change production code only when a test exposes a real defect.";

/// Externally supplied directive and model overrides, keyed by mode tag
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeOverrides {
    #[serde(default)]
    pub directives: HashMap<String, String>,
    #[serde(default)]
    pub models: HashMap<String, String>,
}

impl ModeOverrides {
    /// Load overrides from a JSON file
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let overrides: Self = serde_json::from_str(&content)?;
        info!(
            "Loaded mode overrides from {:?} ({} directives, {} models)",
            path,
            overrides.directives.len(),
            overrides.models.len()
        );
        Ok(overrides)
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty() && self.models.is_empty()
    }
}

/// Ordered, immutable registry of operating modes
#[derive(Debug, Clone)]
pub struct ModeCatalog {
    modes: Vec<Mode>,
    overrides: ModeOverrides,
    second_stage: ModeTag,
    default_sequence: (ModeTag, ModeTag),
}

impl ModeCatalog {
    /// The built-in catalog. Order is significant for label matching.
    pub fn builtin() -> Self {
        let modes = vec![
            Mode::new("architect", ModeFamily::Structural)
                .with_labels(&["architect", "architecture", "refactor", "design"])
                .with_directive(ARCHITECT_DIRECTIVE)
                .with_args(&["--architect"]),
            Mode::new("patcher", ModeFamily::Localized)
                .with_labels(&["patcher", "bug", "fix", "patch"])
                .with_directive(PATCHER_DIRECTIVE)
                .with_args(&["--edit-format", "diff"]),
            Mode::new("hybrid:security", ModeFamily::Specialized)
                .with_labels(&["security", "vulnerability"])
                .with_directive(SECURITY_DIRECTIVE)
                .with_args(&["--edit-format", "diff"]),
            Mode::new("hybrid:performance", ModeFamily::Specialized)
                .with_labels(&["performance", "perf"])
                .with_directive(PERFORMANCE_DIRECTIVE)
                .with_args(&["--edit-format", "diff"]),
            Mode::new("hybrid:testing", ModeFamily::Specialized)
                .with_labels(&["testing", "tests"])
                .with_directive(TESTING_DIRECTIVE)
                .with_args(&["--edit-format", "whole"]),
        ];

        Self {
            modes,
            overrides: ModeOverrides::default(),
            second_stage: ModeTag::new("patcher"),
            default_sequence: (ModeTag::new("architect"), ModeTag::new("patcher")),
        }
    }

    /// Build a catalog from an explicit mode list
    ///
    /// The first Structural mode and the first Localized mode form the
    /// default sequence; the Localized one is also the second stage.
    pub fn from_modes(modes: Vec<Mode>) -> Result<Self> {
        let structural = modes
            .iter()
            .find(|m| m.family == ModeFamily::Structural)
            .map(|m| m.tag.clone());
        let localized = modes
            .iter()
            .find(|m| m.family == ModeFamily::Localized)
            .map(|m| m.tag.clone());

        match (structural, localized) {
            (Some(structural), Some(localized)) => Ok(Self {
                modes,
                overrides: ModeOverrides::default(),
                second_stage: localized.clone(),
                default_sequence: (structural, localized),
            }),
            _ => Err(crate::Error::InvalidConfig(
                "catalog needs at least one structural and one localized mode".into(),
            )),
        }
    }

    /// Attach directive/model overrides
    pub fn with_overrides(mut self, overrides: ModeOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Modes in catalog order
    pub fn iter(&self) -> impl Iterator<Item = &Mode> {
        self.modes.iter()
    }

    /// Look up a mode by tag (case-insensitive)
    pub fn get(&self, tag: &str) -> Option<&Mode> {
        self.modes
            .iter()
            .find(|m| m.tag.as_str().eq_ignore_ascii_case(tag))
    }

    /// Like [`ModeCatalog::get`], but an unknown tag is an error
    pub fn require(&self, tag: &str) -> Result<&Mode> {
        self.get(tag)
            .ok_or_else(|| crate::Error::UnknownMode(tag.to_string()))
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.get(tag).is_some()
    }

    /// All valid mode tokens, in catalog order
    pub fn tags(&self) -> Vec<String> {
        self.modes.iter().map(|m| m.tag.to_string()).collect()
    }

    /// Directive for a mode, override first
    pub fn directive_for(&self, tag: &ModeTag) -> Option<String> {
        if let Some(directive) = self.overrides.directives.get(tag.as_str()) {
            return Some(directive.clone());
        }
        self.get(tag.as_str()).map(|m| m.directive.clone())
    }

    /// Model identifier for a mode, override first
    pub fn model_for(&self, tag: &ModeTag, default_model: &str) -> String {
        self.overrides
            .models
            .get(tag.as_str())
            .cloned()
            .unwrap_or_else(|| default_model.to_string())
    }

    /// Default arguments for a mode
    pub fn args_for(&self, tag: &ModeTag) -> Vec<String> {
        self.get(tag.as_str())
            .map(|m| m.default_args.clone())
            .unwrap_or_default()
    }

    /// Mode used as the second stage after a structural pass
    pub fn default_second_stage(&self) -> &ModeTag {
        &self.second_stage
    }

    /// Sequence used when only a sequencing marker is present
    pub fn default_sequence(&self) -> ModeSelection {
        ModeSelection::sequence(self.default_sequence.0.clone(), self.default_sequence.1.clone())
    }

    /// First structural mode (used by the content classifier)
    pub fn structural_mode(&self) -> &ModeTag {
        &self.default_sequence.0
    }

    /// First localized mode (used by the content classifier)
    pub fn localized_mode(&self) -> &ModeTag {
        &self.default_sequence.1
    }
}

impl Default for ModeCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_order() {
        let catalog = ModeCatalog::builtin();
        assert_eq!(
            catalog.tags(),
            vec![
                "architect",
                "patcher",
                "hybrid:security",
                "hybrid:performance",
                "hybrid:testing"
            ]
        );
        assert_eq!(catalog.default_second_stage().as_str(), "patcher");
    }

    #[test]
    fn test_get_is_case_insensitive() {
        let catalog = ModeCatalog::builtin();
        assert!(catalog.get("ARCHITECT").is_some());
        assert!(catalog.get("hybrid:Security").is_some());
        assert!(catalog.get("wizard").is_none());
    }

    #[test]
    fn test_require_unknown_mode() {
        let catalog = ModeCatalog::builtin();
        assert_eq!(catalog.require("patcher").unwrap().tag.as_str(), "patcher");
        assert!(matches!(
            catalog.require("wizard"),
            Err(crate::Error::UnknownMode(tag)) if tag == "wizard"
        ));
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut overrides = ModeOverrides::default();
        overrides
            .directives
            .insert("patcher".into(), "Only fix typos.".into());
        overrides.models.insert("architect".into(), "big-model".into());

        let catalog = ModeCatalog::builtin().with_overrides(overrides);
        let patcher = ModeTag::new("patcher");
        let architect = ModeTag::new("architect");

        assert_eq!(catalog.directive_for(&patcher).unwrap(), "Only fix typos.");
        assert!(catalog.directive_for(&architect).unwrap().contains("architect mode"));
        assert_eq!(catalog.model_for(&architect, "default"), "big-model");
        assert_eq!(catalog.model_for(&patcher, "default"), "default");
    }

    #[test]
    fn test_overrides_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"directives": {{"architect": "Plan first."}}}}"#
        )
        .unwrap();

        let overrides = ModeOverrides::from_path(file.path()).unwrap();
        assert_eq!(overrides.directives["architect"], "Plan first.");
        assert!(overrides.models.is_empty());
    }

    #[test]
    fn test_from_modes_requires_both_families() {
        let only_patch = vec![Mode::new("patcher", ModeFamily::Localized)];
        assert!(ModeCatalog::from_modes(only_patch).is_err());

        let catalog = ModeCatalog::from_modes(vec![
            Mode::new("fixer", ModeFamily::Localized),
            Mode::new("planner", ModeFamily::Structural),
        ])
        .unwrap();
        assert_eq!(catalog.structural_mode().as_str(), "planner");
        assert_eq!(catalog.default_second_stage().as_str(), "fixer");
    }
}
