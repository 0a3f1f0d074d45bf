//! Mode selection from labels, commands and issue content

use std::sync::Arc;

use tracing::debug;

use super::catalog::ModeCatalog;
use super::heuristic::{ContentClassifier, HeuristicWeights};
use super::model::{ModeSelection, ModeTag};

/// Selector configuration
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// Labels that request a two-stage sequence
    pub sequencing_labels: Vec<String>,
    /// Fall back to content heuristics when no label matches
    pub use_content_heuristics: bool,
    pub weights: HeuristicWeights,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            sequencing_labels: vec!["multipass".to_string()],
            use_content_heuristics: true,
            weights: HeuristicWeights::default(),
        }
    }
}

/// Resolves the mode(s) for an issue against an immutable catalog
#[derive(Debug, Clone)]
pub struct ModeSelector {
    catalog: Arc<ModeCatalog>,
    config: SelectorConfig,
    classifier: ContentClassifier,
}

impl ModeSelector {
    pub fn new(catalog: Arc<ModeCatalog>, config: SelectorConfig) -> Self {
        let classifier = ContentClassifier::new(config.weights);
        Self {
            catalog,
            config,
            classifier,
        }
    }

    pub fn catalog(&self) -> &ModeCatalog {
        &self.catalog
    }

    /// Mode tokens accepted by [`ModeSelector::from_command`]
    pub fn valid_tokens(&self) -> Vec<String> {
        self.catalog.tags()
    }

    fn has_sequencing_marker(&self, labels: &[String]) -> bool {
        labels.iter().any(|label| {
            self.config
                .sequencing_labels
                .iter()
                .any(|marker| marker.eq_ignore_ascii_case(label.trim()))
        })
    }

    /// First catalog mode whose labels intersect the issue labels
    pub fn from_labels(&self, labels: &[String]) -> Option<ModeSelection> {
        let sequencing = self.has_sequencing_marker(labels);

        match self.catalog.iter().find(|mode| mode.matches_any_label(labels)) {
            Some(mode) if mode.family.needs_review() && sequencing => Some(ModeSelection::sequence(
                mode.tag.clone(),
                self.catalog.default_second_stage().clone(),
            )),
            Some(mode) => Some(ModeSelection::single(mode.tag.clone())),
            None if sequencing => Some(self.catalog.default_sequence()),
            None => None,
        }
    }

    /// Parse a command such as `/mode patcher` or `/mode architect+patcher`
    pub fn from_command(&self, command: &str) -> Option<ModeSelection> {
        let token = command.split_whitespace().nth(1)?;

        match token.split_once('+') {
            Some((first, second)) => {
                let primary = self.resolve(first)?;
                let secondary = self.resolve(second)?;
                Some(ModeSelection::sequence(primary, secondary))
            }
            None => self.resolve(token).map(ModeSelection::single),
        }
    }

    /// Classify by content alone
    pub fn from_content(&self, title: &str, body: &str) -> ModeSelection {
        self.classifier.classify(
            title,
            body,
            self.catalog.structural_mode(),
            self.catalog.localized_mode(),
        )
    }

    /// Labels first, then content heuristics when enabled
    pub fn select(&self, title: &str, body: &str, labels: &[String]) -> Option<ModeSelection> {
        if let Some(selection) = self.from_labels(labels) {
            debug!(primary = %selection.primary, "Mode selected from labels");
            return Some(selection);
        }

        if self.config.use_content_heuristics {
            let selection = self.from_content(title, body);
            debug!(primary = %selection.primary, "Mode selected from content");
            return Some(selection);
        }

        None
    }

    fn resolve(&self, token: &str) -> Option<ModeTag> {
        self.catalog.get(token.trim()).map(|m| m.tag.clone())
    }
}
