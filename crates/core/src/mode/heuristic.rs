//! Content-based mode classification
//!
//! Best-effort fallback used when no label selects a mode. Scores the issue
//! title and body against two keyword lists and biases toward a direct patch
//! whenever the scores tie.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::model::{ModeSelection, ModeTag};

const ARCHITECTURAL_KEYWORDS: &[&str] = &[
    "architecture",
    "architectural",
    "refactor",
    "restructure",
    "redesign",
    "abstraction",
    "interface",
    "decouple",
    "modular",
    "migrate",
    "overhaul",
    "separation of concerns",
];

const LOCALIZED_KEYWORDS: &[&str] = &[
    "bug",
    "fix",
    "typo",
    "crash",
    "error",
    "exception",
    "broken",
    "incorrect",
    "wrong",
    "fails",
    "regression",
    "null",
];

/// Tuning constants for the classifier
///
/// These are not load-bearing contracts; recalibrate against real issue data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeuristicWeights {
    pub architectural_weight: u32,
    pub localized_weight: u32,
    /// Architectural score must exceed this for a two-stage selection
    pub sequence_threshold: u32,
}

impl Default for HeuristicWeights {
    fn default() -> Self {
        Self {
            architectural_weight: 2,
            localized_weight: 1,
            sequence_threshold: 3,
        }
    }
}

/// Scores produced for one issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentScore {
    pub architectural: u32,
    pub localized: u32,
    pub code_blocks: u32,
}

/// Keyword classifier over issue text
#[derive(Debug, Clone)]
pub struct ContentClassifier {
    architectural: Vec<Regex>,
    localized: Vec<Regex>,
    weights: HeuristicWeights,
}

impl ContentClassifier {
    pub fn new(weights: HeuristicWeights) -> Self {
        Self {
            architectural: compile(ARCHITECTURAL_KEYWORDS),
            localized: compile(LOCALIZED_KEYWORDS),
            weights,
        }
    }

    pub fn weights(&self) -> HeuristicWeights {
        self.weights
    }

    /// Score the title and body
    pub fn score(&self, title: &str, body: &str) -> ContentScore {
        let text = format!("{}\n{}", title, body);
        let architectural_hits = count_hits(&self.architectural, &text);
        let localized_hits = count_hits(&self.localized, &text);
        let code_blocks = (body.matches("```").count() / 2) as u32;

        ContentScore {
            architectural: architectural_hits * self.weights.architectural_weight,
            localized: localized_hits * self.weights.localized_weight + code_blocks,
            code_blocks,
        }
    }

    /// Pick a selection given the structural and localized modes to use
    pub fn classify(
        &self,
        title: &str,
        body: &str,
        structural: &ModeTag,
        localized: &ModeTag,
    ) -> ModeSelection {
        let score = self.score(title, body);
        debug!(
            architectural = score.architectural,
            localized = score.localized,
            code_blocks = score.code_blocks,
            "Content heuristic scores"
        );

        if score.architectural > score.localized {
            if score.architectural > self.weights.sequence_threshold {
                ModeSelection::sequence(structural.clone(), localized.clone())
            } else {
                ModeSelection::single(structural.clone())
            }
        } else {
            ModeSelection::single(localized.clone())
        }
    }
}

impl Default for ContentClassifier {
    fn default() -> Self {
        Self::new(HeuristicWeights::default())
    }
}

fn compile(keywords: &[&str]) -> Vec<Regex> {
    keywords
        .iter()
        .map(|kw| {
            Regex::new(&format!(r"(?i)\b{}", regex::escape(kw))).expect("static regex is valid")
        })
        .collect()
}

fn count_hits(patterns: &[Regex], text: &str) -> u32 {
    patterns.iter().filter(|re| re.is_match(text)).count() as u32
}
