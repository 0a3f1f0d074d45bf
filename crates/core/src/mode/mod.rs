//! Mode module
//!
//! Operating modes, the built-in catalog and mode selection.

mod catalog;
mod heuristic;
mod model;
mod selector;

pub use catalog::{ModeCatalog, ModeOverrides};
pub use heuristic::{ContentClassifier, ContentScore, HeuristicWeights};
pub use model::*;
pub use selector::{ModeSelector, SelectorConfig};
