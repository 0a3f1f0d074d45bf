//! Core library for the issue fixer
//!
//! This crate contains the pieces shared by the supervisor and the
//! sequencer:
//! - Mode catalog and mode selection
//! - Settings and credential handling
//! - Run results and progress events

pub mod config;
pub mod credential;
pub mod error;
pub mod mode;
pub mod run;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
