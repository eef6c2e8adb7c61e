//! Core types for download statistics.
//!
//! Holds the log-line grammar, the event model and classifier, the bundle
//! registry, row layouts, configuration and the shared error type.

pub mod bundles;
pub mod classifier;
pub mod error;
pub mod formatting;
pub mod grammar;
pub mod models;
pub mod package_types;
pub mod settings;
pub mod time_utils;

pub use error::{DlStatError, Result};
