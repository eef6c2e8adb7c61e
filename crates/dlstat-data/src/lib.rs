//! Data layer for download statistics.
//!
//! Locates the daily package-downloads logs, folds their events into
//! per-day snapshots, renders those snapshots as reports or CSV rows, and
//! reads the transfer-session statistics that accompany them.

pub mod aggregator;
pub mod reader;
pub mod report;
pub mod sessions;

pub use dlstat_core as core;
