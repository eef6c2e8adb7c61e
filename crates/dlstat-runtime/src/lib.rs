//! Runtime layer for download statistics.
//!
//! Keeps the reporting workbook current and enriches transfer-client
//! addresses with geolocation data.

pub mod geolocate;
pub mod sheet;
pub mod update;

pub use dlstat_core as core;
pub use dlstat_data as data;
