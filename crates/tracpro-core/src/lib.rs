//! Pure domain logic for TracPro: survey categorization rules, poll and
//! response semantics, region hierarchy queries, and tracker threshold
//! evaluation. No I/O lives here; persistence and the RapidPro client sit
//! in sibling crates.

pub mod config;
pub mod polls;
pub mod regions;
pub mod rules;
pub mod trackers;
pub mod words;

pub use config::{load_app_config, AppConfig, ConfigError};
