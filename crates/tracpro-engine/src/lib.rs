//! Orchestration engines over the TracPro core, store, and RapidPro client.
//!
//! Five engines cover the pipeline: [`PollSyncEngine`] reconciles poll and
//! question definitions, [`RunIngestionEngine`] turns flow runs into
//! responses and answers, [`PollRunResolver`] serves the region-scoped read
//! path, [`TrackerRuleEngine`] evaluates threshold trackers, and
//! [`AlertRuleEngine`] re-enters contacts into flows from accumulated
//! occurrences. Outbound notification goes through the [`Notifier`] seam;
//! category-count reads optionally go through a [`CategoryCountCache`].

pub mod alerts;
pub mod cache;
pub mod error;
pub mod ingest;
pub mod notify;
pub mod resolver;
pub mod sync;
pub mod tracker;

pub use alerts::AlertRuleEngine;
pub use cache::{CategoryCountCache, CategoryCounts, InMemoryCache, NoopCache};
pub use error::EngineError;
pub use ingest::RunIngestionEngine;
pub use notify::{LogNotifier, Notifier, NotifyError, RecordingNotifier};
pub use resolver::PollRunResolver;
pub use sync::{PollSyncEngine, SyncOutcome};
pub use tracker::TrackerRuleEngine;
