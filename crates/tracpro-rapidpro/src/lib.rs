//! Typed client for the RapidPro REST API.
//!
//! Exposes [`RapidProClient`] with the endpoints the sync and alerting jobs
//! need: flows and flow definitions, run history, contact lookup and update,
//! and flow starts. Transient failures retry with exponential back-off.

pub mod client;
pub mod error;
mod retry;
pub mod types;

pub use client::RapidProClient;
pub use error::RapidProError;
pub use types::{
    Contact, ContactUpdate, Flow, FlowDefinition, FlowRule, FlowStart, Page, RuleSetDefinition,
    RulesetSummary, Run, RunValue,
};
