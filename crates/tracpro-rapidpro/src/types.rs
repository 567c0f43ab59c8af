//! RapidPro API wire types.
//!
//! List endpoints wrap results in a `{count, next, results}` envelope;
//! [`Page`] captures that pattern generically. Rule tests and categories in
//! flow definitions arrive as loosely-shaped JSON (strings or per-locale
//! maps) and are kept as raw values here; the engine layer normalizes them
//! into domain rule types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One page of a paginated list response.
#[derive(Debug, Deserialize)]
pub struct Page<T> {
    pub count: i64,
    #[serde(default)]
    pub next: Option<String>,
    pub results: Vec<T>,
}

// ---------------------------------------------------------------------------
// flows
// ---------------------------------------------------------------------------

/// A flow summary from the `flows` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Flow {
    pub uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub archived: bool,
    /// Branch points of the flow, in flow order.
    #[serde(default)]
    pub rulesets: Vec<RulesetSummary>,
}

/// One ruleset (branch point) as listed on a flow summary.
#[derive(Debug, Clone, Deserialize)]
pub struct RulesetSummary {
    /// Ruleset UUID; the flows endpoint calls this `node`.
    pub node: Uuid,
    pub label: String,
}

/// Full flow definition from the `flow_definition` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowDefinition {
    #[serde(default)]
    pub rule_sets: Vec<RuleSetDefinition>,
}

/// One ruleset inside a flow definition, with its branching rules.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSetDefinition {
    pub uuid: Uuid,
    #[serde(default)]
    pub label: String,
    /// Ordered rules; the final rule is always the catch-all "Other".
    #[serde(default)]
    pub rules: Vec<FlowRule>,
}

/// A raw branching rule: the test object and resulting category, both kept as
/// loose JSON (category may be a string or a locale map).
#[derive(Debug, Clone, Deserialize)]
pub struct FlowRule {
    pub test: serde_json::Value,
    pub category: serde_json::Value,
}

// ---------------------------------------------------------------------------
// runs
// ---------------------------------------------------------------------------

/// A flow run: one contact's pass through a flow.
#[derive(Debug, Clone, Deserialize)]
pub struct Run {
    /// External run id.
    pub id: i64,
    /// UUID of the flow this run belongs to.
    pub flow: Uuid,
    /// UUID of the contact who ran the flow.
    pub contact: Uuid,
    pub created_on: DateTime<Utc>,
    #[serde(default)]
    pub completed: bool,
    /// Answers collected so far, one per ruleset reached.
    #[serde(default)]
    pub values: Vec<RunValue>,
}

/// One answer within a run.
#[derive(Debug, Clone, Deserialize)]
pub struct RunValue {
    /// Ruleset UUID this answer belongs to.
    pub node: Uuid,
    #[serde(default)]
    pub value: Option<String>,
    /// Category as assigned by RapidPro: a string or a locale map.
    #[serde(default)]
    pub category: serde_json::Value,
    /// Submission time.
    pub time: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// contacts
// ---------------------------------------------------------------------------

/// A contact record from the `contacts` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Contact {
    pub uuid: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub urns: Vec<String>,
    #[serde(default)]
    pub group_uuids: Vec<Uuid>,
    #[serde(default)]
    pub fields: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub language: Option<String>,
}

/// Body of a contact update call.
#[derive(Debug, Clone, Serialize)]
pub struct ContactUpdate {
    pub uuid: Uuid,
    pub name: String,
    pub urns: Vec<String>,
    pub fields: HashMap<String, String>,
    pub group_uuids: Vec<Uuid>,
}

/// Body of a flow start call.
#[derive(Debug, Clone, Serialize)]
pub struct FlowStart {
    pub flow_uuid: Uuid,
    pub contacts: Vec<Uuid>,
    pub restart_participants: bool,
}
