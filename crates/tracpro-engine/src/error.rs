use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the engines.
///
/// Configuration and consistency problems get their own variants so callers
/// can distinguish them from plumbing failures; external-system errors inside
/// batch loops are handled at the loop site and rarely reach callers.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("database error: {0}")]
    Db(#[from] tracpro_db::DbError),

    #[error("RapidPro error: {0}")]
    RapidPro(#[from] tracpro_rapidpro::RapidProError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A run arrived for a flow with no active poll in the org.
    #[error("no active poll for flow {0}")]
    UnknownFlow(Uuid),

    /// A response query asked about a region the pollrun does not cover.
    #[error("pollrun {pollrun_id} does not cover region {region_id}")]
    NotCovered { pollrun_id: i64, region_id: i64 },

    /// A stored code column holds a value the domain enums do not recognize.
    #[error("invalid {kind} code '{value}'")]
    InvalidCode { kind: &'static str, value: String },

    /// A localized category arrived with neither a `base` entry nor any
    /// other entry.
    #[error("localized category with no entries")]
    MalformedCategory,
}
