use thiserror::Error;

/// Policy-load failures. Fatal to the rule set being loaded; the caller
/// keeps its previous rules active.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("invalid regex '{expr}' in routing rule: {source}")]
    InvalidRegex {
        expr: String,
        source: regex::Error,
    },

    #[error("malformed routing document: {0}")]
    MalformedDocument(#[from] serde_json::Error),
}
