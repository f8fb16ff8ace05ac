//! Local error enums for callers that must distinguish failure kinds, per
//! §10.2. `anyhow` covers everything else at the application boundary.

use thiserror::Error;

/// Reason a single uid's response was dropped or trimmed by the
/// ResponseValidator, per §4.4. Counted per-reason by the caller rather than
/// collapsed into a single "validation failed".
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("outcome was not a success")]
    NotSuccessful,
    #[error("payload failed to decompress")]
    DecompressFailed,
    #[error("response agent_id did not match the queried uid")]
    AgentIdMismatch,
}
