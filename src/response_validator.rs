//! C4: ResponseValidator — turns a raw Fanout outcome into a trusted,
//! capped, normalized instruction stream, per §4.4.
//!
//! Grounded on `taos.im.validator.forward`'s per-response validation block:
//! decompress, agent_id check, capital-turnover cap gate, stp/book_id
//! normalization, reset rejection, per-book instruction ceiling.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::compress::{self, Codec};
use crate::error::ValidationError;
use crate::fanout::Outcome;
use crate::model::{Instruction, InstructionKind, Stp};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub agent_id: u32,
    pub instructions: Vec<Instruction>,
}

#[derive(Debug, Clone, Copy)]
pub struct ValidatorConfig {
    pub book_count: u32,
    pub max_instructions_per_book: usize,
    pub capital_turnover_cap: f64,
}

/// Per-uid validation outcome: the surviving instructions plus the reasons
/// anything was dropped, for the caller's counters/logging.
#[derive(Debug, Clone, Default)]
pub struct ValidatedResponse {
    pub instructions: Vec<Instruction>,
    pub drops: Vec<ValidationError>,
}

/// Validate one uid's raw fanout outcome into a capped instruction stream.
///
/// `initial_wealth` and `rolling_volume` are looked up per book_id to decide
/// the capital-turnover cap gate (§4.4 step 4, Testable Property 6):
/// `rolling_volume(book) >= capital_turnover_cap * initial_wealth(book)`
/// restricts that uid's instructions on that book to `Cancel` only.
pub fn validate(
    uid: u32,
    outcome: Outcome,
    codec: Codec,
    protocol_version: u32,
    config: &ValidatorConfig,
    initial_wealth: impl Fn(u32) -> f64,
    rolling_volume: impl Fn(u32) -> f64,
) -> ValidatedResponse {
    let mut result = ValidatedResponse::default();

    let payload = match outcome {
        Outcome::Success(body) => body,
        _ => {
            result.drops.push(ValidationError::NotSuccessful);
            return result;
        }
    };

    let response: AgentResponse =
        match compress::decompress::<AgentResponse>(&payload, codec, protocol_version) {
            Ok(r) => r,
            Err(_) => {
                result.drops.push(ValidationError::DecompressFailed);
                return result;
            }
        };

    if response.agent_id != uid {
        result.drops.push(ValidationError::AgentIdMismatch);
        return result;
    }

    let mut per_book_counts: HashMap<u32, usize> = HashMap::new();

    for mut instruction in response.instructions {
        if instruction.is_reset() {
            continue; // RESET_AGENT is validator-originated only (§4.4 step 5)
        }

        let Some(book_id) = instruction.book_id() else {
            continue;
        };
        if book_id >= config.book_count {
            continue;
        }

        normalize_stp(&mut instruction);

        let cap = config.capital_turnover_cap * initial_wealth(book_id);
        let over_cap = rolling_volume(book_id) >= cap;
        if over_cap && !instruction.is_cancel() {
            continue;
        }

        let count = per_book_counts.entry(book_id).or_insert(0);
        if *count >= config.max_instructions_per_book {
            continue;
        }
        *count += 1;
        result.instructions.push(instruction);
    }

    warn_if_over_ceiling(uid, &per_book_counts, config.max_instructions_per_book);
    result
}

fn normalize_stp(instruction: &mut Instruction) {
    if let InstructionKind::PlaceMarket { common } | InstructionKind::PlaceLimit { common, .. } =
        &mut instruction.kind
    {
        if !matches!(
            common.stp,
            Stp::NoStp
                | Stp::CancelOldest
                | Stp::CancelNewest
                | Stp::CancelBoth
                | Stp::DecreaseCancel
        ) {
            common.stp = Stp::CancelOldest;
        }
    }
}

fn warn_if_over_ceiling(uid: u32, counts: &HashMap<u32, usize>, ceiling: usize) {
    let over: Vec<&u32> = counts
        .iter()
        .filter(|&(_, &count)| count >= ceiling)
        .map(|(book, _)| book)
        .collect();
    if over.is_empty() {
        return;
    }
    let average = counts.values().sum::<usize>() as f64 / counts.len() as f64;
    warn!(
        uid,
        books = ?over,
        average_per_book = average,
        "per-book instruction ceiling reached, dropping remainder"
    );
}
