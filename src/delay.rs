//! C5: DelayAssigner — maps observed agent response latency to an
//! in-simulation delay and layers deterministic per-instruction jitter on
//! top, per §4.5.
//!
//! Grounded on `taos.im.validator.reward`'s delay-curve and jitter block:
//! exact exponential curve with `k = 5`, and the first-instruction-per-book
//! gets zero jitter rule.

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::model::Instruction;

const CURVE_STEEPNESS: f64 = 5.0;

#[derive(Debug, Clone, Copy)]
pub struct DelayConfig {
    pub min_delay_ns: u64,
    pub max_delay_ns: u64,
    pub min_instruction_delay_ns: u64,
    pub max_instruction_delay_ns: u64,
}

/// Base delay for a uid given its observed `process_time_ns` against the
/// query timeout budget `timeout_ns`, per the exponential curve in §4.5.
/// Monotonic in `process_time_ns` (Testable Property 4).
pub fn base_delay_ns(process_time_ns: u64, timeout_ns: u64, config: &DelayConfig) -> u64 {
    if timeout_ns == 0 {
        return config.min_delay_ns;
    }
    let t = (process_time_ns as f64 / timeout_ns as f64).clamp(0.0, 1.0);
    let frac = ((CURVE_STEEPNESS * t).exp() - 1.0) / (CURVE_STEEPNESS.exp() - 1.0);
    let span = (config.max_delay_ns - config.min_delay_ns) as f64;
    config.min_delay_ns + (frac * span).round() as u64
}

/// Apply jitter in original instruction order: the first instruction on each
/// book gets zero jitter, subsequent ones on the same book draw
/// `uniform(min_instruction_delay, max_instruction_delay)`. Then add
/// `base_delay` to every instruction's `delay`. `rng` is expected to be
/// seeded once per step by the orchestrator for reproducibility.
pub fn assign(
    instructions: &mut [Instruction],
    base_delay: u64,
    config: &DelayConfig,
    rng: &mut ChaCha8Rng,
) {
    use std::collections::HashSet;
    let mut seen_books: HashSet<u32> = HashSet::new();

    for instruction in instructions.iter_mut() {
        let jitter = match instruction.book_id() {
            Some(book_id) if seen_books.insert(book_id) => 0,
            Some(_) => {
                rng.gen_range(config.min_instruction_delay_ns..=config.max_instruction_delay_ns)
            }
            None => 0,
        };
        instruction.delay += base_delay + jitter;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InstructionKind, OrderCurrency, OrderDirection, PlaceOrderCommon, Stp};
    use rand::SeedableRng;

    fn place(agent_id: u32, book_id: u32) -> Instruction {
        Instruction {
            agent_id,
            delay: 0,
            kind: InstructionKind::PlaceMarket {
                common: PlaceOrderCommon {
                    book_id,
                    direction: OrderDirection::Buy,
                    quantity: 1.0,
                    client_order_id: None,
                    stp: Stp::CancelOldest,
                    currency: OrderCurrency::Base,
                    leverage: 0.0,
                    settle_flag: Default::default(),
                },
            },
        }
    }

    /// Scenario 3 (§8): T=3s, min_delay=10ms, max_delay=1s.
    #[test]
    fn delay_curve_matches_scenario_endpoints() {
        let config = DelayConfig {
            min_delay_ns: 10_000_000,
            max_delay_ns: 1_000_000_000,
            min_instruction_delay_ns: 0,
            max_instruction_delay_ns: 0,
        };
        let timeout_ns = 3_000_000_000;

        assert_eq!(base_delay_ns(0, timeout_ns, &config), config.min_delay_ns);
        assert_eq!(
            base_delay_ns(timeout_ns, timeout_ns, &config),
            config.max_delay_ns
        );

        let mid = base_delay_ns(1_500_000_000, timeout_ns, &config);
        let frac = ((2.5f64).exp() - 1.0) / ((5.0f64).exp() - 1.0);
        let expected = config.min_delay_ns + (frac * 990_000_000.0).round() as u64;
        assert_eq!(mid, expected);
    }

    #[test]
    fn delay_monotonic_in_process_time() {
        let config = DelayConfig {
            min_delay_ns: 10_000_000,
            max_delay_ns: 1_000_000_000,
            min_instruction_delay_ns: 0,
            max_instruction_delay_ns: 0,
        };
        let timeout_ns = 3_000_000_000;
        let a = base_delay_ns(500_000_000, timeout_ns, &config);
        let b = base_delay_ns(2_000_000_000, timeout_ns, &config);
        assert!(a <= b);
    }

    #[test]
    fn first_instruction_per_book_has_zero_jitter() {
        let config = DelayConfig {
            min_delay_ns: 0,
            max_delay_ns: 0,
            min_instruction_delay_ns: 100,
            max_instruction_delay_ns: 200,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut instructions = vec![place(1, 0), place(1, 0), place(1, 1)];
        assign(&mut instructions, 0, &config, &mut rng);

        assert_eq!(instructions[0].delay, 0);
        assert!((100..=200).contains(&instructions[1].delay));
        assert_eq!(instructions[2].delay, 0);
    }
}
