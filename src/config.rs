//! CLI surface and resolved runtime configuration, per §6 and §10.3.
//!
//! A single `Args` struct parsed once at startup via `clap(derive, env)`,
//! `dotenv` loaded ahead of it for local development, resolved into one
//! immutable config struct the rest of the system depends on.

use std::time::Duration;

use clap::Parser;

use crate::delay::DelayConfig;
use crate::history::HistoryConfig;
use crate::reward::RewardConfig;
use crate::score::ScoreConfig;

/// Load `.env` if present, ahead of parsing CLI args.
pub fn load_env() {
    let _ = dotenv::dotenv();
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "im-validator",
    about = "Validator-side coordination layer for a distributed market-simulation network"
)]
pub struct Args {
    #[arg(long, env = "VALIDATOR_NETUID")]
    pub netuid: u16,
    #[arg(long = "subtensor.chain_endpoint", env = "SUBTENSOR_CHAIN_ENDPOINT")]
    pub subtensor_chain_endpoint: String,
    #[arg(long = "wallet.path", env = "WALLET_PATH")]
    pub wallet_path: String,
    #[arg(long = "wallet.name", env = "WALLET_NAME")]
    pub wallet_name: String,
    #[arg(long = "wallet.hotkey", env = "WALLET_HOTKEY")]
    pub wallet_hotkey: String,
    #[arg(long, env = "VALIDATOR_PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(
        long = "compression.engine",
        env = "COMPRESSION_ENGINE",
        default_value = "zlib"
    )]
    pub compression_engine: String,
    #[arg(
        long = "compression.level",
        env = "COMPRESSION_LEVEL",
        default_value_t = 6
    )]
    pub compression_level: u32,
    #[arg(
        long = "compression.parallel_workers",
        env = "COMPRESSION_PARALLEL_WORKERS",
        default_value_t = 4
    )]
    pub compression_parallel_workers: usize,

    #[arg(
        long = "scoring.max_instructions_per_book",
        env = "SCORING_MAX_INSTRUCTIONS_PER_BOOK",
        default_value_t = 100
    )]
    pub scoring_max_instructions_per_book: usize,
    #[arg(
        long = "scoring.sharpe.parallel_workers",
        env = "SCORING_SHARPE_PARALLEL_WORKERS",
        default_value_t = 4
    )]
    pub scoring_sharpe_parallel_workers: usize,
    #[arg(
        long = "scoring.sharpe.lookback",
        env = "SCORING_SHARPE_LOOKBACK",
        default_value_t = 1000
    )]
    pub scoring_sharpe_lookback: usize,
    #[arg(long = "scoring.sharpe.normalization_min", env = "SCORING_SHARPE_NORMALIZATION_MIN", default_value_t = -2.0)]
    pub scoring_sharpe_normalization_min: f64,
    #[arg(
        long = "scoring.sharpe.normalization_max",
        env = "SCORING_SHARPE_NORMALIZATION_MAX",
        default_value_t = 2.0
    )]
    pub scoring_sharpe_normalization_max: f64,
    #[arg(
        long = "scoring.activity.trade_volume_sampling_interval",
        env = "SCORING_ACTIVITY_SAMPLING_INTERVAL_NS",
        default_value_t = 1_000_000_000
    )]
    pub scoring_activity_sampling_interval_ns: i64,
    #[arg(
        long = "scoring.activity.trade_volume_assessment_period",
        env = "SCORING_ACTIVITY_ASSESSMENT_PERIOD_NS",
        default_value_t = 86_400_000_000_000
    )]
    pub scoring_activity_assessment_period_ns: i64,
    #[arg(
        long = "scoring.activity.capital_turnover_cap",
        env = "SCORING_ACTIVITY_CAPITAL_TURNOVER_CAP",
        default_value_t = 20.0
    )]
    pub scoring_activity_capital_turnover_cap: f64,
    #[arg(
        long = "scoring.min_delay",
        env = "SCORING_MIN_DELAY_NS",
        default_value_t = 10_000_000
    )]
    pub scoring_min_delay_ns: u64,
    #[arg(
        long = "scoring.max_delay",
        env = "SCORING_MAX_DELAY_NS",
        default_value_t = 1_000_000_000
    )]
    pub scoring_max_delay_ns: u64,
    #[arg(
        long = "scoring.min_instruction_delay",
        env = "SCORING_MIN_INSTRUCTION_DELAY_NS",
        default_value_t = 0
    )]
    pub scoring_min_instruction_delay_ns: u64,
    #[arg(
        long = "scoring.max_instruction_delay",
        env = "SCORING_MAX_INSTRUCTION_DELAY_NS",
        default_value_t = 100_000_000
    )]
    pub scoring_max_instruction_delay_ns: u64,

    #[arg(long = "rewarding.seed", env = "REWARDING_SEED", default_value_t = 42)]
    pub rewarding_seed: u64,
    #[arg(
        long = "rewarding.pareto.scale",
        env = "REWARDING_PARETO_SCALE",
        default_value_t = 1.0
    )]
    pub rewarding_pareto_scale: f64,
    #[arg(
        long = "rewarding.pareto.shape",
        env = "REWARDING_PARETO_SHAPE",
        default_value_t = 2.0
    )]
    pub rewarding_pareto_shape: f64,
}

/// Retention/depth knobs not carried by the CLI (book-topology specific,
/// supplied by the simulator handshake rather than process startup).
#[derive(Debug, Clone, Copy)]
pub struct HistoryTopology {
    pub retention_ns: i64,
    pub depth: usize,
    pub volume_decimals: u8,
}

/// The single immutable config struct every subsystem depends on, resolved
/// once at startup from `Args` (§10.3).
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub netuid: u16,
    pub port: u16,
    pub book_count: u32,
    pub history: HistoryConfig,
    pub delay: DelayConfig,
    pub score: ScoreConfig,
    pub reward: RewardConfig,
    pub max_instructions_per_book: usize,
    pub global_fanout_deadline: Duration,
    pub per_axon_timeout: Duration,
    pub query_wall_clock_timeout: Duration,
    pub fanout_stagger: Duration,
}

impl ValidatorConfig {
    pub fn resolve(args: &Args, book_count: u32, topology: HistoryTopology) -> Self {
        Self {
            netuid: args.netuid,
            port: args.port,
            book_count,
            history: HistoryConfig {
                retention_ns: topology.retention_ns,
                depth: topology.depth,
                volume_decimals: topology.volume_decimals,
            },
            delay: DelayConfig {
                min_delay_ns: args.scoring_min_delay_ns,
                max_delay_ns: args.scoring_max_delay_ns,
                min_instruction_delay_ns: args.scoring_min_instruction_delay_ns,
                max_instruction_delay_ns: args.scoring_max_instruction_delay_ns,
            },
            score: ScoreConfig {
                sharpe_lookback: args.scoring_sharpe_lookback,
                min_lookback: args.scoring_sharpe_lookback.min(30),
                grace_period_ns: args.scoring_activity_sampling_interval_ns,
                norm_min: args.scoring_sharpe_normalization_min,
                norm_max: args.scoring_sharpe_normalization_max,
                capital_turnover_cap: args.scoring_activity_capital_turnover_cap,
                assessment_period_ns: args.scoring_activity_assessment_period_ns,
            },
            reward: RewardConfig {
                seed: args.rewarding_seed,
                pareto_scale: args.rewarding_pareto_scale,
                pareto_shape: args.rewarding_pareto_shape,
            },
            max_instructions_per_book: args.scoring_max_instructions_per_book,
            global_fanout_deadline: Duration::from_secs(5),
            per_axon_timeout: Duration::from_secs(3),
            query_wall_clock_timeout: Duration::from_secs(3),
            fanout_stagger: Duration::from_millis(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_parse_from_minimal_cli() {
        let args = Args::parse_from([
            "im-validator",
            "--netuid",
            "7",
            "--subtensor.chain_endpoint",
            "ws://localhost:9944",
            "--wallet.path",
            "~/.bittensor/wallets",
            "--wallet.name",
            "validator",
            "--wallet.hotkey",
            "default",
        ]);
        assert_eq!(args.netuid, 7);
        assert_eq!(args.port, 8080);
        assert_eq!(args.scoring_activity_capital_turnover_cap, 20.0);
    }

    #[test]
    fn resolve_builds_consistent_score_config() {
        let args = Args::parse_from([
            "im-validator",
            "--netuid",
            "7",
            "--subtensor.chain_endpoint",
            "ws://localhost:9944",
            "--wallet.path",
            "~/.bittensor/wallets",
            "--wallet.name",
            "validator",
            "--wallet.hotkey",
            "default",
        ]);
        let config = ValidatorConfig::resolve(
            &args,
            16,
            HistoryTopology {
                retention_ns: 60_000_000_000,
                depth: 25,
                volume_decimals: 8,
            },
        );
        assert_eq!(config.book_count, 16);
        assert_eq!(config.history.depth, 25);
    }
}
