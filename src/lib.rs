//! Validator-side coordination layer for a distributed market-simulation
//! network: fans a per-step state update out to remote trading agents,
//! validates and delay-schedules their instructions, reconstructs L2 book
//! history, and scores agents on risk-adjusted, activity-weighted returns.
//!
//! Exposes the core subsystems (C1-C8) as a library so the binary entrypoint
//! and integration tests can wire them together independently.

pub mod compress;
pub mod config;
pub mod delay;
pub mod error;
pub mod fanout;
pub mod history;
pub mod interfaces;
pub mod model;
pub mod orchestrator;
pub mod persistence;
pub mod replay;
pub mod response_validator;
pub mod reward;
pub mod score;

pub fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
