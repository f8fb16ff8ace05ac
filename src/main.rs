//! Validator entrypoint: HTTP ingress from the simulator (`/orderbook`,
//! `/account`), step orchestration across Fanout/ResponseValidator/
//! DelayAssigner/ScoreEngine/RewardShaper/HistoryManager, and HTTP egress of
//! the merged instruction batch, per §6.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{extract::State, routing::post, Json, Router};
use clap::Parser;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use im_validator::compress::{self, Codec};
use im_validator::config::{Args, HistoryTopology, ValidatorConfig};
use im_validator::delay;
use im_validator::fanout::{self, FanoutConfig, Outcome, QueryFn};
use im_validator::history::HistoryManager;
use im_validator::interfaces::{AxonEndpoint, ChainClient, LoggingAlertSink, StaticChainClient};
use im_validator::model::{AgentAccount, EventStream, Instruction, L2Snapshot, Trade};
use im_validator::orchestrator::{self, StepOrchestrator, StepPhase};
use im_validator::persistence;
use im_validator::replay;
use im_validator::response_validator::{self, ValidatorConfig as ValidationConfig};
use im_validator::reward::{self, RewardConfig};
use im_validator::score::{self, InventoryHistory, TradeVolumeLedger, VolumeRole};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// One step's state update from the simulator (§6's `MarketSimulationStateUpdate`).
#[derive(Debug, Deserialize)]
struct MarketSimulationStateUpdate {
    validator_id: u32,
    book_id: u32,
    now_ns: i64,
    prev_snapshot: L2Snapshot,
    events: EventStream,
    target_snapshot: L2Snapshot,
    /// Observed process time per uid, for DelayAssigner's base-delay curve.
    process_time_ns: HashMap<u32, u64>,
    timeout_ns: u64,
    /// Per-agent account state on this book, for inventory valuation (§4.6 step 1).
    #[serde(default)]
    accounts: Vec<AgentAccount>,
}

#[derive(Debug, Serialize)]
struct MergedBatchEntry {
    #[serde(rename = "agentId")]
    agent_id: u32,
    delay: u64,
    #[serde(rename = "type")]
    kind: &'static str,
    payload: Instruction,
}

#[derive(Debug, Serialize)]
struct MergedBatch {
    responses: Vec<MergedBatchEntry>,
}

/// Persisted validator scoring state (`validator.mp`, §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedValidatorState {
    scores: HashMap<u32, f64>,
    rewards: HashMap<u32, f64>,
    activity_factors: HashMap<(u32, u32), f64>,
}

struct AppState {
    config: ValidatorConfig,
    history: HistoryManager,
    orchestrator: Mutex<StepOrchestrator>,
    http_client: reqwest::Client,
    chain_client: Arc<dyn ChainClient>,
    alert_sink: Arc<LoggingAlertSink>,
    state_dir: PathBuf,

    inventory_histories: Mutex<HashMap<u32, InventoryHistory>>,
    volume_ledgers: Mutex<HashMap<u32, TradeVolumeLedger>>,
    activity_factors: Mutex<HashMap<(u32, u32), f64>>,
    initial_wealth: Mutex<HashMap<(u32, u32), f64>>,
    deregistered_uids: Mutex<HashSet<u32>>,
    scores: Mutex<HashMap<u32, f64>>,
    rewards: Mutex<HashMap<u32, f64>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    im_validator::config::load_env();
    im_validator::init_tracing();

    let args = Args::parse();
    let book_count: u32 = std::env::var("VALIDATOR_BOOK_COUNT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);
    let state_dir: PathBuf = std::env::var("VALIDATOR_STATE_DIR")
        .unwrap_or_else(|_| "./state".to_string())
        .into();
    std::fs::create_dir_all(&state_dir).context("creating validator state directory")?;

    let topology = HistoryTopology {
        retention_ns: 60_000_000_000,
        depth: 25,
        volume_decimals: 8,
    };
    let config = ValidatorConfig::resolve(&args, book_count, topology);

    let http_client = reqwest::Client::builder()
        .timeout(config.per_axon_timeout)
        .build()
        .context("building the agent-fanout HTTP client")?;

    let history = HistoryManager::new(im_validator::history::HistoryConfig {
        retention_ns: config.history.retention_ns,
        depth: config.history.depth,
        volume_decimals: config.history.volume_decimals,
    });

    let state = Arc::new(AppState {
        config,
        history,
        orchestrator: Mutex::new(StepOrchestrator::new()),
        http_client,
        chain_client: Arc::new(StaticChainClient::default()),
        alert_sink: Arc::new(LoggingAlertSink),
        state_dir,
        inventory_histories: Mutex::new(HashMap::new()),
        volume_ledgers: Mutex::new(HashMap::new()),
        activity_factors: Mutex::new(HashMap::new()),
        initial_wealth: Mutex::new(HashMap::new()),
        deregistered_uids: Mutex::new(HashSet::new()),
        scores: Mutex::new(HashMap::new()),
        rewards: Mutex::new(HashMap::new()),
    });

    let app = Router::new()
        .route("/orderbook", post(handle_orderbook))
        .route("/account", post(handle_account_event))
        .with_state(state.clone())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(("0.0.0.0", state.config.port))
        .await
        .with_context(|| {
            format!(
                "binding validator HTTP server on port {}",
                state.config.port
            )
        })?;
    info!(
        port = state.config.port,
        netuid = state.config.netuid,
        "validator listening"
    );

    axum::serve(listener, app)
        .await
        .context("validator HTTP server")?;
    Ok(())
}

async fn handle_account_event(Json(event): Json<serde_json::Value>) -> Json<serde_json::Value> {
    info!(?event, "account event notification");
    Json(serde_json::json!({ "ok": true }))
}

fn mid_price(snapshot: &L2Snapshot) -> f64 {
    match (snapshot.best_bid(), snapshot.best_ask()) {
        (Some(bid), Some(ask)) => (bid + ask) / 2.0,
        (Some(bid), None) => bid,
        (None, Some(ask)) => ask,
        (None, None) => 0.0,
    }
}

async fn handle_orderbook(
    State(state): State<Arc<AppState>>,
    Json(update): Json<MarketSimulationStateUpdate>,
) -> Json<MergedBatch> {
    while !state.orchestrator.lock().try_begin_received() {
        tokio::task::yield_now().await;
    }
    state.orchestrator.lock().advance(StepPhase::FannedOut);

    // Inventory valuation (§4.6 step 1), ahead of fanout so the cap gate
    // below sees this step's balances.
    let mid = mid_price(&update.target_snapshot);
    {
        let mut wealth = state.initial_wealth.lock();
        let mut inventories = state.inventory_histories.lock();
        for account in &update.accounts {
            let key = (account.agent_id, account.book_id);
            let baseline = *wealth.entry(key).or_insert_with(|| {
                let base0 = account
                    .base_balance
                    .initial
                    .unwrap_or(account.base_balance.total);
                let quote0 = account
                    .quote_balance
                    .initial
                    .unwrap_or(account.quote_balance.total);
                quote0 + mid * base0
            });
            inventories
                .entry(account.agent_id)
                .or_insert_with(|| InventoryHistory::new(state.config.score.sharpe_lookback))
                .push(
                    update.now_ns,
                    HashMap::from([(account.book_id, account.inventory_value(mid, baseline))]),
                );
        }
    }

    let axons: Vec<AxonEndpoint> = state.chain_client.resolve_axons();
    let uids: Vec<u32> = axons.iter().map(|a| a.uid).collect();

    let envelope = compress::compress(&update.book_id, Codec::Zlib, 1).unwrap_or_default();
    let http_client = state.http_client.clone();
    let axon_by_uid: HashMap<u32, AxonEndpoint> = axons.into_iter().map(|a| (a.uid, a)).collect();

    let query: QueryFn = Arc::new(move |uid| {
        let client = http_client.clone();
        let envelope = envelope.clone();
        let endpoint = axon_by_uid.get(&uid).cloned();
        Box::pin(async move {
            let Some(endpoint) = endpoint else {
                return Err("no axon registered for uid".to_string());
            };
            let url = format!("http://{}:{}/query", endpoint.host, endpoint.port);
            client
                .post(url)
                .body(envelope)
                .send()
                .await
                .map_err(|e| e.to_string())?
                .text()
                .await
                .map_err(|e| e.to_string())
        })
    });

    let fanout_config = FanoutConfig {
        stagger: state.config.fanout_stagger,
        per_axon_timeout: state.config.per_axon_timeout,
        query_wall_clock_timeout: state.config.query_wall_clock_timeout,
        global_deadline: state.config.global_fanout_deadline,
    };
    let outcomes: HashMap<u32, Outcome> = fanout::fanout(&uids, query, &fanout_config).await;

    state.orchestrator.lock().advance(StepPhase::Validated);

    let validation_config = ValidationConfig {
        book_count: state.config.book_count,
        max_instructions_per_book: state.config.max_instructions_per_book,
        capital_turnover_cap: state.config.score.capital_turnover_cap,
    };

    let wealth_snapshot = state.initial_wealth.lock().clone();
    let volume_snapshot = state.volume_ledgers.lock().clone();

    let mut instructions_by_uid: HashMap<u32, Vec<Instruction>> = HashMap::new();
    let mut uids_succeeded = 0usize;
    let mut uids_failed = 0usize;

    for (uid, outcome) in outcomes {
        let validated = response_validator::validate(
            uid,
            outcome,
            Codec::Zlib,
            1,
            &validation_config,
            |book| {
                wealth_snapshot
                    .get(&(uid, book))
                    .copied()
                    .unwrap_or(10_000.0)
            },
            |book| {
                volume_snapshot
                    .get(&uid)
                    .map(|ledger| ledger.rolling_total(book, VolumeRole::Total))
                    .unwrap_or(0.0)
            },
        );
        if validated.drops.is_empty() {
            uids_succeeded += 1;
        } else {
            uids_failed += 1;
        }
        instructions_by_uid.insert(uid, validated.instructions);
    }

    state.orchestrator.lock().advance(StepPhase::Delayed);

    let mut rng = ChaCha8Rng::seed_from_u64(update.now_ns as u64);
    let base_delays: HashMap<u32, u64> = update
        .process_time_ns
        .iter()
        .map(|(&uid, &pt)| {
            (
                uid,
                delay::base_delay_ns(pt, update.timeout_ns, &state.config.delay),
            )
        })
        .collect();

    // Per §4.5: base delay is a function of each uid's own process time, and
    // "first instruction per book" jitter is scoped per (uid, book) — so
    // delay::assign runs once per uid, over uids in deterministic order, never
    // on a single flattened cross-uid batch.
    let mut uids: Vec<u32> = instructions_by_uid.keys().copied().collect();
    uids.sort_unstable();
    let mut all_instructions: Vec<Instruction> = Vec::new();
    for uid in uids {
        let mut uid_instructions = instructions_by_uid.remove(&uid).unwrap_or_default();
        let base_delay = base_delays.get(&uid).copied().unwrap_or(0);
        delay::assign(
            &mut uid_instructions,
            base_delay,
            &state.config.delay,
            &mut rng,
        );
        all_instructions.extend(uid_instructions);
    }

    let merged = orchestrator::build_merged_batch(Vec::new(), all_instructions);
    state.orchestrator.lock().advance(StepPhase::Responded);

    info!(
        validator_id = update.validator_id,
        book_id = update.book_id,
        uids_succeeded,
        uids_failed,
        "step complete"
    );

    let (handles, guards) = orchestrator::spawn_worker_guards();
    state.orchestrator.lock().finish_step(guards);

    let worker_state = state.clone();
    let validator_id = update.validator_id;
    let book_id = update.book_id;
    let volume_decimals = worker_state.config.history.volume_decimals;
    let target_snapshot = update.target_snapshot;
    let now_ns = update.now_ns;
    let prev_snapshot = update.prev_snapshot;
    let events = update.events;
    tokio::spawn(async move {
        use im_validator::history::UpdateError;

        // §4.2: serialize append/reconcile so two steps never mutate the
        // same manager concurrently; a busy manager skips this step's
        // history update rather than blocking the worker.
        let history_guard = match worker_state.history.begin_update() {
            Ok(guard) => guard,
            Err(UpdateError::AlreadyUpdating) => {
                use im_validator::interfaces::{AlertSink, Severity};
                worker_state.alert_sink.alert(
                    Severity::Warning,
                    &format!("history manager busy, skipping update for book {book_id}"),
                );
                let _ = handles.history.send(());
                let _ = handles.scoring.send(());
                let _ = handles.saving.send(());
                let _ = handles.reporting.send(());
                return;
            }
        };

        let (snapshots, trades) = replay::replay(&prev_snapshot, &events, volume_decimals);
        worker_state
            .history
            .append(validator_id, book_id, snapshots, trades.clone());
        let report =
            worker_state
                .history
                .reconcile(validator_id, book_id, &target_snapshot, now_ns);
        drop(history_guard);
        if !report.discrepancies.is_empty() && !report.lifted {
            use im_validator::interfaces::{AlertSink, Severity};
            worker_state.alert_sink.alert(
                Severity::Warning,
                &format!("unresolved reconciliation discrepancies on book {book_id}"),
            );
        }
        let _ = handles.history.send(());

        record_trade_volumes(&worker_state, book_id, trades.values());

        let scores = run_scoring(&worker_state, book_id, now_ns);
        let _ = handles.scoring.send(());

        let persisted = PersistedValidatorState {
            scores: scores.clone(),
            rewards: worker_state.rewards.lock().clone(),
            activity_factors: worker_state.activity_factors.lock().clone(),
        };
        let path = worker_state.state_dir.join("validator.mp");
        if let Err(err) = persistence::save_atomic(&path, &persisted) {
            use im_validator::interfaces::{AlertSink, Severity};
            worker_state.alert_sink.alert(
                Severity::Warning,
                &format!("validator state save failed: {err:#}"),
            );
        }
        let _ = handles.saving.send(());

        info!(
            validator_id,
            book_id,
            scored_uids = scores.len(),
            "scoring complete"
        );
        let _ = handles.reporting.send(());
    });

    Json(MergedBatch {
        responses: merged
            .into_iter()
            .map(|instruction| MergedBatchEntry {
                agent_id: instruction.agent_id,
                delay: instruction.delay,
                kind: instruction.type_name(),
                payload: instruction,
            })
            .collect(),
    })
}

/// Bucket this step's trades into the volume ledger by role (§4.6 step 2).
fn record_trade_volumes<'a>(
    state: &AppState,
    book_id: u32,
    trades: impl Iterator<Item = &'a Trade>,
) {
    let interval = state.config.score.grace_period_ns.max(1);
    let mut ledgers = state.volume_ledgers.lock();
    let mut newest_ts = i64::MIN;
    for trade in trades {
        newest_ts = newest_ts.max(trade.timestamp);
        let sampled_time = (trade.timestamp / interval) * interval;
        let notional = trade.price * trade.quantity;
        let is_self_trade = trade.taker_agent_id == trade.maker_agent_id;

        let taker_role = if is_self_trade {
            VolumeRole::SelfTrade
        } else {
            VolumeRole::Taker
        };
        let taker_ledger = ledgers.entry(trade.taker_agent_id).or_default();
        taker_ledger.record(book_id, VolumeRole::Total, sampled_time, notional);
        taker_ledger.record(book_id, taker_role, sampled_time, notional);

        if !is_self_trade {
            let maker_ledger = ledgers.entry(trade.maker_agent_id).or_default();
            maker_ledger.record(book_id, VolumeRole::Total, sampled_time, notional);
            maker_ledger.record(book_id, VolumeRole::Maker, sampled_time, notional);
        }
    }

    if newest_ts > i64::MIN {
        let floor = newest_ts - state.config.score.assessment_period_ns;
        for ledger in ledgers.values_mut() {
            ledger.evict_before(floor);
        }
    }
}

/// Run the per-uid Sharpe/activity/outlier-penalty pipeline (§4.6) followed
/// by Pareto reward shaping (§4.7), writing results into the shared score
/// and reward maps. Returns the freshly computed per-uid scores.
fn run_scoring(state: &AppState, book_id: u32, now_ns: i64) -> HashMap<u32, f64> {
    let config = &state.config.score;
    let deregistered = state.deregistered_uids.lock().clone();
    let histories = state.inventory_histories.lock().clone();
    let batch = score::compute_batch_sharpe(&histories, config, &deregistered);

    let interval = config.grace_period_ns.max(1);
    let latest_bucket = (now_ns / interval) * interval;

    let mut fresh_scores = HashMap::new();
    let mut fresh_activity: HashMap<(u32, u32), f64> = HashMap::new();

    for (uid, book_sharpe) in batch {
        let Some(sharpe_map) = &book_sharpe else {
            state.scores.lock().insert(uid, 0.0);
            continue;
        };

        let volume = state
            .volume_ledgers
            .lock()
            .get(&uid)
            .cloned()
            .unwrap_or_default();
        let wealth = state.initial_wealth.lock().clone();

        let mut activity_per_book = HashMap::new();
        for &book in sharpe_map.keys() {
            let prev_activity = *state
                .activity_factors
                .lock()
                .get(&(uid, book))
                .unwrap_or(&1.0);
            let miner_volume = volume.rolling_total(book, VolumeRole::Total);
            let cap =
                config.capital_turnover_cap * wealth.get(&(uid, book)).copied().unwrap_or(10_000.0);
            let traded = volume.traded_in_latest_bucket(book, latest_bucket);
            let activity = score::activity_factor(
                traded,
                miner_volume,
                cap,
                prev_activity,
                config.sharpe_lookback,
            );
            activity_per_book.insert(book, activity);
            fresh_activity.insert((uid, book), activity);
        }

        if let Some(state_for_uid) = score::score_uid(book_sharpe, &activity_per_book, config) {
            fresh_scores.insert(uid, state_for_uid.score);
        }
    }

    state.activity_factors.lock().extend(fresh_activity);
    state.scores.lock().extend(fresh_scores.clone());

    let all_scores = state.scores.lock().clone();
    let mut uids: Vec<u32> = all_scores.keys().copied().collect();
    uids.sort_unstable();
    let score_vector: Vec<f64> = uids.iter().map(|uid| all_scores[uid]).collect();
    let reward_config = RewardConfig {
        seed: state.config.reward.seed ^ (book_id as u64),
        pareto_scale: state.config.reward.pareto_scale,
        pareto_shape: state.config.reward.pareto_shape,
    };
    let reward_vector = reward::shape_rewards(&score_vector, &reward_config);
    let mut rewards = state.rewards.lock();
    for (uid, reward) in uids.into_iter().zip(reward_vector) {
        rewards.insert(uid, reward);
    }

    fresh_scores
}
