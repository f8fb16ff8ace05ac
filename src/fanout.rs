//! C3: Fanout — staggered, bounded-concurrency querying of every agent axon
//! for one step, with per-axon/per-query/global deadline discipline, per
//! §4.3 and §5.
//!
//! Grounded on `taos.im.validator.forward`'s per-step fanout block: a 2ms
//! inter-start stagger, dual timeout (soft per-axon + hard wall-clock) via
//! `asyncio.wait_for`, a semaphore sized to the axon count, and a
//! harvest-whatever-finished-by-deadline fallback. The Rust rendition uses a
//! bounded `tokio::task::JoinSet` plus `tokio::sync::Semaphore` in place of
//! the source's `asyncio.gather`/semaphore pairing.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(String),
    Timeout,
    Failure(String),
    Blacklisted,
}

#[derive(Debug, Clone, Copy)]
pub struct FanoutConfig {
    /// Minimum gap between successive query launches.
    pub stagger: Duration,
    /// Soft, per-axon timeout (mirrors an HTTP client's own request timeout).
    pub per_axon_timeout: Duration,
    /// Hard wall-clock timeout applied to the whole query future.
    pub query_wall_clock_timeout: Duration,
    /// Hard deadline for the entire step's fanout.
    pub global_deadline: Duration,
}

pub type QueryFuture = Pin<Box<dyn Future<Output = Result<String, String>> + Send>>;
pub type QueryFn = Arc<dyn Fn(u32) -> QueryFuture + Send + Sync>;

/// Query every uid in `uids` concurrently. Each query is bounded by
/// `min(per_axon_timeout, query_wall_clock_timeout)`; the whole batch is
/// bounded by `global_deadline`, after which any outstanding query is
/// abandoned (dropped, never awaited again) and reported as `Timeout`.
pub async fn fanout(uids: &[u32], query: QueryFn, config: &FanoutConfig) -> HashMap<u32, Outcome> {
    let semaphore = Arc::new(Semaphore::new(uids.len().max(1)));
    let mut tasks: JoinSet<(u32, Outcome)> = JoinSet::new();
    let per_query_timeout = config.per_axon_timeout.min(config.query_wall_clock_timeout);

    for (i, &uid) in uids.iter().enumerate() {
        let query = query.clone();
        let semaphore = semaphore.clone();
        let stagger = config.stagger * i as u32;

        tasks.spawn(async move {
            tokio::time::sleep(stagger).await;
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("fanout semaphore is never closed mid-step");
            let outcome = match tokio::time::timeout(per_query_timeout, query(uid)).await {
                Ok(Ok(body)) => Outcome::Success(body),
                Ok(Err(reason)) => Outcome::Failure(reason),
                Err(_) => Outcome::Timeout,
            };
            (uid, outcome)
        });
    }

    let mut results = HashMap::new();
    let deadline = tokio::time::Instant::now() + config.global_deadline;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, tasks.join_next()).await {
            Ok(Some(Ok((uid, outcome)))) => {
                results.insert(uid, outcome);
            }
            Ok(Some(Err(_))) => {} // task panicked: treated as dropped, never reported
            Ok(None) => break,     // every task has resolved
            Err(_) => break,       // global deadline reached; remaining tasks abandoned below
        }
    }

    let abandoned = uids.len() - results.len();
    if abandoned > 0 {
        warn!(
            abandoned,
            "global fanout deadline reached, abandoning outstanding queries"
        );
    }
    for &uid in uids {
        results.entry(uid).or_insert(Outcome::Timeout);
    }
    // Dropping `tasks` here cancels any still-outstanding query without
    // awaiting its graceful completion (§5 cancellation semantics).
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn instant_success() -> QueryFn {
        Arc::new(|uid| Box::pin(async move { Ok(format!("ok-{uid}")) }))
    }

    #[tokio::test]
    async fn all_succeed_when_fast_and_within_deadline() {
        let config = FanoutConfig {
            stagger: Duration::ZERO,
            per_axon_timeout: Duration::from_millis(50),
            query_wall_clock_timeout: Duration::from_millis(50),
            global_deadline: Duration::from_millis(200),
        };
        let uids: Vec<u32> = (0..16).collect();
        let results = fanout(&uids, instant_success(), &config).await;
        assert!(results.values().all(|o| matches!(o, Outcome::Success(_))));
    }

    /// Scenario 6 (§8): of 256 uids, 3 exceed the per-query wall clock and 1
    /// exceeds the global deadline. Expected: 252 Success, 4 Timeout.
    #[tokio::test]
    async fn fanout_deadline_matches_scenario() {
        let slow_per_query: [u32; 3] = [10, 77, 200];
        let slow_global: u32 = 150;

        let query: QueryFn = Arc::new(move |uid| {
            Box::pin(async move {
                if slow_per_query.contains(&uid) {
                    tokio::time::sleep(Duration::from_millis(120)).await;
                } else if uid == slow_global {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                } else {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                Ok(format!("ok-{uid}"))
            })
        });

        let config = FanoutConfig {
            stagger: Duration::ZERO,
            per_axon_timeout: Duration::from_millis(60),
            query_wall_clock_timeout: Duration::from_millis(60),
            global_deadline: Duration::from_millis(250),
        };

        let uids: Vec<u32> = (0..256).collect();
        let results = fanout(&uids, query, &config).await;

        let successes = results
            .values()
            .filter(|o| matches!(o, Outcome::Success(_)))
            .count();
        let timeouts = results
            .values()
            .filter(|o| matches!(o, Outcome::Timeout))
            .count();

        assert_eq!(successes, 252);
        assert_eq!(timeouts, 4);
        assert_eq!(results.len(), 256);
    }

    #[tokio::test]
    async fn stagger_enforces_monotonic_start_order() {
        let start_order: Arc<std::sync::Mutex<Vec<u32>>> =
            Arc::new(std::sync::Mutex::new(Vec::new()));
        let counter = Arc::new(AtomicU32::new(0));
        let observed = start_order.clone();
        let query: QueryFn = Arc::new(move |uid| {
            let observed = observed.clone();
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                observed.lock().unwrap().push(uid);
                Ok(String::new())
            })
        });

        let config = FanoutConfig {
            stagger: Duration::from_millis(2),
            per_axon_timeout: Duration::from_millis(500),
            query_wall_clock_timeout: Duration::from_millis(500),
            global_deadline: Duration::from_secs(5),
        };
        let uids: Vec<u32> = (0..4).collect();
        fanout(&uids, query, &config).await;

        assert_eq!(*start_order.lock().unwrap(), vec![0, 1, 2, 3]);
    }
}
