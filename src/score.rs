//! C6: ScoreEngine — per-uid inventory history, trade-volume ledger,
//! per-book Sharpe ratios, activity weighting, outlier penalty, and
//! median aggregation, per §4.6.
//!
//! Grounded on `taos.im.utils.sharpe.sharpe` (exact Sharpe formula and
//! grace-period changeover mask) and `taos.im.validator.reward` (activity
//! factor, activity-weighted Sharpe, outlier penalty, final score).

use std::collections::{BTreeMap, HashMap, HashSet};

use rayon::prelude::*;

/// Scaling constant in the outlier penalty denominator, preserved verbatim
/// from the source with no re-derivation (§9 open question).
const OUTLIER_PENALTY_SCALE: f64 = 1.5;
const OUTLIER_IQR_MULTIPLIER: f64 = 1.5;

#[derive(Debug, Clone, Copy)]
pub struct ScoreConfig {
    pub sharpe_lookback: usize,
    pub min_lookback: usize,
    pub grace_period_ns: i64,
    pub norm_min: f64,
    pub norm_max: f64,
    pub capital_turnover_cap: f64,
    pub assessment_period_ns: i64,
}

#[derive(Debug, Clone, Default)]
pub struct InventoryHistory {
    /// `timestamp -> {book_id -> inventory_value}`.
    entries: BTreeMap<i64, HashMap<u32, f64>>,
    lookback: usize,
}

impl InventoryHistory {
    pub fn new(lookback: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            lookback,
        }
    }

    /// Merges `values` into whatever is already recorded at `timestamp`,
    /// since a single step only reports the one book it processed and
    /// several books can land on the same timestamp across steps.
    pub fn push(&mut self, timestamp: i64, values: HashMap<u32, f64>) {
        self.entries.entry(timestamp).or_default().extend(values);
        while self.entries.len() > self.lookback {
            let oldest = *self.entries.keys().next().unwrap();
            self.entries.remove(&oldest);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-`(uid, book, role)` volume ledger, bucketed into sampled intervals and
/// evicted past `assessment_period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeRole {
    Total,
    Maker,
    Taker,
    SelfTrade,
}

#[derive(Debug, Clone, Default)]
pub struct TradeVolumeLedger {
    /// `(book_id, role) -> (sampled_time -> volume)`.
    buckets: HashMap<(u32, VolumeRole), BTreeMap<i64, f64>>,
}

impl TradeVolumeLedger {
    pub fn record(&mut self, book_id: u32, role: VolumeRole, sampled_time: i64, notional: f64) {
        *self
            .buckets
            .entry((book_id, role))
            .or_default()
            .entry(sampled_time)
            .or_insert(0.0) += notional;
    }

    pub fn evict_before(&mut self, floor: i64) {
        for series in self.buckets.values_mut() {
            series.retain(|&ts, _| ts >= floor);
        }
    }

    pub fn rolling_total(&self, book_id: u32, role: VolumeRole) -> f64 {
        self.buckets
            .get(&(book_id, role))
            .map(|series| series.values().sum())
            .unwrap_or(0.0)
    }

    pub fn traded_in_latest_bucket(&self, book_id: u32, latest_bucket: i64) -> bool {
        self.buckets
            .get(&(book_id, VolumeRole::Total))
            .map(|series| series.contains_key(&latest_bucket))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScoreState {
    pub per_book_sharpe: HashMap<u32, f64>,
    pub activity_factor_per_book: HashMap<u32, f64>,
    pub activity_weighted_sharpe_per_book: HashMap<u32, f64>,
    pub median: f64,
    pub penalty: f64,
    pub score: f64,
}

/// `sqrt(N) * mean(returns)/std(returns)`, zero when std is zero, dropping
/// any return that straddles a grace-period changeover boundary.
fn sharpe(values: &[f64], timestamps: &[i64], grace_period_ns: i64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mut returns: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    if grace_period_ns > 0 {
        let mask: Vec<bool> = timestamps
            .windows(2)
            .map(|w| w[1] < w[0] + grace_period_ns)
            .collect();
        returns = returns
            .into_iter()
            .zip(mask)
            .filter_map(|(r, keep)| keep.then_some(r))
            .collect();
    }
    if returns.is_empty() {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    if std == 0.0 {
        0.0
    } else {
        n.sqrt() * (mean / std)
    }
}

fn normalize(value: f64, min: f64, max: f64) -> f64 {
    let clipped = value.clamp(min, max);
    (clipped - min) / (max - min)
}

/// Compute Sharpe-per-book for one uid from its inventory history, skipping
/// entirely (returning `None`) when deregistered or below the minimum
/// observation count (§4.6 step 3).
pub fn compute_book_sharpe(
    history: &InventoryHistory,
    config: &ScoreConfig,
    deregistered: bool,
) -> Option<HashMap<u32, f64>> {
    let required = config.min_lookback.min(config.sharpe_lookback);
    if deregistered || history.entries.len() < required {
        return None;
    }
    let timestamps: Vec<i64> = history.entries.keys().copied().collect();
    let mut book_ids: HashSet<u32> = HashSet::new();
    for values in history.entries.values() {
        book_ids.extend(values.keys().copied());
    }

    let mut result = HashMap::new();
    for book_id in book_ids {
        let series: Vec<f64> = timestamps
            .iter()
            .map(|ts| *history.entries[ts].get(&book_id).unwrap_or(&0.0))
            .collect();
        result.insert(
            book_id,
            sharpe(&series, &timestamps, config.grace_period_ns),
        );
    }
    Some(result)
}

/// Batch variant: compute per-book Sharpe for many uids in parallel over a
/// rayon thread pool, mirroring the source's batched-executor split.
pub fn compute_batch_sharpe(
    histories: &HashMap<u32, InventoryHistory>,
    config: &ScoreConfig,
    deregistered_uids: &HashSet<u32>,
) -> HashMap<u32, Option<HashMap<u32, f64>>> {
    histories
        .par_iter()
        .map(|(&uid, history)| {
            (
                uid,
                compute_book_sharpe(history, config, deregistered_uids.contains(&uid)),
            )
        })
        .collect()
}

/// Activity factor for one book, per §4.6 step 5.
pub fn activity_factor(
    traded_in_latest_bucket: bool,
    miner_volume: f64,
    cap: f64,
    prev_activity: f64,
    sharpe_lookback: usize,
) -> f64 {
    if traded_in_latest_bucket {
        (1.0 + miner_volume / cap).min(2.0)
    } else {
        prev_activity * 2f64.powf(-1.0 / sharpe_lookback as f64)
    }
}

/// Activity-weighted Sharpe for one book, per §4.6 step 6.
pub fn activity_weighted_sharpe(normalized_sharpe: f64, activity: f64) -> f64 {
    if normalized_sharpe > 0.5 {
        activity * normalized_sharpe
    } else {
        (2.0 - activity) * normalized_sharpe
    }
}

fn quartile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = q * (sorted.len() as f64 - 1.0);
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = pos - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}

fn median(sorted: &[f64]) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let mid = sorted.len() / 2;
    if sorted.len().is_multiple_of(2) {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// IQR-based outlier penalty, per §4.6 step 7.
fn outlier_penalty(weighted: &[f64]) -> f64 {
    let mut sorted = weighted.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let q1 = quartile(&sorted, 0.25);
    let q3 = quartile(&sorted, 0.75);
    let iqr = q3 - q1;
    let threshold = q1 - OUTLIER_IQR_MULTIPLIER * iqr;

    let outliers: Vec<f64> = weighted
        .iter()
        .copied()
        .filter(|&w| w < threshold)
        .collect();
    if outliers.is_empty() {
        return 0.0;
    }
    let mean_outlier = outliers.iter().sum::<f64>() / outliers.len() as f64;
    if mean_outlier < 0.5 {
        (0.5 - mean_outlier) / OUTLIER_PENALTY_SCALE
    } else {
        0.0
    }
}

/// Full per-uid score aggregation, §4.6 steps 4-8. Returns `None` iff the
/// uid's Sharpe computation itself returned `None` (deregistered or below
/// the observation floor).
pub fn score_uid(
    book_sharpe: Option<HashMap<u32, f64>>,
    activity_per_book: &HashMap<u32, f64>,
    config: &ScoreConfig,
) -> Option<ScoreState> {
    let book_sharpe = book_sharpe?;

    let mut normalized = HashMap::new();
    for (&book, &raw) in &book_sharpe {
        normalized.insert(book, normalize(raw, config.norm_min, config.norm_max));
    }

    let mut weighted = HashMap::new();
    for (&book, &norm_sharpe) in &normalized {
        let activity = *activity_per_book.get(&book).unwrap_or(&1.0);
        weighted.insert(book, activity_weighted_sharpe(norm_sharpe, activity));
    }

    let values: Vec<f64> = weighted.values().copied().collect();
    let mut sorted = values.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let penalty = outlier_penalty(&values);
    let med = median(&sorted);
    let score = (med - penalty.abs()).max(0.0);

    Some(ScoreState {
        per_book_sharpe: book_sharpe,
        activity_factor_per_book: activity_per_book.clone(),
        activity_weighted_sharpe_per_book: weighted,
        median: med,
        penalty,
        score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sharpe_is_zero_when_std_zero() {
        let values = vec![1.0, 1.0, 1.0];
        let timestamps = vec![0, 1, 2];
        assert_eq!(sharpe(&values, &timestamps, 0), 0.0);
    }

    #[test]
    fn sharpe_drops_returns_across_grace_period_boundary() {
        let values = vec![0.0, 1.0, 1000.0];
        let timestamps = vec![0, 1, 10_000];
        let with_grace = sharpe(&values, &timestamps, 100);
        let without_grace = sharpe(&values, &timestamps, 0);
        assert_ne!(with_grace, without_grace);
    }

    /// Scenario 5 (§8): w = [0.9, 0.88, 0.92, 0.05].
    #[test]
    fn outlier_penalty_matches_scenario() {
        let w = vec![0.9, 0.88, 0.92, 0.05];
        let penalty = outlier_penalty(&w);
        assert!((penalty - 0.30).abs() < 0.01);

        let mut sorted = w.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let med = median(&sorted);
        assert!((med - 0.89).abs() < 1e-9);
        let score = (med - penalty.abs()).max(0.0);
        assert!((score - 0.59).abs() < 0.01);
    }

    #[test]
    fn score_is_never_negative() {
        let w = vec![-5.0, -4.0, -3.0, -2.0];
        let penalty = outlier_penalty(&w);
        let mut sorted = w.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let score = (median(&sorted) - penalty.abs()).max(0.0);
        assert!(score >= 0.0);
    }

    #[test]
    fn activity_factor_caps_at_two() {
        let factor = activity_factor(true, 1_000_000.0, 100.0, 1.0, 20);
        assert_eq!(factor, 2.0);
    }

    #[test]
    fn activity_factor_decays_on_inactivity() {
        let factor = activity_factor(false, 0.0, 100.0, 1.0, 20);
        assert!(factor < 1.0);
    }
}
