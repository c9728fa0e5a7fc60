// (c) 2022 Dimitar Rusev <mitikodev@gmail.com> licensed under GPL-3.0

//! Local search over [`ModelParams`].
//!
//! Every candidate is fully evaluated before it is reported, so the best
//! parameters handed back are always ones whose size is known.

use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{ModelParams, SessionConfig};
use crate::error::Result;
use crate::models::{DefaultModel, Model};
use crate::pipeline::compress_with_model;
use crate::pool::TablePool;

/// Hill climbing steps a single numeric pass may take
const MAX_CLIMB_STEPS: usize = 16;

/// Selector bits the selector pass toggles
const SELECTOR_BITS: usize = 8;

/// What the optimizer minimizes
pub trait Objective {
    /// Sizes of every input under `params`, candidates compare on their sum
    fn evaluate(&self, params: &ModelParams) -> Result<Vec<u64>>;

    fn tunes_abbreviations(&self) -> bool {
        false
    }
}

impl<F> Objective for F
where
    F: Fn(&ModelParams) -> Result<Vec<u64>>,
{
    fn evaluate(&self, params: &ModelParams) -> Result<Vec<u64>> {
        self(params)
    }
}

/// Compressed byte length of every input, each with a fresh [`DefaultModel`].
///
/// Inputs are compressed in parallel unless the pool has a memory limit,
/// then one at a time so a limit sized for one session holds.
pub struct CompressedSize {
    config: SessionConfig,
    inputs: Vec<Vec<u32>>,
    pool: Option<TablePool>,
}

impl CompressedSize {
    pub fn new(config: SessionConfig, inputs: Vec<Vec<u32>>) -> Self {
        Self { config, inputs, pool: None }
    }

    pub fn with_pool(mut self, pool: TablePool) -> Self {
        self.pool = Some(pool);
        self
    }

    fn compressed_len(&self, config: &SessionConfig, input: &[u32]) -> Result<u64> {
        let mut model = DefaultModel::new(&config.model_options(), self.pool.as_ref())?;
        let res = compress_with_model(input, &mut model, &config.compress_options());
        model.release();
        Ok(res?.buf_length_in_bytes as u64)
    }
}

impl Objective for CompressedSize {
    fn evaluate(&self, params: &ModelParams) -> Result<Vec<u64>> {
        let config = self.config.with_params(params);
        config.validate()?;
        match &self.pool {
            Some(pool) if pool.limit_bytes().is_some() => {
                self.inputs.iter().map(|input| self.compressed_len(&config, input)).collect()
            }
            _ => self.inputs.par_iter().map(|input| self.compressed_len(&config, input)).collect(),
        }
    }
}

/// The self-decoding artifact built around a compressed payload
pub trait Packed {
    fn first_line(&self) -> &str;
    fn first_line_length_in_bytes(&self) -> usize;
    fn second_line(&self) -> &str;
    /// Names the artifact leaves for the caller to bind
    fn free_vars(&self) -> &[String];
    /// Cheap upper bound of the artifact size
    fn estimate_length(&self) -> u64;
}

/// Estimated artifact length of whatever `pack` builds from the params
pub struct PackedLength<F, P> {
    pack: F,
    _packed: PhantomData<fn() -> P>,
}

impl<F, P> PackedLength<F, P>
where
    F: Fn(&ModelParams) -> Result<P>,
    P: Packed,
{
    pub fn new(pack: F) -> Self {
        Self { pack, _packed: PhantomData }
    }
}

impl<F, P> Objective for PackedLength<F, P>
where
    F: Fn(&ModelParams) -> Result<P>,
    P: Packed,
{
    fn evaluate(&self, params: &ModelParams) -> Result<Vec<u64>> {
        Ok(vec![(self.pack)(params)?.estimate_length()])
    }

    fn tunes_abbreviations(&self) -> bool {
        true
    }
}

/// Snapshot handed to the progress callback after every evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressInfo {
    pub pass: String,
    pub pass_ratio: Option<f64>,
    pub current: ModelParams,
    pub current_size: u64,
    pub current_rejected: bool,
    pub best: ModelParams,
    /// Per-input sizes of `best`
    pub best_size: Vec<u64>,
    pub best_updated: bool,
}

impl ProgressInfo {
    pub fn best_total(&self) -> u64 {
        self.best_size.iter().sum()
    }
}

/// Answer of the progress callback
pub enum Verdict {
    Continue,
    Stop,
    /// Run to completion before the next evaluation, `true` stops
    Deferred(Box<dyn FnOnce() -> bool + Send>),
}

impl Verdict {
    fn should_stop(self) -> bool {
        match self {
            Verdict::Continue => false,
            Verdict::Stop => true,
            Verdict::Deferred(pending) => pending(),
        }
    }
}

impl fmt::Debug for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Continue => f.write_str("Continue"),
            Verdict::Stop => f.write_str("Stop"),
            Verdict::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

impl From<bool> for Verdict {
    fn from(stop: bool) -> Self {
        if stop {
            Verdict::Stop
        } else {
            Verdict::Continue
        }
    }
}

impl From<()> for Verdict {
    fn from(_: ()) -> Self {
        Verdict::Continue
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerResult {
    pub elapsed: Duration,
    pub best: ModelParams,
    pub best_size: Vec<u64>,
}

impl OptimizerResult {
    pub fn elapsed_msecs(&self) -> u128 {
        self.elapsed.as_millis()
    }

    pub fn best_total(&self) -> u64 {
        self.best_size.iter().sum()
    }
}

/// Scalar parameters tuned by hill climbing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Knob {
    MaxCount,
    RecipBaseCount,
    LearningRate,
    Abbreviations,
}

impl Knob {
    fn pass(self) -> &'static str {
        match self {
            Knob::MaxCount => "modelMaxCount",
            Knob::RecipBaseCount => "modelRecipBaseCount",
            Knob::LearningRate => "recipLearningRate",
            Knob::Abbreviations => "numAbbreviations",
        }
    }

    fn get(self, params: &ModelParams) -> u32 {
        match self {
            Knob::MaxCount => params.model_max_count,
            Knob::RecipBaseCount => params.model_recip_base_count,
            Knob::LearningRate => params.recip_learning_rate,
            Knob::Abbreviations => params.num_abbreviations,
        }
    }

    fn set(self, params: &mut ModelParams, value: u32) {
        match self {
            Knob::MaxCount => params.model_max_count = value,
            Knob::RecipBaseCount => params.model_recip_base_count = value,
            Knob::LearningRate => params.recip_learning_rate = value,
            Knob::Abbreviations => params.num_abbreviations = value,
        }
    }

    /// Values tried next to `value`, all within the knob's valid range
    fn neighbours(self, value: u32) -> Vec<u32> {
        let (lo, hi, step) = match self {
            Knob::MaxCount => (1, 255, 1),
            Knob::RecipBaseCount => (1, 1 << 16, 1),
            Knob::LearningRate => (1, u32::MAX, (value / 5).max(1)),
            Knob::Abbreviations => (0, u32::MAX, (value / 4).max(1)),
        };
        [value.saturating_sub(step), value.saturating_add(step)]
            .into_iter()
            .map(|next| next.clamp(lo, hi))
            .filter(|&next| next != value)
            .collect()
    }
}

/// Iterated local search, see [`Optimizer::run`]
pub struct Optimizer<O> {
    objective: O,
    seed: ModelParams,
    level: u32,
}

impl<O: Objective> Optimizer<O> {
    pub fn new(objective: O, seed: ModelParams) -> Self {
        Self { objective, seed, level: 1 }
    }

    /// Maximum number of rounds, 0 only measures the seed
    pub fn level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    /// Searches until `level` rounds ran, a round found nothing better, or
    /// `callback` asked to stop.
    ///
    /// Only a failing seed is an error. Candidates that fail to evaluate are
    /// skipped and the search goes on.
    pub fn run<F, V>(&self, mut callback: F) -> Result<OptimizerResult>
    where
        F: FnMut(&ProgressInfo) -> V,
        V: Into<Verdict>,
    {
        let start = Instant::now();
        let callback = |progress: &ProgressInfo| -> Verdict { callback(progress).into() };
        let mut search = Search::start(&self.objective, self.seed.clone(), callback)?;

        let mut knobs = vec![Knob::MaxCount, Knob::RecipBaseCount, Knob::LearningRate];
        if self.objective.tunes_abbreviations() {
            knobs.push(Knob::Abbreviations);
        }

        for round in 0..self.level {
            if search.stopped {
                break;
            }
            let mut improved = search.selector_pass();
            for &knob in &knobs {
                improved |= search.climb(knob);
            }
            debug!(round, improved, best_size = search.best_total, "round done");
            if !improved {
                break;
            }
        }

        let elapsed = start.elapsed();
        info!(
            best_size = search.best_total,
            evaluated = search.seen.len(),
            msecs = elapsed.as_millis() as u64,
            "optimizer finished"
        );
        Ok(OptimizerResult { elapsed, best: search.best, best_size: search.best_size })
    }
}

struct Search<'o, O, F> {
    objective: &'o O,
    callback: F,
    seen: HashSet<ModelParams>,
    best: ModelParams,
    best_size: Vec<u64>,
    best_total: u64,
    stopped: bool,
}

impl<'o, O, F> Search<'o, O, F>
where
    O: Objective,
    F: FnMut(&ProgressInfo) -> Verdict,
{
    fn start(objective: &'o O, seed: ModelParams, callback: F) -> Result<Self> {
        let sizes = objective.evaluate(&seed)?;
        let total = sizes.iter().sum();
        let mut search = Self {
            objective,
            callback,
            seen: HashSet::from([seed.clone()]),
            best: seed.clone(),
            best_size: sizes.clone(),
            best_total: total,
            stopped: false,
        };
        info!(best_size = total, "initial");
        search.report(ProgressInfo {
            pass: "initial".to_owned(),
            pass_ratio: None,
            current: seed.clone(),
            current_size: total,
            current_rejected: false,
            best: seed,
            best_size: sizes,
            best_updated: true,
        });
        Ok(search)
    }

    fn report(&mut self, progress: ProgressInfo) {
        self.stopped = (self.callback)(&progress).should_stop();
    }

    /// Evaluates and reports `candidate`, true if it became the new best.
    ///
    /// A candidate whose evaluation fails is rejected without a report.
    fn try_candidate(&mut self, pass: &str, pass_ratio: Option<f64>, candidate: ModelParams) -> bool {
        if self.stopped || !self.seen.insert(candidate.clone()) {
            return false;
        }
        let sizes = match self.objective.evaluate(&candidate) {
            Ok(sizes) => sizes,
            Err(err) => {
                debug!(pass, %err, "candidate failed");
                return false;
            }
        };
        let size = sizes.iter().sum();

        let accepted = size < self.best_total;
        if accepted {
            info!(pass, size, previous = self.best_total, "new best");
            self.best = candidate.clone();
            self.best_size = sizes;
            self.best_total = size;
        } else {
            debug!(pass, size, best = self.best_total, "rejected");
        }
        self.report(ProgressInfo {
            pass: pass.to_owned(),
            pass_ratio,
            current: candidate,
            current_size: size,
            current_rejected: !accepted,
            best: self.best.clone(),
            best_size: self.best_size.clone(),
            best_updated: accepted,
        });
        accepted
    }

    /// Flips each low bit of each selector in turn
    fn selector_pass(&mut self) -> bool {
        let steps = self.best.sparse_selectors.len() * SELECTOR_BITS;
        let mut improved = false;
        for step in 0..steps {
            let (i, bit) = (step / SELECTOR_BITS, step % SELECTOR_BITS);
            let flipped = self.best.sparse_selectors[i] ^ (1 << bit);
            if flipped == 0 || self.best.sparse_selectors.contains(&flipped) {
                continue;
            }
            let mut candidate = self.best.clone();
            candidate.sparse_selectors[i] = flipped;
            let ratio = step as f64 / steps as f64;
            improved |= self.try_candidate("sparseSelectors", Some(ratio), candidate);
        }
        improved
    }

    fn climb(&mut self, knob: Knob) -> bool {
        let mut improved = false;
        for _ in 0..MAX_CLIMB_STEPS {
            let mut moved = false;
            for next in knob.neighbours(knob.get(&self.best)) {
                let mut candidate = self.best.clone();
                knob.set(&mut candidate, next);
                if self.try_candidate(knob.pass(), None, candidate) {
                    moved = true;
                    break;
                }
            }
            if !moved {
                break;
            }
            improved = true;
        }
        improved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn seed() -> ModelParams {
        ModelParams {
            sparse_selectors: vec![0b1, 0b11],
            model_max_count: 5,
            model_recip_base_count: 20,
            recip_learning_rate: 1000,
            num_abbreviations: 64,
        }
    }

    /// Smallest at max count 9 and a selector 0b101
    fn bowl(params: &ModelParams) -> Result<Vec<u64>> {
        let count = u64::from(params.model_max_count.abs_diff(9)) * 10;
        let selector = if params.sparse_selectors.contains(&0b101) { 0 } else { 7 };
        Ok(vec![100 + count, 50 + selector])
    }

    #[test]
    fn stopping_at_once_returns_the_seed() {
        let mut reports = 0;
        let res = Optimizer::new(bowl, seed())
            .level(3)
            .run(|_: &ProgressInfo| {
                reports += 1;
                true
            })
            .unwrap();
        assert_eq!(reports, 1);
        assert_eq!(res.best, seed());
        assert_eq!(res.best_size, vec![140, 57]);
        assert_eq!(res.best_total(), 197);
    }

    #[test]
    fn level_zero_only_measures_the_seed() {
        let mut passes = Vec::new();
        let res = Optimizer::new(bowl, seed())
            .level(0)
            .run(|info: &ProgressInfo| passes.push(info.pass.clone()))
            .unwrap();
        assert_eq!(passes, vec!["initial"]);
        assert_eq!(res.best, seed());
    }

    #[test]
    fn finds_the_bottom_of_the_bowl() {
        let mut history = Vec::new();
        let res = Optimizer::new(bowl, seed())
            .level(4)
            .run(|info: &ProgressInfo| history.push(info.clone()))
            .unwrap();

        assert_eq!(res.best.model_max_count, 9);
        assert!(res.best.sparse_selectors.contains(&0b101));
        assert_eq!(res.best_size, vec![100, 50]);
        // the abbreviation count is left to objectives that care about it
        assert_eq!(res.best.num_abbreviations, 64);

        assert_eq!(history[0].pass, "initial");
        assert!(history.windows(2).all(|w| w[1].best_total() <= w[0].best_total()));
        for info in &history[1..] {
            assert_eq!(info.current_rejected, !info.best_updated);
            if info.best_updated {
                assert_eq!(info.best, info.current);
                assert_eq!(info.best_total(), info.current_size);
            }
        }
        assert_eq!(history.last().map(|info| &info.best), Some(&res.best));
    }

    #[test]
    fn selector_candidates_stay_distinct_and_nonzero() {
        let mut history = Vec::new();
        Optimizer::new(bowl, seed())
            .run(|info: &ProgressInfo| history.push(info.clone()))
            .unwrap();
        for info in history.iter().filter(|info| info.pass == "sparseSelectors") {
            let selectors = &info.current.sparse_selectors;
            assert!(selectors.iter().all(|&sel| sel != 0));
            assert!(selectors[0] != selectors[1]);
            assert!(info.pass_ratio.is_some_and(|r| (0.0..1.0).contains(&r)));
        }
    }

    #[test]
    fn deferred_verdicts_are_awaited() {
        let resolved = Arc::new(AtomicUsize::new(0));
        let mut reports = 0;
        let res = Optimizer::new(bowl, seed())
            .level(4)
            .run(|_: &ProgressInfo| {
                reports += 1;
                let resolved = Arc::clone(&resolved);
                let stop = reports == 3;
                Verdict::Deferred(Box::new(move || {
                    resolved.fetch_add(1, Ordering::SeqCst);
                    stop
                }))
            })
            .unwrap();
        assert_eq!(reports, 3);
        assert_eq!(resolved.load(Ordering::SeqCst), 3);
        assert!(res.best_total() <= 197);
    }

    #[test]
    fn nothing_better_keeps_the_seed() {
        let flat = |_: &ModelParams| -> Result<Vec<u64>> { Ok(vec![42]) };
        let res = Optimizer::new(flat, seed()).level(5).run(|_: &ProgressInfo| ()).unwrap();
        assert_eq!(res.best, seed());
        assert_eq!(res.best_size, vec![42]);
    }

    #[test]
    fn failing_seed_is_an_error() {
        let failing = |_: &ModelParams| -> Result<Vec<u64>> { Err(crate::error::Error::InvalidConfig("nope".into())) };
        assert!(Optimizer::new(failing, seed()).run(|_: &ProgressInfo| ()).is_err());
    }

    #[test]
    fn failing_candidates_are_skipped() {
        // 4 cannot be evaluated, 6 to 8 keep getting better
        let patchy = |params: &ModelParams| -> Result<Vec<u64>> {
            match params.model_max_count {
                4 => Err(crate::error::Error::InvalidConfig("transient".into())),
                count @ 5..=8 => Ok(vec![100 - 10 * u64::from(count - 5)]),
                _ => Ok(vec![200]),
            }
        };
        let flat_selectors = ModelParams { sparse_selectors: Vec::new(), ..seed() };
        let mut history = Vec::new();
        let res = Optimizer::new(patchy, flat_selectors)
            .level(2)
            .run(|info: &ProgressInfo| history.push(info.clone()))
            .unwrap();

        assert_eq!(res.best.model_max_count, 8);
        assert_eq!(res.best_size, vec![70]);
        assert!(history.iter().all(|info| info.current.model_max_count != 4));
        assert!(history.iter().any(|info| info.current.model_max_count == 6 && info.best_updated));
    }

    struct FakePack {
        free_vars: Vec<String>,
        len: u64,
    }

    impl Packed for FakePack {
        fn first_line(&self) -> &str {
            "eval(Function(...))"
        }

        fn first_line_length_in_bytes(&self) -> usize {
            self.first_line().len()
        }

        fn second_line(&self) -> &str {
            ""
        }

        fn free_vars(&self) -> &[String] {
            &self.free_vars
        }

        fn estimate_length(&self) -> u64 {
            self.len
        }
    }

    #[test]
    fn packed_length_tunes_abbreviations() {
        let objective = PackedLength::new(|params: &ModelParams| {
            Ok(FakePack { free_vars: vec!["A".into()], len: u64::from(params.num_abbreviations.abs_diff(40)) + 1000 })
        });
        assert!(objective.tunes_abbreviations());

        let pack = (objective.pack)(&seed()).unwrap();
        assert_eq!(pack.free_vars(), ["A".to_owned()]);
        assert_eq!(pack.first_line_length_in_bytes(), 19);

        let res = Optimizer::new(objective, seed()).level(8).run(|_: &ProgressInfo| ()).unwrap();
        assert!(res.best.num_abbreviations < 64);
        assert!(res.best_total() < 1024);
    }

    #[test]
    fn neighbours_respect_ranges() {
        assert_eq!(Knob::MaxCount.neighbours(1), vec![2]);
        assert_eq!(Knob::MaxCount.neighbours(255), vec![254]);
        assert_eq!(Knob::LearningRate.neighbours(1000), vec![800, 1200]);
        assert_eq!(Knob::Abbreviations.neighbours(0), vec![1]);
        assert_eq!(Knob::RecipBaseCount.neighbours(1 << 16), vec![(1 << 16) - 1]);
    }

    #[test]
    fn verdict_conversions() {
        assert!(Verdict::from(true).should_stop());
        assert!(!Verdict::from(false).should_stop());
        assert!(!Verdict::from(()).should_stop());
        assert!(Verdict::Deferred(Box::new(|| true)).should_stop());
    }
}
