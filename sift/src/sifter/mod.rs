//! Iterative streamline filtering.
//!
//! Each iteration freezes the cost state, evaluates every live streamline's
//! removal gradient in parallel over fixed index ranges, merges the per-range
//! best candidates and removes the best one (or a re-validated batch).
//! Termination is checked before every iteration, so a run whose criteria are
//! already met removes nothing.

use std::cell::Cell;
use std::fmt;
use std::io::{self, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::parallel::{auto_range_size, par_map_reduce_ranges, split_ranges};
use strum_macros::Display;

use crate::config::{SiftConfig, MIN_RANGE_SIZE};
use crate::error::{ConfigurationError, DegenerateStateError, Error, InitializationError};
use crate::gradient_sort::{BestCandidates, GradientEntry, TrackGradientCalculator};
use crate::model::{CostSnapshot, Model};
use crate::output::{write_file, write_selection, TraceRow, TraceWriter};
use crate::progress::{FilterProgress, ProgressCallback};
use crate::tractogram::{Streamline, StreamlineSink};


/// Which target criterion ended filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TargetCriterion {
    Mu,
    CostRatio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// No removal lowers the cost (by more than the tolerance).
    Converged,
    TargetReached(TargetCriterion),
    /// Live streamline count reached `term_number`.
    CountReached,
    Aborted,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Converged => write!(f, "converged"),
            TerminationReason::TargetReached(criterion) => write!(f, "target reached ({criterion})"),
            TerminationReason::CountReached => write!(f, "count reached"),
            TerminationReason::Aborted => write!(f, "aborted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    Initializing,
    Filtering,
    Terminated(TerminationReason),
    Emitting,
}

impl fmt::Display for FilterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterState::Initializing => write!(f, "initializing"),
            FilterState::Filtering => write!(f, "filtering"),
            FilterState::Terminated(reason) => write!(f, "terminated ({reason})"),
            FilterState::Emitting => write!(f, "emitting"),
        }
    }
}

/// Cooperative cancellation flag, observed between iterations.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Summary of one `perform_filtering` run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterReport {
    pub reason: TerminationReason,
    pub iterations: usize,
    pub initial_tracks: usize,
    pub remaining_tracks: usize,
    pub removed_tracks: usize,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub final_mu: f64,
    pub elapsed: Duration,
}

/// Owns the model and drives the filtering loop.
#[derive(Debug)]
pub struct Sifter {
    model: Model,
    config: SiftConfig,
    pool: rayon::ThreadPool,
    abort: AbortHandle,
    progress: ProgressCallback,
    state: Cell<FilterState>,
}

impl Sifter {
    pub fn new(model: Model, config: SiftConfig) -> Result<Self, Error> {
        config.validate()?;

        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(num_threads) = config.num_threads {
            builder = builder.num_threads(num_threads);
        }
        let pool = builder
            .build()
            .map_err(|e| ConfigurationError::ThreadPool(e.to_string()))?;

        Ok(Self {
            model,
            config,
            pool,
            abort: AbortHandle::default(),
            progress: ProgressCallback::default(),
            state: Cell::new(FilterState::Initializing),
        })
    }

    // ========== Configuration ==========

    pub fn set_term_number(&mut self, term_number: usize) {
        self.config.term_number = Some(term_number);
    }

    pub fn set_term_ratio(&mut self, term_ratio: f64) {
        self.config.term_ratio = Some(term_ratio);
    }

    pub fn set_term_mu(&mut self, term_mu: f64) {
        self.config.term_mu = Some(term_mu);
    }

    pub fn set_csv_path(&mut self, path: impl Into<PathBuf>) {
        self.config.csv_path = Some(path.into());
    }

    pub fn set_enforce_quantisation(&mut self, enforce: bool) {
        self.config.enforce_quantisation = enforce;
    }

    pub fn set_output_dir(&mut self, dir: impl Into<PathBuf>) {
        self.config.output_dir = Some(dir.into());
    }

    /// Write a selection checkpoint whenever the live count reaches one of
    /// `counts`; with `debug`, also dump per-fixel statistics.
    pub fn set_regular_outputs(&mut self, counts: &[usize], debug: bool) {
        self.config.output_at_counts = counts.to_vec();
        self.config.output_debug = debug;
    }

    pub fn set_progress_callback(&mut self, callback: ProgressCallback) {
        self.progress = callback;
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    // ========== Accessors ==========

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn into_model(self) -> Model {
        self.model
    }

    pub fn config(&self) -> &SiftConfig {
        &self.config
    }

    pub fn state(&self) -> FilterState {
        self.state.get()
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    // ========== Filtering ==========

    /// Remove streamlines until a termination criterion fires.
    ///
    /// On a degenerate state the error is returned and every removal applied
    /// so far stays in the model, so outputs can still be emitted.
    pub fn perform_filtering(&mut self) -> Result<FilterReport, Error> {
        self.config.validate()?;
        self.state.set(FilterState::Filtering);

        let start = Instant::now();
        let initial_tracks = self.model.num_tracks();
        // Criteria that need no cost state are honoured even on a degenerate model.
        let satisfied = if self.abort.is_aborted() {
            Some(TerminationReason::Aborted)
        } else if self.config.term_number.is_some_and(|n| initial_tracks <= n) {
            Some(TerminationReason::CountReached)
        } else {
            None
        };
        if let Some(reason) = satisfied {
            return Ok(self.finish_unfiltered(reason, start));
        }
        if self.model.num_removable() == 0 {
            return Err(log_degenerate(
                DegenerateStateError::NoRemovableTracks {
                    remaining: initial_tracks,
                }
                .into(),
            ));
        }
        let initial = self.model.snapshot().map_err(log_degenerate)?;
        let initial_cost = initial.cost;
        let cost_ratio = |cost: f64| {
            if initial_cost > 0.0 {
                cost / initial_cost
            } else {
                0.0
            }
        };

        tracing::info!(
            streamlines = initial_tracks,
            removable = self.model.num_removable(),
            mu = initial.mu,
            cost = initial.cost,
            threads = self.num_threads(),
            quantised = self.config.enforce_quantisation,
            "Filtering started"
        );

        let mut trace = match &self.config.csv_path {
            Some(path) => Some(TraceWriter::create(path)?),
            None => None,
        };
        if let Some(trace) = trace.as_mut() {
            trace.append(&TraceRow {
                iteration: 0,
                removed_this_iteration: 0,
                total_removed: 0,
                remaining: initial_tracks,
                cost: initial.cost,
                td_sum: self.model.td_sum(),
                mu: initial.mu,
                best_gradient: None,
                cost_ratio: cost_ratio(initial.cost),
            })?;
        }

        let mut pending_checkpoints: Vec<usize> = self
            .config
            .checkpoint_counts()
            .into_iter()
            .filter(|&count| count <= initial_tracks)
            .collect();
        if pending_checkpoints.first() == Some(&initial_tracks) {
            self.emit_checkpoint(initial_tracks)?;
            pending_checkpoints.remove(0);
        }

        let mut iteration = 0;
        let mut total_removed = 0;
        let mut current = initial;

        let reason = loop {
            if self.abort.is_aborted() {
                break TerminationReason::Aborted;
            }
            let live = self.model.num_tracks();
            if self.config.term_number.is_some_and(|n| live <= n) {
                break TerminationReason::CountReached;
            }
            if self.config.term_mu.is_some_and(|mu| current.mu >= mu) {
                break TerminationReason::TargetReached(TargetCriterion::Mu);
            }
            if self
                .config
                .term_ratio
                .is_some_and(|ratio| cost_ratio(current.cost) <= ratio)
            {
                break TerminationReason::TargetReached(TargetCriterion::CostRatio);
            }
            let batch = self.batch_size(live, pending_checkpoints.first().copied());
            let capacity = if self.config.enforce_quantisation {
                1
            } else {
                (batch * 2).min(live)
            };
            let candidates = self.gradient_pass(current, capacity).into_sorted_vec();

            let threshold = self.convergence_threshold(current.cost);
            let best_gradient = match candidates.first() {
                Some(best) if best.gradient < threshold => best.gradient,
                _ => break TerminationReason::Converged,
            };

            let removed = self.remove_candidates(&candidates, batch, threshold)?;
            total_removed += removed;
            iteration += 1;
            current = self.model.snapshot().map_err(log_degenerate)?;
            let remaining = self.model.num_tracks();

            tracing::debug!(
                iteration,
                removed,
                remaining,
                cost = current.cost,
                mu = current.mu,
                best_gradient,
                "Iteration complete"
            );
            if let Some(trace) = trace.as_mut() {
                trace.append(&TraceRow {
                    iteration,
                    removed_this_iteration: removed,
                    total_removed,
                    remaining,
                    cost: current.cost,
                    td_sum: self.model.td_sum(),
                    mu: current.mu,
                    best_gradient: Some(best_gradient),
                    cost_ratio: cost_ratio(current.cost),
                })?;
            }
            self.progress.emit(FilterProgress {
                iteration,
                remaining,
                removed,
                cost: current.cost,
                mu: current.mu,
            });

            if pending_checkpoints.first() == Some(&remaining) {
                self.emit_checkpoint(remaining)?;
                pending_checkpoints.remove(0);
            }
        };

        if let Some(trace) = trace.as_mut() {
            trace.flush()?;
        }
        self.state.set(FilterState::Terminated(reason));

        let report = FilterReport {
            reason,
            iterations: iteration,
            initial_tracks,
            remaining_tracks: self.model.num_tracks(),
            removed_tracks: total_removed,
            initial_cost,
            final_cost: current.cost,
            final_mu: current.mu,
            elapsed: start.elapsed(),
        };
        tracing::info!(
            reason = %report.reason,
            iterations = report.iterations,
            removed = report.removed_tracks,
            remaining = report.remaining_tracks,
            final_cost = report.final_cost,
            final_mu = report.final_mu,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Filtering finished"
        );
        Ok(report)
    }

    /// Report for a run that ended before the first gradient pass.
    fn finish_unfiltered(&self, reason: TerminationReason, start: Instant) -> FilterReport {
        let (cost, mu) = self
            .model
            .snapshot()
            .map_or((0.0, 0.0), |snapshot| (snapshot.cost, snapshot.mu));
        self.state.set(FilterState::Terminated(reason));

        let tracks = self.model.num_tracks();
        tracing::info!(reason = %reason, remaining = tracks, "Filtering not needed");
        FilterReport {
            reason,
            iterations: 0,
            initial_tracks: tracks,
            remaining_tracks: tracks,
            removed_tracks: 0,
            initial_cost: cost,
            final_cost: cost,
            final_mu: mu,
            elapsed: start.elapsed(),
        }
    }

    /// Removals this iteration, never overshooting `term_number` or the next checkpoint.
    fn batch_size(&self, live: usize, next_checkpoint: Option<usize>) -> usize {
        let mut batch = if self.config.enforce_quantisation {
            1
        } else {
            ((live as f64 * self.config.batch_ratio).floor() as usize).max(1)
        };
        if let Some(term_number) = self.config.term_number {
            batch = batch.min(live.saturating_sub(term_number));
        }
        if let Some(count) = next_checkpoint {
            batch = batch.min(live.saturating_sub(count));
        }
        batch.max(1)
    }

    /// Gradients must be below this to count as an improvement.
    fn convergence_threshold(&self, cost: f64) -> f64 {
        if self.config.has_termination_criterion() {
            0.0
        } else {
            -self.config.convergence_tolerance * cost
        }
    }

    /// Remove up to `batch` candidates in order. The first is taken as is;
    /// later ones are re-evaluated against the state left by earlier removals.
    fn remove_candidates(
        &mut self,
        candidates: &[GradientEntry],
        batch: usize,
        threshold: f64,
    ) -> Result<usize, Error> {
        let mut removed = 0;
        for (position, candidate) in candidates.iter().enumerate() {
            if removed == batch {
                break;
            }
            let index = candidate.track as usize;
            if position > 0 {
                let fresh = self.model.snapshot().map_err(log_degenerate)?;
                let gradient = self.model.calc_gradient(index, fresh.mu, fresh.roc_cost);
                if gradient >= threshold {
                    continue;
                }
            }
            self.model.remove(index).map_err(log_degenerate)?;
            removed += 1;
        }
        Ok(removed)
    }

    fn gradient_pass(&self, snapshot: CostSnapshot, capacity: usize) -> BestCandidates {
        let len = self.model.track_count();
        let range_size = self
            .config
            .range_size
            .unwrap_or_else(|| auto_range_size(len, self.num_threads(), MIN_RANGE_SIZE));
        let ranges = split_ranges(len, range_size);
        self.run_pass(&ranges, snapshot, capacity)
    }

    fn run_pass(
        &self,
        ranges: &[Range<usize>],
        snapshot: CostSnapshot,
        capacity: usize,
    ) -> BestCandidates {
        let calculator = TrackGradientCalculator::new(&self.model, snapshot);
        self.pool.install(|| {
            par_map_reduce_ranges(
                ranges,
                |range| calculator.calculate(range.into(), capacity),
                || BestCandidates::new(capacity),
                BestCandidates::merge,
            )
        })
    }

    /// Time one full gradient pass per range size, on the current state.
    pub fn profile_range_sizes(&self, sizes: &[usize]) -> Result<Vec<(usize, Duration)>, Error> {
        let snapshot = self.model.snapshot()?;
        let len = self.model.track_count();
        let mut timings = Vec::with_capacity(sizes.len());
        for &range_size in sizes {
            if range_size == 0 {
                return Err(ConfigurationError::ZeroValue("range_size").into());
            }
            let ranges = split_ranges(len, range_size);
            let start = Instant::now();
            let candidates = self.run_pass(&ranges, snapshot, 1);
            let elapsed = start.elapsed();
            tracing::info!(
                range_size,
                ranges = ranges.len(),
                evaluated = candidates.evaluated(),
                elapsed_us = elapsed.as_micros() as u64,
                "Gradient pass timed"
            );
            timings.push((range_size, elapsed));
        }
        Ok(timings)
    }

    // ========== Output ==========

    fn emit_checkpoint(&self, count: usize) -> Result<(), Error> {
        let Some(dir) = &self.config.output_dir else {
            return Ok(());
        };
        write_file(&dir.join(format!("selection_{count}.txt")), |w| {
            write_selection(&self.model, w)
        })?;
        if self.config.output_debug {
            write_file(&dir.join(format!("fixels_{count}.csv")), |w| {
                self.model.output_fixel_stats(w)
            })?;
        }
        tracing::info!(count, dir = %dir.display(), "Checkpoint written");
        Ok(())
    }

    /// Write surviving streamlines in original order. Returns how many were written.
    pub fn output_filtered_tracks<S>(
        &self,
        streamlines: &[Streamline],
        sink: &mut S,
    ) -> Result<usize, Error>
    where
        S: StreamlineSink + ?Sized,
    {
        if streamlines.len() != self.model.track_count() {
            return Err(InitializationError::TrackCountMismatch {
                expected: self.model.track_count(),
                actual: streamlines.len(),
            }
            .into());
        }
        self.state.set(FilterState::Emitting);

        let mut written = 0;
        for (index, streamline) in streamlines.iter().enumerate() {
            if self.model.is_removed(index) {
                continue;
            }
            sink.write_streamline(index, streamline).map_err(Error::Sink)?;
            written += 1;
        }
        tracing::info!(written, total = streamlines.len(), "Filtered streamlines written");
        Ok(written)
    }

    /// Selection file: one `1` (kept) or `0` (removed) per original streamline.
    pub fn output_selection(&self, path: &Path) -> Result<(), Error> {
        self.state.set(FilterState::Emitting);
        write_file(path, |w| write_selection(&self.model, w))
    }

    pub fn write_selection<W: Write>(&self, writer: W) -> io::Result<()> {
        self.state.set(FilterState::Emitting);
        write_selection(&self.model, writer)
    }
}

fn log_degenerate(err: Error) -> Error {
    tracing::error!(error = %err, "Filtering stopped");
    err
}
