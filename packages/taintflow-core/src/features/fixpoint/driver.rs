//! Work-list fixpoint driver
//!
//! Iteration protocol:
//! 1. oldify the work list, so `get_old` serves the previous iteration
//! 2. dispatch disjoint chunks to rayon workers; each worker analyzes its
//!    targets to completion against `get_or_old` callee reads
//! 3. widen each new model against the previous one; record `is_partial`
//! 4. reduce expensive-callable telemetry
//! 5. next work list = partial targets plus their callers, restricted to
//!    the initial work list
//! 6. drop the old slots; empty next list means convergence, and the
//!    iteration budget bounds divergence
//!
//! The shared tables are the only cross-worker state; each key is written
//! by exactly one worker per iteration, and the old/new dual slot gives
//! readers a consistent snapshot. An external stop signal drains the
//! in-flight chunk, keeps the partial state, and returns.

use super::state::FixpointState;
use crate::errors::{Result, TaintflowError};
use crate::features::analyzer::{analyze_define, AnalysisContext};
use crate::features::shared_memory::ShardedTable;
use crate::features::taint::TaintModel;
use crate::shared::models::{Diagnostic, Target};
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Driver tuning knobs
#[derive(Debug, Clone)]
pub struct FixpointConfig {
    pub max_iterations: u32,

    /// Depth past which model trees collapse during widening
    pub widen_depth: usize,

    /// Advisory per-target budget; slower targets are reported, never
    /// interrupted
    pub expensive_callable_ms: u64,

    pub workers: usize,
}

impl Default for FixpointConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            widen_depth: 4,
            expensive_callable_ms: 500,
            workers: num_cpus::get(),
        }
    }
}

/// Hot path: per-target models
pub type SharedModelsHandle = Arc<ShardedTable<Target, TaintModel>>;

/// Cold path: per-callable issues, written only for functions and methods
pub type SharedResultsHandle = Arc<ShardedTable<Target, Vec<Diagnostic>>>;

/// What a finished (or stopped) run reports
#[derive(Debug)]
pub struct FixpointOutcome {
    pub iterations: u32,
    pub stopped_early: bool,

    /// Targets that exceeded the advisory time budget, with elapsed ms
    pub expensive_callables: Vec<(Target, u128)>,
}

/// The fixpoint driver and its shared-memory handles
pub struct FixpointDriver {
    models: SharedModelsHandle,
    results: SharedResultsHandle,
    states: ShardedTable<Target, FixpointState>,
    epoch: u32,
    config: FixpointConfig,
    stop: Arc<AtomicBool>,
}

impl FixpointDriver {
    pub fn new(config: FixpointConfig) -> Self {
        let workers = config.workers;
        Self {
            models: Arc::new(ShardedTable::with_workers(workers)),
            results: Arc::new(ShardedTable::with_workers(workers)),
            states: ShardedTable::with_workers(workers),
            epoch: 0,
            config,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn models(&self) -> &SharedModelsHandle {
        &self.models
    }

    pub fn results(&self) -> &SharedResultsHandle {
        &self.results
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Handle for external cancellation. The flag is sticky: clear it
    /// before reusing the driver after a stop.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Install the initial model for a target (DSL-seeded or empty)
    pub fn seed_model(&self, target: Target, model: TaintModel) {
        self.models.add(target, model);
    }

    /// Drop every model, result and state
    pub fn cleanup(&self) {
        self.models.cleanup();
        self.results.cleanup();
        self.states.cleanup();
    }

    /// All issues recorded in the last run, deterministically ordered
    pub fn issues(&self) -> Vec<Diagnostic> {
        let mut out: Vec<Diagnostic> = self
            .results
            .entries()
            .into_iter()
            .flat_map(|(_, issues)| issues)
            .collect();
        out.sort_by_key(|d| d.sort_key());
        out.dedup();
        out
    }

    /// Run to fixpoint over `work`.
    ///
    /// Every target must have been seeded with an initial model; a missing
    /// entry is a bug in the seeding path and aborts the batch.
    pub fn run(&mut self, ctx: &AnalysisContext<'_>, work: Vec<Target>) -> Result<FixpointOutcome> {
        self.epoch += 1;
        self.states.cleanup();

        for target in &work {
            assert!(
                self.models.contains(target),
                "missing initial model for `{target}` before iteration 0"
            );
        }

        let initial: FxHashSet<Target> = work.iter().cloned().collect();
        let mut current = work;
        current.sort();
        current.dedup();

        let mut iteration = 0u32;
        let mut expensive: Vec<(Target, u128)> = Vec::new();

        loop {
            debug!(iteration, targets = current.len(), "fixpoint iteration");
            self.models.oldify_batch(current.iter());

            let chunk_size =
                (current.len() / (self.config.workers.max(1) * 4)).max(1);
            let mut partial: Vec<Target> = Vec::new();
            let mut stopped = false;

            for chunk in current.chunks(chunk_size) {
                if self.stop.load(Ordering::Relaxed) {
                    stopped = true;
                    break;
                }
                let outcomes: Vec<(Target, bool, u128)> = chunk
                    .par_iter()
                    .map(|target| self.analyze_target(ctx, target, iteration))
                    .collect();
                // Reduce: partial set and telemetry.
                for (target, is_partial, elapsed) in outcomes {
                    if elapsed as u64 >= self.config.expensive_callable_ms {
                        warn!(%target, elapsed_ms = elapsed, "expensive callable");
                        expensive.push((target.clone(), elapsed));
                    }
                    if is_partial {
                        partial.push(target);
                    }
                }
            }

            // Next work list before the old slots go away.
            let mut next: Vec<Target> = Vec::new();
            for target in &partial {
                next.push(target.clone());
                for caller in ctx.call_graph.callers_of(target) {
                    if initial.contains(&caller) {
                        next.push(caller);
                    }
                }
            }
            next.sort();
            next.dedup();

            self.models.remove_old_batch(current.iter());

            if stopped {
                info!(iteration, "fixpoint stopped by external signal");
                return Ok(FixpointOutcome {
                    iterations: iteration,
                    stopped_early: true,
                    expensive_callables: expensive,
                });
            }
            if next.is_empty() {
                info!(iterations = iteration + 1, "fixpoint reached");
                return Ok(FixpointOutcome {
                    iterations: iteration + 1,
                    stopped_early: false,
                    expensive_callables: expensive,
                });
            }

            iteration += 1;
            if iteration >= self.config.max_iterations {
                warn!(
                    unstable = next.len(),
                    "fixpoint did not converge within budget"
                );
                return Err(TaintflowError::FixpointDivergence {
                    iterations: iteration,
                    unstable: next.len(),
                });
            }
            current = next;
        }
    }

    fn analyze_target(
        &self,
        ctx: &AnalysisContext<'_>,
        target: &Target,
        iteration: u32,
    ) -> (Target, bool, u128) {
        let previous = self.models.get_old(target).unwrap_or_else(|| {
            panic!("missing model for `{target}` at iteration {iteration}")
        });
        if let Some(state) = self.states.get(target) {
            assert!(
                state.epoch == self.epoch,
                "fixpoint state leak on `{target}`: stored epoch {} but driver epoch {}",
                state.epoch,
                self.epoch
            );
        }

        let started = Instant::now();
        let models = Arc::clone(&self.models);
        let get_callee = move |callee: &Target| models.get_or_old(callee);

        let (issues, new_model) = match target {
            Target::Function { .. } | Target::Method { .. } => match ctx.index.get(target) {
                Some(define) => {
                    let define = Arc::clone(define);
                    analyze_define(ctx, target, &define, &previous, &get_callee)
                }
                // Opaque externals keep their seeded model.
                None => (Vec::new(), previous.clone()),
            },
            Target::Override { .. } => (Vec::new(), self.override_model(ctx, target, &previous)),
            Target::Object { .. } => (Vec::new(), previous.clone()),
        };

        let widened = if new_model.less_or_equal(&previous) {
            previous.clone()
        } else {
            previous.widen(&new_model, self.config.widen_depth)
        };
        let is_partial = !widened.less_or_equal(&previous);

        self.models.add(target.clone(), widened);
        self.states.add(
            target.clone(),
            FixpointState {
                is_partial,
                epoch: self.epoch,
                iteration,
            },
        );
        if target.has_results() {
            self.results.add(target.clone(), issues);
        }

        (target.clone(), is_partial, started.elapsed().as_millis())
    }

    /// Synthetic override target: join of every overriding method's
    /// contribution with the method's own.
    fn override_model(
        &self,
        ctx: &AnalysisContext<'_>,
        target: &Target,
        previous: &TaintModel,
    ) -> TaintModel {
        let Target::Override { class, name, .. } = target else {
            return previous.clone();
        };

        let mut joined = TaintModel::empty();
        if let Some(method) = target.corresponding_method() {
            if let Some(model) = self.models.get_or_old(&method) {
                joined = joined.join(&model.for_override_model());
            }
        }
        for subclass in ctx.overrides.get_overriding_types(class, name) {
            let member = Target::method(subclass.clone(), name.clone());
            if let Some(model) = self.models.get_or_old(&member) {
                joined = joined.join(&model.for_override_model());
            }
        }
        previous.join(&joined)
    }
}
