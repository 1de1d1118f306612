use log::warn;

use crate::optimisation_algorithms::{
    dual_simplex_fake_bounds::{FakeBound, FakeBoundManager},
    dual_simplex_pricing::PricingState,
    dual_simplex_variables::{VariableSet, VariableStatus},
};

/// Things that go wrong during the iteration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SimplexTrouble {
    /// Row and column pivot disagree, pivots too small, or an update was refused.
    NumericalInstability,
    /// No objective progress over the stall window.
    Stalling,
    FactorizationSingular,
    PrimalInfeasible,
    Unbounded,
    IterationOrTimeLimit,
}

impl std::fmt::Display for SimplexTrouble {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SimplexTrouble::NumericalInstability => write!(f, "numerical instability"),
            SimplexTrouble::Stalling => write!(f, "no progress"),
            SimplexTrouble::FactorizationSingular => write!(f, "singular basis"),
            SimplexTrouble::PrimalInfeasible => write!(f, "primal infeasible"),
            SimplexTrouble::Unbounded => write!(f, "unbounded"),
            SimplexTrouble::IterationOrTimeLimit => write!(f, "iteration or time limit"),
        }
    }
}

impl std::error::Error for SimplexTrouble {}

/// What the driver does about a numerical disaster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Eta updates are pending: refactorize and carry on.
    Refactorize,
    /// Go back to the last good state, flag the culprit and refactorize.
    RestoreAndFlag,
    /// Flag the culprit without going back.
    Flag,
    /// Too many disasters in a row.
    Fail,
}

/// Basis and solution as they were right after a successful factorization.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub iteration: usize,
    pivot_variable: Vec<usize>,
    status: Vec<VariableStatus>,
    solution: Vec<f64>,
    dj: Vec<f64>,
    cost: Vec<f64>,
    lower: Vec<f64>,
    upper: Vec<f64>,
    fake_tags: Vec<FakeBound>,
    dual_bound: f64,
    weights: Option<Vec<f64>>,
}

/// Counts disasters, remembers the last good state and escalates the pivot tolerance.
#[derive(Clone, Debug)]
pub struct RecoveryController {
    snapshot: Option<Snapshot>,
    consecutive_disasters: usize,
    total_disasters: usize,
    maximum_disasters: usize,
    last_bad_iteration: Option<usize>,
    pivot_tolerance_growth: f64,
    maximum_pivot_tolerance: f64,
}

impl RecoveryController {
    pub fn new(
        maximum_disasters: usize,
        pivot_tolerance_growth: f64,
        maximum_pivot_tolerance: f64,
    ) -> Self {
        Self {
            snapshot: None,
            consecutive_disasters: 0,
            total_disasters: 0,
            maximum_disasters,
            last_bad_iteration: None,
            pivot_tolerance_growth,
            maximum_pivot_tolerance,
        }
    }

    pub fn take_snapshot(
        &mut self,
        iteration: usize,
        variables: &VariableSet,
        pivot_variable: &[usize],
        fake_bounds: &FakeBoundManager,
        pricing: &PricingState,
    ) {
        let snapshot = match self.snapshot.take() {
            Some(mut snapshot) => {
                snapshot.iteration = iteration;
                snapshot.pivot_variable.clone_from_slice(pivot_variable);
                snapshot.status.clone_from_slice(&variables.status);
                snapshot.solution.clone_from_slice(&variables.solution);
                snapshot.dj.clone_from_slice(&variables.dj);
                snapshot.cost.clone_from_slice(&variables.cost);
                snapshot.lower.clone_from_slice(&variables.lower);
                snapshot.upper.clone_from_slice(&variables.upper);
                snapshot.fake_tags.clone_from_slice(fake_bounds.tags());
                snapshot.dual_bound = fake_bounds.current_dual_bound();
                snapshot.weights = pricing
                    .weights_valid()
                    .then(|| pricing.weights().to_vec());
                snapshot
            }
            None => Snapshot {
                iteration,
                pivot_variable: pivot_variable.to_vec(),
                status: variables.status.clone(),
                solution: variables.solution.clone(),
                dj: variables.dj.clone(),
                cost: variables.cost.clone(),
                lower: variables.lower.clone(),
                upper: variables.upper.clone(),
                fake_tags: fake_bounds.tags().to_vec(),
                dual_bound: fake_bounds.current_dual_bound(),
                weights: pricing
                    .weights_valid()
                    .then(|| pricing.weights().to_vec()),
            },
        };
        self.snapshot = Some(snapshot);
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Puts the last good state back. Flags survive the restore. Returns false without a
    /// snapshot.
    pub fn restore(
        &self,
        variables: &mut VariableSet,
        pivot_variable: &mut [usize],
        fake_bounds: &mut FakeBoundManager,
        pricing: &mut PricingState,
    ) -> bool {
        let Some(snapshot) = &self.snapshot else {
            return false;
        };
        pivot_variable.copy_from_slice(&snapshot.pivot_variable);
        variables.status.copy_from_slice(&snapshot.status);
        variables.solution.copy_from_slice(&snapshot.solution);
        variables.dj.copy_from_slice(&snapshot.dj);
        variables.cost.copy_from_slice(&snapshot.cost);
        variables.lower.copy_from_slice(&snapshot.lower);
        variables.upper.copy_from_slice(&snapshot.upper);
        fake_bounds.set_tags(&snapshot.fake_tags, snapshot.dual_bound);
        match &snapshot.weights {
            Some(weights) => pricing.set_weights(weights),
            None => pricing.invalidate_weights(),
        }
        true
    }

    /// Decides how to react to a disaster at `iteration`.
    pub fn record_disaster(
        &mut self,
        trouble: SimplexTrouble,
        iteration: usize,
        pivots_since_factorization: usize,
    ) -> RecoveryAction {
        self.last_bad_iteration = Some(iteration);
        if pivots_since_factorization > 0 && trouble == SimplexTrouble::NumericalInstability {
            return RecoveryAction::Refactorize;
        }
        self.consecutive_disasters += 1;
        self.total_disasters += 1;
        if self.consecutive_disasters > self.maximum_disasters {
            warn!(
                "giving up after {} consecutive numerical disasters ({})",
                self.consecutive_disasters, trouble
            );
            return RecoveryAction::Fail;
        }
        warn!(
            "{} at iteration {}, disaster {} of at most {}",
            trouble, iteration, self.consecutive_disasters, self.maximum_disasters
        );
        match trouble {
            SimplexTrouble::FactorizationSingular if self.snapshot.is_some() => {
                RecoveryAction::RestoreAndFlag
            }
            _ => RecoveryAction::Flag,
        }
    }

    /// Marks a trouble that needs no recovery, such as a stall.
    pub fn record_trouble(&mut self, iteration: usize) {
        self.last_bad_iteration = Some(iteration);
    }

    /// A pivot went through.
    pub fn record_success(&mut self) {
        self.consecutive_disasters = 0;
    }

    /// Whether a trouble happened less than `window` iterations before `iteration`.
    pub fn recently_troubled(&self, iteration: usize, window: usize) -> bool {
        self.last_bad_iteration
            .is_some_and(|bad| iteration < bad + window)
    }

    pub fn total_disasters(&self) -> usize {
        self.total_disasters
    }

    /// The next, stricter pivot tolerance.
    pub fn escalate_pivot_tolerance(&self, current: f64) -> f64 {
        let escalated = (current * self.pivot_tolerance_growth).min(self.maximum_pivot_tolerance);
        if escalated > current {
            warn!("pivot tolerance raised to {}", escalated);
        }
        escalated
    }

    pub fn reset(&mut self) {
        self.snapshot = None;
        self.consecutive_disasters = 0;
        self.last_bad_iteration = None;
    }
}
