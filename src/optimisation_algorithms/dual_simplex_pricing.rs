use log::{debug, trace};
use rand_chacha::{
    ChaCha8Rng,
    rand_core::{RngCore, SeedableRng},
};

use crate::{
    math::sparse_indexed_vector::SparseIndexedVector,
    optimisation_algorithms::{
        dual_simplex_config::{PricingKind, PricingMode, SolverConfig},
        dual_simplex_factorization::Factorization,
        dual_simplex_parallel::PartitionRunner,
        dual_simplex_variables::{VariableSet, primal_infeasibility},
    },
};

/// Scalars of one accepted pivot that every weight rule needs.
#[derive(Clone, Copy, Debug)]
pub struct PivotWeights {
    /// Pivot element `αᵣ`.
    pub alpha: f64,
    /// `‖ρᵣ‖² / αᵣ²`, with `ρᵣ = B⁻ᵀeᵣ` of the old basis.
    pub norm: f64,
    /// Weight of the pivot row before the pivot.
    pub pivot_row_weight: f64,
    pub floor: f64,
}

/// How the dual edge weights evolve. One implementation per [`PricingKind`].
pub trait DualWeightUpdate: Sync {
    /// Weight of row `r` computed from scratch, given `‖B⁻ᵀeᵣ‖²`.
    fn reference_weight(&self, rho_sq_norm: f64) -> f64;

    /// Whether `update_weight` reads `τ = B⁻¹ρᵣ`.
    fn needs_tau(&self) -> bool;

    /// Whether a fresh weight needs a transpose solve per row.
    fn needs_solves(&self) -> bool {
        self.needs_tau()
    }

    /// New weight of a non-pivot row with update-column entry `theta` and `tau` entry `tau`.
    fn update_weight(&self, weight: f64, theta: f64, tau: f64, pivot: &PivotWeights) -> f64;

    /// New weight of the pivot row.
    fn pivot_row_weight(&self, pivot: &PivotWeights) -> f64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DantzigWeights;

impl DualWeightUpdate for DantzigWeights {
    fn reference_weight(&self, _rho_sq_norm: f64) -> f64 {
        1.0
    }

    fn needs_tau(&self) -> bool {
        false
    }

    fn update_weight(&self, weight: f64, _theta: f64, _tau: f64, _pivot: &PivotWeights) -> f64 {
        weight
    }

    fn pivot_row_weight(&self, _pivot: &PivotWeights) -> f64 {
        1.0
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DevexWeights;

impl DualWeightUpdate for DevexWeights {
    fn reference_weight(&self, _rho_sq_norm: f64) -> f64 {
        1.0
    }

    fn needs_tau(&self) -> bool {
        false
    }

    fn update_weight(&self, weight: f64, theta: f64, _tau: f64, pivot: &PivotWeights) -> f64 {
        let ratio = theta / pivot.alpha;
        weight.max(ratio * ratio * pivot.pivot_row_weight)
    }

    fn pivot_row_weight(&self, pivot: &PivotWeights) -> f64 {
        (pivot.pivot_row_weight / (pivot.alpha * pivot.alpha)).max(1.0)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SteepestEdgeWeights;

impl DualWeightUpdate for SteepestEdgeWeights {
    fn reference_weight(&self, rho_sq_norm: f64) -> f64 {
        rho_sq_norm
    }

    fn needs_tau(&self) -> bool {
        true
    }

    fn update_weight(&self, weight: f64, theta: f64, tau: f64, pivot: &PivotWeights) -> f64 {
        let multiplier = -2.0 / pivot.alpha;
        (weight + theta * (theta * pivot.norm + tau * multiplier)).max(pivot.floor)
    }

    fn pivot_row_weight(&self, pivot: &PivotWeights) -> f64 {
        pivot.norm.max(pivot.floor)
    }
}

/// The closed set of weight rules.
#[derive(Clone, Copy, Debug)]
pub enum PricingStrategy {
    Dantzig(DantzigWeights),
    Devex(DevexWeights),
    SteepestEdge(SteepestEdgeWeights),
}

impl PricingStrategy {
    pub fn new(kind: PricingKind) -> Self {
        match kind {
            PricingKind::Dantzig => Self::Dantzig(DantzigWeights),
            PricingKind::Devex => Self::Devex(DevexWeights),
            PricingKind::SteepestEdge => Self::SteepestEdge(SteepestEdgeWeights),
        }
    }

    pub fn kind(&self) -> PricingKind {
        match self {
            Self::Dantzig(_) => PricingKind::Dantzig,
            Self::Devex(_) => PricingKind::Devex,
            Self::SteepestEdge(_) => PricingKind::SteepestEdge,
        }
    }

    pub fn rule(&self) -> &dyn DualWeightUpdate {
        match self {
            Self::Dantzig(rule) => rule,
            Self::Devex(rule) => rule,
            Self::SteepestEdge(rule) => rule,
        }
    }
}

/// Leaving-row selection: the dual edge weights, the squared primal infeasibility of every
/// basic variable, and the scan policy.
#[derive(Debug)]
pub struct PricingState {
    strategy: PricingStrategy,
    mode: PricingMode,
    weights: Vec<f64>,
    weights_valid: bool,
    /// Squared infeasibility per basis position; listed entries may be zero.
    infeasibilities: SparseIndexedVector,
    last_pivot_row: Option<usize>,
    rng: ChaCha8Rng,

    weight_floor: f64,
    last_row_penalty: f64,
    partial_pricing_minimum: usize,
    density_switch_ratio: f64,
}

impl PricingState {
    pub fn new(config: &SolverConfig, number_rows: usize) -> Self {
        Self {
            strategy: PricingStrategy::new(config.pricing_kind),
            mode: config.pricing_mode,
            weights: vec![1.0; number_rows],
            weights_valid: false,
            infeasibilities: SparseIndexedVector::empty(number_rows),
            last_pivot_row: None,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            weight_floor: config.weight_floor,
            last_row_penalty: config.last_row_penalty,
            partial_pricing_minimum: config.partial_pricing_minimum,
            density_switch_ratio: config.density_switch_ratio,
        }
    }

    pub fn kind(&self) -> PricingKind {
        self.strategy.kind()
    }

    pub fn mode(&self) -> PricingMode {
        self.mode
    }

    /// Whether weights are maintained at all in the current mode.
    pub fn maintains_weights(&self) -> bool {
        !matches!(self.mode, PricingMode::Uninitialized | PricingMode::Switchable)
    }

    /// Whether the weight update of the next pivot reads `τ = B⁻¹ρᵣ`.
    pub fn needs_tau(&self) -> bool {
        self.maintains_weights() && self.strategy.rule().needs_tau()
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn weights_valid(&self) -> bool {
        self.weights_valid
    }

    pub fn invalidate_weights(&mut self) {
        self.weights_valid = false;
    }

    pub(crate) fn set_weights(&mut self, weights: &[f64]) {
        self.weights.copy_from_slice(weights);
        self.weights_valid = true;
    }

    pub fn infeasibilities(&self) -> &SparseIndexedVector {
        &self.infeasibilities
    }

    pub fn set_last_pivot_row(&mut self, row: Option<usize>) {
        self.last_pivot_row = row;
    }

    /// Recomputes the weights from scratch, with one transpose solve per row where the rule
    /// needs `‖B⁻ᵀeᵣ‖²`.
    pub fn initialize_weights<F: Factorization + ?Sized>(
        &mut self,
        factorization: &mut F,
        rho: &mut SparseIndexedVector,
    ) {
        let number_rows = self.weights.len();
        let rule = self.strategy.rule();
        if !self.maintains_weights() || !rule.needs_solves() {
            self.weights.iter_mut().for_each(|weight| *weight = 1.0);
        } else {
            for row in 0..number_rows {
                rho.clear_and_resize(number_rows);
                rho.set_value(row, 1.0);
                factorization.update_column_transpose(rho);
                self.weights[row] = rule.reference_weight(rho.sq_norm()).max(self.weight_floor);
            }
            rho.clear();
        }
        self.weights_valid = true;
        debug!(
            "{} weights initialized for {} rows ({} pricing)",
            self.kind(),
            number_rows,
            self.mode
        );
    }

    /// Moves switchable pricing to full weights once the factorization has become dense.
    /// Returns whether the weights have to be rebuilt.
    pub fn check_switch(&mut self, factorization_elements: usize, number_rows: usize) -> bool {
        if self.mode != PricingMode::Switchable || number_rows == 0 {
            return false;
        }
        let ratio = factorization_elements as f64 / number_rows as f64;
        if ratio > self.density_switch_ratio {
            debug!(
                "factorization density {:.2} per row, switching to full {} pricing",
                ratio,
                self.kind()
            );
            self.mode = PricingMode::Full;
            self.weights_valid = false;
            true
        } else {
            false
        }
    }

    /// Rebuilds the infeasibility vector from the basic values.
    pub fn recompute_infeasibilities(
        &mut self,
        variables: &VariableSet,
        pivot_variable: &[usize],
        tolerance: f64,
    ) {
        self.infeasibilities.clear_and_resize(pivot_variable.len());
        for (row, &variable) in pivot_variable.iter().enumerate() {
            let infeasibility = primal_infeasibility(
                variables.solution[variable],
                variables.lower[variable],
                variables.upper[variable],
                tolerance,
            );
            if infeasibility > 0.0 {
                self.infeasibilities
                    .set_value(row, infeasibility * infeasibility);
            }
        }
    }

    /// Refreshes the entry of one basis position after its value changed.
    pub fn update_infeasibility(
        &mut self,
        row: usize,
        variables: &VariableSet,
        variable: usize,
        tolerance: f64,
    ) {
        let infeasibility = primal_infeasibility(
            variables.solution[variable],
            variables.lower[variable],
            variables.upper[variable],
            tolerance,
        );
        if infeasibility > 0.0 {
            self.infeasibilities
                .set_value(row, infeasibility * infeasibility);
        } else if self.infeasibilities.get(row) != 0.0 {
            self.infeasibilities.set_value(row, 0.0);
        }
    }

    /// Picks the basis position to leave, or `None` when no basic variable is infeasible beyond
    /// the tolerance. The widened tolerance is tried first, then the plain one.
    pub fn choose_leaving_row(
        &mut self,
        variables: &VariableSet,
        pivot_variable: &[usize],
        runner: &PartitionRunner,
        tolerance: f64,
        widened_tolerance: f64,
        factorization_ratio: f64,
    ) -> Option<usize> {
        let mut tolerances = vec![widened_tolerance.max(tolerance)];
        if widened_tolerance > tolerance {
            tolerances.push(tolerance);
        }

        for tolerance in tolerances {
            let threshold = tolerance * tolerance;
            let number_candidates = self.infeasibilities.number_elements();
            if self.mode == PricingMode::Partial
                && number_candidates > self.partial_pricing_minimum
            {
                let fraction = (1.0 / factorization_ratio.max(1.0)).clamp(0.1, 1.0);
                let window = ((number_candidates as f64 * fraction).ceil() as usize)
                    .max(self.partial_pricing_minimum)
                    .min(number_candidates);
                let start = (self.rng.next_u64() % number_candidates as u64) as usize;
                let found = self
                    .scan(variables, pivot_variable, runner, threshold, start, window)
                    .or_else(|| {
                        trace!("partial pricing found nothing, scanning every row");
                        self.scan(
                            variables,
                            pivot_variable,
                            runner,
                            threshold,
                            0,
                            number_candidates,
                        )
                    });
                if found.is_some() {
                    return found;
                }
            } else if let Some(row) = self.scan(
                variables,
                pivot_variable,
                runner,
                threshold,
                0,
                number_candidates,
            ) {
                return Some(row);
            }
        }
        None
    }

    /// Best `infeasibility / weight` over `window` listed candidates from `start`, wrapping.
    fn scan(
        &self,
        variables: &VariableSet,
        pivot_variable: &[usize],
        runner: &PartitionRunner,
        threshold: f64,
        start: usize,
        window: usize,
    ) -> Option<usize> {
        let candidates = self.infeasibilities.indices();
        let number_candidates = candidates.len();
        if number_candidates == 0 {
            return None;
        }
        let values = self.infeasibilities.dense();
        let use_weights = self.maintains_weights();

        let partial_bests = runner.map_partitions(window, |range| {
            let mut best: Option<(f64, usize)> = None;
            for offset in range {
                let row = candidates[(start + offset) % number_candidates];
                let infeasibility = values[row];
                if infeasibility <= threshold || variables.flagged[pivot_variable[row]] {
                    continue;
                }
                let mut weight = if use_weights { self.weights[row] } else { 1.0 };
                if Some(row) == self.last_pivot_row {
                    weight *= self.last_row_penalty;
                }
                let score = infeasibility / weight;
                if best.is_none_or(|(best_score, _)| score > best_score) {
                    best = Some((score, row));
                }
            }
            best
        });

        partial_bests
            .into_iter()
            .flatten()
            .fold(None, |best: Option<(f64, usize)>, (score, row)| match best {
                Some((best_score, _)) if score <= best_score => best,
                _ => Some((score, row)),
            })
            .map(|(_, row)| row)
    }

    /// Incremental weight update after a pivot on `pivot_row` with element `alpha`.
    ///
    /// `column` is `B⁻¹a_q` of the old basis, `rho_sq_norm` is `‖ρᵣ‖²` and `tau` is `B⁻¹ρᵣ`
    /// (only read by steepest edge).
    pub fn update_weights(
        &mut self,
        pivot_row: usize,
        alpha: f64,
        column: &SparseIndexedVector,
        rho_sq_norm: f64,
        tau: &SparseIndexedVector,
        runner: &PartitionRunner,
    ) {
        if !self.maintains_weights() {
            return;
        }
        let pivot = PivotWeights {
            alpha,
            norm: rho_sq_norm / (alpha * alpha),
            pivot_row_weight: self.weights[pivot_row],
            floor: self.weight_floor,
        };
        let rule = self.strategy.rule();
        let indices = column.indices();
        let weights = &self.weights;

        let updates = runner.map_partitions(indices.len(), |range| {
            indices[range]
                .iter()
                .filter(|&&row| row != pivot_row)
                .map(|&row| {
                    let weight =
                        rule.update_weight(weights[row], column.get(row), tau.get(row), &pivot);
                    (row, weight)
                })
                .collect::<Vec<_>>()
        });

        for (row, weight) in updates.into_iter().flatten() {
            self.weights[row] = weight;
        }
        self.weights[pivot_row] = rule.pivot_row_weight(&pivot);
    }
}
