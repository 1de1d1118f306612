use std::{fmt::Debug, rc::Rc, time::Instant};

use anyhow::{Result, anyhow};
use log::{debug, info, trace, warn};
use rand_chacha::{
    ChaCha8Rng,
    rand_core::{RngCore, SeedableRng},
};
use serde::Serialize;
use strum_macros::Display;

use crate::{
    math::{column_matrix::ColumnMatrix, sparse_vector_pool::SparseVectorPool},
    optimisation_algorithms::{
        dual_simplex_bound_flips::apply_bound_flips,
        dual_simplex_config::{PricingPersistence, SolverConfig, WeightRefresh},
        dual_simplex_events::{EventAction, EventHandler, FactorizationEvent},
        dual_simplex_factorization::{Factorization, FactorizationError},
        dual_simplex_fake_bounds::{BoundCheck, FakeBoundManager},
        dual_simplex_lu::LuFactorization,
        dual_simplex_parallel::PartitionRunner,
        dual_simplex_pricing::PricingState,
        dual_simplex_ratio_test::{RatioTestInput, RatioTestOutcome, choose_entering},
        dual_simplex_recovery::{RecoveryAction, RecoveryController, SimplexTrouble},
        dual_simplex_variables::{VariableSet, VariableStatus},
    },
};

/// Where the iteration stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum SimplexState {
    Iterating,
    Optimal,
    Infeasible,
    Unbounded,
    IterationLimit,
    NumericalFailure,
}

/// How a solve ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum SolveStatus {
    Optimal,
    Infeasible,
    Unbounded,
    IterationLimit,
    NumericalFailure,
}

/// Which limit ended a solve reported as [`SolveStatus::IterationLimit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum LimitReason {
    Iterations,
    Time,
    EventHandler,
}

/// Certificate attached to an infeasible or unbounded result.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Ray {
    /// Multipliers on the rows: a combination of constraints that cannot be satisfied.
    Dual(Vec<f64>),
    /// Direction over the structural columns along which the objective decreases without end.
    Primal(Vec<f64>),
}

enum IterationStep {
    /// `flip_change` is the working objective change from bound flips.
    Pivoted { flip_change: f64 },
    NoLeavingRow,
    NoEnteringColumn { row: usize, direction: f64 },
    Trouble { trouble: SimplexTrouble, culprit: usize },
}

/// Bounded-variable revised dual simplex on `min cᵀx` subject to
/// `row_lower ≤ Ax ≤ row_upper`, `column_lower ≤ x ≤ column_upper`.
///
/// Variables live in one index space: the structural columns first, then one row variable per
/// constraint (`aᵢᵀx - rᵢ = 0`), so a slack basis is `-I`. Dual feasibility is kept throughout
/// with fake bounds and cost shifts, which are removed again before optimality is declared.
pub struct DualSimplex<F: Factorization = LuFactorization> {
    config: SolverConfig,
    matrix: ColumnMatrix,
    variables: VariableSet,
    /// Basis position -> variable.
    pivot_variable: Vec<usize>,
    factorization: F,
    factorized: bool,
    pricing: PricingState,
    fake_bounds: FakeBoundManager,
    recovery: RecoveryController,
    runner: PartitionRunner,
    pool: Rc<SparseVectorPool>,
    rng: ChaCha8Rng,
    event_handler: Option<Box<dyn EventHandler>>,

    state: SimplexState,
    limit_reason: Option<LimitReason>,
    ray: Option<Ray>,
    iterations: usize,
    solves: usize,
    start: Instant,

    cost_modification: bool,
    force_refactorization: bool,
    refresh_weights: bool,
    last_entering: Option<usize>,
    flag_clears: usize,
    perturbations: usize,
    flip_objective_change: f64,
    /// Auxiliary solves for a reached dual bound ceiling do not start their own.
    nested: bool,
    best_objective: f64,
    last_progress: usize,
    largest_primal_error: f64,
    largest_dual_error: f64,
}

impl DualSimplex<LuFactorization> {
    pub fn new(
        matrix: ColumnMatrix,
        cost: &[f64],
        column_lower: &[f64],
        column_upper: &[f64],
        row_lower: &[f64],
        row_upper: &[f64],
        config: SolverConfig,
    ) -> Result<Self> {
        let factorization = LuFactorization::new(config.initial_pivot_tolerance);
        Self::with_factorization(
            matrix,
            cost,
            column_lower,
            column_upper,
            row_lower,
            row_upper,
            config,
            factorization,
        )
    }
}

impl<F: Factorization> DualSimplex<F> {
    #[allow(clippy::too_many_arguments)]
    pub fn with_factorization(
        matrix: ColumnMatrix,
        cost: &[f64],
        column_lower: &[f64],
        column_upper: &[f64],
        row_lower: &[f64],
        row_upper: &[f64],
        config: SolverConfig,
        factorization: F,
    ) -> Result<Self> {
        config.validate()?;
        let number_columns = matrix.number_columns();
        let number_rows = matrix.number_rows();
        for (name, length, expected) in [
            ("cost", cost.len(), number_columns),
            ("column lower bound", column_lower.len(), number_columns),
            ("column upper bound", column_upper.len(), number_columns),
            ("row lower bound", row_lower.len(), number_rows),
            ("row upper bound", row_upper.len(), number_rows),
        ] {
            if length != expected {
                return Err(anyhow!(
                    "{} vector has length {}, expected {}",
                    name,
                    length,
                    expected
                ));
            }
        }
        if let Some(j) = cost.iter().position(|c| !c.is_finite()) {
            return Err(anyhow!("cost of column {} is {}", j, cost[j]));
        }
        for (j, (&lower, &upper)) in column_lower.iter().zip(column_upper).enumerate() {
            check_bounds("column", j, lower, upper)?;
        }
        for (i, (&lower, &upper)) in row_lower.iter().zip(row_upper).enumerate() {
            check_bounds("row", i, lower, upper)?;
        }

        let mut variables =
            VariableSet::new(cost, column_lower, column_upper, row_lower, row_upper);
        for i in 0..number_rows {
            variables.status[number_columns + i] = VariableStatus::Basic;
        }
        variables.place_nonbasic();
        let number_total = variables.number_total();

        Ok(Self {
            runner: PartitionRunner::new(config.threads, config.parallel_threshold)?,
            pricing: PricingState::new(&config, number_rows),
            fake_bounds: FakeBoundManager::new(number_total, config.dual_bound_for(number_total)),
            recovery: RecoveryController::new(
                config.maximum_disasters,
                config.pivot_tolerance_growth,
                config.maximum_pivot_tolerance,
            ),
            pool: Rc::new(SparseVectorPool::with_capacity(4, number_rows)),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            pivot_variable: (number_columns..number_total).collect(),
            matrix,
            variables,
            factorization,
            factorized: false,
            event_handler: None,
            state: SimplexState::Iterating,
            limit_reason: None,
            ray: None,
            iterations: 0,
            solves: 0,
            start: Instant::now(),
            cost_modification: config.cost_modification,
            force_refactorization: false,
            refresh_weights: false,
            last_entering: None,
            flag_clears: 0,
            perturbations: 0,
            flip_objective_change: 0.0,
            nested: false,
            best_objective: f64::NEG_INFINITY,
            last_progress: 0,
            largest_primal_error: 0.0,
            largest_dual_error: 0.0,
            config,
        })
    }

    pub fn number_rows(&self) -> usize {
        self.matrix.number_rows()
    }

    pub fn number_columns(&self) -> usize {
        self.matrix.number_columns()
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn set_event_handler(&mut self, handler: Box<dyn EventHandler>) {
        self.event_handler = Some(handler);
    }

    /// Starts the next solve from the given basis. A status array with the wrong number of
    /// basic variables is repaired: surplus basics become non-basic and missing positions are
    /// filled with row variables.
    pub fn set_initial_status(&mut self, status: &[VariableStatus]) -> Result<()> {
        let number_rows = self.number_rows();
        let number_columns = self.number_columns();
        if status.len() != self.variables.number_total() {
            return Err(anyhow!(
                "status array has length {}, expected {}",
                status.len(),
                self.variables.number_total()
            ));
        }
        self.variables.status.copy_from_slice(status);

        let mut basics: Vec<usize> = (0..status.len())
            .filter(|&j| status[j].is_basic())
            .collect();
        if basics.len() != number_rows {
            warn!(
                "initial basis has {} basic variables for {} rows, repairing",
                basics.len(),
                number_rows
            );
        }
        if basics.len() > number_rows {
            for &j in &basics[number_rows..] {
                self.variables.status[j] = VariableStatus::AtLowerBound;
            }
            basics.truncate(number_rows);
        }
        for i in 0..number_rows {
            if basics.len() == number_rows {
                break;
            }
            let row_variable = number_columns + i;
            if !self.variables.status[row_variable].is_basic() {
                self.variables.status[row_variable] = VariableStatus::Basic;
                basics.push(row_variable);
            }
        }
        self.pivot_variable = basics;
        self.variables.place_nonbasic();
        self.factorized = false;
        self.pricing.invalidate_weights();
        Ok(())
    }

    pub fn set_column_bounds(&mut self, column: usize, lower: f64, upper: f64) -> Result<()> {
        if column >= self.number_columns() {
            return Err(anyhow!("column {} does not exist", column));
        }
        check_bounds("column", column, lower, upper)?;
        self.set_variable_bounds(column, lower, upper);
        Ok(())
    }

    /// True bounds of a column, without fake bounds.
    pub fn column_bounds(&self, column: usize) -> (f64, f64) {
        (
            self.variables.lower_saved[column],
            self.variables.upper_saved[column],
        )
    }

    pub fn set_row_bounds(&mut self, row: usize, lower: f64, upper: f64) -> Result<()> {
        if row >= self.number_rows() {
            return Err(anyhow!("row {} does not exist", row));
        }
        check_bounds("row", row, lower, upper)?;
        self.set_variable_bounds(self.number_columns() + row, lower, upper);
        Ok(())
    }

    fn set_variable_bounds(&mut self, variable: usize, lower: f64, upper: f64) {
        self.variables.lower_saved[variable] = lower;
        self.variables.upper_saved[variable] = upper;
        self.variables.restore_bounds(variable);
        if !self.variables.status[variable].is_basic() {
            let wanted = self.variables.status[variable];
            self.variables.status[variable] = self.variables.settle_status(variable, wanted);
            self.variables.move_to_bound(variable);
        }
    }

    pub fn set_objective_coefficient(&mut self, column: usize, cost: f64) -> Result<()> {
        if column >= self.number_columns() {
            return Err(anyhow!("column {} does not exist", column));
        }
        if !cost.is_finite() {
            return Err(anyhow!("cost of column {} is {}", column, cost));
        }
        self.variables.cost_saved[column] = cost;
        self.variables.cost[column] = cost;
        Ok(())
    }

    /// Runs the dual simplex from the current basis until a terminal state.
    pub fn solve(&mut self) -> SolveStatus {
        info!(
            "dual simplex on {} rows, {} columns, {} elements ({} pricing, {})",
            self.number_rows(),
            self.number_columns(),
            self.matrix.nnz(),
            self.pricing.kind(),
            self.pricing.mode()
        );
        if let Err(trouble) = self.prepare_solve() {
            warn!("could not set up the initial basis: {}", trouble);
            self.state = SimplexState::NumericalFailure;
        } else {
            self.after_factorization_checks();
        }

        while self.state == SimplexState::Iterating {
            if self.force_refactorization
                || self.factorization.pivots_since_factorization()
                    >= self.config.refactorization_interval
            {
                self.force_refactorization = false;
                if let Err(trouble) = self.refactorize() {
                    let culprit = self.last_entering;
                    self.handle_disaster(trouble, culprit);
                    continue;
                }
                if !self.after_factorization_checks() {
                    break;
                }
            }

            if self.iterations >= self.config.maximum_iterations {
                self.stop_at_limit(LimitReason::Iterations);
                break;
            }
            if self.config.log_frequency > 0 && self.iterations % self.config.log_frequency == 0
            {
                self.log_progress();
            }

            match self.iterate() {
                IterationStep::Pivoted { flip_change } => {
                    self.recovery.record_success();
                    self.check_progress(flip_change);
                }
                IterationStep::NoLeavingRow => self.at_apparent_optimum(),
                IterationStep::NoEnteringColumn { row, direction } => {
                    self.no_entering_column(row, direction)
                }
                IterationStep::Trouble { trouble, culprit } => {
                    self.handle_disaster(trouble, Some(culprit))
                }
            }
        }

        self.finish()
    }

    /// One dual simplex iteration: price, compute the pivot row, run the ratio test and update
    /// the basis, primal values, duals and weights.
    fn iterate(&mut self) -> IterationStep {
        let pool = Rc::clone(&self.pool);
        let number_rows = self.number_rows();
        let number_total = self.variables.number_total();
        let primal_tolerance = self.config.primal_tolerance;

        let widened_tolerance = self.widened_primal_tolerance();
        let factorization_ratio =
            self.factorization.number_elements() as f64 / number_rows.max(1) as f64;
        let Some(row) = self.pricing.choose_leaving_row(
            &self.variables,
            &self.pivot_variable,
            &self.runner,
            primal_tolerance,
            widened_tolerance,
            factorization_ratio,
        ) else {
            return IterationStep::NoLeavingRow;
        };

        let leaving = self.pivot_variable[row];
        let (lower, upper) = (self.variables.lower[leaving], self.variables.upper[leaving]);
        let bound_out = if self.variables.solution[leaving] < lower {
            lower
        } else {
            upper
        };
        let mut dual_out = self.variables.solution[leaving] - bound_out;
        let direction = dual_out.signum();

        // pivot row of the tableau
        let mut rho = pool.checkout(number_rows);
        rho.set_value(row, 1.0);
        self.factorization.update_column_transpose(&mut rho);
        let rho_sq_norm = rho.sq_norm();
        let mut tableau_row = pool.checkout(number_total);
        self.matrix.transpose_times(&rho, &mut tableau_row);

        let input = RatioTestInput {
            row: &tableau_row,
            dual_out,
            acceptable_pivot: self.acceptable_pivot(),
            dual_tolerance: self.config.dual_tolerance,
            zero_tolerance: self.config.zero_tolerance,
            minimum_theta: self.config.minimum_theta,
            cost_modification: self.cost_modification,
            leaving_has_range: upper > lower,
            objective_scale: self.variables.working_objective(),
        };
        let choice = match choose_entering(&input, &self.variables, &self.runner) {
            RatioTestOutcome::Pivot(choice) => choice,
            RatioTestOutcome::NoCandidate => {
                return IterationStep::NoEnteringColumn { row, direction };
            }
            RatioTestOutcome::PivotTooSmall { largest_pivot } => {
                debug!(
                    "largest pivot {:e} on row {} is too small",
                    largest_pivot, row
                );
                return IterationStep::Trouble {
                    trouble: SimplexTrouble::NumericalInstability,
                    culprit: leaving,
                };
            }
        };
        let entering = choice.entering;

        // entering column, with τ = B⁻¹ρ for steepest edge
        let mut column = pool.checkout(number_rows);
        self.matrix.add_variable_column(&mut column, entering, 1.0);
        let mut tau = pool.checkout(number_rows);
        if self.pricing.needs_tau() {
            tau.copy_from(&rho);
            self.factorization.update_two_columns_ft(&mut column, &mut tau);
        } else {
            self.factorization.update_column(&mut column);
        }

        let alpha = column.get(row);
        if alpha == 0.0
            || (alpha - choice.alpha).abs() > self.config.consistency_tolerance * (1.0 + alpha.abs())
        {
            debug!(
                "pivot mismatch on row {}: {:e} by column, {:e} by row",
                row, alpha, choice.alpha
            );
            return IterationStep::Trouble {
                trouble: SimplexTrouble::NumericalInstability,
                culprit: entering,
            };
        }

        if !self
            .factorization
            .accepts_replacement(row, &column, choice.alpha)
        {
            debug!("update of row {} with pivot {:e} would be rejected", row, alpha);
            return IterationStep::Trouble {
                trouble: SimplexTrouble::NumericalInstability,
                culprit: entering,
            };
        }

        for &(variable, change) in &choice.cost_changes {
            self.variables.modify_cost(variable, change);
        }

        let mut flip_change = 0.0;
        if !choice.flips.is_empty() {
            debug_assert!(
                choice.flip_budget <= dual_out.abs() + 1.0e-9 * (1.0 + dual_out.abs()),
                "flips cover {:e} of an infeasibility of {:e}",
                choice.flip_budget,
                dual_out.abs()
            );
            let mut work = pool.checkout(number_rows);
            let summary = apply_bound_flips(
                &choice.flips,
                &self.matrix,
                &mut self.factorization,
                &mut self.variables,
                &self.pivot_variable,
                &mut self.pricing,
                primal_tolerance,
                &mut work,
            );
            flip_change = summary.objective_change;
            self.flip_objective_change += flip_change;
            dual_out = self.variables.solution[leaving] - bound_out;
        }

        if let Err(error) = self.factorization.replace_column(row, &column, choice.alpha) {
            debug!("{}", error);
            return IterationStep::Trouble {
                trouble: SimplexTrouble::NumericalInstability,
                culprit: entering,
            };
        }

        // primal step
        let theta_primal = dual_out / alpha;
        for (position, value) in column.iter() {
            let basic = self.pivot_variable[position];
            self.variables.solution[basic] -= theta_primal * value;
        }
        self.variables.solution[entering] += theta_primal;

        // dual step
        let theta_dual = choice.theta_dual;
        for (variable, value) in tableau_row.iter() {
            if !self.variables.status[variable].is_basic() {
                self.variables.dj[variable] -= theta_dual * value;
            }
        }
        self.variables.dj[entering] = 0.0;
        self.variables.dj[leaving] = -theta_dual;

        self.pricing
            .update_weights(row, alpha, &column, rho_sq_norm, &tau, &self.runner);

        // basis exchange
        self.pivot_variable[row] = entering;
        self.variables.status[entering] = VariableStatus::Basic;
        self.fake_bounds.reset(&mut self.variables, entering);
        self.variables.status[leaving] = if lower == upper {
            VariableStatus::Fixed
        } else if bound_out == lower {
            VariableStatus::AtLowerBound
        } else {
            VariableStatus::AtUpperBound
        };
        self.variables.solution[leaving] = bound_out;

        for &position in column.indices() {
            let basic = self.pivot_variable[position];
            self.pricing
                .update_infeasibility(position, &self.variables, basic, primal_tolerance);
        }
        self.pricing
            .update_infeasibility(row, &self.variables, entering, primal_tolerance);
        self.pricing.set_last_pivot_row(Some(row));

        self.last_entering = Some(entering);
        self.iterations += 1;
        trace!(
            "iteration {}: {} leaves row {}, {} enters, primal step {:e}, dual step {:e}, {} flips ({:e})",
            self.iterations,
            leaving,
            row,
            entering,
            theta_primal,
            theta_dual,
            choice.flips.len(),
            flip_change
        );
        IterationStep::Pivoted { flip_change }
    }

    /// No basic variable is infeasible: remove fake bounds and cost shifts, and only declare
    /// optimality on a fresh factorization.
    fn at_apparent_optimum(&mut self) {
        let primal_tolerance = self.config.primal_tolerance;
        let dual_tolerance = self.config.dual_tolerance;

        if self.fake_bounds.number_fake() > 0 {
            match self.fake_bounds.check(
                &mut self.variables,
                self.config.dual_bound_growth,
                self.config.maximum_dual_bound,
                primal_tolerance,
                dual_tolerance,
            ) {
                BoundCheck::Clean { flipped: 0 } => {}
                BoundCheck::Clean { .. } | BoundCheck::Widened { .. } => {
                    self.recompute_primal_state();
                    return;
                }
                BoundCheck::CeilingReached {
                    variable,
                    direction,
                } => {
                    debug!(
                        "variable {} still at a fake bound in direction {}",
                        variable, direction
                    );
                    // fake bounds lie inside the true ones, so the point is feasible
                    self.resolve_ceiling(true);
                    return;
                }
            }
        }

        if self.variables.costs_modified() {
            debug!("restoring the true costs");
            self.variables.restore_costs();
            self.compute_duals();
            self.cost_modification = false;
            let (number_infeasible, sum) = self.variables.sum_dual_infeasibilities(dual_tolerance);
            if number_infeasible > 0 {
                debug!(
                    "{} dual infeasibilities ({:e}) after restoring costs",
                    number_infeasible, sum
                );
                self.fake_bounds
                    .initialize(&mut self.variables, dual_tolerance);
                self.recompute_primal_state();
                return;
            }
        }

        if self.variables.number_flagged() > 0 {
            let threshold = primal_tolerance * primal_tolerance;
            let infeasible = self
                .pricing
                .infeasibilities()
                .iter()
                .any(|(_, value)| value > threshold);
            if self.flag_clears < self.config.maximum_flag_clears {
                self.flag_clears += 1;
                debug!(
                    "clearing {} flagged variables",
                    self.variables.number_flagged()
                );
                self.variables.clear_flags();
                if infeasible {
                    return;
                }
            } else if infeasible {
                warn!("flagged variables remain infeasible");
                self.state = SimplexState::NumericalFailure;
                return;
            }
        }

        if self.factorization.pivots_since_factorization() > 0 {
            self.force_refactorization = true;
            return;
        }

        self.state = SimplexState::Optimal;
    }

    /// The ratio test found no entering variable for the row of `direction`.
    fn no_entering_column(&mut self, row: usize, direction: f64) {
        if self.fake_bounds.number_fake() > 0 {
            match self.fake_bounds.check(
                &mut self.variables,
                self.config.dual_bound_growth,
                self.config.maximum_dual_bound,
                self.config.primal_tolerance,
                self.config.dual_tolerance,
            ) {
                BoundCheck::Clean { .. } | BoundCheck::Widened { .. } => {
                    self.recompute_primal_state();
                    return;
                }
                BoundCheck::CeilingReached { variable, .. } => {
                    self.compute_primal();
                    match self.infeasibility_proof(row) {
                        Some(direction) => self.declare_infeasible(row, direction),
                        None => {
                            debug!(
                                "variable {} still at a fake bound, row {} proves nothing",
                                variable, row
                            );
                            self.resolve_ceiling(false);
                        }
                    }
                    return;
                }
            }
        }

        if self.variables.number_flagged() > 0 && self.flag_clears < self.config.maximum_flag_clears
        {
            self.flag_clears += 1;
            debug!(
                "no entering variable, clearing {} flagged variables",
                self.variables.number_flagged()
            );
            self.variables.clear_flags();
            return;
        }

        self.declare_infeasible(row, direction);
    }

    fn declare_infeasible(&mut self, row: usize, direction: f64) {
        let pool = Rc::clone(&self.pool);
        let mut rho = pool.checkout(self.number_rows());
        rho.set_value(row, 1.0);
        self.factorization.update_column_transpose(&mut rho);
        info!(
            "row of basic variable {} cannot become feasible, problem is infeasible",
            self.pivot_variable[row]
        );
        self.ray = Some(Ray::Dual(
            rho.dense().iter().map(|value| direction * value).collect(),
        ));
        self.state = SimplexState::Infeasible;
    }

    /// Whether the basic variable of `row` stays infeasible with every non-basic variable free
    /// to move anywhere within its true bounds. Returns the side it violates.
    ///
    /// `x_p = -Σ αⱼ xⱼ` over the non-basic variables, with `α` the tableau row.
    fn infeasibility_proof(&mut self, row: usize) -> Option<f64> {
        let variables = &self.variables;
        let leaving = self.pivot_variable[row];
        let value = variables.solution[leaving];
        let (lower, upper) = (variables.lower_saved[leaving], variables.upper_saved[leaving]);
        let (infeasibility, direction) = if value > upper {
            (value - upper, 1.0)
        } else if value < lower {
            (lower - value, -1.0)
        } else {
            return None;
        };

        let pool = Rc::clone(&self.pool);
        let mut rho = pool.checkout(self.number_rows());
        rho.set_value(row, 1.0);
        self.factorization.update_column_transpose(&mut rho);
        let mut tableau_row = pool.checkout(self.variables.number_total());
        self.matrix.transpose_times(&rho, &mut tableau_row);

        let variables = &self.variables;
        let mut reach = 0.0;
        for (variable, alpha) in tableau_row.iter() {
            if variables.status[variable].is_basic() || alpha.abs() <= self.config.zero_tolerance {
                continue;
            }
            let slope = direction * alpha;
            let target = if slope > 0.0 {
                variables.upper_saved[variable]
            } else {
                variables.lower_saved[variable]
            };
            reach += slope * (target - variables.solution[variable]);
            if !reach.is_finite() {
                return None;
            }
        }
        (reach < infeasibility - self.config.primal_tolerance).then_some(direction)
    }

    /// A variable stays at a fake bound although the window reached the ceiling. The problem is
    /// unbounded only if it is feasible and has an improving recession direction; auxiliary
    /// solves under the true bounds settle both.
    fn resolve_ceiling(&mut self, known_feasible: bool) {
        if self.nested {
            warn!("dual bound ceiling reached in an auxiliary solve");
            self.state = SimplexState::NumericalFailure;
            return;
        }

        if !known_feasible {
            let mut feasibility = match self.auxiliary(false) {
                Ok(solver) => solver,
                Err(error) => {
                    warn!("could not set up the feasibility problem: {}", error);
                    self.state = SimplexState::NumericalFailure;
                    return;
                }
            };
            match feasibility.solve() {
                SolveStatus::Optimal => debug!("the true bounds admit a feasible point"),
                SolveStatus::Infeasible => {
                    info!("no point satisfies the true bounds, problem is infeasible");
                    self.ray = feasibility.ray.take();
                    self.state = SimplexState::Infeasible;
                    return;
                }
                status => {
                    self.end_auxiliary("feasibility", status, feasibility.limit_reason());
                    return;
                }
            }
        }

        let mut recession = match self.auxiliary(true) {
            Ok(solver) => solver,
            Err(error) => {
                warn!("could not set up the recession problem: {}", error);
                self.state = SimplexState::NumericalFailure;
                return;
            }
        };
        let status = recession.solve();
        if status != SolveStatus::Optimal {
            self.end_auxiliary("recession", status, recession.limit_reason());
            return;
        }
        let ray = recession.column_values().to_vec();
        if self.is_improving_direction(&ray) {
            info!("objective decreases without limit, problem is unbounded");
            self.ray = Some(Ray::Primal(ray));
            self.state = SimplexState::Unbounded;
        } else {
            warn!("dual bound ceiling reached but no improving recession direction exists");
            self.state = SimplexState::NumericalFailure;
        }
    }

    fn end_auxiliary(&mut self, name: &str, status: SolveStatus, reason: Option<LimitReason>) {
        match reason {
            Some(reason) => self.stop_at_limit(reason),
            None => {
                warn!("{} problem ended {}", name, status);
                self.state = SimplexState::NumericalFailure;
            }
        }
    }

    /// A fresh solver over the same matrix and true bounds. The feasibility problem has zero
    /// costs. The recession problem keeps the costs and maps every bound to its recession cone:
    /// finite sides become `0`, infinite column sides `±1` and infinite row sides stay infinite.
    fn auxiliary(&self, recession: bool) -> Result<DualSimplex<LuFactorization>> {
        let number_columns = self.number_columns();
        let number_rows = self.number_rows();
        let variables = &self.variables;
        let bounds = |variable: usize, unit: f64| {
            let (lower, upper) = (variables.lower_saved[variable], variables.upper_saved[variable]);
            if !recession {
                (lower, upper)
            } else {
                (
                    if lower.is_finite() { 0.0 } else { -unit },
                    if upper.is_finite() { 0.0 } else { unit },
                )
            }
        };
        let (column_lower, column_upper): (Vec<f64>, Vec<f64>) =
            (0..number_columns).map(|j| bounds(j, 1.0)).unzip();
        let (row_lower, row_upper): (Vec<f64>, Vec<f64>) = (0..number_rows)
            .map(|i| bounds(number_columns + i, f64::INFINITY))
            .unzip();
        let cost = if recession {
            variables.cost_saved[..number_columns].to_vec()
        } else {
            vec![0.0; number_columns]
        };

        let mut solver = DualSimplex::<LuFactorization>::new(
            self.matrix.clone(),
            &cost,
            &column_lower,
            &column_upper,
            &row_lower,
            &row_upper,
            self.config.clone(),
        )?;
        solver.nested = true;
        Ok(solver)
    }

    /// `cᵀr < 0`, with `r` and `Ar` in the recession cones of the column and row bounds.
    fn is_improving_direction(&self, ray: &[f64]) -> bool {
        let tolerance = self.config.primal_tolerance;
        let variables = &self.variables;
        let number_columns = self.number_columns();

        let slope: f64 = ray
            .iter()
            .zip(&variables.cost_saved)
            .map(|(r, c)| r * c)
            .sum();
        if slope >= -self.config.dual_tolerance {
            debug!("recession direction has slope {:e}", slope);
            return false;
        }

        let mut activities = vec![0.0; self.number_rows()];
        for (j, &value) in ray.iter().enumerate() {
            for (row, element) in self.matrix.col_iter(j) {
                activities[row] += element * value;
            }
        }
        let in_cone = |variable: usize, value: f64| {
            (variables.lower_saved[variable].is_infinite() || value >= -tolerance)
                && (variables.upper_saved[variable].is_infinite() || value <= tolerance)
        };
        ray.iter().enumerate().all(|(j, &value)| in_cone(j, value))
            && activities
                .iter()
                .enumerate()
                .all(|(i, &value)| in_cone(number_columns + i, value))
    }

    fn handle_disaster(&mut self, trouble: SimplexTrouble, culprit: Option<usize>) {
        let pivots = self.factorization.pivots_since_factorization();
        let action = self
            .recovery
            .record_disaster(trouble, self.iterations, pivots);
        self.refresh_weights = true;
        match action {
            RecoveryAction::Refactorize => self.force_refactorization = true,
            RecoveryAction::Flag => {
                self.flag(culprit);
                self.escalate_pivot_tolerance();
                self.force_refactorization = true;
            }
            RecoveryAction::RestoreAndFlag => {
                self.recovery.restore(
                    &mut self.variables,
                    &mut self.pivot_variable,
                    &mut self.fake_bounds,
                    &mut self.pricing,
                );
                self.flag(culprit);
                self.escalate_pivot_tolerance();
                if let Err(trouble) = self.factorize_basis(false) {
                    warn!("the restored basis could not be factorized: {}", trouble);
                    self.state = SimplexState::NumericalFailure;
                    return;
                }
                self.after_factorization(true);
                self.after_factorization_checks();
            }
            RecoveryAction::Fail => self.state = SimplexState::NumericalFailure,
        }
    }

    fn flag(&mut self, culprit: Option<usize>) {
        if let Some(variable) = culprit {
            debug!("flagging variable {}", variable);
            self.variables.flagged[variable] = true;
        }
    }

    fn escalate_pivot_tolerance(&mut self) {
        let tolerance = self
            .recovery
            .escalate_pivot_tolerance(self.factorization.pivot_tolerance());
        self.factorization.set_pivot_tolerance(tolerance);
    }

    /// Stall detection on the working objective, which a dual simplex step never decreases.
    /// A step whose bound flips moved the objective counts as progress too.
    fn check_progress(&mut self, flip_change: f64) {
        let objective = self.variables.working_objective();
        let tolerance = 1.0e-12 * (1.0 + objective.abs());
        if objective > self.best_objective + tolerance || flip_change > tolerance {
            self.best_objective = self.best_objective.max(objective);
            self.last_progress = self.iterations;
            return;
        }
        if self.iterations - self.last_progress <= self.config.stall_window {
            return;
        }

        self.recovery.record_trouble(self.iterations);
        self.last_progress = self.iterations;
        debug!(
            "{}: no progress over {} iterations",
            SimplexTrouble::Stalling,
            self.config.stall_window
        );
        if self.fake_bounds.number_fake() > 0 {
            let new_bound = self.fake_bounds.current_dual_bound() * self.config.dual_bound_growth;
            if new_bound <= self.config.maximum_dual_bound {
                self.fake_bounds.widen(&mut self.variables, new_bound);
                self.recompute_primal_state();
                return;
            }
        }
        if self.cost_modification && self.perturbations < self.config.maximum_perturbations {
            self.perturb_costs();
        }
    }

    /// Shifts the costs of the non-basic variables at a bound away from zero reduced cost,
    /// keeping every reduced cost on its feasible side.
    fn perturb_costs(&mut self) {
        self.perturbations += 1;
        let mut number_changed = 0;
        for j in 0..self.variables.number_total() {
            let sign = match self.variables.status[j] {
                VariableStatus::AtLowerBound => 1.0,
                VariableStatus::AtUpperBound => -1.0,
                _ => continue,
            };
            let random = (self.rng.next_u64() >> 11) as f64 / (1u64 << 53) as f64;
            let change = sign
                * self.config.perturbation
                * (1.0 + self.variables.cost_saved[j].abs())
                * (0.5 + 0.5 * random);
            self.variables.modify_cost(j, change);
            number_changed += 1;
        }
        debug!(
            "perturbation {}: {} costs shifted",
            self.perturbations, number_changed
        );
    }

    fn acceptable_pivot(&self) -> f64 {
        let base = self.config.acceptable_pivot;
        match self.factorization.pivots_since_factorization() {
            0 => 0.1 * base,
            1..=5 => base,
            6..=10 => 1.0e2 * base,
            _ => 1.0e3 * base,
        }
    }

    /// Pricing tolerance loosened by the primal error seen at the last refactorization, more so
    /// right after trouble.
    fn widened_primal_tolerance(&self) -> f64 {
        let mut tolerance =
            self.config.primal_tolerance + self.largest_primal_error.min(1.0e-3);
        if self.recovery.recently_troubled(self.iterations, 10) {
            let ratio = (self.largest_dual_error / self.largest_primal_error.max(1.0e-12))
                .min(10.0);
            tolerance *= 1.0 + ratio;
        }
        tolerance
    }

    /// Sets up a solve from the current basis: true bounds and costs, fresh factorization, dual
    /// feasibility through fake bounds.
    fn prepare_solve(&mut self) -> Result<(), SimplexTrouble> {
        self.start = Instant::now();
        self.state = SimplexState::Iterating;
        self.limit_reason = None;
        self.ray = None;
        self.iterations = 0;
        self.cost_modification = self.config.cost_modification;
        self.force_refactorization = false;
        self.refresh_weights = false;
        self.last_entering = None;
        self.flag_clears = 0;
        self.perturbations = 0;
        self.flip_objective_change = 0.0;
        self.best_objective = f64::NEG_INFINITY;
        self.last_progress = 0;
        self.largest_primal_error = 0.0;
        self.largest_dual_error = 0.0;

        let number_total = self.variables.number_total();
        self.fake_bounds =
            FakeBoundManager::new(number_total, self.config.dual_bound_for(number_total));
        for j in 0..number_total {
            self.variables.restore_bounds(j);
        }
        self.variables.restore_costs();
        self.variables.clear_flags();
        self.variables.place_nonbasic();
        self.recovery.reset();
        self.factorization
            .set_pivot_tolerance(self.config.initial_pivot_tolerance);

        if self.solves > 0 && self.config.persistence == PricingPersistence::Normal {
            self.pricing.invalidate_weights();
        }

        self.factorize_basis(true)?;
        self.compute_duals();
        self.fake_bounds
            .initialize(&mut self.variables, self.config.dual_tolerance);
        self.after_factorization(false);
        Ok(())
    }

    /// Factorizes the current basis. With `repair`, a singular basis gets the row variable of an
    /// uncovered row in place of each dependent column.
    fn factorize_basis(&mut self, repair: bool) -> Result<(), SimplexTrouble> {
        let number_columns = self.number_columns();
        for _ in 0..=self.number_rows() {
            match self
                .factorization
                .factorize(&self.matrix, &self.pivot_variable)
            {
                Ok(()) => {
                    self.factorized = true;
                    return Ok(());
                }
                Err(FactorizationError::Singular { position, row }) => {
                    self.factorized = false;
                    let replacement = number_columns + row;
                    if !repair || self.variables.status[replacement].is_basic() {
                        return Err(SimplexTrouble::FactorizationSingular);
                    }
                    let dependent = self.pivot_variable[position];
                    warn!(
                        "singular basis: variable {} replaced by the row variable of row {}",
                        dependent, row
                    );
                    self.variables.status[dependent] = self
                        .variables
                        .settle_status(dependent, VariableStatus::AtLowerBound);
                    self.variables.move_to_bound(dependent);
                    self.variables.status[replacement] = VariableStatus::Basic;
                    self.pivot_variable[position] = replacement;
                }
                Err(error) => {
                    self.factorized = false;
                    debug!("{}", error);
                    return Err(SimplexTrouble::NumericalInstability);
                }
            }
        }
        Err(SimplexTrouble::FactorizationSingular)
    }

    fn refactorize(&mut self) -> Result<(), SimplexTrouble> {
        trace!(
            "refactorizing after {} pivots",
            self.factorization.pivots_since_factorization()
        );
        self.factorize_basis(false)?;
        self.after_factorization(true);
        Ok(())
    }

    /// Recomputes everything that depends on the factors, restores dual feasibility, refreshes
    /// the weights where needed and records the state as the last good one.
    fn after_factorization(&mut self, measure_errors: bool) {
        let number_rows = self.number_rows();
        if measure_errors {
            let old_primal: Vec<f64> = self
                .pivot_variable
                .iter()
                .map(|&basic| self.variables.solution[basic])
                .collect();
            let old_dj = self.variables.dj.clone();
            self.compute_primal();
            self.compute_duals();
            self.largest_primal_error = self
                .pivot_variable
                .iter()
                .zip(&old_primal)
                .map(|(&basic, old)| (self.variables.solution[basic] - old).abs())
                .fold(0.0, f64::max);
            self.largest_dual_error = self
                .variables
                .dj
                .iter()
                .zip(&old_dj)
                .map(|(new, old)| (new - old).abs())
                .fold(0.0, f64::max);
            if self.largest_primal_error > 1.0e-6 || self.largest_dual_error > 1.0e-6 {
                debug!(
                    "errors at refactorization: primal {:e}, dual {:e}",
                    self.largest_primal_error, self.largest_dual_error
                );
            }
        } else {
            self.compute_primal();
            self.compute_duals();
        }

        self.restore_dual_feasibility();
        self.recompute_infeasibilities();

        let switched = self
            .pricing
            .check_switch(self.factorization.number_elements(), number_rows);
        if switched
            || self.refresh_weights
            || !self.pricing.weights_valid()
            || self.config.weight_refresh == WeightRefresh::EveryFactorization
        {
            let pool = Rc::clone(&self.pool);
            let mut rho = pool.checkout(number_rows);
            self.pricing
                .initialize_weights(&mut self.factorization, &mut rho);
            self.refresh_weights = false;
        }

        self.recovery.take_snapshot(
            self.iterations,
            &self.variables,
            &self.pivot_variable,
            &self.fake_bounds,
            &self.pricing,
        );
    }

    /// Event hook and time limit, once per factorization. Returns whether to keep iterating.
    fn after_factorization_checks(&mut self) -> bool {
        if self.state != SimplexState::Iterating {
            return false;
        }
        if self.fire_event() == EventAction::Stop {
            info!("stopped by the event handler");
            self.stop_at_limit(LimitReason::EventHandler);
            return false;
        }
        if let Some(seconds) = self.config.maximum_seconds {
            if self.start.elapsed().as_secs_f64() >= seconds {
                self.stop_at_limit(LimitReason::Time);
                return false;
            }
        }
        true
    }

    fn fire_event(&mut self) -> EventAction {
        if self.event_handler.is_none() {
            return EventAction::Continue;
        }
        let (number_primal_infeasibilities, sum_primal_infeasibilities) = self
            .variables
            .sum_primal_infeasibilities(self.config.primal_tolerance);
        let event = FactorizationEvent {
            iteration: self.iterations,
            objective: self.variables.working_objective(),
            sum_primal_infeasibilities,
            number_primal_infeasibilities,
            number_fake_bounds: self.fake_bounds.number_fake(),
            elapsed_seconds: self.start.elapsed().as_secs_f64(),
        };
        match self.event_handler.as_mut() {
            Some(handler) => handler.after_factorization(&event),
            None => EventAction::Continue,
        }
    }

    fn stop_at_limit(&mut self, reason: LimitReason) {
        info!(
            "{} after {} iterations ({})",
            SimplexTrouble::IterationOrTimeLimit,
            self.iterations,
            reason
        );
        self.limit_reason = Some(reason);
        self.state = SimplexState::IterationLimit;
    }

    /// Non-basic variables whose reduced cost has the wrong sign are moved to the other bound,
    /// or get their cost shifted when that bound is infinite.
    fn restore_dual_feasibility(&mut self) {
        let tolerance = self.config.dual_tolerance;
        let mut number_flipped = 0;
        let mut number_shifted = 0;
        for j in 0..self.variables.number_total() {
            let dj = self.variables.dj[j];
            let (flip_to, infeasible) = match self.variables.status[j] {
                VariableStatus::AtLowerBound => (VariableStatus::AtUpperBound, dj < -tolerance),
                VariableStatus::AtUpperBound => (VariableStatus::AtLowerBound, dj > tolerance),
                VariableStatus::Free | VariableStatus::SuperBasic => {
                    (VariableStatus::SuperBasic, dj.abs() > tolerance)
                }
                VariableStatus::Basic | VariableStatus::Fixed => continue,
            };
            if !infeasible {
                continue;
            }
            let target = match flip_to {
                VariableStatus::AtUpperBound => self.variables.upper[j],
                VariableStatus::AtLowerBound => self.variables.lower[j],
                _ => f64::INFINITY,
            };
            if target.is_finite() {
                self.variables.status[j] = flip_to;
                self.variables.solution[j] = target;
                number_flipped += 1;
            } else if self.cost_modification {
                self.variables.modify_cost(j, -dj);
                number_shifted += 1;
            }
        }
        if number_flipped > 0 {
            self.compute_primal();
        }
        if number_flipped + number_shifted > 0 {
            debug!(
                "dual feasibility restored: {} flips, {} cost shifts",
                number_flipped, number_shifted
            );
        }
    }

    /// `x_B = -B⁻¹ Σ_N aⱼ xⱼ`
    fn compute_primal(&mut self) {
        let pool = Rc::clone(&self.pool);
        let mut rhs = pool.checkout(self.number_rows());
        for j in 0..self.variables.number_total() {
            let value = self.variables.solution[j];
            if value != 0.0 && !self.variables.status[j].is_basic() {
                self.matrix.add_variable_column(&mut rhs, j, value);
            }
        }
        self.factorization.update_column(&mut rhs);
        for (position, &basic) in self.pivot_variable.iter().enumerate() {
            let value = rhs.get(position);
            self.variables.solution[basic] = if value == 0.0 { 0.0 } else { -value };
        }
    }

    /// `y = B⁻ᵀc_B`, `dⱼ = cⱼ - yᵀaⱼ`.
    fn compute_duals(&mut self) {
        let pool = Rc::clone(&self.pool);
        let mut prices = pool.checkout(self.number_rows());
        for (position, &basic) in self.pivot_variable.iter().enumerate() {
            let cost = self.variables.cost[basic];
            if cost != 0.0 {
                prices.set_value(position, cost);
            }
        }
        self.factorization.update_column_transpose(&mut prices);
        let y = prices.dense();
        for j in 0..self.variables.number_total() {
            self.variables.dj[j] = if self.variables.status[j].is_basic() {
                0.0
            } else {
                self.variables.cost[j] - self.matrix.dot_variable_column(j, y)
            };
        }
    }

    pub(crate) fn recompute_infeasibilities(&mut self) {
        self.pricing.recompute_infeasibilities(
            &self.variables,
            &self.pivot_variable,
            self.config.primal_tolerance,
        );
    }

    fn recompute_primal_state(&mut self) {
        self.compute_primal();
        self.recompute_infeasibilities();
    }

    fn log_progress(&self) {
        let (number, sum) = self
            .variables
            .sum_primal_infeasibilities(self.config.primal_tolerance);
        debug!(
            "iteration {}: objective {:e}, primal infeasibility {:e} ({}), {} fake bounds",
            self.iterations,
            self.variables.working_objective(),
            sum,
            number,
            self.fake_bounds.number_fake()
        );
    }

    /// Removes what is left of fake bounds and cost shifts and reports the result.
    fn finish(&mut self) -> SolveStatus {
        let had_fakes = self.fake_bounds.number_fake() > 0;
        self.fake_bounds.reset_all(&mut self.variables);
        for j in 0..self.variables.number_total() {
            if !self.variables.status[j].is_basic() && self.variables.at_infinite_bound(j) {
                self.variables.park(j);
            }
        }
        let costs_modified = self.variables.costs_modified();
        self.variables.restore_costs();
        if self.factorized {
            if had_fakes {
                self.compute_primal();
            }
            if costs_modified {
                self.compute_duals();
            }
        }
        self.solves += 1;

        let status = match self.state {
            SimplexState::Optimal => SolveStatus::Optimal,
            SimplexState::Infeasible => SolveStatus::Infeasible,
            SimplexState::Unbounded => SolveStatus::Unbounded,
            SimplexState::IterationLimit => SolveStatus::IterationLimit,
            SimplexState::NumericalFailure | SimplexState::Iterating => {
                SolveStatus::NumericalFailure
            }
        };
        info!(
            "dual simplex {} after {} iterations, objective {:e}, {} widenings, {} disasters, flips moved the objective by {:e}",
            status,
            self.iterations,
            self.variables.objective(),
            self.fake_bounds.widenings(),
            self.recovery.total_disasters(),
            self.flip_objective_change
        );
        status
    }

    pub fn state(&self) -> SimplexState {
        self.state
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Objective under the true costs.
    pub fn objective_value(&self) -> f64 {
        self.variables.objective()
    }

    pub fn column_values(&self) -> &[f64] {
        &self.variables.solution[..self.number_columns()]
    }

    /// `Ax`, one value per row.
    pub fn row_activities(&self) -> &[f64] {
        &self.variables.solution[self.number_columns()..]
    }

    pub fn row_duals(&self) -> &[f64] {
        &self.variables.dj[self.number_columns()..]
    }

    pub fn reduced_costs(&self) -> &[f64] {
        &self.variables.dj[..self.number_columns()]
    }

    /// Status of every variable, structural columns first; can seed a later solve.
    pub fn variable_status(&self) -> &[VariableStatus] {
        &self.variables.status
    }

    pub fn ray(&self) -> Option<&Ray> {
        self.ray.as_ref()
    }

    pub fn limit_reason(&self) -> Option<LimitReason> {
        self.limit_reason
    }

    /// Number of times the fake-bound window was widened in the last solve.
    pub fn widenings(&self) -> usize {
        self.fake_bounds.widenings()
    }

    pub fn pricing(&self) -> &PricingState {
        &self.pricing
    }
}

impl<F: Factorization> Debug for DualSimplex<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualSimplex")
            .field("number_rows", &self.number_rows())
            .field("number_columns", &self.number_columns())
            .field("state", &self.state)
            .field("iterations", &self.iterations)
            .field("factorization", &self.factorization)
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}

fn check_bounds(kind: &str, index: usize, lower: f64, upper: f64) -> Result<()> {
    if lower.is_nan() || upper.is_nan() {
        return Err(anyhow!("{} {} has a NaN bound", kind, index));
    }
    if lower > upper {
        return Err(anyhow!(
            "{} {} has lower bound {} above upper bound {}",
            kind,
            index,
            lower,
            upper
        ));
    }
    if lower == f64::INFINITY || upper == f64::NEG_INFINITY {
        return Err(anyhow!(
            "{} {} has bounds [{}, {}] that no value satisfies",
            kind,
            index,
            lower,
            upper
        ));
    }
    Ok(())
}
