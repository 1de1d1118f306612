use log::trace;

use crate::{
    math::{column_matrix::ColumnMatrix, sparse_indexed_vector::SparseIndexedVector},
    optimisation_algorithms::{
        dual_simplex_factorization::Factorization,
        dual_simplex_pricing::PricingState,
        dual_simplex_variables::{VariableSet, VariableStatus},
    },
};

/// What a batch of bound flips did.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FlipSummary {
    pub number_flipped: usize,
    /// Change of the working objective `Σ cⱼ Δxⱼ` over the basic and flipped variables.
    pub objective_change: f64,
}

/// Moves every variable of `flips` to its opposite working bound and carries the change over
/// to the basic variables with one solve: `x_B -= B⁻¹ Σ aⱼ Δxⱼ`. The infeasibility entries of
/// the touched basis positions are refreshed.
///
/// `work` must be a cleared vector of length `number_rows`; it holds the update column on
/// return.
#[allow(clippy::too_many_arguments)]
pub fn apply_bound_flips<F: Factorization + ?Sized>(
    flips: &[usize],
    matrix: &ColumnMatrix,
    factorization: &mut F,
    variables: &mut VariableSet,
    pivot_variable: &[usize],
    pricing: &mut PricingState,
    primal_tolerance: f64,
    work: &mut SparseIndexedVector,
) -> FlipSummary {
    let mut summary = FlipSummary::default();
    if flips.is_empty() {
        return summary;
    }
    work.clear_and_resize(matrix.number_rows());

    for &variable in flips {
        let (lower, upper) = (variables.lower[variable], variables.upper[variable]);
        let (status, target) = match variables.status[variable] {
            VariableStatus::AtLowerBound => (VariableStatus::AtUpperBound, upper),
            VariableStatus::AtUpperBound => (VariableStatus::AtLowerBound, lower),
            _ => continue,
        };
        let movement = target - variables.solution[variable];
        variables.status[variable] = status;
        variables.solution[variable] = target;
        matrix.add_variable_column(work, variable, movement);
        summary.objective_change += variables.cost[variable] * movement;
        summary.number_flipped += 1;
    }

    factorization.update_column(work);
    for (row, change) in work.iter() {
        let basic = pivot_variable[row];
        variables.solution[basic] -= change;
        summary.objective_change -= variables.cost[basic] * change;
        pricing.update_infeasibility(row, variables, basic, primal_tolerance);
    }
    trace!(
        "{} bound flips, objective change {:e}",
        summary.number_flipped, summary.objective_change
    );
    summary
}
