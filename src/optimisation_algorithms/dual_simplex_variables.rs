use itertools::izip;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Where a variable sits relative to the basis and its bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VariableStatus {
    Basic,
    AtLowerBound,
    AtUpperBound,
    /// Non-basic without finite bounds, value kept where it is.
    Free,
    /// Non-basic strictly between its bounds.
    SuperBasic,
    /// Non-basic with equal bounds.
    Fixed,
}

impl VariableStatus {
    pub fn is_basic(self) -> bool {
        self == VariableStatus::Basic
    }
}

/// The unified per-variable state: structural columns `0..number_columns`, then one row
/// variable per constraint row.
///
/// `lower`/`upper` are the working bounds, which may be fake; `lower_saved`/`upper_saved` are
/// the true bounds. `cost` is the working cost, which may be modified or perturbed;
/// `cost_saved` is the true cost.
#[derive(Clone, Debug)]
pub struct VariableSet {
    pub(crate) number_columns: usize,
    pub(crate) number_rows: usize,

    pub(crate) lower: Vec<f64>,
    pub(crate) upper: Vec<f64>,
    pub(crate) lower_saved: Vec<f64>,
    pub(crate) upper_saved: Vec<f64>,
    pub(crate) cost: Vec<f64>,
    pub(crate) cost_saved: Vec<f64>,

    pub(crate) solution: Vec<f64>,
    pub(crate) dj: Vec<f64>,
    pub(crate) status: Vec<VariableStatus>,
    pub(crate) flagged: Vec<bool>,
}

impl VariableSet {
    pub fn new(
        cost: &[f64],
        column_lower: &[f64],
        column_upper: &[f64],
        row_lower: &[f64],
        row_upper: &[f64],
    ) -> Self {
        let number_columns = cost.len();
        let number_rows = row_lower.len();
        let number_total = number_columns + number_rows;

        let lower: Vec<f64> = column_lower.iter().chain(row_lower).copied().collect();
        let upper: Vec<f64> = column_upper.iter().chain(row_upper).copied().collect();
        let mut costs = cost.to_vec();
        costs.resize(number_total, 0.0);

        Self {
            number_columns,
            number_rows,
            lower_saved: lower.clone(),
            upper_saved: upper.clone(),
            lower,
            upper,
            cost_saved: costs.clone(),
            cost: costs,
            solution: vec![0.0; number_total],
            dj: vec![0.0; number_total],
            status: vec![VariableStatus::AtLowerBound; number_total],
            flagged: vec![false; number_total],
        }
    }

    pub fn number_total(&self) -> usize {
        self.number_columns + self.number_rows
    }

    pub fn is_row_variable(&self, variable: usize) -> bool {
        variable >= self.number_columns
    }

    /// Puts every non-basic variable on the bound (or value) its status asks for, choosing a
    /// finite status where the requested bound is infinite.
    pub fn place_nonbasic(&mut self) {
        for j in 0..self.number_total() {
            if self.status[j].is_basic() {
                continue;
            }
            self.status[j] = self.settle_status(j, self.status[j]);
            self.move_to_bound(j);
        }
    }

    /// A non-basic status for `j` that is consistent with its working bounds.
    pub fn settle_status(&self, j: usize, wanted: VariableStatus) -> VariableStatus {
        let (lower, upper) = (self.lower[j], self.upper[j]);
        if lower == upper {
            return VariableStatus::Fixed;
        }
        match (lower.is_finite(), upper.is_finite()) {
            (false, false) => VariableStatus::Free,
            (true, false) => VariableStatus::AtLowerBound,
            (false, true) => VariableStatus::AtUpperBound,
            (true, true) => match wanted {
                VariableStatus::AtUpperBound => VariableStatus::AtUpperBound,
                VariableStatus::SuperBasic | VariableStatus::Free => {
                    let value = self.solution[j];
                    if value > lower && value < upper {
                        VariableStatus::SuperBasic
                    } else if value >= upper {
                        VariableStatus::AtUpperBound
                    } else {
                        VariableStatus::AtLowerBound
                    }
                }
                _ => VariableStatus::AtLowerBound,
            },
        }
    }

    pub fn move_to_bound(&mut self, j: usize) {
        match self.status[j] {
            VariableStatus::AtLowerBound => self.solution[j] = self.lower[j],
            VariableStatus::AtUpperBound => self.solution[j] = self.upper[j],
            VariableStatus::Fixed => self.solution[j] = self.lower[j],
            VariableStatus::Free | VariableStatus::SuperBasic => {
                if !self.solution[j].is_finite() {
                    self.solution[j] = 0.0;
                }
            }
            VariableStatus::Basic => {}
        }
    }

    /// Keeps non-basic `j` at its current value, off its bounds.
    pub fn park(&mut self, j: usize) {
        self.status[j] = if self.lower[j].is_finite() || self.upper[j].is_finite() {
            VariableStatus::SuperBasic
        } else {
            VariableStatus::Free
        };
    }

    /// Whether the status of non-basic `j` names a bound that is infinite.
    pub fn at_infinite_bound(&self, j: usize) -> bool {
        match self.status[j] {
            VariableStatus::AtLowerBound => !self.lower[j].is_finite(),
            VariableStatus::AtUpperBound => !self.upper[j].is_finite(),
            _ => false,
        }
    }

    /// How far the reduced cost of non-basic `j` is on the wrong side for its status.
    pub fn dual_infeasibility(&self, j: usize, tolerance: f64) -> f64 {
        let dj = self.dj[j];
        match self.status[j] {
            VariableStatus::Basic | VariableStatus::Fixed => 0.0,
            VariableStatus::AtLowerBound => (-dj - tolerance).max(0.0),
            VariableStatus::AtUpperBound => (dj - tolerance).max(0.0),
            VariableStatus::Free | VariableStatus::SuperBasic => (dj.abs() - tolerance).max(0.0),
        }
    }

    /// `(count, sum)` of dual infeasibilities over the non-basic variables.
    pub fn sum_dual_infeasibilities(&self, tolerance: f64) -> (usize, f64) {
        (0..self.number_total())
            .map(|j| self.dual_infeasibility(j, tolerance))
            .filter(|&infeasibility| infeasibility > 0.0)
            .fold((0, 0.0), |(count, sum), infeasibility| {
                (count + 1, sum + infeasibility)
            })
    }

    /// `(count, sum)` of primal infeasibilities against the working bounds.
    pub fn sum_primal_infeasibilities(&self, tolerance: f64) -> (usize, f64) {
        izip!(&self.solution, &self.lower, &self.upper)
            .map(|(&value, &lower, &upper)| primal_infeasibility(value, lower, upper, tolerance))
            .filter(|&infeasibility| infeasibility > 0.0)
            .fold((0, 0.0), |(count, sum), infeasibility| {
                (count + 1, sum + infeasibility)
            })
    }

    /// Objective under the true costs.
    pub fn objective(&self) -> f64 {
        self.cost_saved
            .iter()
            .zip(&self.solution)
            .map(|(cost, value)| cost * value)
            .sum()
    }

    /// Objective under the working costs.
    pub fn working_objective(&self) -> f64 {
        self.cost
            .iter()
            .zip(&self.solution)
            .map(|(cost, value)| cost * value)
            .sum()
    }

    pub fn costs_modified(&self) -> bool {
        self.cost != self.cost_saved
    }

    pub fn restore_costs(&mut self) {
        self.cost.copy_from_slice(&self.cost_saved);
    }

    pub fn restore_bounds(&mut self, j: usize) {
        self.lower[j] = self.lower_saved[j];
        self.upper[j] = self.upper_saved[j];
    }

    /// Changes the working cost of `j` and its reduced cost by the same amount.
    pub fn modify_cost(&mut self, j: usize, change: f64) {
        self.cost[j] += change;
        self.dj[j] += change;
    }

    pub fn number_flagged(&self) -> usize {
        self.flagged.iter().filter(|&&flag| flag).count()
    }

    pub fn clear_flags(&mut self) {
        self.flagged.iter_mut().for_each(|flag| *flag = false);
    }
}

/// Distance of `value` outside `[lower, upper]` beyond `tolerance`, or zero.
#[inline]
pub fn primal_infeasibility(value: f64, lower: f64, upper: f64, tolerance: f64) -> f64 {
    if value < lower - tolerance {
        lower - value
    } else if value > upper + tolerance {
        value - upper
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example() -> VariableSet {
        // columns: [0, 5], [0, inf), (-inf, inf); one row [2, inf)
        VariableSet::new(
            &[1.0, -1.0, 0.0],
            &[0.0, 0.0, f64::NEG_INFINITY],
            &[5.0, f64::INFINITY, f64::INFINITY],
            &[2.0],
            &[f64::INFINITY],
        )
    }

    #[test]
    fn unified_index_space() {
        let variables = example();
        assert_eq!(variables.number_total(), 4);
        assert!(variables.is_row_variable(3));
        assert_eq!(variables.lower[3], 2.0);
        assert_eq!(variables.cost[3], 0.0);
    }

    #[test]
    fn settle_status_respects_bounds() {
        let mut variables = example();
        variables.status[0] = VariableStatus::AtUpperBound;
        variables.status[1] = VariableStatus::AtUpperBound;
        variables.status[3] = VariableStatus::Basic;
        variables.place_nonbasic();

        assert_eq!(variables.status[0], VariableStatus::AtUpperBound);
        assert_eq!(variables.solution[0], 5.0);
        assert_eq!(variables.status[1], VariableStatus::AtLowerBound);
        assert_eq!(variables.status[2], VariableStatus::Free);
        assert_eq!(variables.status[3], VariableStatus::Basic);
    }

    #[test]
    fn infeasibility_sums() {
        let mut variables = example();
        variables.status[3] = VariableStatus::Basic;
        variables.place_nonbasic();
        variables.dj = vec![-1.0, 2.0, 0.5, 0.0];

        let (count, sum) = variables.sum_dual_infeasibilities(1e-7);
        assert_eq!(count, 2);
        assert!((sum - 1.5).abs() < 1e-6);

        let (count, sum) = variables.sum_primal_infeasibilities(1e-7);
        assert_eq!(count, 1);
        assert_eq!(sum, 2.0);
    }

    #[test]
    fn park_keeps_value() {
        let mut variables = example();
        variables.status[1] = VariableStatus::AtUpperBound;
        variables.solution[1] = 7.0;
        assert!(variables.at_infinite_bound(1));
        variables.park(1);
        assert_eq!(variables.status[1], VariableStatus::SuperBasic);
        variables.move_to_bound(1);
        assert_eq!(variables.solution[1], 7.0);
        variables.park(2);
        assert_eq!(variables.status[2], VariableStatus::Free);
    }

    #[test]
    fn modify_and_restore_costs() {
        let mut variables = example();
        variables.modify_cost(0, 0.25);
        assert!(variables.costs_modified());
        assert_eq!(variables.dj[0], 0.25);
        variables.restore_costs();
        assert!(!variables.costs_modified());
    }
}
