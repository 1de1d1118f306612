/*!
Linear programming on top of the bounded-variable dual simplex.

[Linear programming](https://en.wikipedia.org/wiki/Linear_programming) is a technique for
finding the minimum (or maximum) of a linear function of a set of continuous variables
subject to linear equality and inequality constraints.

# Entry points

Begin by creating a [`Problem`](struct.Problem.html) instance, declaring variables and adding
constraints. Solving it produces a [`Solution`](struct.Solution.html) that carries the final
status, the objective value, variable values, duals and, for infeasible or unbounded problems,
a ray. The solution keeps the solver, so bounds can be changed and the problem re-solved from
the last basis.

# Example

```
# use dual_simplex::optimisation_algorithms::{dual_simplex::SolveStatus, linear_programming::*};
// Maximise an objective function x + 2 * y of two variables x >= 0 and 0 <= y <= 3
let mut problem = Problem::new(OptimisationDirection::Maximise);
let x = problem.add_var(1.0, (0.0, f64::INFINITY));
let y = problem.add_var(2.0, (0.0, 3.0));

// subject to constraints: x + y <= 4 and 2 * x + y >= 2.
problem.add_constraint(&[(x, 1.0), (y, 1.0)], ComparisonOp::Le, 4.0);
problem.add_constraint(&[(x, 2.0), (y, 1.0)], ComparisonOp::Ge, 2.0);

// Optimal value is 7, achieved at x = 1 and y = 3.
let solution = problem.solve().unwrap();
assert_eq!(solution.status(), SolveStatus::Optimal);
assert!((solution.objective() - 7.0).abs() < 1e-9);
assert!((solution[x] - 1.0).abs() < 1e-9);
assert!((solution[y] - 3.0).abs() < 1e-9);
```
*/

#![deny(missing_debug_implementations, missing_docs)]

use anyhow::{Context, Result, anyhow};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sprs::{CsMat, TriMat};

use crate::{
    math::column_matrix::ColumnMatrix,
    optimisation_algorithms::{
        dual_simplex::{DualSimplex, LimitReason, Ray, SolveStatus},
        dual_simplex_config::SolverConfig,
        dual_simplex_variables::VariableStatus,
    },
};

/// An enum indicating whether to minimise or maximise objective function.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimisationDirection {
    /// Minimise the objective function.
    #[default]
    Minimise,
    /// Maximise the objective function.
    Maximise,
}

impl OptimisationDirection {
    fn sign(self) -> f64 {
        match self {
            OptimisationDirection::Minimise => 1.0,
            OptimisationDirection::Maximise => -1.0,
        }
    }
}

/// A reference to a variable in a linear programming problem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Variable(pub(crate) usize);

impl Variable {
    /// Sequence number of the variable.
    ///
    /// Variables are referenced by their number in the addition sequence. The method returns
    /// this number.
    pub fn idx(&self) -> usize {
        self.0
    }
}

/// A sum of variables multiplied by constant coefficients used as a left-hand side
/// when defining constraints.
#[derive(Clone, Debug, Default)]
pub struct LinearExpr {
    vars: Vec<usize>,
    coeffs: Vec<f64>,
}

impl LinearExpr {
    /// Creates an empty linear expression.
    pub fn empty() -> Self {
        Self {
            vars: vec![],
            coeffs: vec![],
        }
    }

    /// Add a single term to the linear expression.
    ///
    /// Variables can be added to an expression in any order, but adding the same variable
    /// several times is an error reported when the problem is solved.
    pub fn add(&mut self, var: Variable, coeff: f64) {
        self.vars.push(var.0);
        self.coeffs.push(coeff);
    }
}

/// A single `variable * constant` term in a linear expression.
/// This is an auxiliary struct for specifying conversions.
#[doc(hidden)]
#[derive(Clone, Copy, Debug)]
pub struct LinearTerm(Variable, f64);

impl From<(Variable, f64)> for LinearTerm {
    fn from(term: (Variable, f64)) -> Self {
        LinearTerm(term.0, term.1)
    }
}

impl<'a> From<&'a (Variable, f64)> for LinearTerm {
    fn from(term: &'a (Variable, f64)) -> Self {
        LinearTerm(term.0, term.1)
    }
}

impl<I: IntoIterator<Item = impl Into<LinearTerm>>> From<I> for LinearExpr {
    fn from(iter: I) -> Self {
        let mut expr = LinearExpr::empty();
        for term in iter {
            let LinearTerm(var, coeff) = term.into();
            expr.add(var, coeff);
        }
        expr
    }
}

impl std::iter::FromIterator<(Variable, f64)> for LinearExpr {
    fn from_iter<I: IntoIterator<Item = (Variable, f64)>>(iter: I) -> Self {
        let mut expr = LinearExpr::empty();
        for term in iter {
            expr.add(term.0, term.1)
        }
        expr
    }
}

impl std::iter::Extend<(Variable, f64)> for LinearExpr {
    fn extend<I: IntoIterator<Item = (Variable, f64)>>(&mut self, iter: I) {
        for term in iter {
            self.add(term.0, term.1)
        }
    }
}

/// An operator specifying the relation between left-hand and right-hand sides of the constraint.
#[derive(Clone, Copy, Debug)]
pub enum ComparisonOp {
    /// The == operator (equal to)
    Eq,
    /// The <= operator (less than or equal to)
    Le,
    /// The >= operator (greater than or equal to)
    Ge,
}

impl ComparisonOp {
    fn bounds(self, rhs: f64) -> (f64, f64) {
        match self {
            ComparisonOp::Eq => (rhs, rhs),
            ComparisonOp::Le => (f64::NEG_INFINITY, rhs),
            ComparisonOp::Ge => (rhs, f64::INFINITY),
        }
    }
}

/// A linear programming problem under construction.
#[derive(Clone)]
pub struct Problem {
    direction: OptimisationDirection,
    obj_coeffs: Vec<f64>,
    var_mins: Vec<f64>,
    var_maxs: Vec<f64>,
    constraints: Vec<(LinearExpr, f64, f64)>,
    initial_status: Option<Vec<VariableStatus>>,
}

impl std::fmt::Debug for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Only printing lengths here because actual data is probably huge.
        f.debug_struct("Problem")
            .field("direction", &self.direction)
            .field("num_vars", &self.obj_coeffs.len())
            .field("num_constraints", &self.constraints.len())
            .finish()
    }
}

impl Problem {
    /// Create a new problem instance.
    pub fn new(direction: OptimisationDirection) -> Self {
        Problem {
            direction,
            obj_coeffs: vec![],
            var_mins: vec![],
            var_maxs: vec![],
            constraints: vec![],
            initial_status: None,
        }
    }

    /// Add a new variable to the problem.
    ///
    /// `obj_coeff` is a coefficient of the term in the objective function corresponding to this
    /// variable, `min` and `max` are the minimum and maximum (inclusive) bounds of this
    /// variable. If one of the bounds is absent, use `f64::NEG_INFINITY` for minimum and
    /// `f64::INFINITY` for maximum.
    pub fn add_var(&mut self, obj_coeff: f64, (min, max): (f64, f64)) -> Variable {
        let var = Variable(self.obj_coeffs.len());
        self.obj_coeffs.push(obj_coeff);
        self.var_mins.push(min);
        self.var_maxs.push(max);
        var
    }

    /// Add a linear constraint to the problem.
    ///
    /// # Examples
    ///
    /// Left-hand side of the constraint can be specified in several ways:
    /// ```
    /// # use dual_simplex::optimisation_algorithms::linear_programming::*;
    /// let mut problem = Problem::new(OptimisationDirection::Minimise);
    /// let x = problem.add_var(1.0, (0.0, f64::INFINITY));
    /// let y = problem.add_var(1.0, (0.0, f64::INFINITY));
    ///
    /// // Add an x + y >= 2 constraint, specifying the left-hand side expression:
    ///
    /// // * by passing a slice of pairs (useful when explicitly enumerating variables)
    /// problem.add_constraint(&[(x, 1.0), (y, 1.0)], ComparisonOp::Ge, 2.0);
    ///
    /// // * by passing an iterator of variable-coefficient pairs.
    /// let vars = [x, y];
    /// problem.add_constraint(vars.iter().map(|&v| (v, 1.0)), ComparisonOp::Ge, 2.0);
    ///
    /// // * by manually constructing a LinearExpr.
    /// let mut lhs = LinearExpr::empty();
    /// for &v in &vars {
    ///     lhs.add(v, 1.0);
    /// }
    /// problem.add_constraint(lhs, ComparisonOp::Ge, 2.0);
    /// ```
    pub fn add_constraint(&mut self, expr: impl Into<LinearExpr>, cmp_op: ComparisonOp, rhs: f64) {
        let (min, max) = cmp_op.bounds(rhs);
        self.constraints.push((expr.into(), min, max));
    }

    /// Add a constraint `min <= expr <= max`.
    pub fn add_range_constraint(&mut self, expr: impl Into<LinearExpr>, (min, max): (f64, f64)) {
        self.constraints.push((expr.into(), min, max));
    }

    /// Start the solve from the given basis: one status per variable, then one per constraint.
    pub fn set_initial_status(&mut self, status: Vec<VariableStatus>) {
        self.initial_status = Some(status);
    }

    /// Number of variables added so far.
    pub fn num_vars(&self) -> usize {
        self.obj_coeffs.len()
    }

    /// Number of constraints added so far.
    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    /// Builds the column-major model in minimisation form, checking the input.
    pub fn to_model(&self) -> Result<LpModel> {
        LpModel::new(self)
    }

    /// Solve the problem with the default configuration.
    ///
    /// # Errors
    ///
    /// Will return an error if the problem is malformed. Infeasible, unbounded and unfinished
    /// solves are reported through [`Solution::status`].
    pub fn solve(&self) -> Result<Solution> {
        self.solve_with_config(SolverConfig::default())
    }

    /// Solve the problem with the given configuration.
    pub fn solve_with_config(&self, config: SolverConfig) -> Result<Solution> {
        let model = self.to_model()?;
        let mut solver = model.into_solver(config)?;
        if let Some(status) = &self.initial_status {
            solver
                .set_initial_status(status)
                .context("invalid initial basis")?;
        }
        let status = solver.solve();
        Ok(Solution {
            direction: self.direction,
            status,
            var_mins: self.var_mins.clone(),
            var_maxs: self.var_maxs.clone(),
            solver,
        })
    }
}

/// A problem in minimisation form with a compressed-column constraint matrix.
#[derive(Clone, Debug)]
pub struct LpModel {
    /// Constraint matrix, one column per variable (CSC).
    pub matrix: CsMat<f64>,
    /// Costs in minimisation sense.
    pub cost: Vec<f64>,
    /// Lower bounds of the variables.
    pub column_lower: Vec<f64>,
    /// Upper bounds of the variables.
    pub column_upper: Vec<f64>,
    /// Lower bounds of the constraint activities.
    pub row_lower: Vec<f64>,
    /// Upper bounds of the constraint activities.
    pub row_upper: Vec<f64>,
}

impl LpModel {
    fn new(problem: &Problem) -> Result<Self> {
        let num_vars = problem.num_vars();
        let num_constraints = problem.num_constraints();
        let mut triplets = TriMat::new((num_constraints, num_vars));
        for (row, (expr, min, max)) in problem.constraints.iter().enumerate() {
            if min.is_nan() || max.is_nan() {
                return Err(anyhow!("constraint {} has a NaN bound", row));
            }
            if let Some(var) = expr.vars.iter().duplicates().next() {
                return Err(anyhow!(
                    "variable {} appears more than once in constraint {}",
                    var,
                    row
                ));
            }
            for (&var, &coeff) in expr.vars.iter().zip(&expr.coeffs) {
                if var >= num_vars {
                    return Err(anyhow!(
                        "constraint {} refers to variable {}, but there are {} variables",
                        row,
                        var,
                        num_vars
                    ));
                }
                if !coeff.is_finite() {
                    return Err(anyhow!(
                        "coefficient of variable {} in constraint {} is {}",
                        var,
                        row,
                        coeff
                    ));
                }
                if coeff != 0.0 {
                    triplets.add_triplet(row, var, coeff);
                }
            }
        }

        let sign = problem.direction.sign();
        Ok(Self {
            matrix: triplets.to_csc(),
            cost: problem.obj_coeffs.iter().map(|c| sign * c).collect(),
            column_lower: problem.var_mins.clone(),
            column_upper: problem.var_maxs.clone(),
            row_lower: problem.constraints.iter().map(|(_, min, _)| *min).collect(),
            row_upper: problem.constraints.iter().map(|(_, _, max)| *max).collect(),
        })
    }

    /// A dual simplex solver on this model, positioned at the slack basis.
    pub fn into_solver(self, config: SolverConfig) -> Result<DualSimplex> {
        let matrix = ColumnMatrix::from_csmat(&self.matrix)?;
        DualSimplex::new(
            matrix,
            &self.cost,
            &self.column_lower,
            &self.column_upper,
            &self.row_lower,
            &self.row_upper,
            config,
        )
    }
}

/// The outcome of a solve: status, objective function value, variable values and duals.
///
/// Note that a `Solution` instance contains the whole solver machinery which can require
/// a lot of memory for larger problems. Keeping it is mainly useful to change bounds and
/// re-solve from the last basis.
pub struct Solution {
    direction: OptimisationDirection,
    status: SolveStatus,
    var_mins: Vec<f64>,
    var_maxs: Vec<f64>,
    solver: DualSimplex,
}

impl std::fmt::Debug for Solution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Only printing lengths here because actual data is probably huge.
        f.debug_struct("Solution")
            .field("direction", &self.direction)
            .field("status", &self.status)
            .field("num_vars", &self.solver.number_columns())
            .field("num_constraints", &self.solver.number_rows())
            .field("objective", &self.objective())
            .finish()
    }
}

impl Solution {
    /// How the last solve ended.
    pub fn status(&self) -> SolveStatus {
        self.status
    }

    /// Value of the objective function, in the direction of the problem.
    pub fn objective(&self) -> f64 {
        self.direction.sign() * self.solver.objective_value()
    }

    /// Value of the variable.
    ///
    /// Note that you can use indexing operations to get variable values.
    pub fn var_value(&self, var: Variable) -> f64 {
        self.solver.column_values()[var.0]
    }

    /// Iterate over the variable-value pairs of the solution.
    pub fn iter(&self) -> SolutionIter<'_> {
        SolutionIter {
            solution: self,
            var_idx: 0,
        }
    }

    /// Value of each constraint's left-hand side.
    pub fn row_activities(&self) -> &[f64] {
        self.solver.row_activities()
    }

    /// Dual price of each constraint, in the direction of the problem.
    pub fn row_duals(&self) -> Vec<f64> {
        let sign = self.direction.sign();
        self.solver.row_duals().iter().map(|d| sign * d).collect()
    }

    /// Reduced cost of each variable, in the direction of the problem.
    pub fn reduced_costs(&self) -> Vec<f64> {
        let sign = self.direction.sign();
        self.solver.reduced_costs().iter().map(|d| sign * d).collect()
    }

    /// Status of every variable followed by every constraint; can seed another solve through
    /// [`Problem::set_initial_status`].
    pub fn variable_status(&self) -> &[VariableStatus] {
        self.solver.variable_status()
    }

    /// Number of dual simplex iterations of the last solve.
    pub fn iterations(&self) -> usize {
        self.solver.iterations()
    }

    /// Certificate of infeasibility (row multipliers) or unboundedness (variable direction).
    pub fn ray(&self) -> Option<&Ray> {
        self.solver.ray()
    }

    /// Which limit stopped the last solve, if any.
    pub fn limit_reason(&self) -> Option<LimitReason> {
        self.solver.limit_reason()
    }

    /// How often the fake-bound window was widened during the last solve.
    pub fn widenings(&self) -> usize {
        self.solver.widenings()
    }

    /// Change the bounds of a variable and re-solve from the current basis.
    pub fn set_var_bounds(mut self, var: Variable, (min, max): (f64, f64)) -> Result<Self> {
        self.solver.set_column_bounds(var.0, min, max)?;
        self.status = self.solver.solve();
        Ok(self)
    }

    /// Fix the variable to the specified value and re-solve from the current basis.
    pub fn fix_var(self, var: Variable, val: f64) -> Result<Self> {
        self.set_var_bounds(var, (val, val))
    }

    /// Put back the bounds the variable was declared with and re-solve, returning whether the
    /// bounds had been changed.
    pub fn unfix_var(self, var: Variable) -> Result<(Self, bool)> {
        let (min, max) = (self.var_mins[var.0], self.var_maxs[var.0]);
        let fixed = self.solver.column_bounds(var.0) != (min, max);
        let solution = self.set_var_bounds(var, (min, max))?;
        Ok((solution, fixed))
    }
}

impl std::ops::Index<Variable> for Solution {
    type Output = f64;

    fn index(&self, var: Variable) -> &Self::Output {
        &self.solver.column_values()[var.0]
    }
}

/// An iterator over the variable-value pairs of a [`Solution`].
#[derive(Debug, Clone)]
pub struct SolutionIter<'a> {
    solution: &'a Solution,
    var_idx: usize,
}

impl Iterator for SolutionIter<'_> {
    type Item = (Variable, f64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.var_idx < self.solution.solver.number_columns() {
            let var_idx = self.var_idx;
            self.var_idx += 1;
            Some((Variable(var_idx), self.solution.var_value(Variable(var_idx))))
        } else {
            None
        }
    }
}

impl<'a> IntoIterator for &'a Solution {
    type Item = (Variable, f64);
    type IntoIter = SolutionIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A problem as read from a JSON file.
///
/// A missing variable lower bound means 0 and `null` means no lower bound; a missing or `null`
/// upper bound means no upper bound. Missing constraint bounds are absent.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProblemFile {
    /// Minimise or maximise.
    #[serde(default)]
    pub direction: OptimisationDirection,
    /// The variables, in order.
    pub variables: Vec<VariableSpec>,
    /// The constraints, in order.
    #[serde(default)]
    pub constraints: Vec<ConstraintSpec>,
}

/// A variable of a [`ProblemFile`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VariableSpec {
    /// Optional label, used when printing the solution.
    #[serde(default)]
    pub name: Option<String>,
    /// Objective coefficient.
    #[serde(default)]
    pub cost: f64,
    /// Lower bound.
    #[serde(default = "zero_bound")]
    pub lower: Option<f64>,
    /// Upper bound.
    #[serde(default)]
    pub upper: Option<f64>,
}

fn zero_bound() -> Option<f64> {
    Some(0.0)
}

/// A constraint `lower <= Σ coefficient × variable <= upper` of a [`ProblemFile`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConstraintSpec {
    /// Optional label.
    #[serde(default)]
    pub name: Option<String>,
    /// `(variable index, coefficient)` pairs.
    pub terms: Vec<(usize, f64)>,
    /// Lower bound on the activity.
    #[serde(default)]
    pub lower: Option<f64>,
    /// Upper bound on the activity.
    #[serde(default)]
    pub upper: Option<f64>,
}

impl ProblemFile {
    /// Parses a problem from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("could not parse the problem file")
    }

    /// Builds the [`Problem`], checking variable references.
    pub fn to_problem(&self) -> Result<Problem> {
        let mut problem = Problem::new(self.direction);
        let vars: Vec<Variable> = self
            .variables
            .iter()
            .map(|spec| {
                problem.add_var(
                    spec.cost,
                    (
                        spec.lower.unwrap_or(f64::NEG_INFINITY),
                        spec.upper.unwrap_or(f64::INFINITY),
                    ),
                )
            })
            .collect();
        for (row, spec) in self.constraints.iter().enumerate() {
            let mut expr = LinearExpr::empty();
            for &(var, coeff) in &spec.terms {
                let var = *vars.get(var).with_context(|| {
                    format!(
                        "constraint {} refers to variable {}, but there are {} variables",
                        spec.name.clone().unwrap_or_else(|| row.to_string()),
                        var,
                        vars.len()
                    )
                })?;
                expr.add(var, coeff);
            }
            problem.add_range_constraint(
                expr,
                (
                    spec.lower.unwrap_or(f64::NEG_INFINITY),
                    spec.upper.unwrap_or(f64::INFINITY),
                ),
            );
        }
        Ok(problem)
    }

    /// Label of variable `index`.
    pub fn variable_name(&self, index: usize) -> String {
        self.variables
            .get(index)
            .and_then(|spec| spec.name.clone())
            .unwrap_or_else(|| format!("x{}", index))
    }
}
